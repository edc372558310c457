// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite implementation of the record store.
//
// Pages, classifications, attempts, fused results and review tasks live in
// one database. Image bytes are not stored: a page carries the SHA-256 of its
// bytes and the caller keeps the payload. Superseded rows are flagged, never
// deleted, so the full history of a page can be replayed.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{
    AttemptId, ClassificationResult, DocumentId, EngineAttempt, EngineId, FusedId, FusedResult,
    Page, PageId, PageStatus, Resolution, ReviewTask, ReviewTaskId, ReviewTaskStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::store::RecordStore;

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS pages (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        page_index INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        format TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS pages_by_document ON pages (document_id, page_index);

    CREATE TABLE IF NOT EXISTS classifications (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        page_id TEXT NOT NULL REFERENCES pages (id),
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        degraded INTEGER NOT NULL,
        classified_at TEXT NOT NULL,
        superseded INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS attempts (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL REFERENCES pages (id),
        engine_id TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        outcome TEXT NOT NULL,
        text TEXT NOT NULL,
        confidence REAL NOT NULL,
        boxes TEXT NOT NULL DEFAULT '[]',
        error TEXT
    );
    CREATE INDEX IF NOT EXISTS attempts_by_page ON attempts (page_id);

    CREATE TABLE IF NOT EXISTS fused_results (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        page_id TEXT NOT NULL REFERENCES pages (id),
        text TEXT NOT NULL,
        confidence REAL NOT NULL,
        support REAL NOT NULL,
        method TEXT NOT NULL,
        low_certainty INTEGER NOT NULL,
        contributing TEXT NOT NULL,
        computed_at TEXT NOT NULL,
        superseded INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS review_tasks (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL REFERENCES pages (id),
        fused_id TEXT,
        reason TEXT NOT NULL,
        status TEXT NOT NULL,
        opened_at TEXT NOT NULL,
        resolved_at TEXT,
        corrected_text TEXT,
        note TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS one_open_review_per_page
        ON review_tasks (page_id) WHERE status = 'Open';
"#;

const PAGE_COLUMNS: &str =
    "id, document_id, page_index, width, height, format, content_hash, created_at";
const ATTEMPT_COLUMNS: &str = "id, page_id, engine_id, attempt, started_at, finished_at, outcome, \
     text, confidence, boxes, error";
const FUSED_COLUMNS: &str =
    "id, page_id, text, confidence, support, method, low_certainty, contributing, computed_at";
const REVIEW_COLUMNS: &str =
    "id, page_id, fused_id, reason, status, opened_at, resolved_at, corrected_text, note";

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> LecternError {
    move |e| LecternError::Database(format!("{context}: {e}"))
}

/// Record store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(db_err("create schema"))?;

        info!("record store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(db_err("create schema"))?;

        debug!("in-memory record store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // rusqlite calls do not panic while holding the guard; a poisoned lock
        // still wraps a usable connection.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn page_exists(conn: &Connection, id: &PageId) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM pages WHERE id = ?1",
        params![id.to_string()],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(db_err("page lookup"))
}

fn require_page(conn: &Connection, id: &PageId) -> Result<()> {
    if page_exists(conn, id)? {
        Ok(())
    } else {
        Err(LecternError::PageNotFound(*id))
    }
}

fn current_fused_id(conn: &Connection, page_id: &PageId) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM fused_results WHERE page_id = ?1 AND superseded = 0",
        params![page_id.to_string()],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err("current fused id"))
}

fn fetch_review(conn: &Connection, id: &ReviewTaskId) -> Result<Option<ReviewTask>> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM review_tasks WHERE id = ?1"),
        params![id.to_string()],
        row_to_review,
    )
    .optional()
    .map_err(db_err("get review"))
}

impl RecordStore for SqliteStore {
    #[instrument(skip(self, page), fields(page_id = %page.id))]
    fn insert_page(&self, page: &Page) -> Result<()> {
        let now = timestamp(&Utc::now());
        self.conn()
            .execute(
                "INSERT INTO pages (id, document_id, page_index, width, height, format,
                 content_hash, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    page.id.to_string(),
                    page.document_id.to_string(),
                    page.page_index,
                    page.width,
                    page.height,
                    enum_text(&page.format)?,
                    page.content_hash,
                    enum_text(&PageStatus::Received)?,
                    timestamp(&page.created_at),
                    now,
                ],
            )
            .map_err(db_err("insert page"))?;

        debug!("page stored");
        Ok(())
    }

    fn get_page(&self, id: &PageId) -> Result<Option<Page>> {
        self.conn()
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
                params![id.to_string()],
                row_to_page,
            )
            .optional()
            .map_err(db_err("get page"))
    }

    fn pages_for_document(&self, document_id: &DocumentId) -> Result<Vec<Page>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM pages WHERE document_id = ?1 ORDER BY page_index ASC"
            ))
            .map_err(db_err("prepare pages_for_document"))?;
        let pages = stmt
            .query_map(params![document_id.to_string()], row_to_page)
            .map_err(db_err("query pages_for_document"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect pages"))?;
        Ok(pages)
    }

    #[instrument(skip(self), fields(page_id = %id))]
    fn set_page_status(&self, id: &PageId, status: PageStatus) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE pages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![enum_text(&status)?, timestamp(&Utc::now()), id.to_string()],
            )
            .map_err(db_err("update page status"))?;
        if rows == 0 {
            return Err(LecternError::PageNotFound(*id));
        }
        debug!(?status, "page status updated");
        Ok(())
    }

    fn page_status(&self, id: &PageId) -> Result<Option<PageStatus>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM pages WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("page status"))?;
        status
            .map(|s| parse_enum_text(&s).map_err(db_err("page status")))
            .transpose()
    }

    #[instrument(skip(self, result), fields(page_id = %result.page_id, label = result.label.as_str()))]
    fn append_classification(&self, result: &ClassificationResult) -> Result<()> {
        let mut conn = self.conn();
        require_page(&conn, &result.page_id)?;

        let tx = conn.transaction().map_err(db_err("begin"))?;
        tx.execute(
            "UPDATE classifications SET superseded = 1 WHERE page_id = ?1 AND superseded = 0",
            params![result.page_id.to_string()],
        )
        .map_err(db_err("supersede classification"))?;
        tx.execute(
            "INSERT INTO classifications (page_id, label, confidence, degraded, classified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.page_id.to_string(),
                enum_text(&result.label)?,
                result.confidence,
                result.degraded,
                timestamp(&result.classified_at),
            ],
        )
        .map_err(db_err("insert classification"))?;
        tx.commit().map_err(db_err("commit"))?;
        Ok(())
    }

    fn current_classification(&self, page_id: &PageId) -> Result<Option<ClassificationResult>> {
        self.conn()
            .query_row(
                "SELECT page_id, label, confidence, degraded, classified_at
                 FROM classifications WHERE page_id = ?1 AND superseded = 0",
                params![page_id.to_string()],
                |row| {
                    Ok(ClassificationResult {
                        page_id: PageId(parse_uuid(row, 0)?),
                        label: parse_enum_column(row, 1)?,
                        confidence: row.get(2)?,
                        degraded: row.get(3)?,
                        classified_at: parse_time(row, 4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("current classification"))
    }

    #[instrument(skip(self, attempt), fields(page_id = %attempt.page_id, engine = %attempt.engine_id))]
    fn append_attempt(&self, attempt: &EngineAttempt) -> Result<()> {
        let conn = self.conn();
        require_page(&conn, &attempt.page_id)?;

        conn.execute(
            "INSERT INTO attempts (id, page_id, engine_id, attempt, started_at, finished_at,
             outcome, text, confidence, boxes, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                attempt.id.to_string(),
                attempt.page_id.to_string(),
                attempt.engine_id.as_str(),
                attempt.attempt,
                timestamp(&attempt.started_at),
                timestamp(&attempt.finished_at),
                enum_text(&attempt.outcome)?,
                attempt.text,
                attempt.confidence,
                serde_json::to_string(&attempt.boxes)?,
                attempt.error,
            ],
        )
        .map_err(db_err("insert attempt"))?;
        Ok(())
    }

    fn attempts_for_page(&self, page_id: &PageId) -> Result<Vec<EngineAttempt>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE page_id = ?1
                 ORDER BY started_at ASC, engine_id ASC, attempt ASC"
            ))
            .map_err(db_err("prepare attempts_for_page"))?;
        let attempts = stmt
            .query_map(params![page_id.to_string()], row_to_attempt)
            .map_err(db_err("query attempts_for_page"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect attempts"))?;
        Ok(attempts)
    }

    #[instrument(skip(self, fused), fields(page_id = %fused.page_id, fused_id = %fused.id))]
    fn append_fused(&self, fused: &FusedResult) -> Result<()> {
        let mut conn = self.conn();
        require_page(&conn, &fused.page_id)?;

        for attempt_id in &fused.contributing {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT page_id FROM attempts WHERE id = ?1",
                    params![attempt_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("attempt owner"))?;
            if owner.as_deref() != Some(fused.page_id.to_string().as_str()) {
                return Err(LecternError::AttemptPageMismatch(fused.page_id));
            }
        }

        if current_fused_id(&conn, &fused.page_id)?.as_deref() == Some(fused.id.to_string().as_str()) {
            debug!("fused result already current");
            return Ok(());
        }

        let tx = conn.transaction().map_err(db_err("begin"))?;
        tx.execute(
            "UPDATE fused_results SET superseded = 1 WHERE page_id = ?1 AND superseded = 0",
            params![fused.page_id.to_string()],
        )
        .map_err(db_err("supersede fused result"))?;
        tx.execute(
            "INSERT INTO fused_results (id, page_id, text, confidence, support, method,
             low_certainty, contributing, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                fused.id.to_string(),
                fused.page_id.to_string(),
                fused.text,
                fused.confidence,
                fused.support,
                enum_text(&fused.method)?,
                fused.low_certainty,
                serde_json::to_string(&fused.contributing)?,
                timestamp(&fused.computed_at),
            ],
        )
        .map_err(db_err("insert fused result"))?;
        tx.commit().map_err(db_err("commit"))?;

        debug!(method = fused.method.as_str(), "fused result stored");
        Ok(())
    }

    fn current_fused(&self, page_id: &PageId) -> Result<Option<FusedResult>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {FUSED_COLUMNS} FROM fused_results WHERE page_id = ?1 AND superseded = 0"
                ),
                params![page_id.to_string()],
                row_to_fused,
            )
            .optional()
            .map_err(db_err("current fused"))
    }

    fn fused_history(&self, page_id: &PageId) -> Result<Vec<FusedResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FUSED_COLUMNS} FROM fused_results WHERE page_id = ?1 ORDER BY seq ASC"
            ))
            .map_err(db_err("prepare fused_history"))?;
        let history = stmt
            .query_map(params![page_id.to_string()], row_to_fused)
            .map_err(db_err("query fused_history"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect fused results"))?;
        Ok(history)
    }

    #[instrument(skip(self, task), fields(page_id = %task.page_id, task_id = %task.id))]
    fn open_review(&self, task: &ReviewTask) -> Result<()> {
        let conn = self.conn();
        require_page(&conn, &task.page_id)?;

        let already_open = conn
            .query_row(
                "SELECT 1 FROM review_tasks WHERE page_id = ?1 AND status = 'Open'",
                params![task.page_id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err("open review lookup"))?;
        if already_open.is_some() {
            return Err(LecternError::ReviewAlreadyOpen(task.page_id));
        }

        conn.execute(
            "INSERT INTO review_tasks (id, page_id, fused_id, reason, status, opened_at,
             resolved_at, corrected_text, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id.to_string(),
                task.page_id.to_string(),
                task.fused_id.map(|id| id.to_string()),
                enum_text(&task.reason)?,
                enum_text(&task.status)?,
                timestamp(&task.opened_at),
                task.resolved_at.as_ref().map(timestamp),
                task.corrected_text,
                task.note,
            ],
        )
        .map_err(db_err("insert review task"))?;

        info!(reason = ?task.reason, "review task opened");
        Ok(())
    }

    #[instrument(skip(self, resolution), fields(task_id = %id))]
    fn resolve_review(&self, id: &ReviewTaskId, resolution: &Resolution) -> Result<ReviewTask> {
        let conn = self.conn();
        let mut task = fetch_review(&conn, id)?.ok_or(LecternError::ReviewNotFound(*id))?;
        if task.status != ReviewTaskStatus::Open {
            return Err(LecternError::ReviewResolved(*id));
        }

        match resolution {
            Resolution::Corrected { text } => {
                task.status = ReviewTaskStatus::Corrected;
                task.corrected_text = Some(text.clone());
            }
            Resolution::Rejected { note } => {
                task.status = ReviewTaskStatus::Rejected;
                task.note = note.clone();
            }
        }
        task.resolved_at = Some(Utc::now());

        conn.execute(
            "UPDATE review_tasks SET status = ?1, resolved_at = ?2, corrected_text = ?3, note = ?4
             WHERE id = ?5 AND status = 'Open'",
            params![
                enum_text(&task.status)?,
                task.resolved_at.as_ref().map(timestamp),
                task.corrected_text,
                task.note,
                id.to_string(),
            ],
        )
        .map_err(db_err("resolve review task"))?;

        info!(status = ?task.status, "review task resolved");
        Ok(task)
    }

    fn get_review(&self, id: &ReviewTaskId) -> Result<Option<ReviewTask>> {
        fetch_review(&self.conn(), id)
    }

    fn open_review_for_page(&self, page_id: &PageId) -> Result<Option<ReviewTask>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REVIEW_COLUMNS} FROM review_tasks WHERE page_id = ?1 AND status = 'Open'"
                ),
                params![page_id.to_string()],
                row_to_review,
            )
            .optional()
            .map_err(db_err("open review for page"))
    }

    fn open_reviews(&self) -> Result<Vec<ReviewTask>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM review_tasks WHERE status = 'Open' ORDER BY opened_at ASC"
            ))
            .map_err(db_err("prepare open_reviews"))?;
        let tasks = stmt
            .query_map([], row_to_review)
            .map_err(db_err("query open_reviews"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect review tasks"))?;
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Column encoding
// ---------------------------------------------------------------------------

/// RFC 3339 with nanoseconds, so timestamps round-trip exactly.
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Unit enum variant as its bare serde name (`Printed`, `single-engine`, ...).
fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn parse_enum_text<T: DeserializeOwned>(text: &str) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_owned()))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn conversion(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_enum_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(text)).map_err(|e| conversion(idx, e))
}

fn parse_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn parse_optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Row mapping (column order matches the *_COLUMNS constants)
// ---------------------------------------------------------------------------

fn row_to_page(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: PageId(parse_uuid(row, 0)?),
        document_id: DocumentId(parse_uuid(row, 1)?),
        page_index: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        format: parse_enum_column(row, 5)?,
        content_hash: row.get(6)?,
        created_at: parse_time(row, 7)?,
    })
}

fn row_to_attempt(row: &Row<'_>) -> rusqlite::Result<EngineAttempt> {
    Ok(EngineAttempt {
        id: AttemptId(parse_uuid(row, 0)?),
        page_id: PageId(parse_uuid(row, 1)?),
        engine_id: EngineId::new(row.get::<_, String>(2)?),
        attempt: row.get(3)?,
        started_at: parse_time(row, 4)?,
        finished_at: parse_time(row, 5)?,
        outcome: parse_enum_column(row, 6)?,
        text: row.get(7)?,
        confidence: row.get(8)?,
        boxes: parse_json_column(row, 9)?,
        error: row.get(10)?,
    })
}

fn row_to_fused(row: &Row<'_>) -> rusqlite::Result<FusedResult> {
    Ok(FusedResult {
        id: FusedId(parse_uuid(row, 0)?),
        page_id: PageId(parse_uuid(row, 1)?),
        text: row.get(2)?,
        confidence: row.get(3)?,
        support: row.get(4)?,
        method: parse_enum_column(row, 5)?,
        low_certainty: row.get(6)?,
        contributing: parse_json_column(row, 7)?,
        computed_at: parse_time(row, 8)?,
    })
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<ReviewTask> {
    let fused_id: Option<String> = row.get(2)?;
    Ok(ReviewTask {
        id: ReviewTaskId(parse_uuid(row, 0)?),
        page_id: PageId(parse_uuid(row, 1)?),
        fused_id: fused_id
            .map(|s| Uuid::parse_str(&s).map(FusedId).map_err(|e| conversion(2, e)))
            .transpose()?,
        reason: parse_enum_column(row, 3)?,
        status: parse_enum_column(row, 4)?,
        opened_at: parse_time(row, 5)?,
        resolved_at: parse_optional_time(row, 6)?,
        corrected_text: row.get(7)?,
        note: row.get(8)?,
    })
}
