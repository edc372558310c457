// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of every pipeline state transition.
//
// Schema:
//   audit_events(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     recorded_at TEXT NOT NULL,   -- RFC 3339, nanosecond precision
//     kind        TEXT NOT NULL,   -- e.g. "engine_attempt", "review_opened"
//     page_id     TEXT,            -- UUID, absent for engine-only events
//     engine_id   TEXT,
//     details     TEXT NOT NULL    -- JSON object
//   )
//
// Rows can be inserted and read, nothing else: triggers abort any UPDATE or
// DELETE, so history cannot be rewritten even by code holding the connection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lectern_core::error::{LecternError, Result};
use lectern_core::types::{AuditEvent, AuditKind, EngineId, PageId};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::sqlite::{parse_time, parse_uuid, timestamp};

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at TEXT NOT NULL,
        kind        TEXT NOT NULL,
        page_id     TEXT,
        engine_id   TEXT,
        details     TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS audit_events_by_page ON audit_events (page_id);

    CREATE TRIGGER IF NOT EXISTS audit_events_no_update
        BEFORE UPDATE ON audit_events
        BEGIN SELECT RAISE(ABORT, 'audit events are append-only'); END;
    CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
        BEFORE DELETE ON audit_events
        BEGIN SELECT RAISE(ABORT, 'audit events are append-only'); END;
"#;

const EVENT_COLUMNS: &str = "id, recorded_at, kind, page_id, engine_id, details";

fn db_err(e: rusqlite::Error) -> LecternError {
    LecternError::Database(e.to_string())
}

/// A stored audit event with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Append-only audit log backed by a SQLite database.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event. Returns its sequence number.
    #[instrument(skip(self, event), fields(kind = event.kind.as_str()))]
    pub fn record(&self, event: &AuditEvent) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_events (recorded_at, kind, page_id, engine_id, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                timestamp(&event.recorded_at),
                event.kind.as_str(),
                event.page_id.map(|id| id.to_string()),
                event.engine_id.as_ref().map(EngineId::as_str),
                serde_json::to_string(&event.details)?,
            ],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        debug!(id, "audit event recorded");
        Ok(id)
    }

    /// Every event for a page, in the order recorded.
    pub fn events_for_page(&self, page_id: &PageId) -> Result<Vec<AuditEntry>> {
        self.query(
            &format!("SELECT {EVENT_COLUMNS} FROM audit_events WHERE page_id = ?1 ORDER BY id ASC"),
            params![page_id.to_string()],
        )
    }

    /// Every event mentioning an engine, in the order recorded.
    pub fn events_for_engine(&self, engine_id: &EngineId) -> Result<Vec<AuditEntry>> {
        self.query(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM audit_events WHERE engine_id = ?1 ORDER BY id ASC"
            ),
            params![engine_id.as_str()],
        )
    }

    /// The most recent `limit` events, newest first.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.query(
            &format!("SELECT {EVENT_COLUMNS} FROM audit_events ORDER BY id DESC LIMIT ?1"),
            params![limit],
        )
    }

    pub fn count(&self) -> Result<u64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let entries = stmt
            .query_map(params, row_to_entry)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(entries)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let kind_text: String = row.get(2)?;
    let kind = AuditKind::parse(&kind_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown audit kind '{kind_text}'").into(),
        )
    })?;
    let page_id = match row.get::<_, Option<String>>(3)? {
        Some(_) => Some(PageId(parse_uuid(row, 3)?)),
        None => None,
    };
    let details_text: String = row.get(5)?;
    let details = serde_json::from_str(&details_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
    })?;

    Ok(AuditEntry {
        id: row.get(0)?,
        event: AuditEvent {
            kind,
            page_id,
            engine_id: row.get::<_, Option<String>>(4)?.map(EngineId::new),
            details,
            recorded_at: parse_time(row, 1)?,
        },
    })
}
