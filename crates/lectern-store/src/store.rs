// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistence contract for pipeline records.
//
// Records are created and appended, never edited: a new classification or
// fused result supersedes the previous one instead of overwriting it, and
// attempts are only ever added. The only mutable fields are the page status
// and the state of a review task.

use lectern_core::error::Result;
use lectern_core::types::{
    ClassificationResult, DocumentId, EngineAttempt, FusedResult, Page, PageId, PageStatus,
    Resolution, ReviewTask, ReviewTaskId,
};

/// Storage for pages and everything the pipeline derives from them.
///
/// Implementations are synchronous; async callers keep calls short or move
/// them to `spawn_blocking`.
pub trait RecordStore: Send + Sync {
    /// Store a new page with status [`PageStatus::Received`].
    fn insert_page(&self, page: &Page) -> Result<()>;

    fn get_page(&self, id: &PageId) -> Result<Option<Page>>;

    /// Pages of one document, ordered by page index.
    fn pages_for_document(&self, document_id: &DocumentId) -> Result<Vec<Page>>;

    /// Fails with `PageNotFound` for an unknown page.
    fn set_page_status(&self, id: &PageId, status: PageStatus) -> Result<()>;

    fn page_status(&self, id: &PageId) -> Result<Option<PageStatus>>;

    /// Append a classification; the previous one for the page is superseded.
    fn append_classification(&self, result: &ClassificationResult) -> Result<()>;

    fn current_classification(&self, page_id: &PageId) -> Result<Option<ClassificationResult>>;

    /// Append an attempt. The page must exist.
    fn append_attempt(&self, attempt: &EngineAttempt) -> Result<()>;

    /// Every attempt for the page, in start order.
    fn attempts_for_page(&self, page_id: &PageId) -> Result<Vec<EngineAttempt>>;

    /// Append a fused result and make it current.
    ///
    /// Every contributing attempt must belong to the page. Appending the id
    /// that is already current is a no-op.
    fn append_fused(&self, fused: &FusedResult) -> Result<()>;

    fn current_fused(&self, page_id: &PageId) -> Result<Option<FusedResult>>;

    /// All fused results for the page, oldest first, the current one last.
    fn fused_history(&self, page_id: &PageId) -> Result<Vec<FusedResult>>;

    /// Open a review task. Fails with `ReviewAlreadyOpen` if the page already
    /// has one open.
    fn open_review(&self, task: &ReviewTask) -> Result<()>;

    /// Close an open task with a human decision and return the updated task.
    fn resolve_review(&self, id: &ReviewTaskId, resolution: &Resolution) -> Result<ReviewTask>;

    fn get_review(&self, id: &ReviewTaskId) -> Result<Option<ReviewTask>>;

    fn open_review_for_page(&self, page_id: &PageId) -> Result<Option<ReviewTask>>;

    /// All open tasks, oldest first.
    fn open_reviews(&self) -> Result<Vec<ReviewTask>>;
}
