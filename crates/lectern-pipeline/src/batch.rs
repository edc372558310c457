// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch results and per-document roll-up.

use lectern_core::error::LecternError;
use lectern_core::types::{DocumentId, FusionMethod, PageId, PageStatus, ReviewTaskId};
use serde::Serialize;

use crate::pipeline::PageOutcome;

/// Final state of one page of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageReport {
    pub document_id: DocumentId,
    pub page_index: u32,
    /// Absent only when the page never reached the store.
    pub page_id: Option<PageId>,
    pub status: PageStatus,
    pub method: Option<FusionMethod>,
    pub confidence: Option<f64>,
    pub review_task: Option<ReviewTaskId>,
    pub error: Option<String>,
}

impl PageReport {
    pub(crate) fn from_outcome(outcome: &PageOutcome) -> Self {
        Self {
            document_id: outcome.page.document_id,
            page_index: outcome.page.page_index,
            page_id: Some(outcome.page.id),
            status: outcome.status,
            method: outcome.fused.as_ref().map(|f| f.method),
            confidence: outcome.fused.as_ref().map(|f| f.confidence),
            review_task: outcome.review.as_ref().map(|t| t.id),
            error: outcome.error().map(|err| err.to_string()),
        }
    }

    pub(crate) fn from_error(document_id: DocumentId, page_index: u32, err: &LecternError) -> Self {
        Self {
            document_id,
            page_index,
            page_id: None,
            status: PageStatus::Failed,
            method: None,
            confidence: None,
            review_task: None,
            error: Some(err.to_string()),
        }
    }
}

/// Progress notification, sent once per finished page.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub page: PageReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentStatus {
    /// Every page was accepted, corrected or is waiting for review.
    Completed,
    /// At least one page failed.
    Failed,
    /// Some pages were cancelled or rejected.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub document_id: DocumentId,
    pub pages: usize,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// One entry per input page, in input order.
    pub pages: Vec<PageReport>,
    /// Documents in order of first appearance.
    pub documents: Vec<DocumentSummary>,
}

impl BatchReport {
    pub fn new(pages: Vec<PageReport>) -> Self {
        let mut documents: Vec<(DocumentId, Vec<PageStatus>)> = Vec::new();
        for page in &pages {
            match documents.iter_mut().find(|(id, _)| *id == page.document_id) {
                Some((_, statuses)) => statuses.push(page.status),
                None => documents.push((page.document_id, vec![page.status])),
            }
        }

        let documents = documents
            .into_iter()
            .map(|(document_id, statuses)| DocumentSummary {
                document_id,
                pages: statuses.len(),
                status: document_status(&statuses),
            })
            .collect();

        Self { pages, documents }
    }

    /// Number of pages that ended in `status`.
    pub fn count(&self, status: PageStatus) -> usize {
        self.pages.iter().filter(|p| p.status == status).count()
    }

    pub fn document(&self, id: &DocumentId) -> Option<&DocumentSummary> {
        self.documents.iter().find(|d| d.document_id == *id)
    }
}

fn document_status(statuses: &[PageStatus]) -> DocumentStatus {
    if statuses.contains(&PageStatus::Failed) {
        DocumentStatus::Failed
    } else if statuses.iter().all(|s| {
        matches!(
            s,
            PageStatus::AutoAccepted | PageStatus::Corrected | PageStatus::NeedsReview
        )
    }) {
        DocumentStatus::Completed
    } else {
        DocumentStatus::Incomplete
    }
}
