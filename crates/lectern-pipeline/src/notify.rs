// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Completion events, published once a page reaches a terminal state.

use lectern_core::types::{DocumentId, Page, PageId, PageStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub page_id: PageId,
    pub document_id: DocumentId,
    pub page_index: u32,
    pub state: PageStatus,
    /// Confidence of the current fused result, if there is one.
    pub confidence: Option<f64>,
}

impl CompletionEvent {
    pub fn for_page(page: &Page, state: PageStatus, confidence: Option<f64>) -> Self {
        Self {
            page_id: page.id,
            document_id: page.document_id,
            page_index: page.page_index,
            state,
            confidence,
        }
    }
}

/// Receiving half handed to the external notification component.
pub type CompletionReceiver = mpsc::Receiver<CompletionEvent>;

/// Sending half held by the pipeline.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    inner: mpsc::Sender<CompletionEvent>,
}

/// Bounded completion channel.
pub fn completion_channel(capacity: usize) -> (CompletionSender, CompletionReceiver) {
    let (inner, receiver) = mpsc::channel(capacity.max(1));
    (CompletionSender { inner }, receiver)
}

impl CompletionSender {
    /// Publish an event. Waits while the channel is full; a dropped receiver
    /// is logged and otherwise ignored.
    pub async fn publish(&self, event: CompletionEvent) {
        if !event.state.is_terminal() {
            warn!(page = %event.page_id, state = ?event.state, "completion event for non-terminal page");
        }
        if let Err(err) = self.inner.send(event).await {
            warn!(page = %err.0.page_id, "completion receiver dropped, event discarded");
        }
    }
}
