// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted engine adapter for tests, demos and dry runs.
//
// A mock replays a queue of scripted responses, then falls back to its default
// response. Latency and hangs let callers exercise timeouts and cancellation
// without a real model.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lectern_document::PageImage;

use crate::adapter::{EngineAdapter, EngineFailure, Recognition};

/// Canned transcriptions used by `MockAdapter::sample_texts`.
pub const SAMPLE_TEXTS: &[&str] = &[
    "INVOICE #1042\nDate: 12 March 2024\nTotal due: 1,280.00",
    "Dear Margaret,\nThank you for the lovely letter. The garden is in full bloom.",
    "Meeting notes: budget review moved to Thursday, bring the Q3 figures.",
    "Patient: J. Smith  DOB: 04/07/1961\nPrescribed: amoxicillin 500mg",
];

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    Text { text: String, confidence: f64 },
    Fail { message: String, permanent: bool },
    /// Never returns; the scheduler's timeout or cancellation must end it.
    Hang,
    /// Rotates through texts by call count.
    Cycle { texts: Vec<String>, confidence: f64 },
}

#[derive(Debug)]
pub struct MockAdapter {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    latency: Duration,
    calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(fallback: MockResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Always returns `text` with `confidence`.
    pub fn text(text: impl Into<String>, confidence: f64) -> Self {
        Self::new(MockResponse::Text {
            text: text.into(),
            confidence,
        })
    }

    /// Always fails with a transient error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockResponse::Fail {
            message: message.into(),
            permanent: false,
        })
    }

    pub fn hanging() -> Self {
        Self::new(MockResponse::Hang)
    }

    /// Rotates through [`SAMPLE_TEXTS`].
    pub fn sample_texts(confidence: f64) -> Self {
        Self::new(MockResponse::Cycle {
            texts: SAMPLE_TEXTS.iter().map(|t| t.to_string()).collect(),
            confidence,
        })
    }

    /// Queue a response to be returned before the fallback.
    pub fn then(self, response: MockResponse) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `invoke` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl EngineAdapter for MockAdapter {
    async fn invoke(&self, _image: &PageImage) -> Result<Recognition, EngineFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            MockResponse::Text { text, confidence } => Ok(Recognition::new(text, confidence)),
            MockResponse::Fail { message, permanent: true } => Err(EngineFailure::permanent(message)),
            MockResponse::Fail { message, permanent: false } => Err(EngineFailure::transient(message)),
            MockResponse::Hang => std::future::pending().await,
            MockResponse::Cycle { texts, confidence } if !texts.is_empty() => {
                let text = texts[call as usize % texts.len()].clone();
                Ok(Recognition::new(text, confidence))
            }
            MockResponse::Cycle { .. } => Ok(Recognition::new("", 0.0)),
        }
    }
}
