// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine adapter contract.
//
// Every recognition engine, printed or handwriting specialist, is wrapped
// behind this one trait. The core never sees model internals: an adapter takes
// a page image and returns text with a confidence, or a typed failure.

use std::time::Duration;

use async_trait::async_trait;
use lectern_core::error::{LecternError, classify_error};
use lectern_core::types::{AttemptOutcome, BoundingBox, ErrorClass};
use lectern_document::PageImage;
use thiserror::Error;

/// Successful output of one engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Whole-text confidence. Values outside [0, 1] are clamped by the
    /// scheduler; non-finite values count as 0.
    pub confidence: f64,
    pub boxes: Vec<BoundingBox>,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            boxes: Vec::new(),
        }
    }

    pub fn with_boxes(mut self, boxes: Vec<BoundingBox>) -> Self {
        self.boxes = boxes;
        self
    }
}

/// Why an engine call produced no text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFailure {
    #[error("engine call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("engine error: {message}")]
    Error { message: String, class: ErrorClass },
}

impl EngineFailure {
    /// A failure worth retrying (busy model, flaky runtime).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            class: ErrorClass::Transient,
        }
    }

    /// A failure retrying cannot fix (unsupported image, missing model).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            class: ErrorClass::Permanent,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::Transient,
            Self::Error { class, .. } => *class,
        }
    }

    /// The attempt outcome this failure is recorded as.
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Timeout(_) => AttemptOutcome::Timeout,
            Self::Error { .. } => AttemptOutcome::Error,
        }
    }
}

impl From<LecternError> for EngineFailure {
    fn from(err: LecternError) -> Self {
        Self::Error {
            class: classify_error(&err),
            message: err.to_string(),
        }
    }
}

/// A wrapped recognition engine.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn invoke(&self, image: &PageImage) -> Result<Recognition, EngineFailure>;
}
