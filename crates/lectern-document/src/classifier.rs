// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document classifier wrapper.
//
// The model itself is an external dependency; this module only turns its raw
// answer into a `ClassificationResult`. A model failure, a non-finite score or
// a score under the configured floor all degrade to `Label::Unknown`, which
// makes the scheduler fan out to every capability. Classification never fails
// the page.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lectern_core::error::LecternError;
use lectern_core::types::{ClassificationResult, Label, PageId};
use tracing::{debug, instrument, warn};

use crate::page::PageImage;

/// What a classifier model reports before any policy is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawClassification {
    pub label: Label,
    pub confidence: f64,
}

/// The classifier model boundary.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn invoke(&self, image: &PageImage) -> Result<RawClassification, LecternError>;
}

/// Applies the confidence floor and failure policy around a model.
#[derive(Clone)]
pub struct DocumentClassifier {
    model: Arc<dyn ClassifierModel>,
    confidence_floor: f64,
}

impl DocumentClassifier {
    pub fn new(model: Arc<dyn ClassifierModel>, confidence_floor: f64) -> Self {
        Self {
            model,
            confidence_floor,
        }
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    /// Classify one page.
    #[instrument(skip_all, fields(page_id = %page_id, model = self.model.name()))]
    pub async fn classify(&self, page_id: PageId, image: &PageImage) -> ClassificationResult {
        let (label, confidence, degraded) = match self.model.invoke(image).await {
            Ok(raw) if !raw.confidence.is_finite() => {
                warn!(confidence = raw.confidence, "classifier returned a non-finite score");
                (Label::Unknown, 0.0, true)
            }
            Ok(raw) => {
                let confidence = raw.confidence.clamp(0.0, 1.0);
                if raw.label != Label::Unknown && confidence < self.confidence_floor {
                    debug!(
                        label = raw.label.as_str(),
                        confidence,
                        floor = self.confidence_floor,
                        "classifier below confidence floor"
                    );
                    (Label::Unknown, confidence, true)
                } else {
                    (raw.label, confidence, false)
                }
            }
            Err(err) => {
                warn!(error = %err, "classifier failed, falling back to unknown");
                (Label::Unknown, 0.0, true)
            }
        };

        debug!(label = label.as_str(), confidence, degraded, "page classified");

        ClassificationResult {
            page_id,
            label,
            confidence,
            degraded,
            classified_at: Utc::now(),
        }
    }
}

/// A model that always gives the same answer. Useful when every page is known
/// to be of one kind, and in tests.
pub struct FixedClassifier {
    answer: Result<RawClassification, String>,
}

impl FixedClassifier {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self {
            answer: Ok(RawClassification { label, confidence }),
        }
    }

    /// A model whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
        }
    }
}

#[async_trait]
impl ClassifierModel for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn invoke(&self, _image: &PageImage) -> Result<RawClassification, LecternError> {
        self.answer
            .clone()
            .map_err(LecternError::Ocr)
    }
}
