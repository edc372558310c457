// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Built-in handwriting detector based on the variance of the Laplacian.
//
// Pen strokes on a scanned page produce dense, irregular high-frequency
// energy; typeset text on a clean scan produces less. Pages whose Laplacian
// variance is above the cut-off are labelled handwritten, the rest printed,
// and the confidence grows with the distance from the cut-off so borderline
// pages fall under the classifier floor and become `unknown`.

use async_trait::async_trait;
use image::DynamicImage;
use imageproc::filter::laplacian_filter;
use lectern_core::error::LecternError;
use lectern_core::types::Label;
use tracing::debug;

use crate::classifier::{ClassifierModel, RawClassification};
use crate::page::PageImage;

/// Variance above which a page is considered handwritten.
pub const DEFAULT_HANDWRITING_CUTOFF: f64 = 400.0;

/// Below this variance the page is effectively blank.
const BLANK_VARIANCE: f64 = 1.0;

/// Laplacian-variance classifier model.
#[derive(Debug, Clone)]
pub struct SharpnessClassifier {
    cutoff: f64,
}

impl Default for SharpnessClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_HANDWRITING_CUTOFF)
    }
}

impl SharpnessClassifier {
    pub fn new(cutoff: f64) -> Self {
        Self { cutoff }
    }

    /// Map a Laplacian variance to a label and confidence.
    pub fn decide(&self, variance: f64) -> RawClassification {
        if variance < BLANK_VARIANCE {
            return RawClassification {
                label: Label::Unknown,
                confidence: 0.0,
            };
        }
        let label = if variance > self.cutoff {
            Label::Handwritten
        } else {
            Label::Printed
        };
        let confidence = ((variance - self.cutoff).abs() / self.cutoff).min(1.0);
        RawClassification { label, confidence }
    }
}

/// Variance of the Laplacian of the grayscale image.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let laplacian = laplacian_filter(&gray);

    let count = f64::from(laplacian.width()) * f64::from(laplacian.height());
    if count == 0.0 {
        return 0.0;
    }
    let mean = laplacian.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / count;
    laplacian
        .pixels()
        .map(|p| {
            let d = f64::from(p.0[0]) - mean;
            d * d
        })
        .sum::<f64>()
        / count
}

#[async_trait]
impl ClassifierModel for SharpnessClassifier {
    fn name(&self) -> &str {
        "laplacian-variance"
    }

    async fn invoke(&self, image: &PageImage) -> Result<RawClassification, LecternError> {
        let owned = image.clone();
        let variance = tokio::task::spawn_blocking(move || laplacian_variance(owned.image()))
            .await
            .map_err(|err| LecternError::Ocr(format!("classifier task failed: {err}")))?;

        let decision = self.decide(variance);
        debug!(
            variance,
            label = decision.label.as_str(),
            confidence = decision.confidence,
            "sharpness classification"
        );
        Ok(decision)
    }
}
