// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lectern-document: Page intake and classification for the Lectern pipeline.
//
// Decodes and validates page images, downscales oversized scans, and wraps the
// document-type classifier model (printed / handwritten / mixed / unknown).

pub mod classifier;
pub mod page;
pub mod sharpness;

pub use classifier::{ClassifierModel, DocumentClassifier, FixedClassifier, RawClassification};
pub use page::{PageImage, PageInput};
pub use sharpness::SharpnessClassifier;
