// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lectern-pipeline: Turns a page into an accepted or reviewable
// transcription.
//
// Ties the classifier, dispatch scheduler, consensus fusion and validation
// router together, persists every step and publishes completion events.

pub mod batch;
pub mod fusion;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod validation;

pub use batch::{BatchProgress, BatchReport, DocumentStatus, DocumentSummary, PageReport};
pub use fusion::{FusionEngine, fuse};
pub use notify::{CompletionEvent, CompletionReceiver, CompletionSender, completion_channel};
pub use pipeline::{PageOutcome, Pipeline};
pub use validation::{ValidationRouter, is_valid_transition, transition};
