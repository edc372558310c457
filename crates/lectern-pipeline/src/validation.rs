// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Validation router: decides whether a fused result is accepted as is or put
// in front of a human.
//
//   Pending ──► AutoAccepted
//      │
//      └──────► NeedsReview ──► Corrected
//                    │
//                    └────────► Rejected

use lectern_core::error::{LecternError, Result};
use lectern_core::types::{FusedResult, FusionMethod, Resolution, ReviewReason, ValidationState};

/// Whether `from -> to` is a legal validation transition.
pub fn is_valid_transition(from: ValidationState, to: ValidationState) -> bool {
    use ValidationState::*;
    matches!(
        (from, to),
        (Pending, AutoAccepted)
            | (Pending, NeedsReview)
            | (NeedsReview, Corrected)
            | (NeedsReview, Rejected)
    )
}

/// Check a transition, failing with [`LecternError::InvalidTransition`].
pub fn transition(from: ValidationState, to: ValidationState) -> Result<ValidationState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(LecternError::InvalidTransition { from, to })
    }
}

/// The state a human resolution moves a reviewed page to.
pub fn resolution_state(resolution: &Resolution) -> ValidationState {
    match resolution {
        Resolution::Corrected { .. } => ValidationState::Corrected,
        Resolution::Rejected { .. } => ValidationState::Rejected,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRouter {
    accept_threshold: f64,
}

impl ValidationRouter {
    pub fn new(accept_threshold: f64) -> Self {
        Self { accept_threshold }
    }

    pub fn accept_threshold(&self) -> f64 {
        self.accept_threshold
    }

    /// Why `fused` needs review, or `None` if it can be auto-accepted.
    ///
    /// Disagreement is never auto-accepted, whatever its confidence.
    pub fn review_reason(&self, fused: &FusedResult) -> Option<ReviewReason> {
        if fused.low_certainty || fused.method == FusionMethod::BestOfDisagreeing {
            Some(ReviewReason::Disagreement)
        } else if !(fused.confidence >= self.accept_threshold) {
            Some(ReviewReason::LowConfidence)
        } else {
            None
        }
    }

    /// Route a freshly fused (pending) result.
    pub fn route(&self, fused: &FusedResult) -> ValidationState {
        match self.review_reason(fused) {
            Some(_) => ValidationState::NeedsReview,
            None => ValidationState::AutoAccepted,
        }
    }
}
