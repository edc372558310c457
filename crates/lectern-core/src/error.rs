// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Lectern.

use thiserror::Error;

use crate::types::{ErrorClass, PageId, ReviewTaskId, ValidationState};

/// Top-level error type for all Lectern operations.
#[derive(Debug, Error)]
pub enum LecternError {
    // -- Input --
    #[error("invalid page image: {0}")]
    Input(String),

    // -- Dispatch --
    #[error("no enabled engine can handle page {0}")]
    NoEligibleEngine(PageId),

    #[error("every dispatched engine failed for page {0}")]
    NoSuccessfulEngine(PageId),

    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    #[error("page processing cancelled")]
    Cancelled,

    #[error("OCR failed: {0}")]
    Ocr(String),

    // -- Validation --
    #[error("invalid validation transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ValidationState,
        to: ValidationState,
    },

    #[error("page {0} already has an open review task")]
    ReviewAlreadyOpen(PageId),

    #[error("review task {0} not found")]
    ReviewNotFound(ReviewTaskId),

    #[error("review task {0} is already resolved")]
    ReviewResolved(ReviewTaskId),

    #[error("page {0} cannot be reprocessed: {1}")]
    ReprocessRefused(PageId, String),

    // -- Storage / persistence --
    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("attempt does not belong to page {0}")]
    AttemptPageMismatch(PageId),

    #[error("database error: {0}")]
    Database(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Classify a `LecternError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &LecternError) -> ErrorClass {
    match err {
        LecternError::Ocr(_) | LecternError::Database(_) | LecternError::Cancelled => {
            ErrorClass::Transient
        }
        LecternError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidData => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        },
        _ => ErrorClass::Permanent,
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LecternError>;
