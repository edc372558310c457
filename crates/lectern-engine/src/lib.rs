// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lectern-engine: Recognition engines and the scheduler that drives them.
//
// Wraps heterogeneous OCR/HTR engines behind one adapter contract, tracks
// their health with a circuit breaker, and fans each page out to every
// eligible engine under per-engine concurrency leases, timeouts and retries.

pub mod adapter;
pub mod cancel;
pub mod dispatch;
pub mod mock;
pub mod registry;
pub mod retry;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use adapter::{EngineAdapter, EngineFailure, Recognition};
pub use cancel::CancelToken;
pub use dispatch::{DispatchReport, DispatchScheduler};
pub use mock::{MockAdapter, MockResponse};
pub use registry::{
    EngineRegistry, EngineStatus, HealthPolicy, HealthTransition, RegisteredEngine,
    TransitionCause,
};
pub use retry::{RetryDecision, RetryPolicy};
