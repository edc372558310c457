// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-engine retry policy with exponential backoff + jitter.
//
// Only transient failures (timeouts, busy runtimes) are retried. Retries are
// per engine: one engine retrying never delays the others working on the
// same page.

use std::time::Duration;

use lectern_core::config::PipelineConfig;
use lectern_core::types::ErrorClass;
use tracing::debug;

use crate::adapter::EngineFailure;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call. 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Failure is permanent.
    GiveUp(ErrorClass),
    Exhausted,
}

/// Decide whether a failed call should be retried.
///
/// `retries_done` counts retries already made for this engine on this page,
/// so the first failure is evaluated with 0.
pub fn should_retry(failure: &EngineFailure, retries_done: u32, policy: &RetryPolicy) -> RetryDecision {
    match failure.class() {
        ErrorClass::Permanent => RetryDecision::GiveUp(ErrorClass::Permanent),
        ErrorClass::Transient if retries_done >= policy.max_retries => {
            debug!(retries_done, max = policy.max_retries, "retry limit reached");
            RetryDecision::Exhausted
        }
        ErrorClass::Transient => {
            let delay = compute_delay(retries_done, policy);
            debug!(retries_done, delay_ms = delay.as_millis() as u64, "scheduling retry");
            RetryDecision::RetryAfter(delay)
        }
    }
}

/// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base).
fn compute_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(policy.max_delay.as_millis() as u64))
}

fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = u64::from(attempt).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
