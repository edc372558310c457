// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch scheduler: fans one page out to every eligible engine and waits
// for all of them.
//
// Each engine runs as its own task: lease, timed call, health update, retry.
// A slow or failing engine never blocks the others, and the report is only
// returned once every engine has reached a terminal outcome (or the page was
// cancelled). Attempts and health transitions are streamed back over a
// channel so nothing is lost when tasks are aborted mid-retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{
    AttemptId, AttemptOutcome, ClassificationResult, EngineAttempt, EngineId, PageId,
};
use lectern_document::PageImage;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{EngineFailure, Recognition};
use crate::cancel::CancelToken;
use crate::registry::{EngineRegistry, HealthTransition, RegisteredEngine};
use crate::retry::{RetryDecision, RetryPolicy, should_retry};

/// Everything that happened while dispatching one page.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Engines the page was sent to.
    pub engines: Vec<EngineId>,
    /// Every attempt, retries included, ordered by start time.
    pub attempts: Vec<EngineAttempt>,
    pub transitions: Vec<HealthTransition>,
    /// The page was cancelled before all engines finished.
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn successful(&self) -> impl Iterator<Item = &EngineAttempt> {
        self.attempts.iter().filter(|a| a.is_success())
    }

    pub fn has_success(&self) -> bool {
        self.successful().next().is_some()
    }
}

enum Signal {
    Attempt(EngineAttempt),
    Health(HealthTransition),
}

pub struct DispatchScheduler {
    registry: Arc<EngineRegistry>,
    retry: RetryPolicy,
}

impl DispatchScheduler {
    pub fn new(registry: Arc<EngineRegistry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Send the page to every eligible engine and collect all attempts.
    ///
    /// Fails with [`LecternError::NoEligibleEngine`] when no engine matches
    /// the label (or all matching engines are disabled). Cancellation is not
    /// an error: the report comes back with `cancelled` set and whatever
    /// attempts finished before it.
    #[instrument(skip_all, fields(page = %page_id, label = classification.label.as_str()))]
    pub async fn dispatch(
        &self,
        page_id: PageId,
        image: &PageImage,
        classification: &ClassificationResult,
        cancel: &CancelToken,
    ) -> Result<DispatchReport> {
        if cancel.is_cancelled() {
            return Ok(DispatchReport {
                cancelled: true,
                ..Default::default()
            });
        }

        let (engines, transitions) = self.registry.select(classification.label);
        if engines.is_empty() {
            warn!("no eligible engine for page");
            return Err(LecternError::NoEligibleEngine(page_id));
        }

        let mut report = DispatchReport {
            engines: engines.iter().map(|e| e.id().clone()).collect(),
            transitions,
            ..Default::default()
        };
        debug!(engines = ?report.engines, "dispatching page");

        let (signals, mut received) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for engine in engines {
            tasks.spawn(run_engine(
                engine,
                Arc::clone(&self.registry),
                self.retry,
                page_id,
                image.clone(),
                signals.clone(),
            ));
        }
        drop(signals);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("page cancelled, aborting engine calls");
                    tasks.abort_all();
                    report.cancelled = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(err)) if err.is_panic() => error!(%err, "engine task panicked"),
                    Some(_) => {}
                },
            }
        }
        // Aborted tasks drop their senders once they unwind.
        while tasks.join_next().await.is_some() {}

        while let Some(signal) = received.recv().await {
            match signal {
                Signal::Attempt(attempt) => report.attempts.push(attempt),
                Signal::Health(transition) => report.transitions.push(transition),
            }
        }
        report.attempts.sort_by(|a, b| {
            (a.started_at, a.engine_id.as_str(), a.attempt)
                .cmp(&(b.started_at, b.engine_id.as_str(), b.attempt))
        });

        info!(
            attempts = report.attempts.len(),
            successes = report.successful().count(),
            cancelled = report.cancelled,
            "dispatch finished"
        );
        Ok(report)
    }
}

/// One engine's share of a page: call, record health, retry while allowed.
async fn run_engine(
    engine: Arc<RegisteredEngine>,
    registry: Arc<EngineRegistry>,
    retry: RetryPolicy,
    page_id: PageId,
    image: PageImage,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let mut retries_done = 0;
    loop {
        let (attempt, failure) = invoke_once(&engine, page_id, &image, retries_done + 1).await;

        let transition = match &failure {
            None => registry.record_success(engine.id()),
            Some(failure) => registry.record_failure(engine.id(), &failure.to_string()),
        };
        // The receiver outlives every task; a send error means the dispatch
        // itself was dropped and there is no one left to report to.
        let _ = signals.send(Signal::Attempt(attempt));
        if let Some(transition) = transition {
            let _ = signals.send(Signal::Health(transition));
        }

        let Some(failure) = failure else {
            return;
        };
        match should_retry(&failure, retries_done, &retry) {
            RetryDecision::RetryAfter(_) if registry.is_disabled(engine.id()) => {
                debug!(engine = %engine.id(), "engine disabled, not retrying");
                return;
            }
            RetryDecision::RetryAfter(delay) => {
                tokio::time::sleep(delay).await;
                retries_done += 1;
            }
            decision => {
                debug!(engine = %engine.id(), ?decision, "giving up on engine");
                return;
            }
        }
    }
}

/// A single leased, timed adapter call turned into an attempt record.
async fn invoke_once(
    engine: &RegisteredEngine,
    page_id: PageId,
    image: &PageImage,
    attempt: u32,
) -> (EngineAttempt, Option<EngineFailure>) {
    let lease = engine.lease().acquire().await;
    let started_at = Utc::now();

    let result = match lease {
        Err(_) => Err(EngineFailure::permanent("engine lease closed")),
        Ok(_permit) => {
            let call = AssertUnwindSafe(engine.adapter().invoke(image)).catch_unwind();
            match tokio::time::timeout(engine.timeout(), call).await {
                Err(_) => Err(EngineFailure::Timeout(engine.timeout())),
                Ok(Err(_)) => Err(EngineFailure::permanent("adapter panicked")),
                Ok(Ok(result)) => result,
            }
        }
    };
    let finished_at = Utc::now();
    let elapsed_ms = (finished_at - started_at).num_milliseconds();

    let mut record = EngineAttempt {
        id: AttemptId::new(),
        page_id,
        engine_id: engine.id().clone(),
        attempt,
        started_at,
        finished_at,
        outcome: AttemptOutcome::Success,
        text: String::new(),
        confidence: 0.0,
        boxes: Vec::new(),
        error: None,
    };

    match result {
        Ok(Recognition {
            text,
            confidence,
            boxes,
        }) => {
            record.text = text;
            record.confidence = sanitize_confidence(confidence);
            record.boxes = boxes;
            info!(
                engine = %engine.id(),
                attempt,
                confidence = record.confidence,
                chars = record.text.chars().count(),
                elapsed_ms,
                "engine attempt succeeded"
            );
            (record, None)
        }
        Err(failure) => {
            record.outcome = failure.outcome();
            record.error = Some(failure.to_string());
            warn!(
                engine = %engine.id(),
                attempt,
                outcome = record.outcome.as_str(),
                error = %failure,
                elapsed_ms,
                "engine attempt failed"
            );
            (record, Some(failure))
        }
    }
}

fn sanitize_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
