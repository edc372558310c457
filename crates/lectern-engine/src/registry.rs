// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine registry with per-engine health tracking.
//
// An engine that keeps failing is taken out of rotation instead of being
// hammered with pages that will just time out. After the cooldown it is let
// back in as `degraded`: one more failure disables it again, one success
// makes it healthy.
//
// Health counters are the only state shared across pages. Each engine's
// counters sit behind their own mutex so a read-modify-write on a failure and
// the resulting state change happen as one step.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lectern_core::config::{EngineConfig, PipelineConfig};
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{Capability, EngineId, HealthState, Label};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::adapter::EngineAdapter;

/// Disablement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures that disable an engine.
    pub failure_limit: u32,
    /// Trailing window: only failures within this span of the latest one
    /// count toward the limit.
    pub window: Duration,
    /// `None` disables time-based recovery; only a manual reset re-enables.
    pub cooldown: Option<Duration>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_limit: 3,
            window: Duration::from_secs(600),
            cooldown: Some(Duration::from_secs(300)),
        }
    }
}

impl From<&PipelineConfig> for HealthPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            failure_limit: config.consecutive_failure_limit.max(1),
            window: Duration::from_secs(config.failure_window_secs),
            cooldown: config.disable_cooldown_secs.map(Duration::from_secs),
        }
    }
}

/// What caused a health state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Failure,
    Success,
    Cooldown,
    ManualReset,
}

impl TransitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Success => "success",
            Self::Cooldown => "cooldown",
            Self::ManualReset => "manual_reset",
        }
    }
}

/// A state change of one engine, reported so it can be audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthTransition {
    pub engine_id: EngineId,
    pub from: HealthState,
    pub to: HealthState,
    pub cause: TransitionCause,
    pub consecutive_failures: u32,
}

/// Health counters for one engine.
#[derive(Debug, Clone)]
pub struct EngineHealth {
    pub state: HealthState,
    /// Failures of the current run still inside the trailing window.
    pub consecutive_failures: u32,
    /// Times of those failures, oldest first.
    recent_failures: VecDeque<Instant>,
    /// When the engine was disabled (cooldown reference).
    pub disabled_at: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_error: Option<String>,
    /// Re-admitted after cooldown; the next failure disables immediately.
    pub on_trial: bool,
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            disabled_at: None,
            last_success: None,
            last_error: None,
            on_trial: false,
        }
    }
}

impl EngineHealth {
    /// Count a failure. Returns the previous state if it changed.
    fn on_failure(&mut self, error: &str, now: Instant, policy: &HealthPolicy) -> Option<HealthState> {
        self.recent_failures.push_back(now);
        while self
            .recent_failures
            .front()
            .is_some_and(|&at| now.saturating_duration_since(at) > policy.window)
        {
            self.recent_failures.pop_front();
        }
        self.consecutive_failures = u32::try_from(self.recent_failures.len()).unwrap_or(u32::MAX);
        self.last_error = Some(error.to_string());

        let previous = self.state;
        let next = if previous == HealthState::Disabled
            || self.on_trial
            || self.consecutive_failures >= policy.failure_limit
        {
            HealthState::Disabled
        } else {
            HealthState::Degraded
        };
        if next == HealthState::Disabled && previous != HealthState::Disabled {
            self.disabled_at = Some(now);
            self.on_trial = false;
        }
        self.state = next;
        (previous != next).then_some(previous)
    }

    fn on_success(&mut self, now: Instant) -> Option<HealthState> {
        let previous = self.state;
        self.state = HealthState::Healthy;
        self.consecutive_failures = 0;
        self.recent_failures.clear();
        self.disabled_at = None;
        self.last_success = Some(now);
        self.last_error = None;
        self.on_trial = false;
        (previous != HealthState::Healthy).then_some(previous)
    }

    /// Move a disabled engine to `degraded` once the cooldown has run out.
    fn on_cooldown_check(&mut self, now: Instant, policy: &HealthPolicy) -> bool {
        if self.state != HealthState::Disabled {
            return false;
        }
        let (Some(cooldown), Some(disabled_at)) = (policy.cooldown, self.disabled_at) else {
            return false;
        };
        if now.saturating_duration_since(disabled_at) < cooldown {
            return false;
        }
        self.state = HealthState::Degraded;
        self.disabled_at = None;
        self.on_trial = true;
        true
    }

    fn reset(&mut self) -> Option<HealthState> {
        let previous = self.state;
        *self = Self {
            last_success: self.last_success,
            ..Self::default()
        };
        (previous != HealthState::Healthy).then_some(previous)
    }
}

/// One adapter with its static configuration, lease and health.
pub struct RegisteredEngine {
    id: EngineId,
    capabilities: Vec<Capability>,
    weight: f64,
    timeout: Duration,
    max_concurrency: usize,
    adapter: Arc<dyn EngineAdapter>,
    lease: Arc<Semaphore>,
    health: Mutex<EngineHealth>,
}

impl std::fmt::Debug for RegisteredEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEngine")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("weight", &self.weight)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RegisteredEngine {
    pub fn id(&self) -> &EngineId {
        &self.id
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn adapter(&self) -> &Arc<dyn EngineAdapter> {
        &self.adapter
    }

    /// Concurrency lease shared by every page using this engine.
    pub fn lease(&self) -> &Arc<Semaphore> {
        &self.lease
    }

    /// Whether this engine can handle a page with the given label.
    pub fn supports(&self, label: Label) -> bool {
        label
            .required_capabilities()
            .iter()
            .any(|cap| self.capabilities.contains(cap))
    }

    pub fn health(&self) -> EngineHealth {
        self.lock_health().clone()
    }

    fn lock_health(&self) -> MutexGuard<'_, EngineHealth> {
        // Health updates never panic mid-write, so a poisoned lock still
        // holds consistent counters.
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, from: HealthState, cause: TransitionCause, health: &EngineHealth) -> HealthTransition {
        HealthTransition {
            engine_id: self.id.clone(),
            from,
            to: health.state,
            cause,
            consecutive_failures: health.consecutive_failures,
        }
    }
}

/// Read-only view of one engine, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub id: EngineId,
    pub capabilities: Vec<Capability>,
    pub weight: f64,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// All registered engines, in registration order.
#[derive(Debug)]
pub struct EngineRegistry {
    engines: Vec<Arc<RegisteredEngine>>,
    policy: HealthPolicy,
}

impl EngineRegistry {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            engines: Vec::new(),
            policy,
        }
    }

    /// Build a registry from config, pairing each configured engine with its
    /// adapter by id.
    pub fn from_config(
        config: &PipelineConfig,
        mut adapters: HashMap<String, Arc<dyn EngineAdapter>>,
    ) -> Result<Self> {
        let default_timeout = Duration::from_millis(config.default_engine_timeout_ms);
        let mut registry = Self::new(HealthPolicy::from(config));
        for engine in &config.engines {
            let adapter = adapters
                .remove(&engine.id)
                .ok_or_else(|| LecternError::UnknownEngine(engine.id.clone()))?;
            registry.register(engine, adapter, default_timeout)?;
        }
        if let Some(orphan) = adapters.keys().next() {
            warn!(engine = %orphan, "adapter has no engine config, ignoring");
        }
        Ok(registry)
    }

    /// Add an adapter. Ids must be unique and weights positive.
    pub fn register(
        &mut self,
        config: &EngineConfig,
        adapter: Arc<dyn EngineAdapter>,
        default_timeout: Duration,
    ) -> Result<()> {
        if self.engines.iter().any(|e| e.id.as_str() == config.id) {
            return Err(LecternError::Config(format!(
                "engine '{}' registered twice",
                config.id
            )));
        }
        if !(config.weight.is_finite() && config.weight > 0.0) {
            return Err(LecternError::Config(format!(
                "engine '{}' weight must be positive",
                config.id
            )));
        }

        let max_concurrency = config.max_concurrency.max(1);
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);
        info!(
            engine = %config.id,
            capabilities = ?config.capabilities,
            weight = config.weight,
            timeout_ms = timeout.as_millis() as u64,
            max_concurrency,
            "engine registered"
        );

        self.engines.push(Arc::new(RegisteredEngine {
            id: EngineId::new(config.id.clone()),
            capabilities: config.capabilities.clone(),
            weight: config.weight,
            timeout,
            max_concurrency,
            adapter,
            lease: Arc::new(Semaphore::new(max_concurrency)),
            health: Mutex::new(EngineHealth::default()),
        }));
        Ok(())
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn get(&self, id: &EngineId) -> Option<&Arc<RegisteredEngine>> {
        self.engines.iter().find(|e| &e.id == id)
    }

    /// Fusion weights for every registered engine.
    pub fn weights(&self) -> HashMap<EngineId, f64> {
        self.engines
            .iter()
            .map(|e| (e.id.clone(), e.weight))
            .collect()
    }

    /// Engines eligible for a page with this label: capability matches and
    /// not disabled. Disabled engines stay excluded for `unknown` pages too.
    ///
    /// Engines whose cooldown has expired are moved to `degraded` here; those
    /// transitions are returned alongside the selection.
    pub fn select(&self, label: Label) -> (Vec<Arc<RegisteredEngine>>, Vec<HealthTransition>) {
        self.select_at(label, Instant::now())
    }

    fn select_at(&self, label: Label, now: Instant) -> (Vec<Arc<RegisteredEngine>>, Vec<HealthTransition>) {
        let mut selected = Vec::new();
        let mut transitions = Vec::new();

        for engine in self.engines.iter().filter(|e| e.supports(label)) {
            let mut health = engine.lock_health();
            if health.on_cooldown_check(now, &self.policy) {
                info!(engine = %engine.id, "cooldown expired, retrying engine on trial");
                transitions.push(engine.transition(
                    HealthState::Disabled,
                    TransitionCause::Cooldown,
                    &health,
                ));
            }
            if health.state == HealthState::Disabled {
                debug!(engine = %engine.id, "engine disabled, skipping");
                continue;
            }
            drop(health);
            selected.push(Arc::clone(engine));
        }

        (selected, transitions)
    }

    /// Whether the engine is currently excluded from dispatch.
    pub fn is_disabled(&self, id: &EngineId) -> bool {
        self.get(id)
            .is_some_and(|e| e.lock_health().state == HealthState::Disabled)
    }

    pub fn record_success(&self, id: &EngineId) -> Option<HealthTransition> {
        let engine = self.get(id)?;
        let mut health = engine.lock_health();
        let previous = health.on_success(Instant::now())?;
        info!(engine = %id, from = ?previous, "engine recovered");
        Some(engine.transition(previous, TransitionCause::Success, &health))
    }

    pub fn record_failure(&self, id: &EngineId, error: &str) -> Option<HealthTransition> {
        self.record_failure_at(id, error, Instant::now())
    }

    fn record_failure_at(&self, id: &EngineId, error: &str, now: Instant) -> Option<HealthTransition> {
        let engine = self.get(id)?;
        let mut health = engine.lock_health();
        let previous = health.on_failure(error, now, &self.policy)?;
        if health.state == HealthState::Disabled {
            warn!(
                engine = %id,
                failures = health.consecutive_failures,
                error,
                "disabling engine"
            );
        } else {
            debug!(engine = %id, failures = health.consecutive_failures, "engine degraded");
        }
        Some(engine.transition(previous, TransitionCause::Failure, &health))
    }

    /// Manually return an engine to `healthy`.
    pub fn reset(&self, id: &EngineId) -> Result<Option<HealthTransition>> {
        let engine = self
            .get(id)
            .ok_or_else(|| LecternError::UnknownEngine(id.to_string()))?;
        let mut health = engine.lock_health();
        let Some(previous) = health.reset() else {
            return Ok(None);
        };
        info!(engine = %id, from = ?previous, "engine manually reset");
        Ok(Some(engine.transition(
            previous,
            TransitionCause::ManualReset,
            &health,
        )))
    }

    pub fn snapshot(&self) -> Vec<EngineStatus> {
        self.engines
            .iter()
            .map(|e| {
                let health = e.lock_health();
                EngineStatus {
                    id: e.id.clone(),
                    capabilities: e.capabilities.clone(),
                    weight: e.weight,
                    timeout_ms: e.timeout.as_millis() as u64,
                    max_concurrency: e.max_concurrency,
                    state: health.state,
                    consecutive_failures: health.consecutive_failures,
                    last_error: health.last_error.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    fn registry(policy: HealthPolicy) -> EngineRegistry {
        let mut registry = EngineRegistry::new(policy);
        let timeout = Duration::from_secs(1);
        registry
            .register(
                &EngineConfig::new("print-a", vec![Capability::Printed]),
                Arc::new(MockAdapter::text("a", 0.9)),
                timeout,
            )
            .unwrap();
        registry
            .register(
                &EngineConfig::new("hand-b", vec![Capability::Handwritten]).with_weight(2.0),
                Arc::new(MockAdapter::text("b", 0.9)),
                timeout,
            )
            .unwrap();
        registry
    }

    fn ids(engines: &[Arc<RegisteredEngine>]) -> Vec<&str> {
        engines.iter().map(|e| e.id().as_str()).collect()
    }

    #[test]
    fn select_matches_capabilities() {
        let registry = registry(HealthPolicy::default());
        assert_eq!(ids(&registry.select(Label::Printed).0), vec!["print-a"]);
        assert_eq!(ids(&registry.select(Label::Handwritten).0), vec!["hand-b"]);
        assert_eq!(ids(&registry.select(Label::Mixed).0), vec!["print-a", "hand-b"]);
        assert_eq!(ids(&registry.select(Label::Unknown).0), vec!["print-a", "hand-b"]);
    }

    #[test]
    fn disables_after_limit_and_excludes_from_unknown() {
        let registry = registry(HealthPolicy::default());
        let id = EngineId::from("print-a");

        let t1 = registry.record_failure(&id, "timeout").unwrap();
        assert_eq!((t1.from, t1.to), (HealthState::Healthy, HealthState::Degraded));
        assert!(registry.record_failure(&id, "timeout").is_none());
        let t3 = registry.record_failure(&id, "timeout").unwrap();
        assert_eq!((t3.from, t3.to), (HealthState::Degraded, HealthState::Disabled));
        assert_eq!(t3.consecutive_failures, 3);

        assert!(registry.is_disabled(&id));
        assert_eq!(ids(&registry.select(Label::Unknown).0), vec!["hand-b"]);
        assert!(registry.select(Label::Printed).0.is_empty());
    }

    #[test]
    fn success_resets_counter() {
        let registry = registry(HealthPolicy::default());
        let id = EngineId::from("print-a");
        registry.record_failure(&id, "e");
        registry.record_failure(&id, "e");
        let t = registry.record_success(&id).unwrap();
        assert_eq!(t.to, HealthState::Healthy);
        registry.record_failure(&id, "e");
        registry.record_failure(&id, "e");
        assert!(!registry.is_disabled(&id));
    }

    #[test]
    fn stale_failures_restart_the_count() {
        let policy = HealthPolicy {
            window: Duration::from_secs(60),
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        registry.record_failure_at(&id, "e", start);
        registry.record_failure_at(&id, "e", start + Duration::from_secs(10));
        registry.record_failure_at(&id, "e", start + Duration::from_secs(200));
        assert!(!registry.is_disabled(&id));
        assert_eq!(registry.get(&id).unwrap().health().consecutive_failures, 1);
    }

    #[test]
    fn only_failures_in_the_trailing_window_count() {
        let policy = HealthPolicy {
            window: Duration::from_secs(600),
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        for secs in [0, 500, 1000] {
            registry.record_failure_at(&id, "e", start + Duration::from_secs(secs));
        }
        assert!(!registry.is_disabled(&id));
        assert_eq!(registry.get(&id).unwrap().health().consecutive_failures, 2);

        let t = registry
            .record_failure_at(&id, "e", start + Duration::from_secs(1050))
            .unwrap();
        assert_eq!((t.from, t.to), (HealthState::Degraded, HealthState::Disabled));
        assert_eq!(t.consecutive_failures, 3);
    }

    #[test]
    fn disabled_engine_stays_disabled_as_old_failures_age_out() {
        let policy = HealthPolicy {
            window: Duration::from_secs(60),
            cooldown: None,
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        for _ in 0..3 {
            registry.record_failure_at(&id, "e", start);
        }
        assert!(
            registry
                .record_failure_at(&id, "late retry", start + Duration::from_secs(120))
                .is_none()
        );
        assert!(registry.is_disabled(&id));
    }

    #[test]
    fn concurrent_failures_disable_exactly_once() {
        const THREADS: usize = 16;
        let registry = registry(HealthPolicy::default());
        let id = EngineId::from("print-a");

        let transitions: Vec<HealthTransition> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| scope.spawn(|| registry.record_failure(&id, "timeout")))
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().unwrap())
                .collect()
        });

        let disabling: Vec<_> = transitions
            .iter()
            .filter(|t| t.to == HealthState::Disabled)
            .collect();
        assert_eq!(disabling.len(), 1);
        assert_eq!(disabling[0].from, HealthState::Degraded);
        assert_eq!(disabling[0].consecutive_failures, 3);
        assert_eq!(transitions.len(), 2);
        assert_eq!(
            registry.get(&id).unwrap().health().consecutive_failures,
            THREADS as u32
        );
    }

    #[test]
    fn cooldown_trial_then_redisables_on_failure() {
        let policy = HealthPolicy {
            cooldown: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        for _ in 0..3 {
            registry.record_failure_at(&id, "e", start);
        }

        let (selected, transitions) = registry.select_at(Label::Printed, start + Duration::from_secs(5));
        assert!(selected.is_empty());
        assert!(transitions.is_empty());

        let (selected, transitions) = registry.select_at(Label::Printed, start + Duration::from_secs(31));
        assert_eq!(ids(&selected), vec!["print-a"]);
        assert_eq!(transitions[0].cause, TransitionCause::Cooldown);
        assert_eq!(transitions[0].to, HealthState::Degraded);

        let t = registry
            .record_failure_at(&id, "still broken", start + Duration::from_secs(32))
            .unwrap();
        assert_eq!(t.to, HealthState::Disabled);
    }

    #[test]
    fn failed_trial_redisables_even_outside_window() {
        let policy = HealthPolicy {
            window: Duration::from_secs(10),
            cooldown: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        for _ in 0..3 {
            registry.record_failure_at(&id, "e", start);
        }
        registry.select_at(Label::Printed, start + Duration::from_secs(61));
        let t = registry
            .record_failure_at(&id, "e", start + Duration::from_secs(90))
            .unwrap();
        assert_eq!((t.from, t.to), (HealthState::Degraded, HealthState::Disabled));
    }

    #[test]
    fn without_cooldown_only_manual_reset_reenables() {
        let policy = HealthPolicy {
            cooldown: None,
            ..Default::default()
        };
        let registry = registry(policy);
        let id = EngineId::from("print-a");
        let start = Instant::now();
        for _ in 0..3 {
            registry.record_failure_at(&id, "e", start);
        }
        let (selected, _) = registry.select_at(Label::Printed, start + Duration::from_secs(86_400));
        assert!(selected.is_empty());

        let t = registry.reset(&id).unwrap().unwrap();
        assert_eq!((t.from, t.to), (HealthState::Disabled, HealthState::Healthy));
        assert_eq!(t.cause, TransitionCause::ManualReset);
        assert_eq!(ids(&registry.select(Label::Printed).0), vec!["print-a"]);
        assert!(registry.reset(&id).unwrap().is_none());
    }

    #[test]
    fn reset_unknown_engine_errors() {
        let registry = registry(HealthPolicy::default());
        assert!(matches!(
            registry.reset(&EngineId::from("nope")),
            Err(LecternError::UnknownEngine(_))
        ));
    }

    #[test]
    fn register_rejects_duplicates_and_bad_weights() {
        let mut registry = registry(HealthPolicy::default());
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::text("x", 1.0));
        let timeout = Duration::from_secs(1);
        assert!(
            registry
                .register(&EngineConfig::new("print-a", vec![]), Arc::clone(&adapter), timeout)
                .is_err()
        );
        assert!(
            registry
                .register(
                    &EngineConfig::new("c", vec![Capability::Printed]).with_weight(0.0),
                    adapter,
                    timeout
                )
                .is_err()
        );
    }

    #[test]
    fn from_config_requires_every_adapter() {
        let config = PipelineConfig {
            engines: vec![
                EngineConfig::new("a", vec![Capability::Printed]).with_timeout_ms(750),
                EngineConfig::new("b", vec![Capability::Handwritten]),
            ],
            ..Default::default()
        };
        let mut adapters: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
        adapters.insert("a".into(), Arc::new(MockAdapter::text("a", 0.9)));
        assert!(matches!(
            EngineRegistry::from_config(&config, adapters.clone()),
            Err(LecternError::UnknownEngine(id)) if id == "b"
        ));

        adapters.insert("b".into(), Arc::new(MockAdapter::text("b", 0.9)));
        let registry = EngineRegistry::from_config(&config, adapters).unwrap();
        let a = registry.get(&EngineId::from("a")).unwrap();
        assert_eq!(a.timeout(), Duration::from_millis(750));
        let b = registry.get(&EngineId::from("b")).unwrap();
        assert_eq!(b.timeout(), Duration::from_millis(config.default_engine_timeout_ms));
    }

    #[test]
    fn snapshot_reports_health() {
        let registry = registry(HealthPolicy::default());
        registry.record_failure(&EngineId::from("hand-b"), "boom");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].state, HealthState::Healthy);
        assert_eq!(snapshot[1].state, HealthState::Degraded);
        assert_eq!(snapshot[1].last_error.as_deref(), Some("boom"));
        assert_eq!(registry.weights()[&EngineId::from("hand-b")], 2.0);
    }
}
