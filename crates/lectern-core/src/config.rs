// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration. Thresholds are policy, so they all live here.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LecternError, Result};
use crate::types::Capability;

/// Static description of one engine adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stable identifier, referenced by attempts and audit events.
    pub id: String,
    pub capabilities: Vec<Capability>,
    /// Priority weight used by fusion. Must be positive.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Per-call budget; falls back to `default_engine_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Concurrent calls allowed across all pages (lease size).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_concurrency() -> usize {
    4
}

impl EngineConfig {
    pub fn new(id: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities,
            weight: default_weight(),
            timeout_ms: None,
            max_concurrency: default_max_concurrency(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

/// Persistent pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fused confidence at or above which a page is auto-accepted.
    pub accept_threshold: f64,
    /// Pairwise similarity at or above which two outputs share a cluster.
    pub similarity_threshold: f64,
    /// Retries per engine per page after the first failed call.
    pub max_retries: u32,
    /// Consecutive failures that disable an engine.
    pub consecutive_failure_limit: u32,
    /// A failure older than this restarts the consecutive count.
    pub failure_window_secs: u64,
    /// Disabled engines are retried after this long. `None` means
    /// only a manual reset re-enables them.
    pub disable_cooldown_secs: Option<u64>,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub default_engine_timeout_ms: u64,
    /// Pages processed concurrently within a batch.
    pub worker_pool_size: usize,
    /// Classifier confidence below which the label becomes `unknown`.
    pub classifier_confidence_floor: f64,
    /// Larger pages are downscaled to fit this bound before recognition.
    pub max_image_dimension: u32,
    pub completion_channel_capacity: usize,
    pub engines: Vec<EngineConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.90,
            similarity_threshold: 0.85,
            max_retries: 1,
            consecutive_failure_limit: 3,
            failure_window_secs: 600,
            disable_cooldown_secs: Some(300),
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 5_000,
            default_engine_timeout_ms: 30_000,
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            classifier_confidence_floor: 0.5,
            max_image_dimension: 1600,
            completion_channel_capacity: 256,
            engines: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        check_unit("accept_threshold", self.accept_threshold)?;
        check_unit("similarity_threshold", self.similarity_threshold)?;
        check_unit(
            "classifier_confidence_floor",
            self.classifier_confidence_floor,
        )?;
        if self.consecutive_failure_limit == 0 {
            return Err(LecternError::Config(
                "consecutive_failure_limit must be at least 1".into(),
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(LecternError::Config(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.max_image_dimension == 0 {
            return Err(LecternError::Config(
                "max_image_dimension must be positive".into(),
            ));
        }
        if self.completion_channel_capacity == 0 {
            return Err(LecternError::Config(
                "completion_channel_capacity must be at least 1".into(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(LecternError::Config(
                "retry_base_delay_ms exceeds retry_max_delay_ms".into(),
            ));
        }

        let mut seen = HashSet::new();
        for engine in &self.engines {
            if !seen.insert(engine.id.as_str()) {
                return Err(LecternError::Config(format!(
                    "duplicate engine id '{}'",
                    engine.id
                )));
            }
            if engine.capabilities.is_empty() {
                return Err(LecternError::Config(format!(
                    "engine '{}' declares no capabilities",
                    engine.id
                )));
            }
            if !(engine.weight.is_finite() && engine.weight > 0.0) {
                return Err(LecternError::Config(format!(
                    "engine '{}' weight must be positive",
                    engine.id
                )));
            }
            if engine.max_concurrency == 0 {
                return Err(LecternError::Config(format!(
                    "engine '{}' max_concurrency must be at least 1",
                    engine.id
                )));
            }
            if engine.timeout_ms == Some(0) {
                return Err(LecternError::Config(format!(
                    "engine '{}' timeout must be positive",
                    engine.id
                )));
            }
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LecternError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}
