// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service wiring for the CLI: data directory, persisted config, databases,
// engine adapters and the pipeline built from them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lectern_core::config::{EngineConfig, PipelineConfig};
use lectern_core::error::{LecternError, Result};
use lectern_core::types::Capability;
use lectern_document::{DocumentClassifier, SharpnessClassifier};
use lectern_engine::{EngineAdapter, EngineRegistry, HealthPolicy, MockAdapter};
use lectern_pipeline::{CompletionReceiver, Pipeline};
use lectern_store::{AuditLog, SqliteStore};
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";
const RECORDS_DB: &str = "records.db";
const AUDIT_DB: &str = "audit.db";

/// Confidence reported by mock engines.
const MOCK_CONFIDENCE: f64 = 0.92;
const MOCK_LATENCY: Duration = Duration::from_millis(25);

/// How engine ids are turned into adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    /// Every configured engine is backed by a mock.
    Mock,
    /// Real adapters only.
    Real,
    /// No adapters; for commands that never recognise anything.
    None,
}

pub struct Services {
    data_dir: PathBuf,
    config: PipelineConfig,
    store: Arc<SqliteStore>,
    audit: Arc<AuditLog>,
}

impl Services {
    /// Open the data directory. A config file passed on the command line
    /// replaces the persisted one.
    pub fn init(data_dir: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        info!(path = %data_dir.display(), "initialising services");

        let config = match config_path {
            Some(path) => {
                let config = PipelineConfig::load(path)?;
                persist_config(&data_dir, &config)?;
                config
            }
            None => load_config(&data_dir)?.unwrap_or_default(),
        };

        let store = SqliteStore::open(data_dir.join(RECORDS_DB))?;
        let audit = AuditLog::open(data_dir.join(AUDIT_DB))?;

        Ok(Self {
            data_dir,
            config,
            store: Arc::new(store),
            audit: Arc::new(audit),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Build the engine registry.
    pub fn registry(&self, mode: AdapterMode) -> Result<EngineRegistry> {
        match mode {
            AdapterMode::None => Ok(EngineRegistry::new(HealthPolicy::from(&self.config))),
            AdapterMode::Mock => {
                let mut config = self.config.clone();
                if config.engines.is_empty() {
                    config.engines = default_mock_engines();
                }
                let adapters = config
                    .engines
                    .iter()
                    .map(|engine| {
                        let adapter: Arc<dyn EngineAdapter> = Arc::new(
                            MockAdapter::sample_texts(MOCK_CONFIDENCE).with_latency(MOCK_LATENCY),
                        );
                        (engine.id.clone(), adapter)
                    })
                    .collect();
                EngineRegistry::from_config(&config, adapters)
            }
            AdapterMode::Real => {
                if self.config.engines.is_empty() {
                    warn!("no engines configured");
                }
                let mut adapters = HashMap::new();
                for engine in &self.config.engines {
                    adapters.insert(engine.id.clone(), real_adapter(engine)?);
                }
                EngineRegistry::from_config(&self.config, adapters)
            }
        }
    }

    pub fn pipeline(&self, mode: AdapterMode) -> Result<(Pipeline, CompletionReceiver)> {
        let registry = self.registry(mode)?;
        let classifier = DocumentClassifier::new(
            Arc::new(SharpnessClassifier::default()),
            self.config.classifier_confidence_floor,
        );
        Pipeline::new(
            &self.config,
            classifier,
            Arc::new(registry),
            self.store.clone(),
            Arc::clone(&self.audit),
        )
    }
}

fn default_mock_engines() -> Vec<EngineConfig> {
    vec![
        EngineConfig::new("mock-printed", vec![Capability::Printed]),
        EngineConfig::new("mock-handwriting", vec![Capability::Handwritten]),
        EngineConfig::new(
            "mock-general",
            vec![Capability::Printed, Capability::Handwritten],
        )
        .with_weight(0.5),
    ]
}

#[cfg(feature = "ocr")]
fn real_adapter(engine: &EngineConfig) -> Result<Arc<dyn EngineAdapter>> {
    use lectern_engine::ocr::OcrsAdapter;

    match engine.id.as_str() {
        "ocrs" => Ok(Arc::new(OcrsAdapter::new(Default::default())?)),
        other => Err(no_adapter(other)),
    }
}

#[cfg(not(feature = "ocr"))]
fn real_adapter(engine: &EngineConfig) -> Result<Arc<dyn EngineAdapter>> {
    Err(no_adapter(&engine.id))
}

fn no_adapter(id: &str) -> LecternError {
    LecternError::Config(format!(
        "no adapter available for engine '{id}'; pass --mock, or build with the `ocr` feature and configure an engine named 'ocrs'"
    ))
}

// -- Config file persistence -------------------------------------------------

fn load_config(data_dir: &Path) -> Result<Option<PipelineConfig>> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    PipelineConfig::load(&path).map(Some)
}

fn persist_config(data_dir: &Path, config: &PipelineConfig) -> Result<()> {
    config.save(data_dir.join(CONFIG_FILE))
}
