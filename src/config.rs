//! Layered configuration: defaults < file < environment.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use shipharvest_anomaly::DetectorConfig;
use shipharvest_clipboard::ScoreLimits;
use shipharvest_coord_cache::CoordinateValidity;
use shipharvest_core_types::OperationSpec;
use shipharvest_engine::EngineConfig;
use shipharvest_retry::RetryPolicy;

/// Files the collector persists between runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePaths {
    pub coordinate_cache_file: PathBuf,
    pub association_snapshot_file: PathBuf,
    pub export_dir: PathBuf,
    pub template_dir: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipharvest");
        Self {
            coordinate_cache_file: base.join("coordinate_cache.json"),
            association_snapshot_file: base.join("clipboard_associations.json"),
            export_dir: base.join("exports"),
            template_dir: base.join("challenge_templates"),
        }
    }
}

/// Complete run configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Ordered field operations from the collection setup step.
    #[serde(default)]
    pub operations: Vec<OperationSpec>,

    /// Locator of the first sample item (usually the first operation's
    /// own locator; kept separate so it can be overridden).
    #[serde(default)]
    pub reference_first: String,

    /// Locator of the second sample item, seeding the pattern learner.
    #[serde(default)]
    pub reference_second: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub coordinate_validity: CoordinateValidity,

    #[serde(default)]
    pub score_limits: ScoreLimits,

    #[serde(default)]
    pub paths: StoragePaths,
}

impl HarvestConfig {
    /// Load from an optional TOML/JSON file with `SHIPHARVEST_*`
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("SHIPHARVEST").separator("__"))
            .build()?;
        let mut loaded: HarvestConfig = settings.try_deserialize()?;
        if loaded.reference_first.is_empty() {
            if let Some(first) = loaded.operations.iter().find(|op| op.enabled) {
                loaded.reference_first = first.locator.clone();
            }
        }
        Ok(loaded)
    }

    pub fn enabled_operations(&self) -> impl Iterator<Item = &OperationSpec> {
        self.operations.iter().filter(|op| op.enabled)
    }
}
