//! Configuration management for the task-sharding node.
//!
//! Provides layered configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Optional TOML config file
//! 3. Environment variables (highest priority, `TASK_RING_` prefix)

mod cluster;
mod dispatch;
mod registry;


pub use cluster::*;
pub use dispatch::*;
pub use registry::*;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Node identity, registry paths, peer service types
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Coordination-service session parameters
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Ring, worker-pool and feeder parameters
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Settings {
    /// Load configuration from an optional TOML file plus environment
    /// overrides, then validate every section.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("TASK_RING").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.registry.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }
}
