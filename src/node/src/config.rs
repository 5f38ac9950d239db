//! Node configuration loading and validation

use anyhow::{Context, Result};
use nodestake_staking::ProtocolSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Protocol settings the engine starts with
    #[serde(default)]
    pub settings: ProtocolSettings,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub state: StateSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enabled: bool,
    /// Print the Prometheus text exposition after a run
    #[serde(default)]
    pub print_on_exit: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateSection {
    /// JSON ledger snapshot loaded before and saved after a run
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub save_on_exit: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            print_on_exit: false,
        }
    }
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: None,
            save_on_exit: true,
        }
    }
}

fn default_true() -> bool { true }

impl NodeConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {:?}", path.as_ref()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration file")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.settings
            .validate()
            .context("Invalid [settings] section")?;

        if self.metrics.print_on_exit && !self.metrics.enabled {
            anyhow::bail!("metrics.print_on_exit requires metrics.enabled");
        }

        if let Some(path) = &self.state.path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("state.path must not be empty");
            }
        }

        Ok(())
    }
}
