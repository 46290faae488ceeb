//! Platform configuration: the fixed DSP budget shared by all pipelines.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a [`DspConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Values parse but make no sense for a DSP.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resource maxima discovered from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory pages available to pipelines.
    pub max_memory_pages: u32,
    /// Compute budget (mcps) available to modules.
    pub max_compute: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256,
            max_compute: 400_000,
        }
    }
}

/// DSP context configuration.
///
/// ```toml
/// [resources]
/// max_memory_pages = 256
/// max_compute = 400000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DspConfig {
    /// Platform budget.
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl DspConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: DspConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            max_memory_pages = config.resources.max_memory_pages,
            max_compute = config.resources.max_compute,
            "dsp config loaded"
        );
        Ok(config)
    }

    /// Reject zero budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resources.max_memory_pages == 0 {
            return Err(ConfigError::Invalid("max_memory_pages must be non-zero".into()));
        }
        if self.resources.max_compute == 0 {
            return Err(ConfigError::Invalid("max_compute must be non-zero".into()));
        }
        Ok(())
    }
}
