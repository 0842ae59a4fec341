use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ConfigError;

/// Construction-time settings for a single pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Initial number of worker lanes.
    pub concurrency: usize,
    /// Whether a driver may skip this pipeline when shutting down early.
    pub skippable: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            skippable: false,
        }
    }
}

/// Parse a RON document into any deserializable settings type.
pub fn parse_ron<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    Ok(ron::from_str(text)?)
}

/// Read and parse a RON settings file.
pub fn load_ron<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path)?;
    parse_ron(&text)
}
