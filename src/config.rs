//! Run configuration file.
//!
//! One JSON document with an `evolution` and a `snake` section; every field
//! is optional and falls back to the reference run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evolve::EvolutionConfig;
use crate::snake::SnakeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub evolution: EvolutionConfig,
    pub snake: SnakeConfig,
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Read a [`RunConfig`] from a JSON file.
pub fn load(path: &Path) -> Result<RunConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    RunConfig::from_json(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
