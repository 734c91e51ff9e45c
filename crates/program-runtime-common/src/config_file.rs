//! Configuration file structures for the program runtime.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ProgramEntry`]: Program deployed into storage at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// epoch_interruption = true
///
/// [runtime.execution]
/// max_memory_mb = 16
/// timeout_ms = 500
/// cost_model = { kind = "standard" }
///
/// [[programs]]
/// id = "0101010101010101010101010101010101010101010101010101010101010101"
/// path = "./programs/counter.wasm"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Programs to deploy at startup.
    #[serde(default)]
    pub programs: Vec<ProgramEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// The embedded runtime configuration is validated as well.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let file: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;

        file.runtime
            .validate()
            .map_err(|e| ConfigFileError::Invalid {
                message: e.to_string(),
            })?;

        Ok(file)
    }
}

/// A program deployed into storage at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgramEntry {
    /// Hex-encoded 32-byte program identity.
    pub id: String,

    /// Path to the WebAssembly binary (or `.wat` text).
    pub path: String,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The parsed configuration is not usable.
    #[error("Invalid config file: {message}")]
    Invalid { message: String },
}
