//! Effective configuration with provenance.
//!
//! The effective configuration is the merge of the built-in defaults, the
//! configuration file (if present) and command-line overrides, in that
//! order. Each contributing layer is recorded; file layers carry the
//! SHA-256 digest of the bytes that were read.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults;
use super::merge::{merge_layers, toml_to_json};
use super::{GypsumConfig, QueueBackend};

/// Where a layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SHA-256 of the raw file bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Merged configuration and the layers it came from.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: GypsumConfig,
    /// The merged value before typing, for display.
    pub merged: Value,
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build the effective configuration.
    ///
    /// `path` is read when given (a missing file is an error); otherwise the
    /// default file is read if it exists.
    pub fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![defaults::builtin()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from(defaults::DEFAULT_CONFIG_FILE);
                default.is_file().then_some(default)
            }
        };
        if let Some(file) = file {
            let (value, digest) = load_toml_file(&file)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(file.display().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let config: GypsumConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        validate(&config)?;

        Ok(Self {
            config,
            merged,
            sources,
        })
    }

    /// Get a merged value by dot-separated path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.merged, |current, part| current.get(part))
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(e.to_string()))?;
    let parsed: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;
    Ok((toml_to_json(parsed), digest))
}

fn validate(config: &GypsumConfig) -> Result<(), ConfigError> {
    if config.publish.concurrency == 0 || config.purge.concurrency == 0 {
        return Err(ConfigError::Validation(
            "concurrency must be at least 1".to_string(),
        ));
    }
    if !(1..=1000).contains(&config.list.page_size) {
        return Err(ConfigError::Validation(
            "list.page_size must be in [1, 1000]".to_string(),
        ));
    }
    match config.queue.backend {
        QueueBackend::Github if config.queue.repository.is_none() => Err(ConfigError::Validation(
            "queue.repository is required for the github backend".to_string(),
        )),
        QueueBackend::Fs if config.queue.dir.is_none() => Err(ConfigError::Validation(
            "queue.dir is required for the fs backend".to_string(),
        )),
        _ => Ok(()),
    }
}
