//! Configuration.
//!
//! Three layers, merged in order:
//! 1. built-in defaults
//! 2. the TOML file (`gypsum.toml`, or `--config`)
//! 3. command-line overrides
//!
//! Credentials are not part of the configuration; the queue token is read
//! from the environment.

mod defaults;
mod effective;
mod merge;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use defaults::{DEFAULT_CONCURRENCY, DEFAULT_CONFIG_FILE};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};

/// Environment variable holding the issue tracker token.
pub const TOKEN_ENV: &str = "GH_BOT_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Fs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Github,
    Fs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// `owner/name` of the repository whose issues form the queue.
    #[serde(default)]
    pub repository: Option<String>,
    pub api_url: String,
    /// Directory of the fs backend.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub concurrency: usize,
    pub schema_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeConfig {
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConfig {
    pub page_size: usize,
}

/// Typed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GypsumConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub publish: PublishConfig,
    pub purge: PurgeConfig,
    pub list: ListConfig,
}
