//! # dedupfs-config
//!
//! Configuration management for dedupfs.
//!
//! Loads configuration from:
//! 1. `~/.dedupfs/config.toml` (global)
//! 2. an explicit `--config` file (overrides global, key by key)
//! 3. Environment variables (highest priority)
//!
//! Command-line flags are applied on top by the binary.

pub mod logging;
pub mod path;

use std::path::{Path, PathBuf};

use dedupfs_cas::{DigestAlgorithm, StoreOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use logging::{init_logging, LogLevel};

pub const ENV_DATABASE: &str = "DEDUPFS_DATABASE";
pub const ENV_BLOCK_SIZE: &str = "DEDUPFS_BLOCK_SIZE";
pub const ENV_DIGEST: &str = "DEDUPFS_DIGEST";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub mount: MountConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the standard location plus an optional explicit file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let global = Self::global_config_path().filter(|p| p.exists());
        Self::load_from(global.as_deref(), explicit, |key| std::env::var(key).ok())
    }

    /// Load from the given files, then apply overrides looked up through `env`.
    pub fn load_from<F>(
        global: Option<&Path>,
        explicit: Option<&Path>,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Table::new();

        // 1. Global config
        if let Some(path) = global {
            debug!("Loading global config from {:?}", path);
            merge_tables(&mut merged, read_table(path)?);
        }

        // 2. Explicit config, key by key over the global one
        if let Some(path) = explicit {
            debug!("Loading config from {:?}", path);
            merge_tables(&mut merged, read_table(path)?);
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;

        // 3. Environment
        config.apply_overrides(env);
        Ok(config)
    }

    /// Global config path: ~/.dedupfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".dedupfs/config.toml"))
    }

    fn apply_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env(ENV_DATABASE) {
            self.storage.database = PathBuf::from(path);
        }
        if let Some(raw) = env(ENV_BLOCK_SIZE) {
            match raw.trim().parse() {
                Ok(n) => self.storage.block_size = Some(n),
                Err(_) => warn!("Ignoring {}={:?}: not a byte count", ENV_BLOCK_SIZE, raw),
            }
        }
        if let Some(raw) = env(ENV_DIGEST) {
            match raw.parse::<DigestAlgorithm>() {
                Ok(d) => self.storage.digest = Some(d),
                Err(e) => warn!("Ignoring {}: {}", ENV_DIGEST, e),
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// LMDB environment directory (`~` is expanded)
    pub database: PathBuf,
    /// Chunk size for a store that does not exist yet
    pub block_size: Option<usize>,
    /// Digest for a store that does not exist yet
    pub digest: Option<DigestAlgorithm>,
    /// LMDB map size in MiB
    pub map_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("~/.dedupfs/datastore.lmdb"),
            block_size: None,
            digest: None,
            map_size_mb: 64 * 1024,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        path::expand_home(&self.database)
    }

    /// Build the options used to open the store at [`Self::database_path`].
    ///
    /// Explicit values always pass through and may conflict with a stored
    /// configuration. Configured values only seed a store that has not been
    /// initialised yet; an existing store keeps whatever it holds.
    pub fn store_options(
        &self,
        block_size: Option<usize>,
        digest: Option<DigestAlgorithm>,
    ) -> StoreOptions {
        let fresh = !self.database_path().join("data.mdb").exists();
        let mut options = StoreOptions::default().with_map_size(self.map_size_mb << 20);
        options.block_size = block_size.or(self.block_size.filter(|_| fresh));
        options.digest = digest.or(self.digest.filter(|_| fresh));
        options
    }
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table
    pub fsname: String,
    /// Let users other than the mounting one access the filesystem
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fsname: "dedupfs".to_string(),
            allow_other: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
