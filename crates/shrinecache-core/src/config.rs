//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, request timeouts, cache TTLs, where the session is kept, and the
//! last used username.
//!
//! Configuration is stored at `~/.config/shrinecache/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileStore, KeyValueStore, KeyringStore};
use crate::cache::{CONTENT_TTL_SECS, STATS_TTL_SECS};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shrinecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Reads should fail fast so stale data can be shown instead.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;

/// Mutations include image uploads.
const DEFAULT_MUTATION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub read_timeout_secs: u64,
    pub mutation_timeout_secs: u64,
    pub content_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub token_store: TokenStoreKind,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            mutation_timeout_secs: DEFAULT_MUTATION_TIMEOUT_SECS,
            content_ttl_secs: CONTENT_TTL_SECS,
            stats_ttl_secs: STATS_TTL_SECS,
            token_store: TokenStoreKind::File,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_secs)
    }

    /// The session store selected by `token_store`.
    pub fn session_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.token_store {
            TokenStoreKind::File => Arc::new(FileStore::new(self.cache_dir()?)),
            TokenStoreKind::Keyring => Arc::new(KeyringStore::new()),
        })
    }
}
