//! Configuration system for Meshmap.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHMAP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshmap/config.toml
//!   3. ~/.config/meshmap/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshmapConfig {
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP API listen address.
    pub http_listen: String,
    /// Peer RPC listen address.
    pub rpc_listen: String,
    /// Remote peer RPC addresses ("host:port"). The local node is not listed.
    pub peers: Vec<String>,
    /// Dial timeout for peer connections, seconds.
    pub dial_timeout_secs: u64,
    /// Per-call RPC timeout, seconds.
    pub rpc_timeout_secs: u64,
    /// Interval between peer reconciliation passes, seconds.
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max record count. New-key inserts beyond this fail.
    pub limit: usize,
    /// Records expire this many seconds after their last active write.
    pub flush_secs: u64,
    /// Interval between expiry sweeps, seconds.
    pub sweep_interval_secs: u64,
    /// Max exception count.
    pub exception_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// SQLite database for historical record queries.
    pub path: PathBuf,
    /// Interval between history snapshots, seconds. 0 = disabled.
    pub persist_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook relay destinations. Empty = relay disabled.
    pub urls: Vec<String>,
    /// Request path appended to each destination. Empty = "/api/v1/alerts".
    pub path: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_listen: "127.0.0.1:8084".to_string(),
            rpc_listen: "127.0.0.1:8184".to_string(),
            peers: Vec::new(),
            dial_timeout_secs: 2,
            rpc_timeout_secs: 10,
            reconcile_interval_secs: 15,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            limit: 50_000,
            flush_secs: 14_400, // 4 hours
            sweep_interval_secs: 60,
            exception_limit: 10_000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("history.db"),
            persist_interval_secs: 60,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            path: String::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshmap")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("meshmap")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshmapConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshmapConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHMAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshmapConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHMAP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESHMAP_NETWORK__HTTP_LISTEN") {
            self.network.http_listen = v;
        }
        if let Ok(v) = std::env::var("MESHMAP_NETWORK__RPC_LISTEN") {
            self.network.rpc_listen = v;
        }
        if let Ok(v) = std::env::var("MESHMAP_NETWORK__PEERS") {
            self.network.peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("MESHMAP_CACHE__LIMIT") {
            if let Ok(n) = v.parse() {
                self.cache.limit = n;
            }
        }
        if let Ok(v) = std::env::var("MESHMAP_CACHE__FLUSH_SECS") {
            if let Ok(n) = v.parse() {
                self.cache.flush_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MESHMAP_HISTORY__PATH") {
            self.history.path = PathBuf::from(v);
        }
    }
}
