//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::service::ProviderMetadata;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub pool: PoolConfig,
    pub daemon: DaemonConfig,
    /// Providers announced at startup, before any discovery feed is attached.
    pub providers: Vec<ProviderMetadata>,
}

/// Connection pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on a single TCP connect attempt.
    pub connect_timeout_ms: u64,
    /// Delay before a failed CREATE is re-published. 0 = immediately.
    pub republish_delay_ms: u64,
    pub tcp_nodelay: bool,
    pub keepalive: bool,
    /// Request timeout used when neither the caller nor the provider sets one.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// How often cairnd logs a pool snapshot. 0 = never.
    pub snapshot_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            republish_delay_ms: 1_000,
            tcp_nodelay: true,
            keepalive: true,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 5,
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn republish_delay(&self) -> Duration {
        Duration::from_millis(self.republish_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl DaemonConfig {
    /// Snapshot logging period, or `None` when disabled.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        match self.snapshot_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cairn")
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

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a specific file without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
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
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("CAIRN_POOL__CONNECT_TIMEOUT_MS") {
            self.pool.connect_timeout_ms = v;
        }
        if let Some(v) = env_u64("CAIRN_POOL__REPUBLISH_DELAY_MS") {
            self.pool.republish_delay_ms = v;
        }
        if let Some(v) = env_u64("CAIRN_POOL__REQUEST_TIMEOUT_MS") {
            self.pool.request_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("CAIRN_POOL__TCP_NODELAY") {
            self.pool.tcp_nodelay = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CAIRN_POOL__KEEPALIVE") {
            self.pool.keepalive = v == "true" || v == "1";
        }
        if let Some(v) = env_u64("CAIRN_DAEMON__SNAPSHOT_INTERVAL_SECS") {
            self.daemon.snapshot_interval_secs = v;
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
