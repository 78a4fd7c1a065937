//! Layered configuration for the stratus CLI.
//!
//! Configuration is merged from three TOML files, lowest precedence first:
//! the system file (`/etc/stratus/config.toml`), the user file
//! (`~/.config/stratus/config.toml`), and a local `stratus.toml` in the
//! working directory. Missing files are skipped; missing keys fall back to
//! the defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StratusError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StratusConfig {
    pub client: ClientConfig,
    pub tracker: TrackerConfig,
}

/// Settings for the provisioning backend client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the provisioning service.
    pub endpoint: String,

    /// Cloud region clusters are created in.
    pub region: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Number of attempts for transient network errors. Authorization errors
    /// and backend failures are never retried.
    pub transient_retries: u32,

    /// Delay between transient retries in seconds.
    pub transient_retry_delay_secs: u64,

    /// Default output format for commands (table or json).
    pub format: String,

    /// Log level (error, warn, info, debug, trace).
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8700/provisioning/v1".to_string(),
            region: "us-east-1".to_string(),
            request_timeout_secs: 30,
            transient_retries: 5,
            transient_retry_delay_secs: 5,
            format: "table".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Polling schedule for asynchronous stack operations.
///
/// The interval starts at `initial_interval_secs`, multiplies by
/// `backoff_multiplier` after each poll, and never exceeds
/// `max_interval_secs`. Once `max_total_wait_secs` of cumulative waiting has
/// elapsed without a terminal status the tracker gives up with an
/// inconclusive result rather than guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub initial_interval_secs: u64,
    pub backoff_multiplier: f64,
    pub max_interval_secs: u64,
    pub max_total_wait_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 5,
            backoff_multiplier: 2.0,
            max_interval_secs: 30,
            max_total_wait_secs: 3600,
        }
    }
}

/// One configuration file's contents; sections are optional so that layering
/// can tell an omitted section from an explicitly configured one.
#[derive(Debug, Deserialize)]
struct ConfigLayer {
    client: Option<ClientConfig>,
    tracker: Option<TrackerConfig>,
}

/// Locations configuration files are read from, lowest precedence first.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self {
            system: PathBuf::from("/etc/stratus/config.toml"),
            user: dirs::config_dir().map(|d| d.join("stratus").join("config.toml")),
            local: PathBuf::from("stratus.toml"),
        }
    }

    /// Paths that exist on disk, lowest precedence first.
    pub fn existing_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.system.exists() {
            paths.push(self.system.clone());
        }
        if let Some(user) = &self.user {
            if user.exists() {
                paths.push(user.clone());
            }
        }
        if self.local.exists() {
            paths.push(self.local.clone());
        }
        paths
    }

    pub fn user_config_dir(&self) -> Option<PathBuf> {
        self.user
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl StratusConfig {
    /// Load configuration, merging every existing file over the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&ConfigPaths::new())
    }

    pub fn load_from(paths: &ConfigPaths) -> Result<Self> {
        let mut config = StratusConfig::default();
        for path in paths.existing_paths() {
            let text = fs::read_to_string(&path).map_err(|e| {
                StratusError::Internal(format!("failed to read {}: {}", path.display(), e))
            })?;
            let layer: ConfigLayer = toml::from_str(&text).map_err(|e| {
                StratusError::Internal(format!("failed to parse {}: {}", path.display(), e))
            })?;
            config.merge(layer);
        }
        Ok(config)
    }

    // Whole-section merge: a file that sets any key in a section takes that
    // section; sections it omits are left alone.
    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(client) = layer.client {
            self.client = client;
        }
        if let Some(tracker) = layer.tracker {
            self.tracker = tracker;
        }
    }

    /// Render a commented default configuration, written by `stratus configure`.
    pub fn default_file_contents() -> String {
        let defaults = StratusConfig::default();
        format!(
            "# stratus configuration\n\
             # Values shown are the defaults.\n\n{}",
            toml::to_string_pretty(&defaults).expect("defaults serialize")
        )
    }
}
