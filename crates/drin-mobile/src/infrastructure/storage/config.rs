//! TOML-based configuration for the mobile (initiator) side.
//!
//! Stored as `mobile.toml` in the platform config directory:
//! - Windows:  `%APPDATA%\DrinViewer\mobile.toml`
//! - Linux:    `~/.config/drinviewer/mobile.toml`
//! - macOS:    `~/Library/Application Support/DrinViewer/mobile.toml`
//!
//! ```toml
//! [device]
//! device_id = "0F8FAD5B-D9CB-469F-A165-70867728950E"
//! log_level = "info"
//!
//! [network]
//! port = 50001
//! broadcast_address = "255.255.255.255"
//!
//! [discovery]
//! broadcast_count = 3
//! total_budget_ms = 12000
//! max_duration_ms = 30000
//! ```
//!
//! # The installation identifier
//!
//! `device_id` is what desktops remember when they pair with this device.  It
//! is generated once (an upper-case UUID v4) the first time the file is
//! loaded without one, and must then be saved so it stays stable across runs.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use drin_core::config_dir::platform_config_dir;
use drin_core::protocol::messages::{
    DEFAULT_PORT, DISCOVERY_BROADCAST_COUNT, DISCOVERY_BUDGET, DISCOVERY_MAX_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::infrastructure::network::discovery::DiscoverySettings;

pub const CONFIG_FILE_NAME: &str = "mobile.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MobileConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Persistent installation identifier.  `None` until first generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Port the desktops listen on, for both UDP and TCP.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where discovery requests are sent.  Usually the subnet broadcast
    /// address; any unicast address also works for a single known host.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Broadcasts sent without finding a new host before giving up.
    #[serde(default = "default_broadcast_count")]
    pub broadcast_count: u32,
    /// Receive budget split evenly across the attempts.
    #[serde(default = "default_total_budget_ms")]
    pub total_budget_ms: u64,
    /// Hard wall-clock ceiling for one discovery run.
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl DiscoveryConfig {
    /// Per-attempt silence window, also used as the pairing read timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.total_budget_ms / u64::from(self.broadcast_count.max(1)))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl MobileConfig {
    /// Discovery-client settings derived from this configuration.
    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            port: self.network.port,
            broadcast_count: self.discovery.broadcast_count.max(1),
            attempt_timeout: self.discovery.attempt_timeout(),
            max_duration: self.discovery.max_duration(),
        }
    }

    /// Generates a device id if none is set.  Returns `true` if one was
    /// generated, in which case the caller should save the config.
    pub fn ensure_device_id(&mut self) -> bool {
        let missing = self
            .device
            .device_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty());
        if missing {
            self.device.device_id = Some(Uuid::new_v4().to_string().to_uppercase());
        }
        missing
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_broadcast_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}
fn default_broadcast_count() -> u32 {
    DISCOVERY_BROADCAST_COUNT
}
fn default_total_budget_ms() -> u64 {
    DISCOVERY_BUDGET.as_millis() as u64
}
fn default_max_duration_ms() -> u64 {
    DISCOVERY_MAX_TIMEOUT.as_millis() as u64
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_count: default_broadcast_count(),
            total_budget_ms: default_total_budget_ms(),
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to `mobile.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, returning defaults if the file is absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<MobileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MobileConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &MobileConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the config and makes sure it carries a device id, saving the file
/// if one had to be generated.
///
/// # Errors
///
/// See [`load_config_from`] and [`save_config_to`].
pub fn load_or_init(path: &Path) -> Result<MobileConfig, ConfigError> {
    let mut cfg = load_config_from(path)?;
    if cfg.ensure_device_id() {
        save_config_to(&cfg, path)?;
    }
    Ok(cfg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
