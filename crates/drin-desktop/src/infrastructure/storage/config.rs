//! TOML-based configuration persistence for the desktop responder.
//!
//! Reads and writes `DesktopConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\DrinViewer\desktop.toml`
//! - Linux:    `~/.config/drinviewer/desktop.toml`
//! - macOS:    `~/Library/Application Support/DrinViewer/desktop.toml`
//!
//! # What is TOML? (for beginners)
//!
//! TOML (Tom's Obvious Minimal Language) is a configuration file format designed
//! to be easy to read and write.  Example:
//!
//! ```toml
//! [desktop]
//! log_level = "debug"
//! do_not_disturb = true
//! host_name = "office-pc"
//!
//! [network]
//! port = 50001
//! bind_address = "0.0.0.0"
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]`, so a missing
//! file, a missing section, or a missing key all fall back to the built-in
//! defaults.  The app works on first run before any file exists.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use drin_core::config_dir::platform_config_dir;
use drin_core::protocol::messages::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the desktop settings file.
pub const CONFIG_FILE_NAME: &str = "desktop.toml";

/// File name of the paired-device list kept next to the settings file.
pub const PAIRED_FILE_NAME: &str = "paired.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level desktop configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DesktopConfig {
    #[serde(default)]
    pub desktop: DesktopSection,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General responder behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesktopSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// When set, discovery requests from unpaired devices get no answer.
    #[serde(default)]
    pub do_not_disturb: bool,
    /// Overrides the name the OS reports for this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
}

/// Port and bind-address settings shared by the UDP responder and TCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind both sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for DesktopSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            do_not_disturb: false,
            host_name: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for DrinViewer files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to `desktop.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolves the full path to `paired.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn paired_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(PAIRED_FILE_NAME))
}

/// Loads `DesktopConfig` from the platform config file, returning the
/// defaults if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<DesktopConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `DesktopConfig` from an explicit path.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from(path: &Path) -> Result<DesktopConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DesktopConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to an explicit path, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &DesktopConfig, path: &Path) -> Result<(), ConfigError> {
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

// ── Tests ─────────────────────────────────────────────────────────────────────
