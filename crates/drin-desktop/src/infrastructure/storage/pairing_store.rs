//! Persistence of paired device identifiers.
//!
//! The responder asks "is this device paired?" on every discovery request and
//! records pair/unpair decisions from the TCP server.  Both run concurrently,
//! so every implementation must be safe to call from several threads at once;
//! each call is treated as atomic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Error type for pairing store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing pairing store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pairing store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize pairing store: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("device id must not be empty")]
    EmptyDeviceId,
}

/// The set of device identifiers this host trusts.
#[cfg_attr(test, mockall::automock)]
pub trait PairingStore: Send + Sync {
    /// Returns `true` if `device_id` has been paired.
    fn is_paired(&self, device_id: &str) -> Result<bool, StoreError>;

    /// Records `device_id` as paired.  Pairing an already paired id is a no-op.
    fn pair(&self, device_id: &str) -> Result<(), StoreError>;

    /// Forgets `device_id`.  Unpairing an unknown id is a no-op.
    fn unpair(&self, device_id: &str) -> Result<(), StoreError>;

    /// Every paired device id, sorted.
    fn paired_devices(&self) -> Result<Vec<String>, StoreError>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    ids: RwLock<BTreeSet<String>>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already trusts `ids`.
    pub fn with_paired<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: RwLock::new(ids.into_iter().map(Into::into).collect()),
        }
    }
}

impl PairingStore for MemoryPairingStore {
    fn is_paired(&self, device_id: &str) -> Result<bool, StoreError> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.contains(device_id))
    }

    fn pair(&self, device_id: &str) -> Result<(), StoreError> {
        if device_id.is_empty() {
            return Err(StoreError::EmptyDeviceId);
        }
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        ids.insert(device_id.to_string());
        Ok(())
    }

    fn unpair(&self, device_id: &str) -> Result<(), StoreError> {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        ids.remove(device_id);
        Ok(())
    }

    fn paired_devices(&self) -> Result<Vec<String>, StoreError> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().cloned().collect())
    }
}

// ── File-backed store ─────────────────────────────────────────────────────────

/// On-disk shape of `paired.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PairedFile {
    #[serde(default)]
    devices: BTreeSet<String>,
}

/// A store persisted as a TOML list in `paired.toml`.
///
/// Reads are served from memory.  Each change rewrites the whole file while
/// the write lock is held, so the file always matches the in-memory set.
#[derive(Debug)]
pub struct FilePairingStore {
    path: PathBuf,
    ids: RwLock<BTreeSet<String>>,
}

impl FilePairingStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Parse`] if it is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ids = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<PairedFile>(&content)?.devices,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(path = %path.display(), count = ids.len(), "pairing store opened");
        Ok(Self {
            path,
            ids: RwLock::new(ids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, ids: &BTreeSet<String>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(&PairedFile {
            devices: ids.clone(),
        })?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Applies `change` to a copy of the set and only commits it once the
    /// file write succeeded.
    fn update(&self, change: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<(), StoreError> {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = ids.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *ids = next;
        Ok(())
    }
}

impl PairingStore for FilePairingStore {
    fn is_paired(&self, device_id: &str) -> Result<bool, StoreError> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.contains(device_id))
    }

    fn pair(&self, device_id: &str) -> Result<(), StoreError> {
        if device_id.is_empty() {
            return Err(StoreError::EmptyDeviceId);
        }
        self.update(|ids| ids.insert(device_id.to_string()))
    }

    fn unpair(&self, device_id: &str) -> Result<(), StoreError> {
        self.update(|ids| ids.remove(device_id))
    }

    fn paired_devices(&self) -> Result<Vec<String>, StoreError> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().cloned().collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
