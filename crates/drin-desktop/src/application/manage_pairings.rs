//! Local management of paired devices.
//!
//! Lets the desktop user see which phones are trusted and revoke them
//! without the phone's cooperation.  Changes go straight to the
//! [`PairingStore`]; a running server sees them on the next request.

use std::sync::Arc;

use tracing::info;

use crate::infrastructure::storage::pairing_store::{PairingStore, StoreError};

/// List and revoke paired devices.
pub struct ManagePairingsUseCase {
    store: Arc<dyn PairingStore>,
}

impl ManagePairingsUseCase {
    pub fn new(store: Arc<dyn PairingStore>) -> Self {
        Self { store }
    }

    /// Every paired device id, sorted.
    ///
    /// # Errors
    ///
    /// Propagates the store's [`StoreError`].
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        self.store.paired_devices()
    }

    /// Unpairs `device_id`.
    ///
    /// Returns `false` (and leaves the store untouched) if the id was not
    /// paired.
    ///
    /// # Errors
    ///
    /// Propagates the store's [`StoreError`].
    pub fn remove(&self, device_id: &str) -> Result<bool, StoreError> {
        if !self.store.is_paired(device_id)? {
            return Ok(false);
        }
        self.store.unpair(device_id)?;
        info!(%device_id, "device unpaired locally");
        Ok(true)
    }

    /// Unpairs every device not listed in `keep`.  Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Stops at the first [`StoreError`]; ids removed before it stay removed.
    pub fn retain(&self, keep: &[String]) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for device_id in self.store.paired_devices()? {
            if keep.contains(&device_id) {
                continue;
            }
            self.store.unpair(&device_id)?;
            info!(%device_id, "device unpaired locally");
            removed.push(device_id);
        }
        Ok(removed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
