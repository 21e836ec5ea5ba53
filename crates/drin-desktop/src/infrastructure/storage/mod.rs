//! Storage infrastructure: configuration files and the paired-device store.
//!
//! - **`config`** reads and writes `desktop.toml` from the platform config
//!   directory and supplies defaults on first run.
//! - **`pairing_store`** defines the [`PairingStore`](pairing_store::PairingStore)
//!   collaborator and its in-memory and `paired.toml`-backed implementations.

pub mod config;
pub mod pairing_store;
