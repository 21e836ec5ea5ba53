//! Infrastructure layer for the mobile (initiator) side.
//!
//! Contains OS-facing adapters: the UDP discovery client, the TCP pairing and
//! event session, and configuration file persistence.
//!
//! **Dependency rule**: this layer may depend on `drin_core`, but MUST NOT
//! import from the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – Broadcast discovery with retry and hard-ceiling timeouts,
//!   and the short-lived TCP sessions used for pairing and event delivery.
//!
//! - **`storage`** – Reads and writes `mobile.toml`, including the persistent
//!   installation identifier.

pub mod network;
pub mod storage;
