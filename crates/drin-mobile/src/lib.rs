//! drin-mobile library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does drin-mobile do? (for beginners)
//!
//! The *mobile* side is the initiator.  It owns the notifications (an
//! incoming call, a text message) and wants them shown on the desktops of
//! its owner.  To get there it:
//!
//! 1. Broadcasts `DISCOVER:<deviceId>` on the LAN and collects the desktops
//!    that answer, each with a flag saying whether it already trusts this
//!    device.
//! 2. Pairs (or unpairs) with a chosen desktop over a short TCP session.
//! 3. Sends each event to every paired desktop, one TCP session per desktop.
//!
//! The device id is generated once and stored in `mobile.toml`, so desktops
//! recognise the phone across restarts.

/// Application layer: discovery and notification use cases.
pub mod application;

/// Infrastructure layer: UDP discovery, TCP sessions, configuration.
pub mod infrastructure;
