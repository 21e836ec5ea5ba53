//! Application layer use cases for the mobile (initiator) side.
//!
//! # What use cases does the phone have?
//!
//! - **`discover_hosts`** – Runs broadcast discovery rounds against a shared
//!   `HostRegistry` and optionally streams progress to an observer (the UI)
//!   as [`DiscoveryEvent`](discover_hosts::DiscoveryEvent)s.
//!
//! - **`notify_hosts`** – Pairs and unpairs with discovered desktops and
//!   forwards events to every paired one.  Pairing results are written back
//!   into the same registry.

pub mod discover_hosts;
pub mod notify_hosts;
