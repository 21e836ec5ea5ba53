//! # drin-core
//!
//! Shared library for DrinViewer containing the text wire codec, the
//! protocol constants, the discovered-host record, and the single-slot
//! hand-off registry that connects a discovery producer to its consumer.
//!
//! This crate is used by both the mobile (initiator) and desktop (responder)
//! applications.  It has no dependencies on UI frameworks or network
//! sockets; the only thing it reads from the OS is the environment, to find
//! the config directory.
//!
//! # Architecture overview (for beginners)
//!
//! DrinViewer forwards small notifications ("incoming call from Alice") from
//! a phone to the desktop computers it has been paired with.  Before any
//! notification can flow, the two sides must find each other on the LAN and
//! agree to trust each other:
//!
//! 1. **Discovery** – the phone broadcasts `DISCOVER:<deviceId>` over UDP and
//!    every desktop on the subnet answers with its name and whether it already
//!    knows this phone.
//! 2. **Pairing** – the phone opens a short TCP session and sends `PAIRME` or
//!    `UNPAIRME`; the desktop records the decision and replies `PAIRED:OK`.
//! 3. **Events** – the phone opens a TCP session per notification and sends
//!    `INCOMING_DRIN` followed by a binary event payload.
//!
//! This crate defines:
//!
//! - **`protocol`** – The colon-separated text messages and the length-prefixed
//!   event payload, plus every timeout and port constant both sides share.
//!
//! - **`domain`** – [`HostRecord`] (one discovered desktop) and
//!   [`HostRegistry`] (the ordered, duplicate-free list of hosts with a
//!   blocking capacity-1 relay between the discovery thread and the UI).
//!
//! - **`config_dir`** – The per-platform directory both applications keep
//!   their settings in.

pub mod config_dir;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `drin_core::HostRegistry` instead of `drin_core::domain::registry::HostRegistry`.
pub use domain::host::HostRecord;
pub use domain::registry::{HostRegistry, PublishOutcome};
pub use protocol::codec::ProtocolError;
pub use protocol::messages::{DrinEvent, EventAction};
