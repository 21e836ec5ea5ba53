//! Application layer for the desktop responder.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules, here in `drin-core`) and the infrastructure
//! (sockets, files).  It wires infrastructure services together to fulfil a
//! user goal and depends on collaborator traits such as `PairingStore` and
//! `EventSink` rather than on concrete implementations.
//!
//! # Sub-modules
//!
//! - **`serve_host`** – [`DesktopServer`](serve_host::DesktopServer), the
//!   single service object that owns the discovery responder and the event
//!   server and exposes start / stop / do-not-disturb to the binary or UI.
//! - **`manage_pairings`** – list and revoke paired devices locally.

pub mod manage_pairings;
pub mod serve_host;
