//! Network infrastructure for the desktop responder.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Answers `DISCOVER` broadcasts over UDP with this host's
//!   name and whether the asking device is paired.  Runs on a dedicated OS
//!   thread with one short-lived worker thread per request.
//!
//! - **`event_server`** – Accepts TCP sessions for pairing, unpairing, and
//!   event delivery.  One Tokio task per connection, one exchange per
//!   connection.
//!
//! Both sockets normally share one port number (UDP and TCP port spaces are
//! separate), so a single "port in use" check covers both.

use std::io;
use std::net::SocketAddr;

pub mod discovery;
pub mod event_server;

/// Returns `true` for bind failures caused by another process holding the port.
pub(crate) fn is_addr_in_use(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::AddrInUse
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Formats a bind address for log and error messages.
pub(crate) fn describe(addr: &SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("port {}", addr.port())
    } else {
        addr.to_string()
    }
}
