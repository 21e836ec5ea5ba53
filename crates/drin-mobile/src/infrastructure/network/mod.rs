//! Network infrastructure for the mobile side.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Sends `DISCOVER:<deviceId>` broadcasts from a dedicated
//!   OS thread and publishes each responding desktop into a shared
//!   `HostRegistry`.  Retries while new hosts keep appearing and always gives
//!   up at a hard wall-clock ceiling.
//!
//! - **`pairing`** – One short-lived TCP connection per exchange: either a
//!   pair/unpair toggle (request line, reply line) or an event delivery
//!   (marker line plus binary payload, no reply).

use std::io;

pub mod discovery;
pub mod pairing;

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
