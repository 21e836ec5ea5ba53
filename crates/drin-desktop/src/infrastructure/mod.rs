//! Infrastructure layer for the desktop responder.
//!
//! Contains OS-facing adapters: UDP and TCP sockets, configuration and
//! pairing files, and the event sinks the UI plugs into.
//!
//! **Dependency rule**: this layer may depend on `drin_core`, but MUST NOT
//! import from the `application` layer.

pub mod network;
pub mod notifier;
pub mod storage;
