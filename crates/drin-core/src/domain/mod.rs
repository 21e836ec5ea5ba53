//! Domain entities for DrinViewer.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from OS APIs, network libraries, or UI frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! Here the domain is small: a record describing one desktop host that
//! answered a discovery broadcast, and the registry that collects those
//! records while handing each new one to a waiting consumer.

/// A discovered desktop host.
///
/// See [`host::HostRecord`].
pub mod host;

/// Ordered host collection with a capacity-1 producer/consumer hand-off.
///
/// See [`registry::HostRegistry`].
pub mod registry;
