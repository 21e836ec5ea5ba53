//! Storage infrastructure: the `mobile.toml` settings file.

pub mod config;
