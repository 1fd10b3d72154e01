//! Configuration for the transcode worker and reconciler.
//!
//! Handles loading configuration from a TOML file, an optional `KEY=VALUE`
//! seed file, and environment variable overrides.

pub mod config;

pub use config::*;
