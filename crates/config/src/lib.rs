//! Configuration module for the livecast daemon
//!
//! Handles loading configuration from TOML files, environment variable
//! overrides, and stream-key resolution.

pub mod config;

pub use config::*;
