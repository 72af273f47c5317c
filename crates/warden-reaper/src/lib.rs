//! # warden-reaper
//!
//! Daemon that removes Warden sandboxes left behind by crashed owners.
//! See [`ReaperConfig::from_env`] for the environment it reads.

pub mod config;

pub use config::{ConfigError, ReaperConfig};
