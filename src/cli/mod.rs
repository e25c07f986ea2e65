//! Command-line interface for media-reconciler.
//!
//! This module provides commands for running the reconciliation pipeline,
//! inspecting the identity store and managing the config file.

mod commands;

pub use commands::{Cli, Commands, run_command};
