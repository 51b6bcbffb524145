//! CLI module for the cf-pusher tool.
//!
//! This module provides the command-line interface for pushing
//! applications to Cloud Foundry from a build job.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
