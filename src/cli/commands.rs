//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::push::BuildResult;

/// cf-pusher - Push an application and its services to Cloud Foundry.
#[derive(Parser, Debug)]
#[command(name = "cf-pusher")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the job configuration file.
    #[arg(short, long, global = true, env = "CF_PUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push the application described by the job configuration.
    Push {
        /// Build workspace (defaults to current directory).
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Result of the preceding build; unset means still in progress.
        #[arg(long, value_enum)]
        build_result: Option<BuildResult>,
    },

    /// Resolve and validate the job configuration.
    Validate {
        /// Build workspace (defaults to current directory).
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Show all warnings, not just errors.
        #[arg(long)]
        warnings: bool,
    },

    /// Show which services would be created, reset, kept or bound.
    Plan {
        /// Build workspace (defaults to current directory).
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
