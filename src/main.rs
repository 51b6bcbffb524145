//! cf-pusher CLI entrypoint.
//!
//! This is the main entrypoint for the cf-pusher command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cf_pusher::cli::{Cli, Commands, OutputFormatter};
use cf_pusher::config::{
    find_config_file, ConfigParser, ConfigValidator, ConfigurationResolver, CredentialsProvider,
    EnvCredentialsProvider, PushConfig,
};
use cf_pusher::error::Result;
use cf_pusher::platform::{CloudFoundryClient, PlatformClient};
use cf_pusher::push::{BuildContext, BuildResult, PushOrchestrator};
use cf_pusher::reconciler::ServiceReconciler;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            formatter.error(&format!("Error: {e}"));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns whether the build step passes.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<bool> {
    match cli.command {
        Commands::Push {
            workspace,
            build_result,
        } => cmd_push(cli.config.as_ref(), &workspace, build_result, formatter).await,
        Commands::Validate {
            workspace,
            warnings,
        } => cmd_validate(cli.config.as_ref(), &workspace, warnings, formatter),
        Commands::Plan { workspace } => cmd_plan(cli.config.as_ref(), &workspace, formatter).await,
    }
}

/// Push the application.
async fn cmd_push(
    config_path: Option<&PathBuf>,
    workspace: &Path,
    build_result: Option<BuildResult>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let mut context = BuildContext::new(workspace);
    context.result = build_result;

    // An unsuccessful build is skipped before the configuration is read.
    let client = CloudFoundryClient::new();
    let credentials = EnvCredentialsProvider::new();
    let outcome = PushOrchestrator::new(&client, &credentials)
        .push_with(&context, || load_config(config_path, workspace))
        .await;

    println!("{}", formatter.format_outcome(&outcome));
    Ok(outcome.is_success())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    workspace: &Path,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_config(config_path, workspace)?;

    let resolved = ConfigurationResolver::new(workspace).resolve(&config)?;
    let result = ConfigValidator::new().validate(&resolved)?;

    println!(
        "{}",
        formatter.format_validation(&resolved, &result, show_warnings)
    );
    Ok(true)
}

/// Show the service plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    workspace: &Path,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_config(config_path, workspace)?;

    let resolved = ConfigurationResolver::new(workspace).resolve(&config)?;
    ConfigValidator::new().validate(&resolved)?;

    let credentials = EnvCredentialsProvider::new().lookup(&resolved.target.credentials_id)?;
    let client = CloudFoundryClient::new();
    client.authenticate(&resolved.target, &credentials).await?;

    let plan = ServiceReconciler::new(&client)
        .plan(&resolved.services_to_create, &resolved.services_to_bind)
        .await;
    client.logout().await;
    let plan = plan?;

    println!("{}", formatter.format_plan(&resolved, &plan));
    Ok(!plan.has_missing())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads the job configuration, with `.env` and environment overrides applied.
fn load_config(config_path: Option<&PathBuf>, workspace: &Path) -> Result<PushConfig> {
    let config_file =
        config_path.map_or_else(|| find_config_file(workspace), |path| Ok(path.clone()))?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    info!(
        "Target {} ({}/{})",
        config.target, config.organization, config.space
    );
    Ok(config)
}
