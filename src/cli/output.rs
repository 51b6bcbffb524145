//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{AppSpec, ResolvedConfig, ValidationResult};
use crate::push::{PushOutcome, PushStatus};
use crate::reconciler::{ReconciliationReport, ServiceAction};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Service action row for table display.
#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Action")]
    action: String,
}

/// Application setting row for table display.
#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a push.
    #[must_use]
    pub fn format_outcome(&self, outcome: &PushOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &PushOutcome) -> String {
        let mut output = String::new();

        let status = match outcome.status {
            PushStatus::Succeeded => outcome.status.to_string().green(),
            PushStatus::Skipped => outcome.status.to_string().yellow(),
            _ => outcome.status.to_string().red(),
        };
        let _ = writeln!(output, "\nPush {status}: {}", outcome.cause);

        if let Some(kind) = outcome.error_kind {
            let _ = writeln!(output, "   Error kind: {kind}");
        }
        if let Some(app) = &outcome.app {
            let _ = writeln!(output, "   App: {app}");
        }

        if let Some(services) = outcome.services.as_ref().filter(|s| !s.steps.is_empty()) {
            output.push('\n');
            output.push_str(&Self::services_table(services));
            output.push('\n');
        }

        if let Some(deployment) = &outcome.deployment {
            if deployment.reset {
                let _ = writeln!(output, "   Existing app was deleted before push");
            }
            let _ = writeln!(
                output,
                "   {} instance(s) running after {}s",
                deployment.running, deployment.startup_secs
            );
        }

        let _ = writeln!(output, "   Push id: {}", outcome.push_id);
        output
    }

    /// Formats a validation result with the resolved configuration.
    #[must_use]
    pub fn format_validation(
        &self,
        resolved: &ResolvedConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = ValidationJson {
                    valid: result.is_valid(),
                    app: AppJson::from(&resolved.app),
                    errors: result.errors.iter().map(ToString::to_string).collect(),
                    warnings: result.warnings.clone(),
                };
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "{} Configuration is valid!", "✓".green());

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(
                    output,
                    "\nTarget: {} ({}/{})",
                    resolved.target.api_endpoint,
                    resolved.target.organization,
                    resolved.target.space
                );
                output.push_str(&Self::app_table(&resolved.app));
                output.push('\n');
                let _ = writeln!(
                    output,
                    "\nServices: {} to create, {} to bind",
                    resolved.services_to_create.len(),
                    resolved.services_to_bind.len()
                );
                output
            }
        }
    }

    /// Formats a service plan with the resolved application.
    #[must_use]
    pub fn format_plan(&self, resolved: &ResolvedConfig, plan: &ReconciliationReport) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = PlanJson {
                    app: AppJson::from(&resolved.app),
                    reset_if_exists: resolved.reset_if_exists,
                    services: plan,
                };
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nPush plan for '{}'\n", resolved.app.name);
                output.push_str(&Self::app_table(&resolved.app));
                output.push('\n');

                if resolved.reset_if_exists {
                    let _ = writeln!(
                        output,
                        "\n{} An existing app named '{}' will be deleted first",
                        "⚠".yellow(),
                        resolved.app.name
                    );
                }

                if plan.steps.is_empty() {
                    let _ = writeln!(output, "\nNo services to create or bind.");
                } else {
                    output.push('\n');
                    output.push_str(&Self::services_table(plan));
                    output.push('\n');
                    let _ = writeln!(
                        output,
                        "\nPlan: {} to create, {} to reset, {} unchanged, {} to bind",
                        plan.count(ServiceAction::Create).to_string().green(),
                        plan.count(ServiceAction::Reset).to_string().red(),
                        plan.count(ServiceAction::Keep),
                        plan.count(ServiceAction::Bind),
                    );
                }

                if plan.has_missing() {
                    let _ = writeln!(
                        output,
                        "\n{} Missing services would fail the push",
                        "✗".red()
                    );
                }
                output
            }
        }
    }

    fn services_table(report: &ReconciliationReport) -> String {
        let rows: Vec<ServiceRow> = report
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| ServiceRow {
                index: i + 1,
                name: step.name.clone(),
                action: Self::format_action(step.action),
            })
            .collect();
        Table::new(rows).to_string()
    }

    fn app_table(app: &AppSpec) -> String {
        let route = if app.no_route {
            String::from("none")
        } else {
            app.domain.as_ref().map_or_else(
                || format!("{} (default domain)", app.host),
                |domain| format!("{}.{domain}", app.host),
            )
        };
        let rows = vec![
            SettingRow { key: "Name", value: app.name.clone() },
            SettingRow { key: "Memory", value: format!("{} MB", app.memory_mb) },
            SettingRow { key: "Instances", value: app.instances.to_string() },
            SettingRow { key: "Route", value: route },
            SettingRow { key: "Start timeout", value: format!("{}s", app.timeout_secs) },
            SettingRow { key: "Buildpack", value: app.buildpack.clone().unwrap_or_else(|| String::from("auto")) },
            SettingRow { key: "Path", value: app.app_path.display().to_string() },
            SettingRow {
                key: "Env",
                value: app.env.iter().map(|v| v.key.as_str()).collect::<Vec<_>>().join(", "),
            },
        ];
        Table::new(rows).to_string()
    }

    fn format_action(action: ServiceAction) -> String {
        match action {
            ServiceAction::Create => "create".green().to_string(),
            ServiceAction::Reset => "reset".red().to_string(),
            ServiceAction::Keep => "keep".dimmed().to_string(),
            ServiceAction::Bind => "bind".cyan().to_string(),
            ServiceAction::Missing => "missing".red().bold().to_string(),
        }
    }

    /// Prints an error message.
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
            }
            OutputFormat::Text => {
                eprintln!("{} {message}", "✗".red());
            }
        }
    }
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct ValidationJson {
    valid: bool,
    app: AppJson,
    errors: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    app: AppJson,
    reset_if_exists: bool,
    services: &'a ReconciliationReport,
}

/// Application summary without environment values.
#[derive(Serialize)]
struct AppJson {
    name: String,
    memory_mb: u32,
    instances: u32,
    host: String,
    domain: Option<String>,
    no_route: bool,
    timeout_secs: u64,
    buildpack: Option<String>,
    stack: Option<String>,
    path: String,
    env_keys: Vec<String>,
}

impl From<&AppSpec> for AppJson {
    fn from(app: &AppSpec) -> Self {
        Self {
            name: app.name.clone(),
            memory_mb: app.memory_mb,
            instances: app.instances,
            host: app.host.clone(),
            domain: app.domain.clone(),
            no_route: app.no_route,
            timeout_secs: app.timeout_secs,
            buildpack: app.buildpack.clone(),
            stack: app.stack.clone(),
            path: app.app_path.display().to_string(),
            env_keys: app.env.iter().map(|v| v.key.clone()).collect(),
        }
    }
}
