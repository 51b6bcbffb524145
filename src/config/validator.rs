//! Validation of resolved push configurations.
//!
//! Validation runs after resolution so that manifest-sourced and inline
//! applications are checked by the same rules.

use crate::error::{ConfigError, PushError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::resolver::ResolvedConfig;
use super::spec::{AppSpec, PlatformTarget, ServiceDefinition};

/// Validator for resolved configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` carrying the first error found.
    pub fn validate(&self, resolved: &ResolvedConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_target(&resolved.target, &mut result);
        Self::validate_app(&resolved.app, &mut result);
        Self::validate_services(resolved, &mut result);

        if resolved.reset_if_exists {
            result.warnings.push(format!(
                "Application '{}' will be deleted before pushing (reset_if_exists)",
                resolved.app.name
            ));
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(PushError::Config(ConfigError::Invalid {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates the platform target.
    fn validate_target(target: &PlatformTarget, result: &mut ValidationResult) {
        if target.api_endpoint.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("target"),
                message: String::from("Target API endpoint cannot be empty"),
            });
        } else if !target.api_endpoint.starts_with("https://")
            && !target.api_endpoint.starts_with("http://")
        {
            result.errors.push(ValidationError {
                field: String::from("target"),
                message: format!(
                    "Target '{}' must be an http(s) URL",
                    target.api_endpoint
                ),
            });
        } else if target.api_endpoint.starts_with("http://") {
            result
                .warnings
                .push(String::from("target: credentials will be sent over plain HTTP"));
        }

        for (field, value) in [
            ("organization", &target.organization),
            ("space", &target.space),
            ("credentials_id", &target.credentials_id),
        ] {
            if value.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("{field} cannot be empty"),
                });
            }
        }

        if target.trust_self_signed {
            result.warnings.push(String::from(
                "self_signed: TLS certificate validation is disabled for this target",
            ));
        }
    }

    /// Validates the resolved application.
    fn validate_app(app: &AppSpec, result: &mut ValidationResult) {
        if app.name.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("app.name"),
                message: String::from("Application name cannot be empty"),
            });
        }

        if app.memory_mb == 0 {
            result.errors.push(ValidationError {
                field: String::from("app.memory"),
                message: String::from("Memory must be at least 1 MB"),
            });
        }

        if app.instances == 0 {
            result.errors.push(ValidationError {
                field: String::from("app.instances"),
                message: String::from("Instance count must be at least 1"),
            });
        }

        if !app.no_route && app.host.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("app.host"),
                message: String::from("Host cannot be empty when a route is requested"),
            });
        }

        for (i, var) in app.env.iter().enumerate() {
            if var.key.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("app.env[{i}].key"),
                    message: String::from("Environment variable key cannot be empty"),
                });
            }
        }
    }

    /// Validates service definitions and bind references.
    fn validate_services(resolved: &ResolvedConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, service) in resolved.services_to_create.iter().enumerate() {
            let prefix = format!("services_to_create[{i}]");
            Self::validate_definition(service, &prefix, result);

            if !seen.insert(service.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate service name: {}", service.name),
                });
            }

            if service.reset_service {
                result.warnings.push(format!(
                    "{prefix}: service '{}' will be deleted and recreated if it exists",
                    service.name
                ));
            }
        }

        for (i, service) in resolved.services_to_bind.iter().enumerate() {
            if service.name.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("services_to_bind[{i}].name"),
                    message: String::from("Service name cannot be empty"),
                });
            } else if seen.contains(service.name.as_str()) {
                result.warnings.push(format!(
                    "Service '{}' is both created and bound; it will be bound once",
                    service.name
                ));
            }
        }
    }

    fn validate_definition(
        service: &ServiceDefinition,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for (field, value) in [
            ("name", &service.name),
            ("type", &service.service_type),
            ("plan", &service.plan),
        ] {
            if value.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.{field}"),
                    message: format!("Service {field} cannot be empty"),
                });
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
