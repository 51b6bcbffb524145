//! Error types for the push task.
//!
//! This module provides the error hierarchy for every stage of a push:
//! configuration resolution, platform API calls, service reconciliation
//! and deployment. [`ErrorKind`] flattens it into the taxonomy that is
//! reported to the build host.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the push task.
#[derive(Debug, Error)]
pub enum PushError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cloud Foundry API errors.
    #[error("Cloud Foundry API error: {0}")]
    Platform(#[from] PlatformError),

    /// Service reconciliation errors.
    #[error("Service reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Deployment errors.
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The job configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The job configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The resolved configuration is invalid.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The manifest file does not exist in the workspace.
    #[error("Manifest file not found: {path}")]
    ManifestNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The manifest file exists but is malformed.
    #[error("Failed to parse manifest {path}: {message}")]
    ManifestParseError {
        /// Path to the manifest.
        path: PathBuf,
        /// Description of the schema violation.
        message: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Cloud Foundry API errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Authentication failed.
    #[error("Authentication against {target} failed: {message}")]
    AuthenticationFailed {
        /// API endpoint that rejected the credentials.
        target: String,
        /// Description of the auth failure.
        message: String,
    },

    /// No session has been established.
    #[error("Not authenticated: call authenticate before {operation}")]
    NotAuthenticated {
        /// Operation that was attempted.
        operation: String,
    },

    /// API request failed.
    #[error("{operation} failed: {status} - {message}")]
    ApiRequestFailed {
        /// Operation that was attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// A named platform resource does not exist.
    #[error("{resource} not found: {name}")]
    NotFound {
        /// Kind of resource (organization, app, service plan, ...).
        resource: String,
        /// Name that was looked up.
        name: String,
    },

    /// Network error.
    #[error("Network error communicating with Cloud Foundry: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from Cloud Foundry API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// An asynchronous platform operation did not finish in time.
    #[error("Timed out waiting for {operation} on {name}")]
    OperationTimeout {
        /// Operation that was awaited.
        operation: String,
        /// Resource name.
        name: String,
    },

    /// An asynchronous platform operation finished in a failed state.
    #[error("{operation} of {name} failed: {message}")]
    OperationFailed {
        /// Operation that was awaited.
        operation: String,
        /// Resource name.
        name: String,
        /// Failure description reported by the platform.
        message: String,
    },

    /// The application artifact could not be packaged.
    #[error("Failed to package application bits from {path}: {message}")]
    Packaging {
        /// Artifact path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Service reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A bind-only service does not exist on the platform.
    #[error("Service '{name}' does not exist and is not in the services to create")]
    ServiceNotFound {
        /// Name of the missing service.
        name: String,
    },

    /// A query, create or delete call failed for a service.
    #[error("Failed to {operation} service '{name}': {reason}")]
    ServiceOperationFailed {
        /// Operation that failed (query, create, delete).
        operation: String,
        /// Service name.
        name: String,
        /// Underlying platform error text.
        reason: String,
    },
}

/// Deployment errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A deployment step failed.
    #[error("Failed to {step} application '{app}': {reason}")]
    StepFailed {
        /// Step that failed.
        step: String,
        /// Application name.
        app: String,
        /// Underlying platform error text.
        reason: String,
    },

    /// The application did not reach running state in time.
    #[error(
        "Application '{app}' not running after {timeout_secs}s ({running}/{expected} instances running)"
    )]
    Timeout {
        /// Application name.
        app: String,
        /// Instances running at the deadline.
        running: usize,
        /// Instances expected.
        expected: u32,
        /// Configured start timeout.
        timeout_secs: u64,
    },
}

/// Result type alias for push operations.
pub type Result<T> = std::result::Result<T, PushError>;

/// Flat taxonomy of push failures reported to the build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// The configuration could not be resolved or validated.
    ConfigInvalid,
    /// The manifest file is missing.
    ManifestNotFound,
    /// The manifest file is malformed.
    ManifestParseError,
    /// A bind-only service does not exist.
    ServiceNotFound,
    /// Creating, deleting or querying a service failed.
    FailedServiceReconciliation,
    /// Pushing, configuring or starting the app failed.
    FailedDeploy,
    /// The app did not start within its timeout.
    TimedOut,
    /// The platform rejected the credentials.
    PlatformAuthError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConfigInvalid => "ConfigInvalid",
            Self::ManifestNotFound => "ManifestNotFound",
            Self::ManifestParseError => "ManifestParseError",
            Self::ServiceNotFound => "ServiceNotFound",
            Self::FailedServiceReconciliation => "FailedServiceReconciliation",
            Self::FailedDeploy => "FailedDeploy",
            Self::TimedOut => "TimedOut",
            Self::PlatformAuthError => "PlatformAuthError",
        };
        f.write_str(name)
    }
}

impl PushError {
    /// Classifies this error into the reported taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(ConfigError::ManifestNotFound { .. }) => ErrorKind::ManifestNotFound,
            Self::Config(ConfigError::ManifestParseError { .. }) => ErrorKind::ManifestParseError,
            Self::Config(_) => ErrorKind::ConfigInvalid,
            Self::Reconcile(ReconcileError::ServiceNotFound { .. }) => ErrorKind::ServiceNotFound,
            Self::Reconcile(ReconcileError::ServiceOperationFailed { .. }) => {
                ErrorKind::FailedServiceReconciliation
            }
            Self::Platform(PlatformError::AuthenticationFailed { .. }) => {
                ErrorKind::PlatformAuthError
            }
            Self::Deploy(DeployError::Timeout { .. }) => ErrorKind::TimedOut,
            Self::Platform(_) | Self::Deploy(_) => ErrorKind::FailedDeploy,
        }
    }

    /// Returns true if a single HTTP request that failed with this error
    /// may be sent again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Platform(PlatformError::NetworkError { .. }))
    }
}

impl ConfigError {
    /// Creates a manifest parse error.
    #[must_use]
    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ManifestParseError {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl PlatformError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }
}

impl ReconcileError {
    /// Wraps a platform failure for a service operation.
    #[must_use]
    pub fn operation(operation: &str, name: &str, source: &PushError) -> Self {
        Self::ServiceOperationFailed {
            operation: operation.to_string(),
            name: name.to_string(),
            reason: source.to_string(),
        }
    }
}

impl DeployError {
    /// Wraps a platform failure for a deployment step.
    #[must_use]
    pub fn step(step: &str, app: &str, source: &PushError) -> Self {
        Self::StepFailed {
            step: step.to_string(),
            app: app.to_string(),
            reason: source.to_string(),
        }
    }
}
