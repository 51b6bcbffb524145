//! Configuration specification types for the push task.
//!
//! [`PushConfig`] maps to the job configuration file. The application and
//! service types below it are what the resolver produces from that file
//! and, in manifest mode, from the application manifest.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Default manifest path, relative to the build workspace.
pub const DEFAULT_MANIFEST_PATH: &str = "manifest.yml";

/// Default bound on platform operations, in seconds.
pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 120;

/// Default application memory in MB.
pub const DEFAULT_MEMORY_MB: u32 = 512;

/// Default number of application instances.
pub const DEFAULT_INSTANCES: u32 = 1;

/// Default application start timeout in seconds.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 60;

/// The root job configuration for one push step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushConfig {
    /// Schema version the file was written with (0 for unversioned files).
    #[serde(default)]
    pub schema_version: u32,
    /// Cloud Foundry API endpoint.
    pub target: String,
    /// Organization to push into.
    pub organization: String,
    /// Space to push into.
    #[serde(alias = "cloud_space")]
    pub space: String,
    /// Identifier used to look up credentials.
    pub credentials_id: String,
    /// Whether to trust self-signed certificates.
    #[serde(default)]
    pub self_signed: bool,
    /// Whether to delete an existing app of the same name before pushing.
    #[serde(default)]
    pub reset_if_exists: bool,
    /// Bound on platform operations in seconds (introduced in schema v2).
    #[serde(default)]
    pub plugin_timeout: Option<u64>,
    /// Services to create before pushing (introduced in schema v1).
    #[serde(default)]
    pub services_to_create: Option<Vec<ServiceDefinition>>,
    /// Where the application description comes from.
    #[serde(default, deserialize_with = "manifest_choice_or_legacy")]
    pub manifest_choice: ManifestChoice,
}

/// Source of the application description.
///
/// Exactly one variant produces the effective [`AppSpec`]; fields belonging
/// to the other variant are dropped during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "value", rename_all = "snake_case")]
pub enum ManifestChoice {
    /// Read the application from a manifest file in the workspace.
    #[serde(alias = "manifestFile")]
    ManifestFile {
        /// Manifest path relative to the workspace.
        #[serde(default)]
        manifest_file: Option<String>,
    },
    /// Use the inline fields.
    #[serde(alias = "jenkinsConfig")]
    Inline(InlineConfig),
}

/// Inline application fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineConfig {
    /// Application name.
    #[serde(default)]
    pub app_name: String,
    /// Memory in MB (0 selects the default).
    #[serde(default)]
    pub memory: u32,
    /// Route host name (defaults to the app name).
    #[serde(default)]
    pub hostname: Option<String>,
    /// Instance count (0 selects the default).
    #[serde(default)]
    pub instances: u32,
    /// Start timeout in seconds (0 selects the default).
    #[serde(default)]
    pub timeout: u64,
    /// Suppress route creation.
    #[serde(default)]
    pub no_route: bool,
    /// Artifact path relative to the workspace.
    #[serde(default)]
    pub app_path: Option<String>,
    /// Buildpack name or URL.
    #[serde(default)]
    pub buildpack: Option<String>,
    /// Stack name.
    #[serde(default)]
    pub stack: Option<String>,
    /// Start command.
    #[serde(default)]
    pub command: Option<String>,
    /// Route domain.
    #[serde(default)]
    pub domain: Option<String>,
    /// Environment variables.
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    /// Services to bind.
    #[serde(default, alias = "service_names")]
    pub services_names: Vec<ServiceSpec>,
}

/// An environment variable for the application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable key.
    pub key: String,
    /// Variable value.
    pub value: String,
}

/// A service to bind, referenced by name only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service instance name.
    pub name: String,
}

/// A service to create if absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Service instance name.
    pub name: String,
    /// Service offering (e.g. "mysql").
    #[serde(rename = "type")]
    pub service_type: String,
    /// Service plan (e.g. "free").
    pub plan: String,
    /// Delete and recreate the instance if it already exists.
    #[serde(default, alias = "reset")]
    pub reset_service: bool,
}

/// The fully resolved application to push.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppSpec {
    /// Application name.
    pub name: String,
    /// Memory in MB.
    pub memory_mb: u32,
    /// Instance count.
    pub instances: u32,
    /// Route host name.
    pub host: String,
    /// Route domain (the platform's default shared domain if unset).
    pub domain: Option<String>,
    /// Start timeout in seconds.
    pub timeout_secs: u64,
    /// Suppress route creation.
    pub no_route: bool,
    /// Buildpack name or URL.
    pub buildpack: Option<String>,
    /// Stack name.
    pub stack: Option<String>,
    /// Start command.
    pub command: Option<String>,
    /// Path to the application bits.
    pub app_path: PathBuf,
    /// Environment variables with unique keys, in first-seen order.
    pub env: Vec<EnvVar>,
}

/// Destination of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTarget {
    /// Cloud Foundry API endpoint.
    pub api_endpoint: String,
    /// Organization name.
    pub organization: String,
    /// Space name.
    pub space: String,
    /// Credentials reference.
    pub credentials_id: String,
    /// Disable certificate validation.
    pub trust_self_signed: bool,
    /// Bound on individual platform operations in seconds.
    pub operation_timeout_secs: u64,
}

impl Default for ManifestChoice {
    fn default() -> Self {
        Self::ManifestFile {
            manifest_file: None,
        }
    }
}

impl ManifestChoice {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ManifestFile { .. } => "manifest file",
            Self::Inline(_) => "inline configuration",
        }
    }
}

impl EnvVar {
    /// Creates a new environment variable.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ServiceSpec {
    /// Creates a new bind-only service reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ServiceDefinition {
    /// Creates a new service definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        plan: impl Into<String>,
        reset_service: bool,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            plan: plan.into(),
            reset_service,
        }
    }
}

impl PushConfig {
    /// Returns the services to create, empty for legacy configurations.
    #[must_use]
    pub fn services_to_create(&self) -> &[ServiceDefinition] {
        self.services_to_create.as_deref().unwrap_or_default()
    }

    /// Returns the operation timeout in seconds.
    #[must_use]
    pub fn plugin_timeout_secs(&self) -> u64 {
        self.plugin_timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_PLUGIN_TIMEOUT_SECS)
    }

    /// Returns the platform target described by this configuration.
    #[must_use]
    pub fn platform_target(&self) -> PlatformTarget {
        PlatformTarget {
            api_endpoint: self.target.trim_end_matches('/').to_string(),
            organization: self.organization.clone(),
            space: self.space.clone(),
            credentials_id: self.credentials_id.clone(),
            trust_self_signed: self.self_signed,
            operation_timeout_secs: self.plugin_timeout_secs(),
        }
    }
}

/// Reads a manifest choice, treating a missing or null `value` tag as
/// `manifest_file` the way configurations written before the tag did.
fn manifest_choice_or_legacy<'de, D>(deserializer: D) -> Result<ManifestChoice, D::Error>
where
    D: Deserializer<'de>,
{
    let mut value = serde_yaml::Value::deserialize(deserializer)?;
    match &mut value {
        serde_yaml::Value::Null => return Ok(ManifestChoice::default()),
        serde_yaml::Value::Mapping(map) => {
            if map.get("value").is_none_or(serde_yaml::Value::is_null) {
                map.insert(
                    serde_yaml::Value::from("value"),
                    serde_yaml::Value::from("manifest_file"),
                );
            }
        }
        _ => {}
    }
    ManifestChoice::deserialize(value).map_err(serde::de::Error::custom)
}

/// Inserts or overwrites an environment variable, keeping first-seen order.
pub fn upsert_env(env: &mut Vec<EnvVar>, key: &str, value: &str) {
    if let Some(existing) = env.iter_mut().find(|e| e.key == key) {
        existing.value = value.to_string();
    } else {
        env.push(EnvVar::new(key, value));
    }
}
