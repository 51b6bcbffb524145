//! Configuration module for the push task.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and migrating the job configuration file
//! - Reading application manifests
//! - Resolving one application from manifest or inline fields
//! - Validation of the resolved configuration
//! - Credentials lookup

mod spec;
mod migrate;
mod manifest;
mod parser;
mod resolver;
mod validator;
mod credentials;

pub use spec::{
    upsert_env, AppSpec, EnvVar, InlineConfig, ManifestChoice, PlatformTarget, PushConfig,
    ServiceDefinition, ServiceSpec, DEFAULT_INSTANCES, DEFAULT_MANIFEST_PATH, DEFAULT_MEMORY_MB,
    DEFAULT_PLUGIN_TIMEOUT_SECS, DEFAULT_START_TIMEOUT_SECS,
};
pub use migrate::{migrate, MigrationReport, CURRENT_SCHEMA_VERSION};
pub use manifest::{load_manifest, parse_manifest, parse_memory, ManifestApplication};
pub use parser::{ConfigParser, find_config_file, DEFAULT_CONFIG_FILES};
pub use resolver::{ConfigurationResolver, ResolvedConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use credentials::{Credentials, CredentialsProvider, EnvCredentialsProvider};
