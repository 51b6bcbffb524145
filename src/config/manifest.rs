//! Cloud Foundry application manifest parsing.
//!
//! Only the subset of the manifest format that affects the pushed
//! application is read: one entry under `applications:`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::spec::{
    upsert_env, AppSpec, ServiceSpec, DEFAULT_INSTANCES, DEFAULT_MEMORY_MB,
    DEFAULT_START_TIMEOUT_SECS,
};

/// Top level of a manifest file.
#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    applications: Vec<ManifestApp>,
}

/// One application entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ManifestApp {
    name: String,
    #[serde(default)]
    memory: Option<MemoryValue>,
    #[serde(default)]
    instances: Option<u32>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    buildpack: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    no_route: bool,
    #[serde(default)]
    env: serde_yaml::Mapping,
    #[serde(default)]
    services: Vec<String>,
}

/// Memory may be written as a number of MB or with a unit suffix.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MemoryValue {
    Megabytes(u32),
    Text(String),
}

/// Application and bind-only services read from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestApplication {
    /// The application described by the manifest.
    pub app: AppSpec,
    /// Services listed under `services:`.
    pub services: Vec<ServiceSpec>,
}

/// Loads the manifest at `path`.
///
/// # Errors
///
/// Returns `ManifestNotFound` if the file does not exist and
/// `ManifestParseError` if it cannot be read or violates the schema.
pub fn load_manifest(path: &Path) -> Result<ManifestApplication> {
    if !path.is_file() {
        return Err(ConfigError::ManifestNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::manifest(path, format!("failed to read file: {e}")))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_manifest(&content, path, base_dir)
}

/// Parses manifest content; relative `path` entries resolve against `base_dir`.
///
/// # Errors
///
/// Returns `ManifestParseError` on invalid YAML or schema violations.
pub fn parse_manifest(content: &str, source: &Path, base_dir: &Path) -> Result<ManifestApplication> {
    debug!("Parsing manifest: {}", source.display());

    let manifest: ManifestFile = serde_yaml::from_str(content)
        .map_err(|e| ConfigError::manifest(source, format!("YAML parse error: {e}")))?;

    let mut apps = manifest.applications.into_iter();
    let Some(app) = apps.next() else {
        return Err(ConfigError::manifest(source, "no applications defined").into());
    };
    if apps.next().is_some() {
        return Err(ConfigError::manifest(source, "exactly one application is supported").into());
    }

    if app.name.trim().is_empty() {
        return Err(ConfigError::manifest(source, "application name is empty").into());
    }

    let memory_mb = match app.memory {
        None => DEFAULT_MEMORY_MB,
        Some(MemoryValue::Megabytes(mb)) => mb,
        Some(MemoryValue::Text(text)) => parse_memory(&text)
            .ok_or_else(|| ConfigError::manifest(source, format!("invalid memory value '{text}'")))?,
    };

    let mut env = Vec::with_capacity(app.env.len());
    for (key, value) in &app.env {
        let key = yaml_scalar(key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::manifest(source, "env keys must be scalar values"))?;
        let value = yaml_scalar(value).ok_or_else(|| {
            ConfigError::manifest(source, format!("env '{key}' must be a scalar value"))
        })?;
        upsert_env(&mut env, &key, &value);
    }

    let app_path = app
        .path
        .as_deref()
        .map_or_else(|| base_dir.to_path_buf(), |p| resolve_path(base_dir, p));

    let spec = AppSpec {
        host: app.host.unwrap_or_else(|| app.name.clone()),
        name: app.name,
        memory_mb: non_zero(memory_mb, DEFAULT_MEMORY_MB),
        instances: non_zero(app.instances.unwrap_or_default(), DEFAULT_INSTANCES),
        domain: app.domain,
        timeout_secs: app
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_START_TIMEOUT_SECS),
        no_route: app.no_route,
        buildpack: app.buildpack,
        stack: app.stack,
        command: app.command,
        app_path,
        env,
    };

    Ok(ManifestApplication {
        app: spec,
        services: app.services.into_iter().map(ServiceSpec::new).collect(),
    })
}

/// Parses memory strings such as `512M`, `1G` or `1024MB` into megabytes.
#[must_use]
pub fn parse_memory(text: &str) -> Option<u32> {
    let upper = text.trim().to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(&upper);

    if let Some(gb) = upper.strip_suffix('G') {
        return gb.trim().parse::<u32>().ok()?.checked_mul(1024);
    }
    let mb = upper.strip_suffix('M').unwrap_or(upper);
    mb.trim().parse::<u32>().ok()
}

/// Resolves `path` against `base` unless it is already absolute.
#[must_use]
pub fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

const fn non_zero(value: u32, default: u32) -> u32 {
    if value == 0 { default } else { value }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}
