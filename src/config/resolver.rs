//! Resolution of the job configuration into one application.
//!
//! Exactly one source describes the application: either the manifest file
//! or the inline fields. Nothing is merged between the two.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

use super::manifest::{load_manifest, resolve_path};
use super::spec::{
    upsert_env, AppSpec, InlineConfig, ManifestChoice, PlatformTarget, PushConfig,
    ServiceDefinition, ServiceSpec, DEFAULT_INSTANCES, DEFAULT_MANIFEST_PATH, DEFAULT_MEMORY_MB,
    DEFAULT_START_TIMEOUT_SECS,
};

/// Everything a push needs, resolved from the job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Destination of the push.
    pub target: PlatformTarget,
    /// The application to push.
    pub app: AppSpec,
    /// Services to bind that must already exist.
    pub services_to_bind: Vec<ServiceSpec>,
    /// Services to create if absent.
    pub services_to_create: Vec<ServiceDefinition>,
    /// Delete an existing app of the same name before pushing.
    pub reset_if_exists: bool,
}

/// Resolves job configurations against a build workspace.
#[derive(Debug, Clone)]
pub struct ConfigurationResolver {
    /// Build workspace root.
    workspace: PathBuf,
}

impl ConfigurationResolver {
    /// Creates a resolver for the given workspace.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    /// Returns the workspace root.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolves the configuration into a single application and its services.
    ///
    /// # Errors
    ///
    /// Returns `ManifestNotFound` or `ManifestParseError` in manifest mode.
    pub fn resolve(&self, config: &PushConfig) -> Result<ResolvedConfig> {
        info!("Resolving application from {}", config.manifest_choice.label());

        let (app, services_to_bind) = match &config.manifest_choice {
            ManifestChoice::ManifestFile { manifest_file } => {
                let relative = manifest_file
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or(DEFAULT_MANIFEST_PATH);
                let path = resolve_path(&self.workspace, relative);
                let manifest = load_manifest(&path)?;
                (manifest.app, manifest.services)
            }
            ManifestChoice::Inline(inline) => (
                self.resolve_inline(inline),
                inline.services_names.clone(),
            ),
        };

        debug!(
            "Resolved app '{}' ({} MB x {}, timeout {}s)",
            app.name, app.memory_mb, app.instances, app.timeout_secs
        );

        Ok(ResolvedConfig {
            target: config.platform_target(),
            app,
            services_to_bind,
            services_to_create: config.services_to_create().to_vec(),
            reset_if_exists: config.reset_if_exists,
        })
    }

    /// Builds the application from inline fields, defaulting unset numbers.
    fn resolve_inline(&self, inline: &InlineConfig) -> AppSpec {
        let mut env = Vec::with_capacity(inline.env_vars.len());
        for var in &inline.env_vars {
            upsert_env(&mut env, &var.key, &var.value);
        }

        let app_path = inline
            .app_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map_or_else(|| self.workspace.clone(), |p| resolve_path(&self.workspace, p));

        AppSpec {
            name: inline.app_name.clone(),
            memory_mb: if inline.memory == 0 { DEFAULT_MEMORY_MB } else { inline.memory },
            instances: if inline.instances == 0 { DEFAULT_INSTANCES } else { inline.instances },
            host: non_empty(inline.hostname.as_ref()).unwrap_or_else(|| inline.app_name.clone()),
            domain: non_empty(inline.domain.as_ref()),
            timeout_secs: if inline.timeout == 0 {
                DEFAULT_START_TIMEOUT_SECS
            } else {
                inline.timeout
            },
            no_route: inline.no_route,
            buildpack: non_empty(inline.buildpack.as_ref()),
            stack: non_empty(inline.stack.as_ref()),
            command: non_empty(inline.command.as_ref()),
            app_path,
            env,
        }
    }
}

/// Treats blank strings from form-style configuration as unset.
fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}
