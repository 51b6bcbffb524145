//! Versioned migration of job configurations.
//!
//! Fields added in later schema versions are absent from older files.
//! [`migrate`] fills them in once, at load time, so nothing downstream
//! has to treat a missing or zero value as a sentinel.

use tracing::{debug, info};

use super::spec::{PushConfig, DEFAULT_PLUGIN_TIMEOUT_SECS};

/// Schema version produced by this release.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Steps applied by a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version the configuration declared before migration.
    pub from_version: u32,
    /// Names of the normalization steps that changed something.
    pub applied: Vec<&'static str>,
}

/// Brings a configuration up to [`CURRENT_SCHEMA_VERSION`].
///
/// Applying this to an already migrated configuration changes nothing.
pub fn migrate(config: &mut PushConfig) -> MigrationReport {
    let mut report = MigrationReport {
        from_version: config.schema_version,
        applied: Vec::new(),
    };

    // v1: services_to_create
    if config.services_to_create.is_none() {
        config.services_to_create = Some(Vec::new());
        report.applied.push("services_to_create");
    }

    // v2: plugin_timeout, where 0 was written by older versions
    if config.plugin_timeout.is_none_or(|t| t == 0) {
        config.plugin_timeout = Some(DEFAULT_PLUGIN_TIMEOUT_SECS);
        report.applied.push("plugin_timeout");
    }

    if config.schema_version < CURRENT_SCHEMA_VERSION {
        config.schema_version = CURRENT_SCHEMA_VERSION;
    }

    if report.applied.is_empty() {
        debug!("Configuration already at schema v{}", config.schema_version);
    } else {
        info!(
            "Migrated configuration from schema v{} ({})",
            report.from_version,
            report.applied.join(", ")
        );
    }

    report
}

impl MigrationReport {
    /// Returns true if the configuration was changed.
    #[must_use]
    pub const fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}
