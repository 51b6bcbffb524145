//! Reconciler for platform services.
//!
//! This module compares the services a push needs with the services that
//! exist in the target space, creates or resets the missing ones, and
//! confirms that every bind-only service already exists.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::{ServiceDefinition, ServiceSpec};
use crate::error::{ReconcileError, Result};
use crate::platform::PlatformClient;

/// Reconciler for the services of one push.
pub struct ServiceReconciler<'a, P: PlatformClient + ?Sized> {
    /// Platform client with an open session.
    client: &'a P,
}

/// Action taken (or planned) for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    /// Created because it did not exist.
    Create,
    /// Deleted and created anew.
    Reset,
    /// Existed and was left untouched.
    Keep,
    /// Bind-only service confirmed to exist.
    Bind,
    /// Bind-only service that does not exist (plan only).
    Missing,
}

/// One service and its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStep {
    /// Service name.
    pub name: String,
    /// Action taken.
    pub action: ServiceAction,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// Actions in the order they were taken.
    pub steps: Vec<ServiceStep>,
    /// Names to bind: created-list names first, then bind-only names.
    pub services_to_bind: Vec<String>,
}

impl<'a, P: PlatformClient + ?Sized> ServiceReconciler<'a, P> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(client: &'a P) -> Self {
        Self { client }
    }

    /// Ensures every service to create exists and every bind-only service
    /// is present.
    ///
    /// Services created before a failure are not rolled back.
    ///
    /// # Errors
    ///
    /// Returns `ServiceNotFound` for a missing bind-only service and
    /// `ServiceOperationFailed` if any query, create or delete fails.
    pub async fn reconcile(
        &self,
        to_create: &[ServiceDefinition],
        to_bind: &[ServiceSpec],
    ) -> Result<ReconciliationReport> {
        info!(
            "Reconciling {} service(s) to create, {} to bind",
            to_create.len(),
            to_bind.len()
        );

        let mut report = ReconciliationReport::default();

        for service in to_create {
            let exists = self.exists(&service.name).await?;

            let action = match (exists, service.reset_service) {
                (false, _) => {
                    self.create(service).await?;
                    ServiceAction::Create
                }
                (true, false) => {
                    debug!("Service '{}' exists, leaving it untouched", service.name);
                    ServiceAction::Keep
                }
                (true, true) => {
                    warn!(
                        "Resetting service '{}': existing instance and its data will be deleted",
                        service.name
                    );
                    self.client
                        .delete_service_instance(&service.name)
                        .await
                        .map_err(|e| ReconcileError::operation("delete", &service.name, &e))?;
                    self.create(service).await?;
                    ServiceAction::Reset
                }
            };

            report.steps.push(ServiceStep {
                name: service.name.clone(),
                action,
            });
        }

        for name in bind_only(to_create, to_bind) {
            if !self.exists(name).await? {
                return Err(ReconcileError::ServiceNotFound {
                    name: name.to_string(),
                }
                .into());
            }
            report.steps.push(ServiceStep {
                name: name.to_string(),
                action: ServiceAction::Bind,
            });
        }

        report.services_to_bind = bind_order(to_create, to_bind);
        info!("{report}");
        Ok(report)
    }

    /// Reports what [`Self::reconcile`] would do, using queries only.
    ///
    /// # Errors
    ///
    /// Returns `ServiceOperationFailed` if a query fails.
    pub async fn plan(
        &self,
        to_create: &[ServiceDefinition],
        to_bind: &[ServiceSpec],
    ) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        for service in to_create {
            let action = match (self.exists(&service.name).await?, service.reset_service) {
                (false, _) => ServiceAction::Create,
                (true, false) => ServiceAction::Keep,
                (true, true) => ServiceAction::Reset,
            };
            report.steps.push(ServiceStep {
                name: service.name.clone(),
                action,
            });
        }

        for name in bind_only(to_create, to_bind) {
            let action = if self.exists(name).await? {
                ServiceAction::Bind
            } else {
                ServiceAction::Missing
            };
            report.steps.push(ServiceStep {
                name: name.to_string(),
                action,
            });
        }

        report.services_to_bind = bind_order(to_create, to_bind);
        Ok(report)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.client
            .get_service_instance(name)
            .await
            .map(|instance| instance.is_some())
            .map_err(|e| ReconcileError::operation("query", name, &e).into())
    }

    async fn create(&self, service: &ServiceDefinition) -> Result<()> {
        info!(
            "Creating service '{}' ({} / {})",
            service.name, service.service_type, service.plan
        );
        self.client
            .create_service_instance(&service.name, &service.service_type, &service.plan)
            .await
            .map(|_| ())
            .map_err(|e| ReconcileError::operation("create", &service.name, &e).into())
    }
}

impl ReconciliationReport {
    /// Returns the number of steps with the given action.
    #[must_use]
    pub fn count(&self, action: ServiceAction) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    /// Returns true if any bind-only service is missing.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.count(ServiceAction::Missing) > 0
    }
}

/// Bind-only names in order, excluding created names and duplicates.
fn bind_only<'s>(to_create: &[ServiceDefinition], to_bind: &'s [ServiceSpec]) -> Vec<&'s str> {
    let mut seen: HashSet<&str> = to_create.iter().map(|s| s.name.as_str()).collect();
    to_bind
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Created names first, in order, then bind-only names.
fn bind_order(to_create: &[ServiceDefinition], to_bind: &[ServiceSpec]) -> Vec<String> {
    let mut seen = HashSet::new();
    to_create
        .iter()
        .map(|s| s.name.as_str())
        .chain(to_bind.iter().map(|s| s.name.as_str()))
        .filter(|name| seen.insert(*name))
        .map(String::from)
        .collect()
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Reset => "reset",
            Self::Keep => "keep",
            Self::Bind => "bind",
            Self::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Services: {} created, {} reset, {} kept, {} bind-only",
            self.count(ServiceAction::Create),
            self.count(ServiceAction::Reset),
            self.count(ServiceAction::Keep),
            self.count(ServiceAction::Bind)
        )?;
        if self.has_missing() {
            write!(f, ", {} missing", self.count(ServiceAction::Missing))?;
        }
        Ok(())
    }
}
