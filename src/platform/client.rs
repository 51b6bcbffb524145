//! Platform client capability.
//!
//! The orchestration core talks to the platform only through this trait.
//! [`super::CloudFoundryClient`] implements it over the Cloud Foundry v3 API.

use async_trait::async_trait;

use crate::config::{AppSpec, Credentials, EnvVar, PlatformTarget};
use crate::error::Result;

use super::types::{InstanceState, ServiceInstance};

/// Operations the push task needs from the platform.
///
/// All operations other than [`PlatformClient::authenticate`] act on the
/// organization and space selected by the last successful authentication.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Opens a session against the target.
    ///
    /// Certificate validation is disabled only when the target asks for it.
    async fn authenticate(&self, target: &PlatformTarget, credentials: &Credentials) -> Result<()>;

    /// Looks up a service instance by name.
    async fn get_service_instance(&self, name: &str) -> Result<Option<ServiceInstance>>;

    /// Creates a service instance from an offering and plan.
    async fn create_service_instance(
        &self,
        name: &str,
        service_type: &str,
        plan: &str,
    ) -> Result<ServiceInstance>;

    /// Deletes a service instance.
    async fn delete_service_instance(&self, name: &str) -> Result<()>;

    /// Deletes an application; returns false if it did not exist.
    async fn delete_app(&self, name: &str) -> Result<bool>;

    /// Creates or updates the application and uploads its bits.
    async fn push_app(&self, spec: &AppSpec) -> Result<()>;

    /// Sets or overwrites environment variables; other keys are untouched.
    async fn set_env(&self, app: &str, vars: &[EnvVar]) -> Result<()>;

    /// Binds a service instance to an application.
    async fn bind_service(&self, app: &str, service: &str) -> Result<()>;

    /// Starts or restarts an application.
    async fn start_app(&self, app: &str) -> Result<()>;

    /// Returns the state of each application instance.
    async fn get_instance_states(&self, app: &str) -> Result<Vec<InstanceState>>;

    /// Releases the session.
    async fn logout(&self);
}
