//! Push orchestration.
//!
//! [`PushOrchestrator::push`] is the single entry point of the task: it
//! checks the build result, resolves and validates the configuration,
//! opens a platform session, reconciles services and deploys the app.
//! Every failure is turned into a [`PushOutcome`] rather than an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{
    ConfigValidator, ConfigurationResolver, CredentialsProvider, PushConfig, ResolvedConfig,
};
use crate::deploy::{DeploymentExecutor, DeploymentReport, DEFAULT_POLL_INTERVAL};
use crate::error::{ErrorKind, PushError, Result};
use crate::platform::PlatformClient;
use crate::reconciler::{ReconciliationReport, ServiceReconciler};

/// Result of the build that precedes the push, best first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    /// Build succeeded.
    Success,
    /// Build succeeded with test failures.
    Unstable,
    /// Build failed.
    Failure,
    /// Build did not run.
    NotBuilt,
    /// Build was aborted.
    Aborted,
}

impl BuildResult {
    /// Returns true for any result worse than [`BuildResult::Success`].
    #[must_use]
    pub fn is_worse_than_success(self) -> bool {
        self > Self::Success
    }
}

impl std::fmt::Display for BuildResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Unstable => "UNSTABLE",
            Self::Failure => "FAILURE",
            Self::NotBuilt => "NOT_BUILT",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{s}")
    }
}

/// What the build host knows about the current build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Workspace root; relative paths resolve against it.
    pub workspace: PathBuf,
    /// Build result so far; `None` while the build is in progress.
    pub result: Option<BuildResult>,
}

impl BuildContext {
    /// Creates a context for an in-progress build.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            result: None,
        }
    }

    /// Sets the build result.
    #[must_use]
    pub const fn with_result(mut self, result: BuildResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// Terminal status of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushStatus {
    /// The app is running.
    Succeeded,
    /// The build was not successful; nothing was done.
    Skipped,
    /// The configuration could not be resolved or validated.
    FailedValidation,
    /// Services could not be reconciled.
    FailedServiceReconciliation,
    /// Authentication, push, configuration or start failed.
    FailedDeploy,
    /// The app did not start in time.
    TimedOut,
}

impl PushStatus {
    /// Maps a failure kind to the status it produces.
    #[must_use]
    pub const fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ConfigInvalid | ErrorKind::ManifestNotFound | ErrorKind::ManifestParseError => {
                Self::FailedValidation
            }
            ErrorKind::ServiceNotFound | ErrorKind::FailedServiceReconciliation => {
                Self::FailedServiceReconciliation
            }
            ErrorKind::PlatformAuthError | ErrorKind::FailedDeploy => Self::FailedDeploy,
            ErrorKind::TimedOut => Self::TimedOut,
        }
    }

    /// Returns true if the build step should pass.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "Succeeded",
            Self::Skipped => "Skipped",
            Self::FailedValidation => "FailedValidation",
            Self::FailedServiceReconciliation => "FailedServiceReconciliation",
            Self::FailedDeploy => "FailedDeploy",
            Self::TimedOut => "TimedOut",
        };
        write!(f, "{s}")
    }
}

/// Terminal result of one push attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    /// Identifier of this push, also recorded on its tracing span.
    pub push_id: Uuid,
    /// Terminal status.
    pub status: PushStatus,
    /// Failure kind, for failed pushes.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable cause.
    pub cause: String,
    /// Application name, once resolved.
    pub app: Option<String>,
    /// Service reconciliation result, if it ran.
    pub services: Option<ReconciliationReport>,
    /// Deployment result, if the app started.
    pub deployment: Option<DeploymentReport>,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
}

impl PushOutcome {
    fn new(push_id: Uuid, status: PushStatus, cause: String) -> Self {
        Self {
            push_id,
            status,
            error_kind: None,
            cause,
            app: None,
            services: None,
            deployment: None,
            finished_at: Utc::now(),
        }
    }

    fn failed(push_id: Uuid, app: Option<String>, err: &PushError) -> Self {
        let kind = err.kind();
        let mut outcome = Self::new(push_id, PushStatus::from_kind(kind), err.to_string());
        outcome.error_kind = Some(kind);
        outcome.app = app;
        outcome
    }

    /// Returns true if the build step should pass.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl std::fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.cause)
    }
}

/// Orchestrates one push from configuration to a running app.
pub struct PushOrchestrator<'a> {
    /// Platform client.
    client: &'a dyn PlatformClient,
    /// Credentials lookup.
    credentials: &'a dyn CredentialsProvider,
    /// Interval between instance-state polls.
    poll_interval: Duration,
}

impl<'a> PushOrchestrator<'a> {
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(client: &'a dyn PlatformClient, credentials: &'a dyn CredentialsProvider) -> Self {
        Self {
            client,
            credentials,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the interval between instance-state polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs one push. Never fails: the outcome carries any error.
    pub async fn push(&self, context: &BuildContext, config: &PushConfig) -> PushOutcome {
        self.push_with(context, || Ok(config.clone())).await
    }

    /// Runs one push, loading the configuration only if the build result
    /// allows the push to go ahead. A load failure becomes the outcome.
    pub async fn push_with<F>(&self, context: &BuildContext, load: F) -> PushOutcome
    where
        F: FnOnce() -> Result<PushConfig>,
    {
        let push_id = Uuid::new_v4();
        let span = info_span!("push", %push_id, app = tracing::field::Empty);
        let outcome = self.run(push_id, context, load).instrument(span).await;

        if outcome.is_success() {
            info!(%push_id, "Push finished: {outcome}");
        } else {
            error!(%push_id, "Push failed: {outcome}");
        }
        outcome
    }

    async fn run<F>(&self, push_id: Uuid, context: &BuildContext, load: F) -> PushOutcome
    where
        F: FnOnce() -> Result<PushConfig>,
    {
        if let Some(result) = context.result.filter(|r| r.is_worse_than_success()) {
            info!("Build result is {result}, skipping push");
            return PushOutcome::new(
                push_id,
                PushStatus::Skipped,
                format!("build result is {result}"),
            );
        }

        let resolved = match load().and_then(|config| Self::prepare(context, &config)) {
            Ok(resolved) => resolved,
            Err(e) => return PushOutcome::failed(push_id, None, &e),
        };
        let app = resolved.app.name.clone();
        Span::current().record("app", app.as_str());

        if let Err(e) = self.open_session(&resolved).await {
            return PushOutcome::failed(push_id, Some(app), &e);
        }

        let mut services = None;
        let result = self.reconcile_and_deploy(&resolved, &mut services).await;
        self.client.logout().await;

        let mut outcome = match result {
            Ok(deployment) => {
                let mut outcome = PushOutcome::new(
                    push_id,
                    PushStatus::Succeeded,
                    format!(
                        "{} running with {}/{} instances",
                        app, deployment.running, resolved.app.instances
                    ),
                );
                outcome.deployment = Some(deployment);
                outcome.app = Some(app);
                outcome
            }
            Err(e) => PushOutcome::failed(push_id, Some(app), &e),
        };
        outcome.services = services;
        outcome
    }

    /// Resolves and validates the configuration.
    fn prepare(context: &BuildContext, config: &PushConfig) -> Result<ResolvedConfig> {
        let resolved = ConfigurationResolver::new(&context.workspace).resolve(config)?;
        let validation = ConfigValidator::new().validate(&resolved)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }
        Ok(resolved)
    }

    async fn open_session(&self, resolved: &ResolvedConfig) -> Result<()> {
        let credentials = self.credentials.lookup(&resolved.target.credentials_id)?;
        self.client
            .authenticate(&resolved.target, &credentials)
            .await
    }

    async fn reconcile_and_deploy(
        &self,
        resolved: &ResolvedConfig,
        services: &mut Option<ReconciliationReport>,
    ) -> Result<DeploymentReport> {
        let report = ServiceReconciler::new(self.client)
            .reconcile(&resolved.services_to_create, &resolved.services_to_bind)
            .await?;
        let to_bind = report.services_to_bind.clone();
        *services = Some(report);

        DeploymentExecutor::new(self.client)
            .with_poll_interval(self.poll_interval)
            .deploy(&resolved.app, &to_bind, resolved.reset_if_exists)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{migrate, ConfigParser, Credentials};
    use crate::platform::memory::{InMemoryPlatform, PlatformCall};
    use crate::platform::InstanceState::{Running, Starting};

    struct StaticCredentials;

    impl CredentialsProvider for StaticCredentials {
        fn lookup(&self, _id: &str) -> Result<Credentials> {
            Ok(Credentials::new("ci-user", "secret"))
        }
    }

    fn config(choice: &str, extra: &str) -> PushConfig {
        let yaml = format!(
            "target: https://api.example.com\norganization: org\nspace: dev\ncredentials_id: cf-ci\n{extra}manifest_choice:\n{choice}"
        );
        let mut config = ConfigParser::new().parse_yaml(&yaml, None).unwrap();
        migrate(&mut config);
        config
    }

    fn manifest_workspace(manifest: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.yml"), manifest).unwrap();
        dir
    }

    fn position(calls: &[PlatformCall], pred: impl Fn(&PlatformCall) -> bool) -> usize {
        calls.iter().position(pred).unwrap()
    }

    #[tokio::test]
    async fn test_unsuccessful_build_is_skipped_without_platform_calls() {
        for result in [
            BuildResult::Unstable,
            BuildResult::Failure,
            BuildResult::NotBuilt,
            BuildResult::Aborted,
        ] {
            let platform = InMemoryPlatform::new();
            let context = BuildContext::new("/nonexistent").with_result(result);

            let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
                .push(&context, &config("  value: manifest_file\n", ""))
                .await;

            assert_eq!(outcome.status, PushStatus::Skipped);
            assert!(outcome.is_success());
            assert!(platform.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_unsuccessful_build_skips_before_loading_configuration() {
        let platform = InMemoryPlatform::new();
        let context = BuildContext::new("/nonexistent").with_result(BuildResult::Failure);
        let loaded = std::cell::Cell::new(false);

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push_with(&context, || {
                loaded.set(true);
                ConfigParser::new().load_file("/nonexistent/cf-push.yaml")
            })
            .await;

        assert_eq!(outcome.status, PushStatus::Skipped);
        assert!(outcome.is_success());
        assert!(!loaded.get());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_load_failure_fails_validation() {
        let platform = InMemoryPlatform::new();
        let context = BuildContext::new("/nonexistent").with_result(BuildResult::Success);

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push_with(&context, || {
                ConfigParser::new().load_file("/nonexistent/cf-push.yaml")
            })
            .await;

        assert_eq!(outcome.status, PushStatus::FailedValidation);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ConfigInvalid));
        assert!(outcome.cause.contains("Configuration file not found"));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_push_succeeds() {
        let dir = manifest_workspace(
            "applications:\n- name: sample-app\n  memory: 512M\n  instances: 2\n",
        );
        let platform = InMemoryPlatform::new()
            .with_instance_states(vec![vec![Starting, Starting], vec![Running, Running]]);
        let context = BuildContext::new(dir.path()).with_result(BuildResult::Success);

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&context, &config("  value: manifest_file\n", ""))
            .await;

        assert_eq!(outcome.status, PushStatus::Succeeded, "{outcome}");
        assert_eq!(outcome.app.as_deref(), Some("sample-app"));
        assert_eq!(outcome.deployment.as_ref().map(|d| d.running), Some(2));

        let calls = platform.calls();
        assert_eq!(
            calls[0],
            PlatformCall::Authenticate {
                api: String::from("https://api.example.com"),
                username: String::from("ci-user"),
            }
        );
        assert_eq!(calls.last(), Some(&PlatformCall::Logout));
        let PlatformCall::PushApp(spec) = &calls[1] else {
            panic!("expected push, got {:?}", calls[1]);
        };
        assert_eq!(spec.memory_mb, 512);
        assert_eq!(spec.instances, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_push_times_out() {
        let dir = manifest_workspace(
            "applications:\n- name: sample-app\n  memory: 512M\n  instances: 2\n  timeout: 30\n",
        );
        let platform =
            InMemoryPlatform::new().with_instance_states(vec![vec![Starting, Starting]]);

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&BuildContext::new(dir.path()), &config("  value: manifest_file\n", ""))
            .await;

        assert_eq!(outcome.status, PushStatus::TimedOut);
        assert_eq!(outcome.error_kind, Some(ErrorKind::TimedOut));
        assert!(!outcome.is_success());
        assert!(outcome.cause.contains("0/2 instances running"));
        assert_eq!(platform.calls().last(), Some(&PlatformCall::Logout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_push_creates_then_binds_service() {
        let platform = InMemoryPlatform::new().with_instance_states(vec![vec![Running]]);
        let config = config(
            "  value: inline\n  app_name: sample-app\n",
            "services_to_create:\n  - name: db\n    type: mysql\n    plan: free\n    reset_service: false\n",
        );

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&BuildContext::new("/ws"), &config)
            .await;

        assert_eq!(outcome.status, PushStatus::Succeeded, "{outcome}");
        let calls = platform.calls();
        let creates: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, PlatformCall::CreateServiceInstance { .. }))
            .collect();
        assert_eq!(
            creates,
            vec![&PlatformCall::CreateServiceInstance {
                name: String::from("db"),
                service_type: String::from("mysql"),
                plan: String::from("free"),
            }]
        );
        let created = position(&calls, |c| matches!(c, PlatformCall::CreateServiceInstance { .. }));
        let bound = position(&calls, |c| {
            *c == PlatformCall::BindService {
                app: String::from("sample-app"),
                service: String::from("db"),
            }
        });
        assert!(created < bound);
    }

    #[tokio::test]
    async fn test_missing_bind_only_service_fails_before_deploy() {
        let platform = InMemoryPlatform::new();
        let config = config(
            "  value: inline\n  app_name: sample-app\n  services_names:\n    - name: cache\n",
            "",
        );

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&BuildContext::new("/ws"), &config)
            .await;

        assert_eq!(outcome.status, PushStatus::FailedServiceReconciliation);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ServiceNotFound));
        let calls = platform.calls();
        assert!(!calls.iter().any(|c| matches!(
            c,
            PlatformCall::PushApp(_) | PlatformCall::CreateServiceInstance { .. }
        )));
        assert_eq!(calls.last(), Some(&PlatformCall::Logout));
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_deploy() {
        let platform = InMemoryPlatform::new().reject_credentials();

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(
                &BuildContext::new("/ws"),
                &config("  value: inline\n  app_name: sample-app\n", ""),
            )
            .await;

        assert_eq!(outcome.status, PushStatus::FailedDeploy);
        assert_eq!(outcome.error_kind, Some(ErrorKind::PlatformAuthError));
        assert_eq!(platform.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_configuration_makes_no_platform_calls() {
        let platform = InMemoryPlatform::new();
        let mut config = config("  value: inline\n  app_name: sample-app\n", "");
        config.organization = String::new();

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&BuildContext::new("/ws"), &config)
            .await;

        assert_eq!(outcome.status, PushStatus::FailedValidation);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ConfigInvalid));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let platform = InMemoryPlatform::new();

        let outcome = PushOrchestrator::new(&platform, &StaticCredentials)
            .push(&BuildContext::new(dir.path()), &config("  value: manifest_file\n", ""))
            .await;

        assert_eq!(outcome.status, PushStatus::FailedValidation);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ManifestNotFound));
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_build_result_ordering() {
        assert!(!BuildResult::Success.is_worse_than_success());
        assert!(BuildResult::Unstable.is_worse_than_success());
        assert!(BuildResult::Aborted > BuildResult::Failure);
    }
}
