//! Deployment executor.
//!
//! Pushes the resolved application, applies its environment, binds its
//! services, starts it and waits for every instance to run.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppSpec;
use crate::error::{DeployError, Result};
use crate::platform::{running_count, InstanceState, PlatformClient};

/// Interval between instance-state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Executor for a single application deployment.
pub struct DeploymentExecutor<'a, P: PlatformClient + ?Sized> {
    /// Platform client with an open session.
    client: &'a P,
    /// Interval between instance-state polls.
    poll_interval: Duration,
}

/// Result of a successful deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    /// Application name.
    pub app: String,
    /// Whether an existing app was deleted before the push.
    pub reset: bool,
    /// Services bound, in order.
    pub bound: Vec<String>,
    /// Instances running when the app was declared started.
    pub running: usize,
    /// Time spent waiting for the app to start, in seconds.
    pub startup_secs: u64,
}

impl<'a, P: PlatformClient + ?Sized> DeploymentExecutor<'a, P> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(client: &'a P) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the interval between instance-state polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Deploys the application and waits until all instances are running.
    ///
    /// # Errors
    ///
    /// Returns `DeployError::StepFailed` if a platform call fails and
    /// `DeployError::Timeout` if the app does not start in time.
    pub async fn deploy(
        &self,
        app: &AppSpec,
        services: &[String],
        reset_if_exists: bool,
    ) -> Result<DeploymentReport> {
        info!(
            "Deploying '{}' ({} MB x {})",
            app.name, app.memory_mb, app.instances
        );

        let mut reset = false;
        if reset_if_exists {
            reset = self
                .client
                .delete_app(&app.name)
                .await
                .map_err(|e| DeployError::step("reset", &app.name, &e))?;
            if reset {
                warn!("Deleted existing app '{}' before push", app.name);
            }
        }

        self.client
            .push_app(app)
            .await
            .map_err(|e| DeployError::step("push", &app.name, &e))?;

        if app.env.is_empty() {
            debug!("No environment variables to set");
        } else {
            debug!("Setting {} environment variable(s)", app.env.len());
            self.client
                .set_env(&app.name, &app.env)
                .await
                .map_err(|e| DeployError::step("set environment of", &app.name, &e))?;
        }

        for service in services {
            info!("Binding service '{service}' to '{}'", app.name);
            self.client
                .bind_service(&app.name, service)
                .await
                .map_err(|e| DeployError::step("bind service to", &app.name, &e))?;
        }

        self.client
            .start_app(&app.name)
            .await
            .map_err(|e| DeployError::step("start", &app.name, &e))?;

        let start = Instant::now();
        let running = self.wait_for_running(app).await?;
        let startup_secs = start.elapsed().as_secs();

        info!(
            "App '{}' started: {running}/{} instances running after {startup_secs}s",
            app.name, app.instances
        );

        Ok(DeploymentReport {
            app: app.name.clone(),
            reset,
            bound: services.to_vec(),
            running,
            startup_secs,
        })
    }

    /// Polls instance states until all are running or the app timeout passes.
    async fn wait_for_running(&self, app: &AppSpec) -> Result<usize> {
        let start = Instant::now();
        let timeout = Duration::from_secs(app.timeout_secs);

        loop {
            let states = self
                .client
                .get_instance_states(&app.name)
                .await
                .map_err(|e| DeployError::step("poll", &app.name, &e))?;
            let running = running_count(&states);

            if is_started(&states, app.instances) {
                return Ok(running);
            }

            if states.contains(&InstanceState::Crashed) {
                warn!("App '{}' has crashed instances, still waiting", app.name);
            }
            debug!(
                "App '{}': {running}/{} instances running",
                app.name, app.instances
            );

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DeployError::Timeout {
                    app: app.name.clone(),
                    running,
                    expected: app.instances,
                    timeout_secs: app.timeout_secs,
                }
                .into());
            }

            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }
}

/// True once at least one instance is reported, all reported instances are
/// running, and at least `expected` are running.
fn is_started(states: &[InstanceState], expected: u32) -> bool {
    !states.is_empty()
        && states.iter().all(|s| s.is_running())
        && running_count(states) >= expected as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvVar;
    use crate::error::ErrorKind;
    use crate::platform::memory::{InMemoryPlatform, PlatformCall};
    use std::path::PathBuf;

    use crate::platform::InstanceState::{Crashed, Running, Starting};

    fn app(instances: u32, timeout_secs: u64) -> AppSpec {
        AppSpec {
            name: String::from("sample-app"),
            memory_mb: 512,
            instances,
            host: String::from("sample-app"),
            domain: None,
            timeout_secs,
            no_route: false,
            buildpack: None,
            stack: None,
            command: None,
            app_path: PathBuf::from("/ws"),
            env: vec![EnvVar::new("SPRING_PROFILES_ACTIVE", "ci")],
        }
    }

    fn polls(calls: &[PlatformCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, PlatformCall::GetInstanceStates(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_instances_running() {
        let platform = InMemoryPlatform::new()
            .signed_in()
            .with_service("db")
            .with_instance_states(vec![vec![Starting, Starting], vec![Running, Running]]);
        let spec = app(2, 60);

        let report = DeploymentExecutor::new(&platform)
            .deploy(&spec, &[String::from("db")], false)
            .await
            .unwrap();

        assert_eq!(report.running, 2);
        assert_eq!(report.startup_secs, 3);
        assert!(!report.reset);
        assert_eq!(
            platform.calls(),
            vec![
                PlatformCall::PushApp(spec.clone()),
                PlatformCall::SetEnv {
                    app: String::from("sample-app"),
                    vars: spec.env.clone(),
                },
                PlatformCall::BindService {
                    app: String::from("sample-app"),
                    service: String::from("db"),
                },
                PlatformCall::StartApp(String::from("sample-app")),
                PlatformCall::GetInstanceStates(String::from("sample-app")),
                PlatformCall::GetInstanceStates(String::from("sample-app")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_instances_never_run() {
        let platform = InMemoryPlatform::new()
            .signed_in()
            .with_instance_states(vec![vec![Starting, Starting]]);

        let err = DeploymentExecutor::new(&platform)
            .deploy(&app(2, 9), &[], false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(
            err.to_string(),
            "Deployment error: Application 'sample-app' not running after 9s (0/2 instances running)"
        );
        assert_eq!(polls(&platform.calls()), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_instance_keeps_polling() {
        let platform = InMemoryPlatform::new().signed_in().with_instance_states(vec![
            vec![Crashed, Running],
            vec![Starting, Running],
            vec![Running, Running],
        ]);

        let report = DeploymentExecutor::new(&platform)
            .deploy(&app(2, 60), &[], false)
            .await
            .unwrap();

        assert_eq!(report.running, 2);
        assert_eq!(polls(&platform.calls()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fewer_instances_than_requested_is_not_started() {
        let platform = InMemoryPlatform::new()
            .signed_in()
            .with_instance_states(vec![vec![Running]]);

        let err = DeploymentExecutor::new(&platform)
            .with_poll_interval(Duration::from_secs(5))
            .deploy(&app(2, 10), &[], false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::error::PushError::Deploy(DeployError::Timeout { running: 1, expected: 2, .. })
        ));
        assert_eq!(polls(&platform.calls()), 3);
    }

    #[tokio::test]
    async fn test_push_failure_stops_deployment() {
        let platform = InMemoryPlatform::new()
            .signed_in()
            .fail_on("push_app", "insufficient memory quota");

        let err = DeploymentExecutor::new(&platform)
            .deploy(&app(1, 60), &[], false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FailedDeploy);
        assert!(err.to_string().contains("insufficient memory quota"));
        assert_eq!(platform.calls(), vec![PlatformCall::PushApp(app(1, 60))]);
    }

    #[tokio::test]
    async fn test_reset_deletes_existing_app_before_push() {
        let platform = InMemoryPlatform::new()
            .signed_in()
            .with_app("sample-app")
            .with_instance_states(vec![vec![Running]]);
        let mut spec = app(1, 60);
        spec.env.clear();

        let report = DeploymentExecutor::new(&platform)
            .deploy(&spec, &[], true)
            .await
            .unwrap();

        assert!(report.reset);
        let calls = platform.calls();
        assert_eq!(calls[0], PlatformCall::DeleteApp(String::from("sample-app")));
        assert_eq!(calls[1], PlatformCall::PushApp(spec));
        assert!(!calls.iter().any(|c| matches!(c, PlatformCall::SetEnv { .. })));
    }

    #[test]
    fn test_is_started() {
        assert!(!is_started(&[], 1));
        assert!(!is_started(&[Running, Crashed], 1));
        assert!(!is_started(&[Running], 2));
        assert!(is_started(&[Running, Running], 2));
    }
}
