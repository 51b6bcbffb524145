//! In-memory platform used by orchestration tests.
//!
//! Records every call, keeps service and app existence in memory, and
//! replays scripted instance states.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::{AppSpec, Credentials, EnvVar, PlatformTarget};
use crate::error::{PlatformError, Result};

use super::client::PlatformClient;
use super::types::{InstanceState, ServiceInstance};

/// A recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Authenticate { api: String, username: String },
    GetServiceInstance(String),
    CreateServiceInstance { name: String, service_type: String, plan: String },
    DeleteServiceInstance(String),
    DeleteApp(String),
    PushApp(AppSpec),
    SetEnv { app: String, vars: Vec<EnvVar> },
    BindService { app: String, service: String },
    StartApp(String),
    GetInstanceStates(String),
    Logout,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<PlatformCall>,
    authenticated: bool,
    reject_credentials: bool,
    services: BTreeMap<String, ServiceInstance>,
    apps: BTreeSet<String>,
    instance_states: VecDeque<Vec<InstanceState>>,
    failures: HashMap<&'static str, String>,
    next_guid: u32,
}

#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an open session, without recording an authenticate call.
    pub fn signed_in(self) -> Self {
        self.state.lock().unwrap().authenticated = true;
        self
    }

    /// Registers an existing service instance.
    pub fn with_service(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let guid = state.guid();
            state.services.insert(
                name.to_string(),
                ServiceInstance {
                    guid,
                    name: name.to_string(),
                },
            );
        }
        self
    }

    /// Registers an existing application.
    pub fn with_app(self, name: &str) -> Self {
        self.state.lock().unwrap().apps.insert(name.to_string());
        self
    }

    /// Scripts the states returned by successive polls; the last entry repeats.
    pub fn with_instance_states(self, polls: Vec<Vec<InstanceState>>) -> Self {
        self.state.lock().unwrap().instance_states = polls.into();
        self
    }

    /// Makes the named operation fail with an API error.
    pub fn fail_on(self, operation: &'static str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation, message.to_string());
        self
    }

    /// Makes authentication fail.
    pub fn reject_credentials(self) -> Self {
        self.state.lock().unwrap().reject_credentials = true;
        self
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.state.lock().unwrap().services.contains_key(name)
    }

    /// Records the call and applies failure injection and the session check.
    fn enter(&self, operation: &'static str, call: PlatformCall) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if !state.authenticated {
            return Err(PlatformError::NotAuthenticated {
                operation: operation.to_string(),
            }
            .into());
        }
        if let Some(message) = state.failures.get(operation) {
            return Err(PlatformError::api_error(operation, 500, message.clone()).into());
        }
        Ok(state)
    }
}

impl State {
    fn guid(&mut self) -> String {
        self.next_guid += 1;
        format!("guid-{}", self.next_guid)
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn authenticate(&self, target: &PlatformTarget, credentials: &Credentials) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(PlatformCall::Authenticate {
            api: target.api_endpoint.clone(),
            username: credentials.username.clone(),
        });
        if state.reject_credentials {
            return Err(PlatformError::AuthenticationFailed {
                target: target.api_endpoint.clone(),
                message: String::from("Bad credentials"),
            }
            .into());
        }
        state.authenticated = true;
        Ok(())
    }

    async fn get_service_instance(&self, name: &str) -> Result<Option<ServiceInstance>> {
        let state = self.enter(
            "get_service_instance",
            PlatformCall::GetServiceInstance(name.to_string()),
        )?;
        Ok(state.services.get(name).cloned())
    }

    async fn create_service_instance(
        &self,
        name: &str,
        service_type: &str,
        plan: &str,
    ) -> Result<ServiceInstance> {
        let mut state = self.enter(
            "create_service_instance",
            PlatformCall::CreateServiceInstance {
                name: name.to_string(),
                service_type: service_type.to_string(),
                plan: plan.to_string(),
            },
        )?;
        let instance = ServiceInstance {
            guid: state.guid(),
            name: name.to_string(),
        };
        state.services.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    async fn delete_service_instance(&self, name: &str) -> Result<()> {
        let mut state = self.enter(
            "delete_service_instance",
            PlatformCall::DeleteServiceInstance(name.to_string()),
        )?;
        state
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PlatformError::not_found("service instance", name).into())
    }

    async fn delete_app(&self, name: &str) -> Result<bool> {
        let mut state = self.enter("delete_app", PlatformCall::DeleteApp(name.to_string()))?;
        Ok(state.apps.remove(name))
    }

    async fn push_app(&self, spec: &AppSpec) -> Result<()> {
        let mut state = self.enter("push_app", PlatformCall::PushApp(spec.clone()))?;
        state.apps.insert(spec.name.clone());
        Ok(())
    }

    async fn set_env(&self, app: &str, vars: &[EnvVar]) -> Result<()> {
        let _state = self.enter(
            "set_env",
            PlatformCall::SetEnv {
                app: app.to_string(),
                vars: vars.to_vec(),
            },
        )?;
        Ok(())
    }

    async fn bind_service(&self, app: &str, service: &str) -> Result<()> {
        let state = self.enter(
            "bind_service",
            PlatformCall::BindService {
                app: app.to_string(),
                service: service.to_string(),
            },
        )?;
        if state.services.contains_key(service) {
            Ok(())
        } else {
            Err(PlatformError::not_found("service instance", service).into())
        }
    }

    async fn start_app(&self, app: &str) -> Result<()> {
        let _state = self.enter("start_app", PlatformCall::StartApp(app.to_string()))?;
        Ok(())
    }

    async fn get_instance_states(&self, app: &str) -> Result<Vec<InstanceState>> {
        let mut state = self.enter(
            "get_instance_states",
            PlatformCall::GetInstanceStates(app.to_string()),
        )?;
        let states = if state.instance_states.len() > 1 {
            state.instance_states.pop_front().unwrap_or_default()
        } else {
            state.instance_states.front().cloned().unwrap_or_default()
        };
        Ok(states)
    }

    async fn logout(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(PlatformCall::Logout);
        state.authenticated = false;
    }
}
