//! Cloud Foundry v3 API client implementation.
//!
//! This module provides the HTTP client for the Cloud Foundry cloud
//! controller. Authentication uses the password grant against the login
//! server advertised at the API root; every later request carries the
//! bearer token and acts on the targeted space.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::{AppSpec, Credentials, EnvVar, PlatformTarget};
use crate::error::{PlatformError, PushError, Result};

use super::archive::package_bits;
use super::client::PlatformClient;
use super::types::{InstanceState, ServiceInstance};

/// OAuth client id used by the cf CLI.
const CF_CLIENT_ID: &str = "cf";

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Default interval between polls of asynchronous operations.
const DEFAULT_WAIT_INTERVAL_SECS: u64 = 2;

/// Cloud Foundry API client.
#[derive(Debug)]
pub struct CloudFoundryClient {
    /// Session opened by the last successful authentication.
    session: RwLock<Option<Session>>,
    /// Uploaded packages awaiting staging, by app name.
    packages: Mutex<HashMap<String, String>>,
    /// Interval between polls of asynchronous operations.
    wait_interval: Duration,
}

/// Authenticated session against one space.
#[derive(Debug, Clone)]
struct Session {
    http: Client,
    api: String,
    token: String,
    org_guid: String,
    space_guid: String,
    operation_timeout: Duration,
}

// ============================================================================
// API payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct RootInfo {
    links: RootLinks,
}

#[derive(Debug, Deserialize)]
struct RootLinks {
    login: Option<Link>,
    uaa: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

/// Fields shared by the v3 resources this client reads.
#[derive(Debug, Deserialize)]
struct Resource {
    guid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    last_operation: Option<LastOperation>,
    #[serde(default)]
    droplet: Option<GuidRef>,
}

#[derive(Debug, Deserialize)]
struct LastOperation {
    state: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuidRef {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct ProcessStats {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    #[serde(default)]
    detail: String,
}

/// Deadline for one asynchronous platform operation.
struct Deadline {
    at: Instant,
    interval: Duration,
}

impl Deadline {
    fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            interval,
        }
    }

    /// Sleeps one interval, or fails if the deadline has passed.
    async fn tick(&self, operation: &str, name: &str) -> Result<()> {
        if Instant::now() >= self.at {
            return Err(PlatformError::OperationTimeout {
                operation: operation.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}

impl Default for CloudFoundryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudFoundryClient {
    /// Creates a client without a session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            packages: Mutex::new(HashMap::new()),
            wait_interval: Duration::from_secs(DEFAULT_WAIT_INTERVAL_SECS),
        }
    }

    /// Sets the interval between polls of asynchronous operations.
    #[must_use]
    pub const fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// Returns a copy of the current session.
    async fn session(&self, operation: &str) -> Result<Session> {
        self.session.read().await.clone().ok_or_else(|| {
            PlatformError::NotAuthenticated {
                operation: operation.to_string(),
            }
            .into()
        })
    }

    fn deadline(&self, session: &Session) -> Deadline {
        Deadline::new(session.operation_timeout, self.wait_interval)
    }

    /// Sends an authenticated request, retrying transient failures.
    ///
    /// POST requests create resources or trigger actions and are sent once:
    /// a timed-out POST may already have been applied by the controller.
    async fn send(
        &self,
        session: &Session,
        operation: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<String> {
        let url = format!("{}{path}", session.api);
        let attempts = if method == Method::POST { 1 } else { MAX_RETRIES };
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {attempts} for {operation}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            let mut builder = session
                .http
                .request(method.clone(), &url)
                .bearer_auth(&session.token)
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match Self::send_once(builder, operation, &session.api).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PlatformError::network("Max retries exceeded").into()))
    }

    /// Sends a single request and returns the response body.
    async fn send_once(builder: RequestBuilder, operation: &str, api: &str) -> Result<String> {
        trace!("Sending request for {operation}");

        let response = builder
            .send()
            .await
            .map_err(|e| PlatformError::network(format!("{operation}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PlatformError::network(format!("{operation}: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(PlatformError::AuthenticationFailed {
                target: api.to_string(),
                message: format!("{operation} rejected: {}", error_detail(&text)),
            }
            .into());
        }

        if !status.is_success() {
            return Err(
                PlatformError::api_error(operation, status.as_u16(), error_detail(&text)).into(),
            );
        }

        Ok(text)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        session: &Session,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let text = self
            .send(session, operation, Method::GET, path, query, None)
            .await?;
        parse(operation, &text)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        session: &Session,
        operation: &str,
        path: &str,
        body: &Value,
    ) -> Result<T> {
        let text = self
            .send(session, operation, Method::POST, path, &[], Some(body))
            .await?;
        parse(operation, &text)
    }

    /// Sends a request whose response body is not needed.
    async fn call(
        &self,
        session: &Session,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<()> {
        self.send(session, operation, method, path, &[], body)
            .await
            .map(|_| ())
    }

    async fn find_first(
        &self,
        session: &Session,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Resource>> {
        let list: ListResponse<Resource> = self.get(session, operation, path, query).await?;
        Ok(list.resources.into_iter().next())
    }

    async fn find_app(&self, session: &Session, name: &str) -> Result<Option<Resource>> {
        self.find_first(
            session,
            "find app",
            "/v3/apps",
            &[("names", name), ("space_guids", session.space_guid.as_str())],
        )
        .await
    }

    async fn require_app(&self, session: &Session, name: &str) -> Result<String> {
        self.find_app(session, name)
            .await?
            .map(|app| app.guid)
            .ok_or_else(|| PlatformError::not_found("application", name).into())
    }

    async fn find_service(&self, session: &Session, name: &str) -> Result<Option<Resource>> {
        self.find_first(
            session,
            "find service instance",
            "/v3/service_instances",
            &[("names", name), ("space_guids", session.space_guid.as_str())],
        )
        .await
    }

    async fn find_binding(
        &self,
        session: &Session,
        app_guid: &str,
        service_guid: &str,
    ) -> Result<Option<Resource>> {
        self.find_first(
            session,
            "find service binding",
            "/v3/service_credential_bindings",
            &[("app_guids", app_guid), ("service_instance_guids", service_guid)],
        )
        .await
    }

    /// Maps the application to its route, creating the route if needed.
    async fn map_route(&self, session: &Session, spec: &AppSpec, app_guid: &str) -> Result<()> {
        let domain_guid = match &spec.domain {
            Some(domain) => self
                .find_first(session, "find domain", "/v3/domains", &[("names", domain.as_str())])
                .await?
                .map(|d| d.guid)
                .ok_or_else(|| PushError::from(PlatformError::not_found("domain", domain)))?,
            None => {
                let domain: Resource = self
                    .get(
                        session,
                        "find default domain",
                        &format!("/v3/organizations/{}/domains/default", session.org_guid),
                        &[],
                    )
                    .await?;
                domain.guid
            }
        };

        let existing = self
            .find_first(
                session,
                "find route",
                "/v3/routes",
                &[
                    ("hosts", spec.host.as_str()),
                    ("domain_guids", domain_guid.as_str()),
                    ("space_guids", session.space_guid.as_str()),
                ],
            )
            .await?;

        let route_guid = match existing {
            Some(route) => route.guid,
            None => {
                debug!("Creating route for host '{}'", spec.host);
                let route: Resource = self
                    .post(
                        session,
                        "create route",
                        "/v3/routes",
                        &json!({
                            "host": spec.host,
                            "relationships": {
                                "space": { "data": { "guid": session.space_guid } },
                                "domain": { "data": { "guid": domain_guid } }
                            }
                        }),
                    )
                    .await?;
                route.guid
            }
        };

        self.call(
            session,
            "map route",
            Method::POST,
            &format!("/v3/routes/{route_guid}/destinations"),
            Some(&json!({ "destinations": [ { "app": { "guid": app_guid } } ] })),
        )
        .await
    }

    /// Uploads application bits and waits for the package to be ready.
    async fn upload_package(&self, session: &Session, spec: &AppSpec, app_guid: &str) -> Result<String> {
        let bits = package_bits(&spec.app_path)?;

        let package: Resource = self
            .post(
                session,
                "create package",
                "/v3/packages",
                &json!({
                    "type": "bits",
                    "relationships": { "app": { "data": { "guid": app_guid } } }
                }),
            )
            .await?;

        debug!("Uploading {} bytes to package {}", bits.len(), package.guid);

        let part = Part::bytes(bits)
            .file_name("application.zip")
            .mime_str("application/zip")
            .map_err(|e| PlatformError::network(format!("upload bits: {e}")))?;
        let builder = session
            .http
            .post(format!("{}/v3/packages/{}/upload", session.api, package.guid))
            .bearer_auth(&session.token)
            .multipart(Form::new().part("bits", part));
        Self::send_once(builder, "upload bits", &session.api).await?;

        let deadline = self.deadline(session);
        loop {
            let current: Resource = self
                .get(session, "get package", &format!("/v3/packages/{}", package.guid), &[])
                .await?;
            match current.state.as_deref() {
                Some("READY") => break,
                Some(state @ ("FAILED" | "EXPIRED")) => {
                    return Err(PlatformError::OperationFailed {
                        operation: String::from("package upload"),
                        name: spec.name.clone(),
                        message: current.error.unwrap_or_else(|| format!("package {state}")),
                    }
                    .into());
                }
                _ => deadline.tick("package upload", &spec.name).await?,
            }
        }

        Ok(package.guid)
    }

    /// Stages a package and returns the droplet guid.
    async fn stage(&self, session: &Session, app: &str, package_guid: &str) -> Result<String> {
        let build: Resource = self
            .post(
                session,
                "create build",
                "/v3/builds",
                &json!({ "package": { "guid": package_guid } }),
            )
            .await?;

        info!("Staging '{app}' (build {})", build.guid);

        let deadline = self.deadline(session);
        loop {
            let current: Resource = self
                .get(session, "get build", &format!("/v3/builds/{}", build.guid), &[])
                .await?;
            match current.state.as_deref() {
                Some("STAGED") => {
                    return current.droplet.map(|d| d.guid).ok_or_else(|| {
                        PlatformError::InvalidResponse {
                            message: format!("build {} staged without a droplet", build.guid),
                        }
                        .into()
                    });
                }
                Some("FAILED") => {
                    return Err(PlatformError::OperationFailed {
                        operation: String::from("staging"),
                        name: app.to_string(),
                        message: current
                            .error
                            .unwrap_or_else(|| String::from("staging failed")),
                    }
                    .into());
                }
                _ => deadline.tick("staging", app).await?,
            }
        }
    }
}

#[async_trait]
impl PlatformClient for CloudFoundryClient {
    async fn authenticate(&self, target: &PlatformTarget, credentials: &Credentials) -> Result<()> {
        let api = target.api_endpoint.trim_end_matches('/').to_string();
        info!("Authenticating against {api} as {}", credentials.username);

        let operation_timeout = Duration::from_secs(target.operation_timeout_secs);
        let http = Client::builder()
            .timeout(operation_timeout)
            .danger_accept_invalid_certs(target.trust_self_signed)
            .build()
            .map_err(|e| PlatformError::network(format!("Failed to create HTTP client: {e}")))?;

        let root: RootInfo = parse(
            "discover login endpoint",
            &Self::send_once(http.get(format!("{api}/")), "discover login endpoint", &api).await?,
        )?;
        let login = root
            .links
            .login
            .or(root.links.uaa)
            .map(|link| link.href)
            .ok_or_else(|| PlatformError::InvalidResponse {
                message: String::from("API root does not advertise a login endpoint"),
            })?;

        let response = http
            .post(format!("{}/oauth/token", login.trim_end_matches('/')))
            .basic_auth(CF_CLIENT_ID, Some(""))
            .form(&[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PlatformError::network(format!("token request: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(PlatformError::AuthenticationFailed {
                target: api,
                message: format!("token request rejected with HTTP {status}"),
            }
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::api_error("token request", status.as_u16(), body).into());
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| PlatformError::InvalidResponse {
                    message: format!("token response: {e}"),
                })?;

        let mut session = Session {
            http,
            api,
            token: token.access_token,
            org_guid: String::new(),
            space_guid: String::new(),
            operation_timeout,
        };

        let org = self
            .find_first(
                &session,
                "find organization",
                "/v3/organizations",
                &[("names", target.organization.as_str())],
            )
            .await?
            .ok_or_else(|| PlatformError::not_found("organization", &target.organization))?;
        let space = self
            .find_first(
                &session,
                "find space",
                "/v3/spaces",
                &[
                    ("names", target.space.as_str()),
                    ("organization_guids", org.guid.as_str()),
                ],
            )
            .await?
            .ok_or_else(|| PlatformError::not_found("space", &target.space))?;

        session.org_guid = org.guid;
        session.space_guid = space.guid;

        *self.session.write().await = Some(session);
        self.packages.lock().await.clear();

        info!("Targeting org '{}' space '{}'", target.organization, target.space);
        Ok(())
    }

    async fn get_service_instance(&self, name: &str) -> Result<Option<ServiceInstance>> {
        let session = self.session("get service instance").await?;
        Ok(self
            .find_service(&session, name)
            .await?
            .map(|r| ServiceInstance {
                guid: r.guid,
                name: r.name,
            }))
    }

    async fn create_service_instance(
        &self,
        name: &str,
        service_type: &str,
        plan: &str,
    ) -> Result<ServiceInstance> {
        let session = self.session("create service instance").await?;

        let service_plan = self
            .find_first(
                &session,
                "find service plan",
                "/v3/service_plans",
                &[
                    ("names", plan),
                    ("service_offering_names", service_type),
                    ("space_guids", session.space_guid.as_str()),
                ],
            )
            .await?
            .ok_or_else(|| {
                PlatformError::not_found("service plan", format!("{service_type}/{plan}"))
            })?;

        self.call(
            &session,
            "create service instance",
            Method::POST,
            "/v3/service_instances",
            Some(&json!({
                "type": "managed",
                "name": name,
                "relationships": {
                    "space": { "data": { "guid": session.space_guid } },
                    "service_plan": { "data": { "guid": service_plan.guid } }
                }
            })),
        )
        .await?;

        let deadline = self.deadline(&session);
        loop {
            let instance = self.find_service(&session, name).await?.ok_or_else(|| {
                PlatformError::InvalidResponse {
                    message: format!("service instance '{name}' missing after creation"),
                }
            })?;
            if settled("service creation", name, instance.last_operation.as_ref())? {
                return Ok(ServiceInstance {
                    guid: instance.guid,
                    name: instance.name,
                });
            }
            deadline.tick("service creation", name).await?;
        }
    }

    async fn delete_service_instance(&self, name: &str) -> Result<()> {
        let session = self.session("delete service instance").await?;
        let instance = self
            .find_service(&session, name)
            .await?
            .ok_or_else(|| PlatformError::not_found("service instance", name))?;

        self.call(
            &session,
            "delete service instance",
            Method::DELETE,
            &format!("/v3/service_instances/{}", instance.guid),
            None,
        )
        .await?;

        let deadline = self.deadline(&session);
        while let Some(current) = self.find_service(&session, name).await? {
            settled("service deletion", name, current.last_operation.as_ref())?;
            deadline.tick("service deletion", name).await?;
        }
        Ok(())
    }

    async fn delete_app(&self, name: &str) -> Result<bool> {
        let session = self.session("delete app").await?;
        let Some(app) = self.find_app(&session, name).await? else {
            return Ok(false);
        };

        self.call(
            &session,
            "delete app",
            Method::DELETE,
            &format!("/v3/apps/{}", app.guid),
            None,
        )
        .await?;

        let deadline = self.deadline(&session);
        while self.find_app(&session, name).await?.is_some() {
            deadline.tick("app deletion", name).await?;
        }
        Ok(true)
    }

    async fn push_app(&self, spec: &AppSpec) -> Result<()> {
        let session = self.session("push app").await?;

        let mut lifecycle_data = Map::new();
        lifecycle_data.insert(
            String::from("buildpacks"),
            json!(spec.buildpack.iter().collect::<Vec<_>>()),
        );
        if let Some(stack) = &spec.stack {
            lifecycle_data.insert(String::from("stack"), json!(stack));
        }
        let lifecycle = json!({ "type": "buildpack", "data": lifecycle_data });

        let app_guid = match self.find_app(&session, &spec.name).await? {
            Some(app) => {
                debug!("Updating existing app '{}'", spec.name);
                self.call(
                    &session,
                    "update app",
                    Method::PATCH,
                    &format!("/v3/apps/{}", app.guid),
                    Some(&json!({ "lifecycle": lifecycle })),
                )
                .await?;
                app.guid
            }
            None => {
                info!("Creating app '{}'", spec.name);
                let app: Resource = self
                    .post(
                        &session,
                        "create app",
                        "/v3/apps",
                        &json!({
                            "name": spec.name,
                            "lifecycle": lifecycle,
                            "relationships": {
                                "space": { "data": { "guid": session.space_guid } }
                            }
                        }),
                    )
                    .await?;
                app.guid
            }
        };

        let process: Resource = self
            .get(
                &session,
                "get web process",
                &format!("/v3/apps/{app_guid}/processes/web"),
                &[],
            )
            .await?;
        let health_check = if spec.no_route { "process" } else { "port" };
        self.call(
            &session,
            "update web process",
            Method::PATCH,
            &format!("/v3/processes/{}", process.guid),
            Some(&json!({
                "command": spec.command,
                "health_check": {
                    "type": health_check,
                    "data": { "timeout": spec.timeout_secs }
                }
            })),
        )
        .await?;
        self.call(
            &session,
            "scale app",
            Method::POST,
            &format!("/v3/apps/{app_guid}/processes/web/actions/scale"),
            Some(&json!({ "instances": spec.instances, "memory_in_mb": spec.memory_mb })),
        )
        .await?;

        if spec.no_route {
            debug!("Skipping route mapping for '{}'", spec.name);
        } else {
            self.map_route(&session, spec, &app_guid).await?;
        }

        let package_guid = self.upload_package(&session, spec, &app_guid).await?;
        self.packages
            .lock()
            .await
            .insert(spec.name.clone(), package_guid);

        info!("Pushed bits for '{}'", spec.name);
        Ok(())
    }

    async fn set_env(&self, app: &str, vars: &[EnvVar]) -> Result<()> {
        let session = self.session("set env").await?;
        let app_guid = self.require_app(&session, app).await?;

        let mut values = Map::new();
        for var in vars {
            values.insert(var.key.clone(), Value::String(var.value.clone()));
        }

        self.call(
            &session,
            "set env",
            Method::PATCH,
            &format!("/v3/apps/{app_guid}/environment_variables"),
            Some(&json!({ "var": values })),
        )
        .await
    }

    async fn bind_service(&self, app: &str, service: &str) -> Result<()> {
        let session = self.session("bind service").await?;
        let app_guid = self.require_app(&session, app).await?;
        let service_guid = self
            .find_service(&session, service)
            .await?
            .map(|s| s.guid)
            .ok_or_else(|| PlatformError::not_found("service instance", service))?;

        if self
            .find_binding(&session, &app_guid, &service_guid)
            .await?
            .is_some()
        {
            debug!("Service '{service}' already bound to '{app}'");
            return Ok(());
        }

        self.call(
            &session,
            "bind service",
            Method::POST,
            "/v3/service_credential_bindings",
            Some(&json!({
                "type": "app",
                "relationships": {
                    "app": { "data": { "guid": app_guid } },
                    "service_instance": { "data": { "guid": service_guid } }
                }
            })),
        )
        .await?;

        let deadline = self.deadline(&session);
        loop {
            let binding = self.find_binding(&session, &app_guid, &service_guid).await?;
            let last_operation = binding.as_ref().and_then(|b| b.last_operation.as_ref());
            if binding.is_some() && settled("service binding", service, last_operation)? {
                return Ok(());
            }
            deadline.tick("service binding", service).await?;
        }
    }

    async fn start_app(&self, app: &str) -> Result<()> {
        let session = self.session("start app").await?;
        let app_guid = self.require_app(&session, app).await?;

        let pending = self.packages.lock().await.remove(app);
        let package_guid = match pending {
            Some(guid) => guid,
            None => self
                .find_first(
                    &session,
                    "find package",
                    "/v3/packages",
                    &[("app_guids", app_guid.as_str()), ("order_by", "-created_at")],
                )
                .await?
                .map(|p| p.guid)
                .ok_or_else(|| PlatformError::not_found("package", app))?,
        };

        let droplet_guid = self.stage(&session, app, &package_guid).await?;

        self.call(
            &session,
            "set droplet",
            Method::PATCH,
            &format!("/v3/apps/{app_guid}/relationships/current_droplet"),
            Some(&json!({ "data": { "guid": droplet_guid } })),
        )
        .await?;
        self.call(
            &session,
            "restart app",
            Method::POST,
            &format!("/v3/apps/{app_guid}/actions/restart"),
            None,
        )
        .await?;

        info!("Started '{app}'");
        Ok(())
    }

    async fn get_instance_states(&self, app: &str) -> Result<Vec<InstanceState>> {
        let session = self.session("get instance states").await?;
        let app_guid = self.require_app(&session, app).await?;

        let stats: ListResponse<ProcessStats> = self
            .get(
                &session,
                "get process stats",
                &format!("/v3/apps/{app_guid}/processes/web/stats"),
                &[],
            )
            .await?;

        Ok(stats
            .resources
            .iter()
            .map(|s| InstanceState::from_api(&s.state))
            .collect())
    }

    async fn logout(&self) {
        if self.session.write().await.take().is_some() {
            debug!("Session closed");
        }
        self.packages.lock().await.clear();
    }
}

/// Parses a JSON response body.
fn parse<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        PlatformError::InvalidResponse {
            message: format!("{operation}: {e}"),
        }
        .into()
    })
}

/// Extracts error details from a v3 error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ApiErrors>(body)
        .ok()
        .filter(|e| !e.errors.is_empty())
        .map_or_else(
            || body.trim().to_string(),
            |e| {
                e.errors
                    .iter()
                    .map(|entry| entry.detail.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            },
        )
}

/// Returns true once an asynchronous operation has succeeded.
fn settled(operation: &str, name: &str, last: Option<&LastOperation>) -> Result<bool> {
    match last.map(|op| op.state.as_str()) {
        None | Some("succeeded") => Ok(true),
        Some("failed") => Err(PlatformError::OperationFailed {
            operation: operation.to_string(),
            name: name.to_string(),
            message: last
                .and_then(|op| op.description.clone())
                .unwrap_or_else(|| String::from("no description")),
        }
        .into()),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(api: &str) -> PlatformTarget {
        PlatformTarget {
            api_endpoint: api.to_string(),
            organization: String::from("org"),
            space: String::from("dev"),
            credentials_id: String::from("cf"),
            trust_self_signed: false,
            operation_timeout_secs: 5,
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "links": { "login": { "href": server.uri() } }
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "token_type": "bearer"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/organizations"))
            .and(query_param("names", "org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "org-guid", "name": "org" } ]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/spaces"))
            .and(query_param("names", "dev"))
            .and(query_param("organization_guids", "org-guid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "space-guid", "name": "dev" } ]
            })))
            .mount(server)
            .await;
    }

    async fn authenticated(server: &MockServer) -> CloudFoundryClient {
        authenticated_with(server, target(&server.uri())).await
    }

    async fn authenticated_with(server: &MockServer, target: PlatformTarget) -> CloudFoundryClient {
        mount_login(server).await;
        let client = CloudFoundryClient::new().with_wait_interval(Duration::from_millis(10));
        client
            .authenticate(&target, &Credentials::new("user", "pass"))
            .await
            .unwrap();
        client
    }

    fn app_spec(app_path: &std::path::Path, no_route: bool) -> AppSpec {
        AppSpec {
            name: String::from("sample-app"),
            memory_mb: 512,
            instances: 2,
            host: String::from("sample"),
            domain: None,
            timeout_secs: 60,
            no_route,
            buildpack: Some(String::from("nodejs_buildpack")),
            stack: None,
            command: None,
            app_path: app_path.to_path_buf(),
            env: vec![],
        }
    }

    async fn mount_json(server: &MockServer, verb: &str, route: &str, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_existing_app(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("names", "sample-app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "app-guid", "name": "sample-app" } ]
            })))
            .mount(server)
            .await;
    }

    /// Mounts the process update, scale and package upload endpoints.
    async fn mount_push_steps(server: &MockServer, health_check: &str) {
        mount_json(server, "GET", "/v3/apps/app-guid/processes/web", json!({ "guid": "proc-guid" }))
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v3/processes/proc-guid"))
            .and(body_partial_json(json!({ "health_check": { "type": health_check } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "guid": "proc-guid" })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/apps/app-guid/processes/web/actions/scale"))
            .and(body_partial_json(json!({ "instances": 2, "memory_in_mb": 512 })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "guid": "proc-guid" })))
            .expect(1)
            .mount(server)
            .await;
        mount_json(
            server,
            "POST",
            "/v3/packages",
            json!({ "guid": "pkg-guid", "state": "PROCESSING_UPLOAD" }),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v3/packages/pkg-guid/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "guid": "pkg-guid" })))
            .expect(1)
            .mount(server)
            .await;
        mount_json(
            server,
            "GET",
            "/v3/packages/pkg-guid",
            json!({ "guid": "pkg-guid", "state": "READY" }),
        )
        .await;
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.js"), "require('http')").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_service_lookup_after_authentication() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/service_instances"))
            .and(query_param("names", "cache"))
            .and(query_param("space_guids", "space-guid"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "svc-guid", "name": "cache" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/service_instances"))
            .and(query_param("names", "db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .mount(&server)
            .await;

        let cache = client.get_service_instance("cache").await.unwrap();
        assert_eq!(
            cache,
            Some(ServiceInstance {
                guid: String::from("svc-guid"),
                name: String::from("cache"),
            })
        );
        assert!(client.get_service_instance("db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "links": { "login": { "href": server.uri() } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "unauthorized"
            })))
            .mount(&server)
            .await;

        let client = CloudFoundryClient::new();
        let err = client
            .authenticate(&target(&server.uri()), &Credentials::new("user", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlatformAuthError);
    }

    #[tokio::test]
    async fn test_unknown_space() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        let mut other = target(&server.uri());
        other.space = String::from("prod");
        Mock::given(method("GET"))
            .and(path("/v3/spaces"))
            .and(query_param("names", "prod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .mount(&server)
            .await;

        let err = CloudFoundryClient::new()
            .authenticate(&other, &Credentials::new("user", "pass"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cloud Foundry API error: space not found: prod");
    }

    #[tokio::test]
    async fn test_requires_session() {
        let client = CloudFoundryClient::new();
        let err = client.get_instance_states("sample-app").await.unwrap_err();
        assert!(matches!(
            err,
            PushError::Platform(PlatformError::NotAuthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn test_instance_states_and_logout() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("names", "sample-app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "app-guid", "name": "sample-app" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/apps/app-guid/processes/web/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [
                    { "type": "web", "index": 0, "state": "RUNNING" },
                    { "type": "web", "index": 1, "state": "STARTING" }
                ]
            })))
            .mount(&server)
            .await;

        let states = client.get_instance_states("sample-app").await.unwrap();
        assert_eq!(states, vec![InstanceState::Running, InstanceState::Starting]);

        client.logout().await;
        assert!(client.get_instance_states("sample-app").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_app_is_noop() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .mount(&server)
            .await;

        assert!(!client.delete_app("sample-app").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_env_sends_only_given_keys() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "app-guid", "name": "sample-app" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v3/apps/app-guid/environment_variables"))
            .and(wiremock::matchers::body_json(json!({ "var": { "A": "1", "B": "2" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "var": { "A": "1", "B": "2", "KEEP": "x" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        client
            .set_env("sample-app", &[EnvVar::new("A", "1"), EnvVar::new("B", "2")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_new_app_without_route_then_start() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;
        let dir = workspace();

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("names", "sample-app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_existing_app(&server).await;
        Mock::given(method("POST"))
            .and(path("/v3/apps"))
            .and(body_partial_json(json!({
                "name": "sample-app",
                "lifecycle": { "data": { "buildpacks": ["nodejs_buildpack"] } },
                "relationships": { "space": { "data": { "guid": "space-guid" } } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "guid": "app-guid", "name": "sample-app"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_push_steps(&server, "process").await;
        Mock::given(method("POST"))
            .and(path("/v3/routes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        client.push_app(&app_spec(dir.path(), true)).await.unwrap();

        Mock::given(method("GET"))
            .and(path("/v3/packages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/builds"))
            .and(body_partial_json(json!({ "package": { "guid": "pkg-guid" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "guid": "build-guid", "state": "STAGING"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_json(
            &server,
            "GET",
            "/v3/builds/build-guid",
            json!({ "guid": "build-guid", "state": "STAGED", "droplet": { "guid": "drop-guid" } }),
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/v3/apps/app-guid/relationships/current_droplet"))
            .and(body_partial_json(json!({ "data": { "guid": "drop-guid" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/apps/app-guid/actions/restart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "guid": "app-guid" })))
            .expect(1)
            .mount(&server)
            .await;

        client.start_app("sample-app").await.unwrap();
    }

    #[tokio::test]
    async fn test_push_existing_app_maps_default_route() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;
        let dir = workspace();

        mount_existing_app(&server).await;
        Mock::given(method("PATCH"))
            .and(path("/v3/apps/app-guid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "guid": "app-guid" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/apps"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        mount_push_steps(&server, "port").await;
        mount_json(
            &server,
            "GET",
            "/v3/organizations/org-guid/domains/default",
            json!({ "guid": "domain-guid", "name": "apps.example.com" }),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v3/routes"))
            .and(query_param("hosts", "sample"))
            .and(query_param("domain_guids", "domain-guid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/routes"))
            .and(body_partial_json(json!({
                "host": "sample",
                "relationships": { "domain": { "data": { "guid": "domain-guid" } } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "guid": "route-guid" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/routes/route-guid/destinations"))
            .and(body_partial_json(json!({
                "destinations": [ { "app": { "guid": "app-guid" } } ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "destinations": [] })))
            .expect(1)
            .mount(&server)
            .await;

        client.push_app(&app_spec(dir.path(), false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_staging_failure_is_reported() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        mount_existing_app(&server).await;
        Mock::given(method("GET"))
            .and(path("/v3/packages"))
            .and(query_param("app_guids", "app-guid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "pkg-guid", "state": "READY" } ]
            })))
            .mount(&server)
            .await;
        mount_json(
            &server,
            "POST",
            "/v3/builds",
            json!({ "guid": "build-guid", "state": "STAGING" }),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/v3/builds/build-guid",
            json!({ "guid": "build-guid", "state": "FAILED", "error": "NoAppDetectedError" }),
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/v3/apps/app-guid/relationships/current_droplet"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client.start_app("sample-app").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedDeploy);
        assert!(matches!(
            &err,
            PushError::Platform(PlatformError::OperationFailed { operation, message, .. })
                if operation == "staging" && message == "NoAppDetectedError"
        ));
    }

    #[tokio::test]
    async fn test_bind_skips_existing_binding() {
        let server = MockServer::start().await;
        let client = authenticated(&server).await;

        mount_existing_app(&server).await;
        Mock::given(method("GET"))
            .and(path("/v3/service_instances"))
            .and(query_param("names", "db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "svc-guid", "name": "db" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/service_credential_bindings"))
            .and(query_param("app_guids", "app-guid"))
            .and(query_param("service_instance_guids", "svc-guid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "binding-guid" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/service_credential_bindings"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        client.bind_service("sample-app", "db").await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_create_is_not_resent() {
        let server = MockServer::start().await;
        let mut short = target(&server.uri());
        short.operation_timeout_secs = 1;
        let client = authenticated_with(&server, short).await;

        Mock::given(method("GET"))
            .and(path("/v3/service_plans"))
            .and(query_param("names", "free"))
            .and(query_param("service_offering_names", "mysql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [ { "guid": "plan-guid", "name": "free" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/service_instances"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(1500)))
            .expect(1)
            .mount(&server)
            .await;

        let err = client
            .create_service_instance("db", "mysql", "free")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_detail() {
        let body = r#"{"errors":[{"detail":"Name must be unique","title":"CF-UnprocessableEntity","code":10008}]}"#;
        assert_eq!(error_detail(body), "Name must be unique");
        assert_eq!(error_detail("  bad gateway "), "bad gateway");
    }

    #[test]
    fn test_settled() {
        let failed = LastOperation {
            state: String::from("failed"),
            description: Some(String::from("quota exceeded")),
        };
        let pending = LastOperation {
            state: String::from("in progress"),
            description: None,
        };

        assert!(settled("service creation", "db", None).unwrap());
        assert!(!settled("service creation", "db", Some(&pending)).unwrap());
        let err = settled("service creation", "db", Some(&failed)).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
