//! Credentials lookup by identifier.
//!
//! The build host owns credential storage; the push task only asks for a
//! username/password pair by the id named in the job configuration.

use crate::error::{ConfigError, Result};
use tracing::debug;

/// Username and password for the platform's login server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login username.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Creates a credentials pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Looks up credentials by id.
pub trait CredentialsProvider: Send + Sync {
    /// Returns the credentials registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no credentials are registered under `id`.
    fn lookup(&self, id: &str) -> Result<Credentials>;
}

/// Reads credentials from environment variables.
///
/// For id `cf-prod` it reads `CF_CREDENTIALS_CF_PROD_USERNAME` and
/// `CF_CREDENTIALS_CF_PROD_PASSWORD`, falling back to `CF_USERNAME` and
/// `CF_PASSWORD`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialsProvider;

impl EnvCredentialsProvider {
    /// Creates a new provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the environment variable prefix used for `id`.
    #[must_use]
    pub fn prefix_for(id: &str) -> String {
        let normalized: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("CF_CREDENTIALS_{normalized}")
    }

    fn read(scoped: &str, fallback: &str) -> Result<String> {
        std::env::var(scoped)
            .or_else(|_| std::env::var(fallback))
            .map_err(|_| {
                ConfigError::MissingEnvVar {
                    name: scoped.to_string(),
                }
                .into()
            })
    }
}

impl CredentialsProvider for EnvCredentialsProvider {
    fn lookup(&self, id: &str) -> Result<Credentials> {
        let prefix = Self::prefix_for(id);
        debug!("Looking up credentials '{id}' under {prefix}_*");

        let username = Self::read(&format!("{prefix}_USERNAME"), "CF_USERNAME")?;
        let password = Self::read(&format!("{prefix}_PASSWORD"), "CF_PASSWORD")?;

        Ok(Credentials { username, password })
    }
}
