//! Application deployment.
//!
//! This module pushes one resolved application and waits for it to start.

mod executor;

pub use executor::{DeploymentExecutor, DeploymentReport, DEFAULT_POLL_INTERVAL};
