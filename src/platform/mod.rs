//! Cloud Foundry platform integration.
//!
//! This module provides:
//! - The [`PlatformClient`] capability used by the orchestration core
//! - A v3 API implementation over HTTP
//! - Packaging of application bits

mod archive;
mod client;
mod cloudfoundry;
mod types;

#[cfg(test)]
pub(crate) mod memory;

pub use archive::package_bits;
pub use client::PlatformClient;
pub use cloudfoundry::CloudFoundryClient;
pub use types::{running_count, InstanceState, ServiceInstance};
