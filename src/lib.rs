// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # cf-pusher
//!
//! A build-pipeline step that pushes one application to Cloud Foundry,
//! creating the services it needs and waiting until it runs.
//!
//! ## Overview
//!
//! A push runs once per build, after the build itself:
//!
//! - Skips entirely when the build result is worse than success
//! - Resolves one application from a manifest file or inline job fields
//! - Creates, resets or keeps the declared services, and checks that
//!   bind-only services exist
//! - Pushes the app, sets its environment, binds services and starts it
//! - Polls instance states until every instance runs or the app times out
//!
//! ## Modules
//!
//! - [`config`]: Job configuration, manifests, validation and credentials
//! - [`platform`]: Cloud Foundry API client
//! - [`reconciler`]: Service reconciliation
//! - [`deploy`]: Application deployment and start-up polling
//! - [`push`]: Push orchestration and outcomes
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! target: https://api.sys.example.com
//! organization: my-org
//! space: staging
//! credentials_id: cf-staging
//! plugin_timeout: 120
//! services_to_create:
//!   - name: orders-db
//!     type: mysql
//!     plan: small
//!     reset_service: false
//! manifest_choice:
//!   value: manifest_file
//!   manifest_file: deploy/manifest.yml
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod platform;
pub mod push;
pub mod reconciler;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{
    ConfigParser, ConfigValidator, ConfigurationResolver, CredentialsProvider,
    EnvCredentialsProvider, PushConfig, ResolvedConfig,
};
pub use deploy::{DeploymentExecutor, DeploymentReport};
pub use error::{ErrorKind, PushError, Result};
pub use platform::{CloudFoundryClient, PlatformClient};
pub use push::{BuildContext, BuildResult, PushOrchestrator, PushOutcome, PushStatus};
pub use reconciler::{ReconciliationReport, ServiceReconciler};
