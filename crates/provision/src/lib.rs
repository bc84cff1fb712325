//! # Provision
//!
//! Idempotent provisioning of cloud resources through external tools and
//! APIs that have no native "create if missing".
//!
//! ## Core Concepts
//!
//! - **Runner**: runs a command and captures stdout/stderr in full
//! - **Driver**: per-kind strategy that looks a resource up and creates it
//! - **Provisioner**: probe, create, tolerate "already exists", and wait
//!   for long-running operations
//! - **Poller**: fixed-interval wait with a deadline, driven by a [`Clock`]
//! - **Secret Replacer**: delete then recreate, staging the value in a
//!   private temp file that is always removed
//!
//! ## Example
//!
//! ```ignore
//! use provision::{Context, Provisioner, Registry, ResourceDescriptor, ResourceKind};
//!
//! let mut registry = Registry::new();
//! registry.register(ResourceKind::Network, compute_driver);
//!
//! let provisioner = Provisioner::new(registry);
//! let ctx = Context::new("my-project");
//! let desc = ResourceDescriptor::new(ResourceKind::Network, "custom-vpc-network");
//!
//! let ensured = provisioner.ensure(&ctx, &desc)?;
//! for warning in &ensured.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! ```

mod classify;
mod context;
mod driver;
mod ensure;
mod error;
mod exec;
mod poll;
mod probe;
mod retry;
pub mod secret;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{Patterns, Signal};
pub use context::{Context, Identity, LogReporter, NoReport, Reporter};
pub use driver::{CommandBuilder, CommandDriver, Driver, OperationSource, Registry};
pub use ensure::Provisioner;
pub use error::{Error, Result};
pub use exec::{CommandSpec, ExecutionError, ExecutionResult, Runner, Status, SystemRunner};
pub use poll::{
    CancelToken, Clock, DEFAULT_INTERVAL, DEFAULT_TIMEOUT, Poller, SystemClock, WaitConfig,
};
pub use probe::exists;
pub use retry::{RetryConfig, is_transient, with_retry};
pub use secret::SecretStore;
pub use types::{
    CreationOutcome, Detection, Ensured, OperationErrorDetail, OperationFailure, OperationHandle,
    OperationReport, OperationScope, OperationState, OperationStatus, OperationWarning,
    PutOutcome, PutReport, ResourceDescriptor, ResourceKind, Scope, SecretRecord,
};
