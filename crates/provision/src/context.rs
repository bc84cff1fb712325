//! Explicit invocation context and progress reporting hooks.
//!
//! The identity used for authorization is passed in rather than read from
//! process-wide state, so tests can substitute a fake one and nothing in the
//! core depends on which account happens to be logged in.

use crate::error::Error;
use crate::exec::{CommandSpec, ExecutionError};
use crate::types::{
    CreationOutcome, OperationHandle, OperationWarning, PutOutcome, ResourceDescriptor,
};
use std::time::Duration;

/// Which cloud identity calls are made as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Account to authenticate as (`--account`)
    pub account: Option<String>,
    /// Service account to impersonate (`--impersonate-service-account`)
    pub impersonate: Option<String>,
}

impl Identity {
    /// Append the identity flags to a gcloud command.
    pub fn apply(&self, spec: CommandSpec) -> CommandSpec {
        spec.flag_opt("--account", self.account.as_deref())
            .flag_opt("--impersonate-service-account", self.impersonate.as_deref())
    }
}

/// Context passed into every component call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Default project for descriptors without one in their scope
    pub project: String,
    pub identity: Identity,
}

impl Context {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            identity: Identity::default(),
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Project a descriptor lives in.
    pub fn project_for<'a>(&'a self, desc: &'a ResourceDescriptor) -> &'a str {
        desc.scope.project.as_deref().unwrap_or(&self.project)
    }

    /// Project an operation lives in.
    pub fn project_for_operation<'a>(&'a self, handle: &'a OperationHandle) -> &'a str {
        handle.project.as_deref().unwrap_or(&self.project)
    }
}

/// Receives progress from the provisioning components.
///
/// Every outcome is reported with the resource and, for failures that were
/// absorbed, the captured stderr.
pub trait Reporter {
    /// Existence was checked; `None` means the kind has no cheap lookup.
    fn on_probe(&self, _desc: &ResourceDescriptor, _exists: Option<bool>) {}

    /// A create call failed with "already exists" and was treated as success.
    fn on_tolerated(&self, _desc: &ResourceDescriptor, _error: &ExecutionError) {}

    fn on_outcome(&self, _desc: &ResourceDescriptor, _outcome: &CreationOutcome) {}

    /// An operation was read and is still pending.
    fn on_poll(&self, _handle: &OperationHandle, _polls: u32, _elapsed: Duration) {}

    fn on_warning(&self, _handle: &OperationHandle, _warning: &OperationWarning) {}

    /// Deleting a secret before recreating it failed; creation continues.
    fn on_deletion_failed(&self, _name: &str, _error: &Error) {}

    fn on_secret(&self, _name: &str, _outcome: PutOutcome) {}
}

/// Reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReport;

impl Reporter for NoReport {}

/// Reporter that writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn on_probe(&self, desc: &ResourceDescriptor, exists: Option<bool>) {
        match exists {
            Some(true) => log::info!("{} exists", desc.label()),
            Some(false) => log::info!("{} does not exist", desc.label()),
            None => log::debug!("{} has no lookup; creating directly", desc.label()),
        }
    }

    fn on_tolerated(&self, desc: &ResourceDescriptor, error: &ExecutionError) {
        log::warn!(
            "{} already exists (create reported: {})",
            desc.label(),
            error.stderr.trim()
        );
    }

    fn on_outcome(&self, desc: &ResourceDescriptor, outcome: &CreationOutcome) {
        match outcome {
            CreationOutcome::AlreadyPresent { .. } => {
                log::info!("{} already present", desc.label());
            }
            CreationOutcome::Created => log::info!("{} created", desc.label()),
            CreationOutcome::CreatedAsync(handle) => {
                log::info!("{} creation started: {handle}", desc.label());
            }
        }
    }

    fn on_poll(&self, handle: &OperationHandle, polls: u32, elapsed: Duration) {
        log::debug!(
            "operation {handle} still pending after {polls} polls ({}s)",
            elapsed.as_secs()
        );
    }

    fn on_warning(&self, handle: &OperationHandle, warning: &OperationWarning) {
        log::warn!("operation {handle}: {warning}");
    }

    fn on_deletion_failed(&self, name: &str, error: &Error) {
        log::warn!("could not delete secret '{name}' before recreating it: {error}");
    }

    fn on_secret(&self, name: &str, outcome: PutOutcome) {
        log::info!("secret '{name}' {outcome:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    #[test]
    fn test_identity_flags() {
        let identity = Identity {
            account: None,
            impersonate: Some("terraform-service-account@p.iam.gserviceaccount.com".into()),
        };
        let spec = identity.apply(CommandSpec::new("gcloud").arg("version"));
        assert_eq!(
            spec.args,
            vec![
                "version",
                "--impersonate-service-account",
                "terraform-service-account@p.iam.gserviceaccount.com"
            ]
        );
    }

    #[test]
    fn test_project_for_prefers_scope() {
        let ctx = Context::new("default-project");
        let plain = ResourceDescriptor::new(ResourceKind::Network, "vpc");
        let scoped = ResourceDescriptor::new(ResourceKind::Network, "vpc").in_project("other");
        assert_eq!(ctx.project_for(&plain), "default-project");
        assert_eq!(ctx.project_for(&scoped), "other");
    }
}
