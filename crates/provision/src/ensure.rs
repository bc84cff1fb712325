//! Idempotent Creator and the [`Provisioner`] facade.

use crate::classify::Patterns;
use crate::context::{Context, LogReporter, Reporter};
use crate::driver::Registry;
use crate::error::{Error, Result};
use crate::poll::{CancelToken, Clock, Poller, SystemClock, WaitConfig};
use crate::probe;
use crate::secret::{self, SecretStore};
use crate::types::{
    CreationOutcome, Detection, Ensured, OperationHandle, OperationReport, PutReport,
    ResourceDescriptor, ResourceKind, SecretRecord,
};
use std::sync::Arc;

/// Ensures resources exist, waiting on the operations that create them.
///
/// Holds no per-resource state: every call consumes its descriptor and
/// returns. Repeated calls for an existing resource are no-ops.
pub struct Provisioner {
    registry: Registry,
    patterns: Patterns,
    wait: WaitConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    cancel: CancelToken,
    reporter: Arc<dyn Reporter + Send + Sync>,
}

impl Provisioner {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            patterns: Patterns::default(),
            wait: WaitConfig::default(),
            clock: Arc::new(SystemClock::new()),
            cancel: CancelToken::new(),
            reporter: Arc::new(LogReporter),
        }
    }

    #[must_use]
    pub fn with_patterns(mut self, patterns: Patterns) -> Self {
        self.patterns = patterns;
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter + Send + Sync>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token that stops any wait in progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the resource exists. `None` when its kind has no lookup.
    pub fn exists(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<bool>> {
        let driver = self.registry.get(desc.kind)?;
        let found = probe::exists(driver, ctx, desc, &self.patterns)?;
        self.reporter.on_probe(desc, found);
        Ok(found)
    }

    /// Make sure the resource exists, creating it if needed.
    ///
    /// An asynchronous create returns [`CreationOutcome::CreatedAsync`]
    /// with the operation still running; pass the handle to
    /// [`wait`](Self::wait) or use [`ensure`](Self::ensure).
    pub fn ensure_exists(
        &self,
        ctx: &Context,
        desc: &ResourceDescriptor,
    ) -> Result<CreationOutcome> {
        let driver = self.registry.get(desc.kind)?;
        let found = probe::exists(driver, ctx, desc, &self.patterns)?;
        self.reporter.on_probe(desc, found);

        let outcome = if found == Some(true) {
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe,
            }
        } else {
            match driver.create(ctx, desc) {
                Ok(None) => CreationOutcome::Created,
                Ok(Some(handle)) => CreationOutcome::CreatedAsync(handle),
                Err(e) => self.tolerate_conflict(desc, e)?,
            }
        };

        self.reporter.on_outcome(desc, &outcome);
        Ok(outcome)
    }

    /// The explicit fallback branch: a create that failed because the
    /// resource is already there counts as success. Anything else is fatal.
    fn tolerate_conflict(
        &self,
        desc: &ResourceDescriptor,
        error: Error,
    ) -> Result<CreationOutcome> {
        if let Some(conflict) = error
            .execution()
            .filter(|x| self.patterns.is_already_exists(x))
        {
            self.reporter.on_tolerated(desc, conflict);
            return Ok(CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict,
            });
        }
        Err(Error::Creation {
            kind: desc.kind,
            name: desc.name.clone(),
            source: Box::new(error),
        })
    }

    /// Wait for an operation started by a create of `kind`.
    pub fn wait(
        &self,
        ctx: &Context,
        kind: ResourceKind,
        handle: &OperationHandle,
    ) -> Result<OperationReport> {
        let driver = self.registry.get(kind)?;
        let source = driver.operations().ok_or_else(|| Error::Unpollable {
            kind,
            operation: handle.to_string(),
        })?;

        let poller = Poller {
            config: &self.wait,
            clock: self.clock.as_ref(),
            cancel: &self.cancel,
            patterns: &self.patterns,
            reporter: self.reporter.as_ref(),
        };
        poller.wait(ctx, source, handle)
    }

    /// [`ensure_exists`](Self::ensure_exists) followed by a wait on any
    /// operation it started. A finished operation resolves to `Created`.
    pub fn ensure(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Ensured> {
        match self.ensure_exists(ctx, desc)? {
            CreationOutcome::CreatedAsync(handle) => {
                let report = self.wait(ctx, desc.kind, &handle)?;
                Ok(Ensured {
                    outcome: CreationOutcome::Created,
                    warnings: report.warnings,
                })
            }
            outcome => Ok(Ensured {
                outcome,
                warnings: Vec::new(),
            }),
        }
    }

    /// Replace a secret value; see [`secret::put_secret`].
    pub fn put_secret(
        &self,
        ctx: &Context,
        store: &dyn SecretStore,
        record: &SecretRecord,
    ) -> Result<PutReport> {
        secret::put_secret(store, ctx, record, &self.patterns, self.reporter.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::exec::{ExecutionError, Status};
    use crate::testing::{FakeClock, MemorySecretStore, ScriptedDriver, ScriptedOperations};
    use crate::types::{
        OperationFailure, OperationScope, OperationStatus, OperationWarning, PutOutcome,
    };
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new("go-microservice-app-449402")
    }

    fn provisioner(kind: ResourceKind, driver: Arc<dyn Driver>) -> (Provisioner, Arc<FakeClock>) {
        let mut registry = Registry::new();
        registry.register(kind, driver);
        let clock = Arc::new(FakeClock::new());
        let p = Provisioner::new(registry).with_clock(clock.clone());
        (p, clock)
    }

    #[test]
    fn test_second_ensure_is_a_no_op() {
        let driver = Arc::new(ScriptedDriver::new());
        let (p, _) = provisioner(ResourceKind::ServiceAccount, driver.clone());
        let desc =
            ResourceDescriptor::new(ResourceKind::ServiceAccount, "terraform-service-account");

        assert_eq!(p.ensure_exists(&ctx(), &desc).unwrap(), CreationOutcome::Created);
        assert_eq!(
            p.ensure_exists(&ctx(), &desc).unwrap(),
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe
            }
        );
        assert_eq!(driver.create_calls(), 1);
    }

    #[test]
    fn test_repeat_firewall_rule_makes_no_create_call() {
        let driver = Arc::new(ScriptedDriver::new().present());
        let (p, _) = provisioner(ResourceKind::FirewallRule, driver.clone());
        let desc = ResourceDescriptor::new(ResourceKind::FirewallRule, "custom-allow-ssh");

        let outcome = p.ensure_exists(&ctx(), &desc).unwrap();
        assert_eq!(
            outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe
            }
        );
        assert!(!outcome.is_change());
        assert_eq!(driver.create_calls(), 0);
    }

    #[test]
    fn test_conflict_on_create_is_tolerated() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.create_err(ExecutionError {
            command: "gcloud artifacts repositories create go-microservices-repo".into(),
            status: Status::Exit(1),
            stderr: "ERROR: (gcloud.artifacts.repositories.create) ALREADY_EXISTS: the repository already exists".into(),
        });
        let (p, _) = provisioner(ResourceKind::ArtifactRepository, driver.clone());
        let desc =
            ResourceDescriptor::new(ResourceKind::ArtifactRepository, "go-microservices-repo");

        assert_eq!(
            p.ensure_exists(&ctx(), &desc).unwrap(),
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict
            }
        );
    }

    #[test]
    fn test_without_lookup_goes_straight_to_create() {
        let driver = Arc::new(ScriptedDriver::without_lookup());
        let (p, _) = provisioner(ResourceKind::FirewallRule, driver.clone());
        let desc = ResourceDescriptor::new(ResourceKind::FirewallRule, "custom-allow-icmp");

        assert_eq!(p.ensure_exists(&ctx(), &desc).unwrap(), CreationOutcome::Created);
        assert_eq!(
            p.ensure_exists(&ctx(), &desc).unwrap(),
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict
            }
        );
        assert_eq!(driver.describe_calls(), 0);
        assert_eq!(driver.create_calls(), 2);
    }

    #[test]
    fn test_ambiguous_probe_prevents_create() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.describe_err(ExecutionError {
            command: "gcloud iam service-accounts describe".into(),
            status: Status::Exit(1),
            stderr: "ERROR: There was a problem refreshing your current auth tokens".into(),
        });
        let (p, _) = provisioner(ResourceKind::ServiceAccount, driver.clone());
        let desc =
            ResourceDescriptor::new(ResourceKind::ServiceAccount, "terraform-service-account");

        let err = p.ensure_exists(&ctx(), &desc).unwrap_err();
        assert!(matches!(err, Error::Probe { .. }));
        assert_eq!(driver.create_calls(), 0);
    }

    #[test]
    fn test_other_create_failure_is_creation_error() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.create_err(ExecutionError {
            command: "gcloud compute routers create nat-router".into(),
            status: Status::Exit(1),
            stderr: "ERROR: Invalid value for field 'resource.network'".into(),
        });
        let (p, _) = provisioner(ResourceKind::Router, driver.clone());
        let desc = ResourceDescriptor::new(ResourceKind::Router, "nat-router");

        match p.ensure_exists(&ctx(), &desc).unwrap_err() {
            Error::Creation { kind, name, source } => {
                assert_eq!(kind, ResourceKind::Router);
                assert_eq!(name, "nat-router");
                assert!(source.to_string().contains("Invalid value"));
            }
            other => panic!("expected creation error, got {other}"),
        }
        assert_eq!(driver.create_calls(), 1);
    }

    #[test]
    fn test_network_created_through_global_operation() {
        let ops = Arc::new(ScriptedOperations::new());
        ops.push(OperationStatus::pending());
        ops.push(OperationStatus::done());
        let driver = Arc::new(ScriptedDriver::new().with_operations(ops.clone()));
        driver.create_async(OperationHandle::global("operation-1700000000000-abc"));
        let (p, clock) = provisioner(ResourceKind::Network, driver.clone());
        let desc = ResourceDescriptor::new(ResourceKind::Network, "custom-vpc-network");

        let ensured = p.ensure(&ctx(), &desc).unwrap();
        assert_eq!(ensured.outcome, CreationOutcome::Created);
        assert!(ensured.warnings.is_empty());
        assert_eq!(ops.reads(), 2);
        assert!(ops.handles().iter().all(|h| h.scope == OperationScope::Global));
        assert_eq!(clock.now(), Duration::from_secs(10));
        assert_eq!(driver.create_calls(), 1);
    }

    #[test]
    fn test_ensure_exists_leaves_operation_to_caller() {
        let ops = Arc::new(ScriptedOperations::new());
        let driver = Arc::new(ScriptedDriver::new().with_operations(ops.clone()));
        driver.create_async(OperationHandle::regional("op-sub", "us-central1"));
        let (p, _) = provisioner(ResourceKind::Subnetwork, driver);
        let desc = ResourceDescriptor::new(ResourceKind::Subnetwork, "custom-subnetwork")
            .in_region("us-central1");

        let outcome = p.ensure_exists(&ctx(), &desc).unwrap();
        assert!(matches!(
            outcome,
            CreationOutcome::CreatedAsync(ref h)
                if h.scope == OperationScope::Regional("us-central1".into())
        ));
        assert_eq!(ops.reads(), 0);
    }

    #[test]
    fn test_operation_failure_propagates_from_ensure() {
        let ops = Arc::new(ScriptedOperations::new());
        ops.push(
            OperationStatus::failed(OperationFailure::single(
                "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE",
                "subnet range overlaps",
            ))
            .with_warning(OperationWarning::new("NEXT_HOP_NOT_RUNNING", "route warning")),
        );
        let driver = Arc::new(ScriptedDriver::new().with_operations(ops));
        driver.create_async(OperationHandle::regional("op-sub", "us-central1"));
        let (p, _) = provisioner(ResourceKind::Subnetwork, driver);
        let desc = ResourceDescriptor::new(ResourceKind::Subnetwork, "custom-subnetwork");

        match p.ensure(&ctx(), &desc).unwrap_err() {
            Error::Operation {
                failure, warnings, ..
            } => {
                assert_eq!(failure.errors[0].code, "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE");
                assert_eq!(warnings[0].code, "NEXT_HOP_NOT_RUNNING");
            }
            other => panic!("expected operation error, got {other}"),
        }
    }

    #[test]
    fn test_warnings_on_success_are_returned() {
        let ops = Arc::new(ScriptedOperations::new());
        ops.push(
            OperationStatus::done()
                .with_warning(OperationWarning::new("FIELD_VALUE_OVERRIDEN", "mtu defaulted")),
        );
        let driver = Arc::new(ScriptedDriver::new().with_operations(ops));
        driver.create_async(OperationHandle::global("op-net"));
        let (p, _) = provisioner(ResourceKind::Network, driver);
        let desc = ResourceDescriptor::new(ResourceKind::Network, "custom-vpc-network");

        let ensured = p.ensure(&ctx(), &desc).unwrap();
        assert_eq!(ensured.warnings.len(), 1);
    }

    #[test]
    fn test_async_create_without_operation_source() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.create_async(OperationHandle::global("op-net"));
        let (p, _) = provisioner(ResourceKind::Network, driver);
        let desc = ResourceDescriptor::new(ResourceKind::Network, "custom-vpc-network");

        assert!(matches!(
            p.ensure(&ctx(), &desc).unwrap_err(),
            Error::Unpollable { .. }
        ));
    }

    #[test]
    fn test_unregistered_kind() {
        let p = Provisioner::new(Registry::new());
        let desc = ResourceDescriptor::new(ResourceKind::Namespace, "monitoring");
        assert!(matches!(
            p.ensure_exists(&ctx(), &desc).unwrap_err(),
            Error::UnsupportedKind(ResourceKind::Namespace)
        ));
    }

    #[test]
    fn test_exists_reports_without_creating() {
        let driver = Arc::new(ScriptedDriver::new());
        let (p, _) = provisioner(ResourceKind::Namespace, driver.clone());
        let desc = ResourceDescriptor::new(ResourceKind::Namespace, "monitoring");
        assert_eq!(p.exists(&ctx(), &desc).unwrap(), Some(false));
        assert_eq!(driver.create_calls(), 0);
    }

    #[test]
    fn test_put_secret_through_provisioner() {
        let p = Provisioner::new(Registry::new());
        let store = MemorySecretStore::new().with_secret("postgres-password", b"oldpw");
        let report = p
            .put_secret(&ctx(), &store, &SecretRecord::new("postgres-password", "newpw"))
            .unwrap();
        assert_eq!(report.outcome, PutOutcome::Replaced);
        assert!(store.staged_paths().iter().all(|path| !path.exists()));
    }
}
