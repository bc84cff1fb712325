//! Per-kind drivers: the pluggable strategy that knows how to look up and
//! create one kind of resource.
//!
//! The generic algorithms (probe, ensure, wait, replace) only talk to these
//! traits. Adding a resource kind means writing a [`CommandBuilder`] (or a
//! full [`Driver`] for API-backed kinds) and registering it; the state
//! machine does not change.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::{CommandSpec, Runner};
use crate::types::{OperationHandle, OperationStatus, ResourceDescriptor, ResourceKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reads the status of long-running operations.
pub trait OperationSource: Send + Sync {
    /// One fresh read of the operation's status.
    fn status(&self, ctx: &Context, handle: &OperationHandle) -> Result<OperationStatus>;
}

/// Looks up and creates resources of one or more kinds.
pub trait Driver: Send + Sync {
    /// Whether a cheap existence lookup is available for this descriptor.
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        true
    }

    /// Look the resource up. `Ok` means it exists; a "not found" is an
    /// [`Error::Execution`] the prober classifies.
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<()>;

    /// Issue the create request. Asynchronous kinds return the handle of
    /// the operation doing the work.
    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<OperationHandle>>;

    /// Where handles returned by [`create`](Driver::create) are polled.
    fn operations(&self) -> Option<&dyn OperationSource> {
        None
    }
}

/// Builds the commands for a CLI-backed kind.
pub trait CommandBuilder: Send + Sync {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        true
    }

    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec>;

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec>;
}

/// A [`Driver`] that runs the commands a [`CommandBuilder`] produces.
pub struct CommandDriver<B> {
    runner: Arc<dyn Runner>,
    builder: B,
}

impl<B: CommandBuilder> CommandDriver<B> {
    pub fn new(runner: Arc<dyn Runner>, builder: B) -> Self {
        Self { runner, builder }
    }
}

impl<B: CommandBuilder> Driver for CommandDriver<B> {
    fn has_lookup(&self, desc: &ResourceDescriptor) -> bool {
        self.builder.has_lookup(desc)
    }

    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<()> {
        let spec = self.builder.describe(ctx, desc)?;
        self.runner.execute(&spec)?;
        Ok(())
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<OperationHandle>> {
        let spec = self.builder.create(ctx, desc)?;
        self.runner.execute(&spec)?;
        Ok(None)
    }
}

/// Drivers keyed by resource kind.
#[derive(Default)]
pub struct Registry {
    drivers: BTreeMap<ResourceKind, Arc<dyn Driver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver for a kind, replacing any previous one.
    pub fn register(&mut self, kind: ResourceKind, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(kind, driver);
        self
    }

    /// Register one driver for several kinds.
    pub fn register_all(
        &mut self,
        kinds: &[ResourceKind],
        driver: Arc<dyn Driver>,
    ) -> &mut Self {
        for kind in kinds {
            self.drivers.insert(*kind, Arc::clone(&driver));
        }
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&dyn Driver> {
        self.drivers
            .get(&kind)
            .map(|d| &**d)
            .ok_or(Error::UnsupportedKind(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.drivers.keys().copied()
    }
}
