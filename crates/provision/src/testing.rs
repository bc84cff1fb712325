//! In-memory doubles for exercising provisioning logic without a cloud.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for dependents' tests.

use crate::context::Context;
use crate::driver::{Driver, OperationSource};
use crate::error::{Error, Result};
use crate::exec::{CommandSpec, ExecutionError, ExecutionResult, Runner, Status};
use crate::poll::{CancelToken, Clock};
use crate::secret::SecretStore;
use crate::types::{OperationHandle, OperationStatus, ResourceDescriptor};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runner that replays queued results and records every command.
///
/// When the queue is empty, commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    results: Mutex<VecDeque<Result<ExecutionResult>>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result for the next command.
    pub fn push(&self, result: ExecutionResult) {
        lock(&self.results).push_back(Ok(result));
    }

    /// Queue a launch failure for the next command.
    pub fn push_launch_failure(&self) {
        let command = "scripted".to_string();
        lock(&self.results).push_back(Err(Error::Launch {
            command,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        }));
    }

    /// Rendered command lines, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(ToString::to_string).collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        lock(&self.calls).push(spec.clone());
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionResult::ok("")))
    }
}

/// Clock driven by virtual time. `sleep` advances `now` immediately.
#[derive(Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        *lock(&self.now) += duration;
        lock(&self.sleeps).push(duration);
        !cancel.is_cancelled()
    }
}

/// Operation source that replays queued statuses.
#[derive(Default)]
pub struct ScriptedOperations {
    statuses: Mutex<VecDeque<Result<OperationStatus>>>,
    fallback: Option<OperationStatus>,
    handles: Mutex<Vec<OperationHandle>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every read with the same status.
    pub fn always(status: OperationStatus) -> Self {
        Self {
            fallback: Some(status),
            ..Self::default()
        }
    }

    /// Cancel `token` once `reads` reads have been served.
    #[must_use]
    pub fn cancel_after(mut self, reads: usize, token: &CancelToken) -> Self {
        self.cancel_after = Some((reads, token.clone()));
        self
    }

    pub fn push(&self, status: OperationStatus) {
        lock(&self.statuses).push_back(Ok(status));
    }

    pub fn push_error(&self, error: ExecutionError) {
        lock(&self.statuses).push_back(Err(error.into()));
    }

    pub fn reads(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Handles passed to each read, in order.
    pub fn handles(&self) -> Vec<OperationHandle> {
        lock(&self.handles).clone()
    }
}

impl OperationSource for ScriptedOperations {
    fn status(&self, _ctx: &Context, handle: &OperationHandle) -> Result<OperationStatus> {
        let reads = {
            let mut handles = lock(&self.handles);
            handles.push(handle.clone());
            handles.len()
        };
        if let Some((after, token)) = &self.cancel_after
            && reads >= *after
        {
            token.cancel();
        }

        match lock(&self.statuses).pop_front() {
            Some(next) => next,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| Error::Other(format!("no scripted status for {handle}"))),
        }
    }
}

#[derive(Default)]
struct DriverState {
    present: bool,
    describes: VecDeque<Result<()>>,
    creates: VecDeque<Result<Option<OperationHandle>>>,
    describe_calls: usize,
    create_calls: usize,
}

/// Driver that behaves like a single remote resource.
///
/// Unscripted describes report 404 until a create succeeds; unscripted
/// creates succeed synchronously and mark the resource present.
pub struct ScriptedDriver {
    lookup: bool,
    state: Mutex<DriverState>,
    operations: Option<Arc<ScriptedOperations>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            lookup: true,
            state: Mutex::new(DriverState::default()),
            operations: None,
        }
    }

    /// A kind with no cheap existence lookup.
    pub fn without_lookup() -> Self {
        Self {
            lookup: false,
            ..Self::new()
        }
    }

    /// The resource already exists remotely.
    #[must_use]
    pub fn present(self) -> Self {
        lock(&self.state).present = true;
        self
    }

    #[must_use]
    pub fn with_operations(mut self, operations: Arc<ScriptedOperations>) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn describe_ok(&self) {
        lock(&self.state).describes.push_back(Ok(()));
    }

    pub fn describe_err(&self, error: ExecutionError) {
        lock(&self.state).describes.push_back(Err(error.into()));
    }

    pub fn describe_fail(&self, error: Error) {
        lock(&self.state).describes.push_back(Err(error));
    }

    /// The next create starts a long-running operation.
    pub fn create_async(&self, handle: OperationHandle) {
        lock(&self.state).creates.push_back(Ok(Some(handle)));
    }

    pub fn create_err(&self, error: ExecutionError) {
        lock(&self.state).creates.push_back(Err(error.into()));
    }

    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }
}

impl Driver for ScriptedDriver {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        self.lookup
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<()> {
        let mut state = lock(&self.state);
        state.describe_calls += 1;
        if let Some(next) = state.describes.pop_front() {
            return next;
        }
        if state.present {
            Ok(())
        } else {
            Err(ExecutionError {
                command: format!("describe {}", desc.name),
                status: Status::Http(404),
                stderr: format!("The resource '{}' was not found", desc.name),
            }
            .into())
        }
    }

    fn create(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<OperationHandle>> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        if let Some(next) = state.creates.pop_front() {
            if next.is_ok() {
                state.present = true;
            }
            return next;
        }
        if state.present && !self.lookup {
            return Err(ExecutionError {
                command: format!("create {}", desc.name),
                status: Status::Exit(1),
                stderr: format!("ERROR: The resource '{}' already exists", desc.name),
            }
            .into());
        }
        state.present = true;
        Ok(None)
    }

    fn operations(&self) -> Option<&dyn OperationSource> {
        self.operations
            .as_deref()
            .map(|ops| ops as &dyn OperationSource)
    }
}

#[derive(Default)]
struct StoreState {
    secrets: BTreeMap<String, Vec<u8>>,
    describe_failure: Option<ExecutionError>,
    delete_failure: Option<(ExecutionError, bool)>,
    create_failure: Option<ExecutionError>,
    staged: Vec<PathBuf>,
    log: Vec<String>,
}

/// Secret store held in memory. `create` reads the staged file, so tests
/// see exactly what was handed over.
#[derive(Default)]
pub struct MemorySecretStore {
    state: Mutex<StoreState>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(self, name: &str, value: &[u8]) -> Self {
        lock(&self.state)
            .secrets
            .insert(name.to_string(), value.to_vec());
        self
    }

    pub fn fail_describe(&self, error: ExecutionError) {
        lock(&self.state).describe_failure = Some(error);
    }

    /// Make the next delete fail. With `removed`, the secret is gone anyway
    /// (the call failed after the remote side acted).
    pub fn fail_delete(&self, error: ExecutionError, removed: bool) {
        lock(&self.state).delete_failure = Some((error, removed));
    }

    pub fn fail_create(&self, error: ExecutionError) {
        lock(&self.state).create_failure = Some(error);
    }

    pub fn value(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.state).secrets.get(name).cloned()
    }

    /// Paths handed to `create`, in order.
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        lock(&self.state).staged.clone()
    }

    /// Calls made, as "verb name".
    pub fn log(&self) -> Vec<String> {
        lock(&self.state).log.clone()
    }
}

fn secret_error(command: String, status: Status, stderr: String) -> Error {
    ExecutionError {
        command,
        status,
        stderr,
    }
    .into()
}

impl SecretStore for MemorySecretStore {
    fn describe(&self, _ctx: &Context, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.log.push(format!("describe {name}"));
        if let Some(error) = state.describe_failure.take() {
            return Err(error.into());
        }
        if state.secrets.contains_key(name) {
            Ok(())
        } else {
            Err(secret_error(
                format!("describe {name}"),
                Status::Exit(1),
                format!("NOT_FOUND: Secret [{name}] not found or has no versions."),
            ))
        }
    }

    fn delete(&self, _ctx: &Context, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.log.push(format!("delete {name}"));
        if let Some((error, removed)) = state.delete_failure.take() {
            if removed {
                state.secrets.remove(name);
            }
            return Err(error.into());
        }
        state.secrets.remove(name);
        Ok(())
    }

    fn create(&self, _ctx: &Context, name: &str, data_file: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        state.log.push(format!("create {name}"));
        state.staged.push(data_file.to_path_buf());
        if let Some(error) = state.create_failure.take() {
            return Err(error.into());
        }
        if state.secrets.contains_key(name) {
            return Err(secret_error(
                format!("create {name}"),
                Status::Exit(1),
                format!("ALREADY_EXISTS: Secret [{name}] already exists."),
            ));
        }
        let value = std::fs::read(data_file).map_err(|e| Error::Other(e.to_string()))?;
        state.secrets.insert(name.to_string(), value);
        Ok(())
    }
}
