//! Execution engine for gkforge
//!
//! The engine orchestrates:
//! 1. Planning - Turn the config into ordered stages of steps
//! 2. Probing - Report what already exists without changing anything
//! 3. Executing - Ensure resources, replace secrets, run add-on commands

pub mod executor;
pub mod planner;

pub use executor::{
    ExecuteOptions, ExecuteSummary, ProbeState, ProbedStep, confirm_proceed, execute, print_summary,
    probe,
};
pub use planner::{Stage, StagePlan, Step, plan};

use anyhow::{Context as _, Result, bail};
use provision::{Clock, Provisioner, Runner, SecretRecord, SecretStore, SystemRunner};
use std::sync::Arc;

use crate::api::{ApiClient, Transport, UreqTransport};
use crate::auth::{GcloudTokens, TokenSource};
use crate::config::{GkforgeConfig, SecretConfig};
use crate::drivers::{self, secrets::GcloudSecretStore};
use crate::paths;
use crate::progress::TerminalReporter;

/// Everything a run needs to talk to the cloud, built once per command.
pub struct Runtime {
    pub ctx: provision::Context,
    pub runner: Arc<dyn Runner>,
    pub provisioner: Provisioner,
    pub secrets: Arc<dyn SecretStore>,
    pub reporter: Arc<TerminalReporter>,
}

impl Runtime {
    /// Runtime backed by real processes and HTTP.
    pub fn new(config: &GkforgeConfig, project: &str, animate: bool) -> Self {
        let runner: Arc<dyn Runner> = Arc::new(SystemRunner);
        let tokens: Arc<dyn TokenSource> = Arc::new(GcloudTokens::new(runner.clone()));
        Self::with_parts(
            config,
            project,
            runner,
            Arc::new(UreqTransport::new()),
            tokens,
            Arc::new(TerminalReporter::new(animate)),
        )
    }

    pub fn with_parts(
        config: &GkforgeConfig,
        project: &str,
        runner: Arc<dyn Runner>,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
        reporter: Arc<TerminalReporter>,
    ) -> Self {
        let api = ApiClient::new(transport, tokens);
        let provisioner = Provisioner::new(drivers::build_registry(&runner, &api))
            .with_patterns(config.patterns())
            .with_wait(config.wait_config())
            .with_reporter(reporter.clone());

        Self {
            ctx: provision::Context::new(project).with_identity(config.auth.identity()),
            secrets: Arc::new(GcloudSecretStore::new(runner.clone())),
            runner,
            provisioner,
            reporter,
        }
    }

    /// Swap the clock the poller sleeps on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.provisioner = self.provisioner.with_clock(clock);
        self
    }
}

/// Read a secret's value from its configured source.
pub fn resolve_secret(
    secret: &SecretConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<SecretRecord> {
    let value: Vec<u8> = match (&secret.env, &secret.file) {
        (Some(var), None) => env(var)
            .with_context(|| {
                format!(
                    "Secret '{}' reads ${var}, which is not set",
                    secret.name
                )
            })?
            .into_bytes(),
        (None, Some(file)) => {
            let path = paths::expand(&file.to_string_lossy());
            std::fs::read(&path).with_context(|| {
                format!(
                    "Secret '{}' could not read {}",
                    secret.name,
                    path.display()
                )
            })?
        }
        _ => bail!(
            "Secret '{}' needs exactly one of `env` or `file`",
            secret.name
        ),
    };

    if value.is_empty() {
        bail!("Secret '{}' has an empty value", secret.name);
    }
    Ok(SecretRecord::new(&secret.name, value))
}
