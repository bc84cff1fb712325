//! Execution engine - runs planned stages against the project

use anyhow::{Context as _, Result};
use colored::Colorize;
use provision::{CreationOutcome, Error, PutOutcome, SecretRecord};

use super::planner::{Stage, StagePlan, Step};
use super::{Runtime, resolve_secret};
use crate::ui;

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Skip confirmation prompts
    pub yes: bool,
}

/// Summary of execution results
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub present: usize,
    pub created: usize,
    pub secrets_created: usize,
    pub secrets_replaced: usize,
    pub commands: usize,
    pub skipped: usize,
    pub warnings: usize,
    /// Secrets whose old version could not be deleted before recreation
    pub deletion_failures: usize,
}

impl ExecuteSummary {
    pub fn total_changes(&self) -> usize {
        self.created + self.secrets_created + self.secrets_replaced
    }
}

/// Existence of one step's target, as seen by [`probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Present,
    Absent,
    /// The kind has no lookup; apply will create and tolerate a conflict
    Unchecked,
    /// A command that runs on every apply
    WillRun,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedStep {
    pub stage: Stage,
    pub label: String,
    pub state: ProbeState,
}

/// Look up every planned resource without changing anything.
pub fn probe(runtime: &Runtime, plans: &[StagePlan]) -> Vec<ProbedStep> {
    let mut probed = Vec::new();
    for plan in plans {
        for step in &plan.steps {
            let state = match step {
                Step::Ensure(desc) => match runtime.provisioner.exists(&runtime.ctx, desc) {
                    Ok(Some(true)) => ProbeState::Present,
                    Ok(Some(false)) => ProbeState::Absent,
                    Ok(None) => ProbeState::Unchecked,
                    Err(e) => ProbeState::Failed(e.to_string()),
                },
                Step::Secret(secret) => probe_secret(runtime, &secret.name),
                Step::Run { .. } => ProbeState::WillRun,
                Step::Skip { reason, .. } => ProbeState::Skipped(reason.clone()),
            };
            probed.push(ProbedStep {
                stage: plan.stage,
                label: step.label(),
                state,
            });
        }
    }
    probed
}

fn probe_secret(runtime: &Runtime, name: &str) -> ProbeState {
    match runtime.secrets.describe(&runtime.ctx, name) {
        Ok(()) => ProbeState::Present,
        Err(e) => match e.execution() {
            Some(x) if runtime.provisioner.patterns().is_not_found(x) => ProbeState::Absent,
            _ => ProbeState::Failed(e.to_string()),
        },
    }
}

/// Apply `plans` in order, stopping at the first failure.
///
/// Secret values are read before anything runs, so a missing variable or
/// file fails the whole run up front.
pub fn execute(
    runtime: &Runtime,
    plans: &[StagePlan],
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ExecuteSummary> {
    let mut secrets = Vec::new();
    for step in plans.iter().flat_map(|p| &p.steps) {
        if let Step::Secret(secret) = step {
            secrets.push(resolve_secret(secret, env)?);
        }
    }
    let mut secrets = secrets.into_iter();

    let mut summary = ExecuteSummary::default();
    let total = plans.len();

    for (i, plan) in plans.iter().enumerate() {
        println!();
        ui::step(i + 1, total, plan.stage.title());

        for step in &plan.steps {
            run_step(runtime, step, &mut secrets, &mut summary).with_context(|| {
                format!("Stage '{}' failed at {}", plan.stage.title(), step.label())
            })?;
        }
    }

    runtime.reporter.clear();
    Ok(summary)
}

fn run_step(
    runtime: &Runtime,
    step: &Step,
    secrets: &mut impl Iterator<Item = SecretRecord>,
    summary: &mut ExecuteSummary,
) -> Result<()> {
    let ctx = &runtime.ctx;
    match step {
        Step::Ensure(desc) => match runtime.provisioner.ensure_exists(ctx, desc)? {
            CreationOutcome::AlreadyPresent { .. } => summary.present += 1,
            CreationOutcome::Created => summary.created += 1,
            CreationOutcome::CreatedAsync(handle) => {
                let report = runtime.provisioner.wait(ctx, desc.kind, &handle)?;
                runtime.reporter.clear();
                println!(
                    "  {} {} ready {}",
                    "✓".green(),
                    desc.label(),
                    format!("({} checks)", report.polls).dimmed()
                );
                summary.created += 1;
                summary.warnings += report.warnings.len();
            }
        },
        Step::Secret(secret) => {
            let record = secrets
                .next()
                .filter(|r| r.name == secret.name)
                .ok_or_else(|| Error::Other(format!("no value staged for '{}'", secret.name)))?;
            let report = runtime
                .provisioner
                .put_secret(ctx, runtime.secrets.as_ref(), &record)?;
            match report.outcome {
                PutOutcome::Created => summary.secrets_created += 1,
                PutOutcome::Replaced => summary.secrets_replaced += 1,
            }
            if report.deletion_failure.is_some() {
                summary.deletion_failures += 1;
            }
        }
        Step::Run { label, spec } => {
            runtime.runner.execute(spec)?;
            println!("  {} {label}", "✓".green());
            summary.commands += 1;
        }
        Step::Skip { label, reason } => {
            println!("  {} {label}: {}", "⊘".dimmed(), reason.dimmed());
            summary.skipped += 1;
        }
    }
    Ok(())
}

/// Confirm with user
pub fn confirm_proceed(opts: &ExecuteOptions) -> Result<bool> {
    use dialoguer::Confirm;

    if opts.yes {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.deletion_failures == 0 {
        println!("  {} Infrastructure is in place", "✓".green().bold());
    } else {
        println!(
            "  {} Infrastructure is in place, with secret cleanup failures",
            "⚠".yellow().bold()
        );
    }

    if summary.total_changes() == 0 {
        println!("    • no changes needed");
    }
    if summary.created > 0 {
        println!("    • {} created", ui::count(summary.created, "resource"));
    }
    if summary.present > 0 {
        println!("    • {} already present", ui::count(summary.present, "resource"));
    }
    if summary.secrets_created > 0 {
        println!("    • {} created", ui::count(summary.secrets_created, "secret"));
    }
    if summary.secrets_replaced > 0 {
        println!("    • {} replaced", ui::count(summary.secrets_replaced, "secret"));
    }
    if summary.commands > 0 {
        println!("    • {} run", ui::count(summary.commands, "command"));
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", ui::count(summary.skipped, "step"));
    }
    if summary.warnings > 0 {
        println!(
            "    • {} reported by operations",
            ui::count(summary.warnings, "warning").yellow()
        );
    }
    if summary.deletion_failures > 0 {
        println!(
            "    • {} could not be deleted before recreation",
            ui::count(summary.deletion_failures, "old secret").red()
        );
    }
}
