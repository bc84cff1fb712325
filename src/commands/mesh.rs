//! Service mesh teardown.
//!
//! Best effort: every step runs even if an earlier one failed, and a step
//! whose target is already gone counts as done.

use anyhow::{Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use provision::{CommandSpec, Patterns, Runner, SystemRunner};

use super::load_config;
use crate::Context;
use crate::config::MeshConfig;
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Removed,
    AlreadyGone,
    Failed,
}

pub fn uninstall(ctx: &Context, yes: bool) -> Result<()> {
    let (config, _) = load_config(ctx)?;
    let mesh = &config.mesh;

    ui::header("Uninstall Service Mesh");
    ui::kv("Namespace", &mesh.namespace);
    ui::kv("Injection label", &mesh.app_namespace);
    println!();

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Remove the mesh from the cluster?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let results = run_teardown(&SystemRunner, &config.patterns(), mesh);
    let failed = results.iter().filter(|r| **r == Teardown::Failed).count();

    println!();
    if failed > 0 {
        bail!("{} failed; see above", ui::count(failed, "teardown step"));
    }
    ui::success("Service mesh removed");
    Ok(())
}

/// Releases in reverse install order, then the namespace, then the label.
fn teardown_steps(mesh: &MeshConfig) -> Vec<(String, CommandSpec)> {
    let mut steps: Vec<(String, CommandSpec)> = ["istio-ingress", "istiod", "istio-base"]
        .into_iter()
        .map(|release| {
            (
                format!("helm release '{release}'"),
                CommandSpec::new("helm")
                    .args(["uninstall", release])
                    .flag("-n", mesh.namespace.as_str()),
            )
        })
        .collect();

    steps.push((
        format!("namespace '{}'", mesh.namespace),
        CommandSpec::new("kubectl").args(["delete", "namespace", mesh.namespace.as_str()]),
    ));
    steps.push((
        format!("sidecar injection label on '{}'", mesh.app_namespace),
        CommandSpec::new("kubectl").args([
            "label",
            "namespace",
            mesh.app_namespace.as_str(),
            "istio-injection-",
        ]),
    ));
    steps
}

fn run_teardown(runner: &dyn Runner, patterns: &Patterns, mesh: &MeshConfig) -> Vec<Teardown> {
    teardown_steps(mesh)
        .into_iter()
        .map(|(label, spec)| match runner.execute(&spec) {
            Ok(_) => {
                println!("  {} {label} removed", "✓".green());
                Teardown::Removed
            }
            Err(e) if e.execution().is_some_and(|x| patterns.is_not_found(x)) => {
                println!("  {} {label} already gone", "○".dimmed());
                Teardown::AlreadyGone
            }
            Err(e) => {
                log::debug!("{spec} failed: {e}");
                println!(
                    "  {} {label}: {}",
                    "✗".red(),
                    ui::first_line(&e.to_string(), 100)
                );
                Teardown::Failed
            }
        })
        .collect()
}
