use anyhow::{Result, bail};
use colored::Colorize;

use super::{load_config, runtime};
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::{self, ProbeState, ProbedStep, Stage};
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let (config, _) = load_config(ctx)?;
    let project = config.project()?;
    let plans = engine::plan(&config, project, &args.stages);

    ui::header(&format!("Plan for {project}"));
    let rt = runtime(ctx, &config)?;
    let probed = engine::probe(&rt, &plans);

    let mut current: Option<Stage> = None;
    for step in &probed {
        if current != Some(step.stage) {
            ui::section(step.stage.title());
            current = Some(step.stage);
        }
        println!("{}", render(step, ctx.verbose > 0));
    }

    let missing = count(&probed, |s| matches!(s, ProbeState::Absent | ProbeState::Unchecked));
    let failed = count(&probed, |s| matches!(s, ProbeState::Failed(_)));

    println!();
    ui::kv("Present", &count(&probed, |s| *s == ProbeState::Present).to_string());
    ui::kv("To create", &missing.to_string());
    ui::kv("Commands", &count(&probed, |s| *s == ProbeState::WillRun).to_string());

    if missing == 0 && failed == 0 {
        ui::info("Nothing to create");
    }
    if failed > 0 {
        bail!("{} could not be checked", ui::count(failed, "resource"));
    }
    Ok(())
}

fn count(probed: &[ProbedStep], pred: impl Fn(&ProbeState) -> bool) -> usize {
    probed.iter().filter(|p| pred(&p.state)).count()
}

fn render(step: &ProbedStep, verbose: bool) -> String {
    match &step.state {
        ProbeState::Present => format!("  {} {}", "○".dimmed(), step.label),
        ProbeState::Absent => format!("  {} {} {}", "+".green(), step.label, "(create)".green()),
        ProbeState::Unchecked => format!(
            "  {} {} {}",
            "+".cyan(),
            step.label,
            "(create, no lookup)".dimmed()
        ),
        ProbeState::WillRun => format!("  {} {}", "→".cyan(), step.label),
        ProbeState::Skipped(reason) => {
            format!("  {} {}: {}", "⊘".dimmed(), step.label, reason.dimmed())
        }
        ProbeState::Failed(error) => {
            let error = if verbose {
                error.trim().to_string()
            } else {
                ui::first_line(error, 100)
            };
            format!("  {} {} {}", "✗".red(), step.label, error.red())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probed(state: ProbeState) -> ProbedStep {
        ProbedStep {
            stage: Stage::Network,
            label: "network 'custom-vpc-network'".to_string(),
            state,
        }
    }

    #[test]
    fn test_render_marks_state() {
        colored::control::set_override(false);
        assert_eq!(
            render(&probed(ProbeState::Absent), false),
            "  + network 'custom-vpc-network' (create)"
        );
        assert_eq!(
            render(&probed(ProbeState::Failed("PERMISSION_DENIED\nmore".to_string())), false),
            "  ✗ network 'custom-vpc-network' PERMISSION_DENIED"
        );
    }

    #[test]
    fn test_count_by_state() {
        let steps = vec![
            probed(ProbeState::Present),
            probed(ProbeState::Absent),
            probed(ProbeState::Unchecked),
        ];
        assert_eq!(
            count(&steps, |s| matches!(s, ProbeState::Absent | ProbeState::Unchecked)),
            2
        );
    }
}
