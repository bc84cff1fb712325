use anyhow::Result;
use colored::Colorize;

use super::{load_config, process_env, runtime};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, ExecuteOptions};
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let (config, path) = load_config(ctx)?;
    let project = config.project()?;
    let plans = engine::plan(&config, project, &args.stages);

    ui::header(&format!("Provisioning {project}"));
    ui::kv("Config", &path.display().to_string());
    ui::kv("Region", &config.region);
    println!();
    for plan in &plans {
        ui::kv(plan.stage.title(), &ui::count(plan.steps.len(), "step"));
    }
    println!();

    let opts = ExecuteOptions { yes: args.yes };
    if !engine::confirm_proceed(&opts)? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let rt = runtime(ctx, &config)?;
    let summary = engine::execute(&rt, &plans, &process_env)?;
    engine::print_summary(&summary);
    Ok(())
}
