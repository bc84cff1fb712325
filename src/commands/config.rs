use anyhow::{Context as _, Result, bail};
use std::path::Path;

use super::effective_config;
use crate::Context;
use crate::config::GkforgeConfig;
use crate::paths;
use crate::ui;

/// Print the effective configuration and where it came from.
pub fn show(ctx: &Context) -> Result<()> {
    let (config, path) = effective_config(ctx)?;

    ui::header("Configuration");
    ui::kv("Config file", &path.display().to_string());
    if !path.exists() {
        ui::dim("Not found; showing defaults. Run 'gkforge config init' to write them.");
    }
    match config.validate() {
        Ok(()) => ui::kv("Status", "valid"),
        Err(e) => ui::kv("Status", &format!("invalid: {e:#}")),
    }
    println!();

    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{rendered}");
    Ok(())
}

/// Write the default configuration file.
pub fn init(ctx: &Context, force: bool) -> Result<()> {
    let path = paths::config_file(ctx.config_path.as_deref())?;
    write_defaults(&path, force)?;
    ui::success(&format!("Wrote {}", path.display()));
    ui::dim("Set `project` and review the workload identity and secrets sections.");
    Ok(())
}

fn write_defaults(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Pass --force to overwrite it",
            path.display()
        );
    }
    GkforgeConfig::default().save(path)
}
