pub mod apply;
pub mod config;
pub mod doctor;
pub mod mesh;
pub mod plan;
pub mod secrets;

use anyhow::{Context as _, Result};
use std::env::VarError;
use std::path::PathBuf;

use crate::Context;
use crate::config::GkforgeConfig;
use crate::engine::Runtime;
use crate::paths;
use crate::ui;

/// Read a variable from the process environment.
pub fn process_env(key: &str) -> Option<String> {
    env_value(key, std::env::var(key))
}

/// A variable that is set but not UTF-8 is warned about, not silently unset.
fn env_value(key: &str, value: Result<String, VarError>) -> Option<String> {
    match value {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(_)) => {
            ui::warn(&format!("${key} is set but is not valid UTF-8; ignoring it"));
            None
        }
    }
}

/// The config file with environment and command-line overrides applied,
/// not yet validated.
pub fn effective_config(ctx: &Context) -> Result<(GkforgeConfig, PathBuf)> {
    let path = paths::config_file(ctx.config_path.as_deref())?;
    let mut config = GkforgeConfig::load(&path)?;
    config.apply_env(process_env);
    if let Some(project) = &ctx.project {
        config.project = Some(project.clone());
    }
    Ok((config, path))
}

/// [`effective_config`], rejected if invalid.
pub fn load_config(ctx: &Context) -> Result<(GkforgeConfig, PathBuf)> {
    let (config, path) = effective_config(ctx)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration ({})", path.display()))?;
    Ok((config, path))
}

/// Runtime for the configured project, animating only on a terminal.
pub fn runtime(ctx: &Context, config: &GkforgeConfig) -> Result<Runtime> {
    let project = config.project()?;
    let animate = !ctx.quiet && console::Term::stdout().is_term();
    Ok(Runtime::new(config, project, animate))
}
