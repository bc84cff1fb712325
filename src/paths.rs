//! Path resolution for gkforge
//!
//! # Environment Variables
//!
//! - `GKFORGE_CONFIG_DIR` - Override config directory (e.g., `~/infra/gkforge`)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `GKFORGE_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/gkforge` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\gkforge`
//!    - macOS/Linux: `~/.config/gkforge`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "GKFORGE_CONFIG_DIR";

/// Name of the config file inside the config directory
pub const CONFIG_FILE: &str = "gkforge.toml";

/// Get the gkforge config directory path
pub fn config_dir() -> Result<PathBuf> {
    config_dir_with(|key| std::env::var(key).ok())
}

/// [`config_dir`] with an explicit environment lookup.
pub fn config_dir_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Some(dir) = env(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    // 2. Check XDG_CONFIG_HOME
    if let Some(xdg_config) = env("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("gkforge");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. Platform default
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("gkforge");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("gkforge");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Path of the config file: `explicit` when given, else the default location.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(CONFIG_FILE)),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
