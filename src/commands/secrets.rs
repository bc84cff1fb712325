use anyhow::{Context as _, Result};
use colored::Colorize;
use dialoguer::Confirm;

use super::{load_config, process_env, runtime};
use crate::Context;
use crate::cli::SecretPutArgs;
use crate::config::{self, SecretConfig};
use crate::engine::{Runtime, resolve_secret};

/// Replace one secret outside a full apply.
pub fn put(ctx: &Context, args: &SecretPutArgs) -> Result<()> {
    config::check_secret_name(&args.name)?;
    let (config, _) = load_config(ctx)?;

    let source = SecretConfig {
        name: args.name.clone(),
        env: args.from_env.clone(),
        file: args.from_file.clone(),
    };
    let record = resolve_secret(&source, &process_env)?;
    let rt = runtime(ctx, &config)?;

    if !args.yes && exists(&rt, &args.name)? {
        let replace = Confirm::new()
            .with_prompt(format!("Secret '{}' exists. Replace it?", args.name))
            .default(false)
            .interact()?;
        if !replace {
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    rt.provisioner
        .put_secret(&rt.ctx, rt.secrets.as_ref(), &record)
        .with_context(|| format!("Could not put secret '{}'", args.name))?;
    Ok(())
}

fn exists(rt: &Runtime, name: &str) -> Result<bool> {
    match rt.secrets.describe(&rt.ctx, name) {
        Ok(()) => Ok(true),
        Err(e) => {
            let patterns = rt.provisioner.patterns();
            if e.execution().is_some_and(|x| patterns.is_not_found(x)) {
                Ok(false)
            } else {
                Err(e).with_context(|| format!("Could not check secret '{name}'"))
            }
        }
    }
}
