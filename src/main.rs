mod api;
mod auth;
mod cli;
mod commands;
mod config;
mod drivers;
mod engine;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, ConfigCommand, MeshCommand, SecretsCommand};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
    pub project: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config_path: cli.config,
        project: cli.project,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Secrets(SecretsCommand::Put(args)) => commands::secrets::put(&ctx, &args),
        Command::Mesh(MeshCommand::Uninstall { yes }) => commands::mesh::uninstall(&ctx, yes),
        Command::Doctor => commands::doctor::run(&ctx),
        Command::Config(cmd) => match cmd {
            ConfigCommand::Show => commands::config::show(&ctx),
            ConfigCommand::Init { force } => commands::config::init(&ctx, force),
        },
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "gkforge", &mut io::stdout());
            Ok(())
        }
    }
}
