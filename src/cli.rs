use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::engine::Stage;

#[derive(Parser)]
#[command(name = "gkforge")]
#[command(version)]
#[command(about = "Provision a GKE project's supporting infrastructure, idempotently", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/gkforge/gkforge.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Google Cloud project to provision
    #[arg(long, global = true, env = "GKFORGE_PROJECT")]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create whatever is missing, stage by stage
    Apply(ApplyArgs),

    /// Show what exists without changing anything
    Plan(PlanArgs),

    /// Manage Secret Manager secrets
    #[command(subcommand)]
    Secrets(SecretsCommand),

    /// Manage the Istio service mesh
    #[command(subcommand)]
    Mesh(MeshCommand),

    /// Check that the required tools and credentials are available
    Doctor,

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Only run these stages (repeatable; all when omitted)
    #[arg(long = "stage", value_enum)]
    pub stages: Vec<Stage>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Only probe these stages (repeatable; all when omitted)
    #[arg(long = "stage", value_enum)]
    pub stages: Vec<Stage>,
}

// ============================================================================
// Secrets Commands
// ============================================================================

#[derive(Subcommand)]
pub enum SecretsCommand {
    /// Create or replace one secret
    Put(SecretPutArgs),
}

#[derive(Debug, Args)]
#[command(group = clap::ArgGroup::new("source").required(true).args(["from_env", "from_file"]))]
pub struct SecretPutArgs {
    /// Secret name
    pub name: String,

    /// Read the value from this environment variable
    #[arg(long, value_name = "VAR")]
    pub from_env: Option<String>,

    /// Read the value from this file, byte for byte
    #[arg(long, value_name = "PATH")]
    pub from_file: Option<PathBuf>,

    /// Replace an existing secret without asking
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Mesh Commands
// ============================================================================

#[derive(Subcommand)]
pub enum MeshCommand {
    /// Remove the mesh releases, namespace and injection label
    Uninstall {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
