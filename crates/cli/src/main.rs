mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use buckle_lib::graph::RecursiveDependenciesMode;
use buckle_lib::target::BuildTarget;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::GlobalOpts;
use crate::output::OutputFormat;

/// buckle - incremental build-rule dependency engine
#[derive(Parser)]
#[command(name = "buckle")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  format: OutputFormat,

  /// Project root (default: current directory)
  #[arg(long, global = true)]
  project_root: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List the targets of a manifest in dependency order
  Targets {
    /// Path to the target graph manifest
    manifest: PathBuf,
  },

  /// Print the transitive dependencies of a target
  Deps {
    /// Path to the target graph manifest
    manifest: PathBuf,

    /// Target to start from
    target: BuildTarget,

    /// Which edges to follow
    #[arg(long, default_value = "building")]
    mode: RecursiveDependenciesMode,

    /// Only report nodes of these rule types
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,

    /// Compute direct dependencies without the shared cache
    #[arg(long)]
    no_cache: bool,
  },

  /// Print the rule key of a target
  Rulekey {
    /// Path to the target graph manifest
    manifest: PathBuf,

    /// Target whose rule key to compute
    target: BuildTarget,
  },

  /// Build targets, skipping rules whose rule key has not changed
  Build {
    /// Path to the target graph manifest
    manifest: PathBuf,

    /// Targets to build
    #[arg(required = true)]
    targets: Vec<BuildTarget>,

    /// Number of rules to run in parallel
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print what would run without running it
    #[arg(long)]
    dry_run: bool,
  },

  /// Inspect or clear stored build metadata
  Metadata {
    /// Target whose metadata to show
    target: BuildTarget,

    /// Show a single key
    #[arg(short, long)]
    key: Option<String>,

    /// Delete all metadata for the target
    #[arg(long, conflicts_with = "key")]
    delete: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let project_root = match cli.project_root {
    Some(root) => root,
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let opts = GlobalOpts {
    project_root,
    format: cli.format,
  };

  match cli.command {
    Commands::Targets { manifest } => cmd::cmd_targets(&opts, &manifest),
    Commands::Deps {
      manifest,
      target,
      mode,
      types,
      no_cache,
    } => cmd::cmd_deps(&opts, &manifest, &target, mode, &types, no_cache),
    Commands::Rulekey { manifest, target } => cmd::cmd_rulekey(&opts, &manifest, &target),
    Commands::Build {
      manifest,
      targets,
      jobs,
      dry_run,
    } => cmd::cmd_build(&opts, &manifest, &targets, jobs, dry_run),
    Commands::Metadata { target, key, delete } => cmd::cmd_metadata(&opts, &target, key.as_deref(), delete),
  }
}
