mod build;
mod deps;
mod metadata;
mod rulekey;
mod targets;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use buckle_lib::config::EngineConfig;
use buckle_lib::description::DescriptionRegistry;
use buckle_lib::graph::TargetGraph;
use buckle_lib::graph::manifest::TargetGraphManifest;
use buckle_lib::platform::default_platforms;
use buckle_lib::rules::BuildRuleResolver;

use crate::output::OutputFormat;

pub use build::cmd_build;
pub use deps::cmd_deps;
pub use metadata::cmd_metadata;
pub use rulekey::cmd_rulekey;
pub use targets::cmd_targets;

/// Flags shared by every subcommand.
pub struct GlobalOpts {
  pub project_root: PathBuf,
  pub format: OutputFormat,
}

impl GlobalOpts {
  pub fn engine_config(&self) -> Result<EngineConfig> {
    EngineConfig::load(&self.project_root)
      .with_context(|| format!("Failed to load configuration for {}", self.project_root.display()))
  }
}

/// A loaded manifest with its graph and a rule resolver over it.
pub struct Project {
  pub config: EngineConfig,
  pub registry: DescriptionRegistry,
  pub graph: Arc<TargetGraph>,
  pub resolver: Arc<BuildRuleResolver>,
}

impl Project {
  pub fn load(opts: &GlobalOpts, manifest_path: &Path) -> Result<Self> {
    let config = opts.engine_config()?;
    let manifest = TargetGraphManifest::load(manifest_path)
      .with_context(|| format!("Failed to load manifest: {}", manifest_path.display()))?;

    let platforms = default_platforms().context("Failed to set up C/C++ platforms")?;
    let registry = DescriptionRegistry::with_builtins(Arc::new(platforms));
    let graph = Arc::new(
      manifest
        .into_graph(&registry, &config.project_root)
        .context("Failed to build target graph")?,
    );
    let cells = manifest
      .cell_resolver(&config.project_root)
      .context("Failed to resolve cells")?;
    let resolver = Arc::new(
      BuildRuleResolver::new(graph.clone())
        .with_cells(Arc::new(cells))
        .with_out_dir(config.out_dir.clone()),
    );

    Ok(Self {
      config,
      registry,
      graph,
      resolver,
    })
  }
}
