//! Implementation of the `buckle deps` command.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use buckle_lib::description::{DescriptionRegistry, RuleType};
use buckle_lib::graph::{DependencyCache, RecursiveDependenciesMode, get_recursive_target_node_dependencies_of_types};
use buckle_lib::target::BuildTarget;
use serde_json::json;
use tracing::debug;

use super::{GlobalOpts, Project};
use crate::output::{print_info, print_json, symbols};

fn rule_types(registry: &DescriptionRegistry, names: &[String]) -> Result<Option<BTreeSet<RuleType>>> {
  if names.is_empty() {
    return Ok(None);
  }
  let mut types = BTreeSet::new();
  for name in names {
    let known = registry.rule_types().find(|known| known == name).ok_or_else(|| {
      let all: Vec<_> = registry.rule_types().collect();
      anyhow!("Unknown rule type '{}' (known: {})", name, all.join(", "))
    })?;
    types.insert(RuleType::new(known));
  }
  Ok(Some(types))
}

pub fn cmd_deps(
  opts: &GlobalOpts,
  manifest: &Path,
  target: &BuildTarget,
  mode: RecursiveDependenciesMode,
  type_names: &[String],
  no_cache: bool,
) -> Result<()> {
  let project = Project::load(opts, manifest)?;
  let types = rule_types(&project.registry, type_names)?;
  let root = project
    .graph
    .require_flavored(target)
    .with_context(|| format!("Unknown target: {}", target))?;

  let cache = (!no_cache).then(|| DependencyCache::new(project.graph.clone()));
  let deps = get_recursive_target_node_dependencies_of_types(&project.graph, cache.as_ref(), mode, &root, types.as_ref())
    .with_context(|| format!("Failed to collect {} dependencies of {}", mode, target))?;
  debug!(target = %target, %mode, count = deps.len(), cached = cache.is_some(), "collected dependencies");

  if opts.format.is_json() {
    let items: Vec<_> = deps
      .iter()
      .map(|node| json!({ "target": node.target().to_string(), "type": node.rule_type().name() }))
      .collect();
    return print_json(&json!({ "target": target.to_string(), "mode": mode, "deps": items }));
  }

  if deps.is_empty() {
    print_info(&format!("{} has no {} dependencies", target, mode));
    return Ok(());
  }
  for node in &deps {
    println!("{} {} ({})", symbols::INFO, node.target(), node.rule_type());
  }
  Ok(())
}
