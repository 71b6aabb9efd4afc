//! Implementation of the `buckle targets` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use super::{GlobalOpts, Project};
use crate::output::{print_json, symbols};

pub fn cmd_targets(opts: &GlobalOpts, manifest: &Path) -> Result<()> {
  let project = Project::load(opts, manifest)?;
  let nodes = project
    .graph
    .topological_sort()
    .context("Failed to order target graph")?;

  if opts.format.is_json() {
    let items: Vec<_> = nodes
      .iter()
      .map(|node| {
        let deps: Vec<String> = node.build_deps().iter().map(ToString::to_string).collect();
        json!({ "target": node.target().to_string(), "type": node.rule_type().name(), "deps": deps })
      })
      .collect();
    return print_json(&items);
  }

  for node in &nodes {
    println!("{} {} ({})", symbols::INFO, node.target(), node.rule_type());
  }
  Ok(())
}
