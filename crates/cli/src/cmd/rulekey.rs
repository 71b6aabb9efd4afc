//! Implementation of the `buckle rulekey` command.

use std::path::Path;

use anyhow::{Context, Result};
use buckle_lib::rules::RuleKeyFactory;
use buckle_lib::target::BuildTarget;
use serde_json::json;

use super::{GlobalOpts, Project};
use crate::output::print_json;

pub fn cmd_rulekey(opts: &GlobalOpts, manifest: &Path, target: &BuildTarget) -> Result<()> {
  let project = Project::load(opts, manifest)?;
  let rule = project
    .resolver
    .require_rule(target)
    .with_context(|| format!("Failed to resolve rule for {}", target))?;
  let key = RuleKeyFactory::new(&project.config.project_root)
    .build(&rule)
    .with_context(|| format!("Failed to compute rule key for {}", target))?;

  if opts.format.is_json() {
    return print_json(&json!({
      "target": target.to_string(),
      "type": rule.rule_type().name(),
      "rule_key": key.0,
      "inputs": rule.inputs(),
      "output": rule.output(),
    }));
  }

  println!("{}", key);
  Ok(())
}
