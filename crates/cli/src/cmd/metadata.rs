//! Implementation of the `buckle metadata` command.

use anyhow::{Context, Result, bail};
use buckle_lib::build_info::{keys, open_build_info_store};
use buckle_lib::target::BuildTarget;
use serde_json::json;

use super::GlobalOpts;
use crate::output::{format_bytes, print_info, print_json, print_stat, print_success, truncate_hash};

pub fn cmd_metadata(opts: &GlobalOpts, target: &BuildTarget, key: Option<&str>, delete: bool) -> Result<()> {
  let config = opts.engine_config()?;
  let store = open_build_info_store(&config).context("Failed to open build metadata")?;

  if delete {
    store
      .delete_metadata(target)
      .with_context(|| format!("Failed to delete metadata for {}", target))?;
    if opts.format.is_json() {
      return print_json(&json!({ "target": target.to_string(), "deleted": true }));
    }
    print_success(&format!("Deleted metadata for {}", target));
    return Ok(());
  }

  if let Some(key) = key {
    let Some(value) = store
      .read_metadata(target, key)
      .with_context(|| format!("Failed to read metadata for {}", target))?
    else {
      bail!("No '{}' recorded for {}", key, target);
    };
    if opts.format.is_json() {
      return print_json(&json!({ "target": target.to_string(), "key": key, "value": value }));
    }
    println!("{}", value);
    return Ok(());
  }

  let metadata = store
    .read_all_metadata(target)
    .with_context(|| format!("Failed to read metadata for {}", target))?;
  if opts.format.is_json() {
    return print_json(&json!({ "target": target.to_string(), "metadata": metadata }));
  }
  if metadata.is_empty() {
    print_info(&format!("No metadata recorded for {}", target));
    return Ok(());
  }

  print_success(&format!("Metadata for {}", target));
  for (name, value) in &metadata {
    let shown = match name.as_str() {
      keys::RULE_KEY | keys::OUTPUT_HASH => truncate_hash(value).to_string(),
      keys::OUTPUT_SIZE => value.parse().map(format_bytes).unwrap_or_else(|_| value.clone()),
      _ => value.clone(),
    };
    print_stat(name, &shown);
  }
  Ok(())
}
