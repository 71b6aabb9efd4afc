//! Implementation of the `buckle build` command.
//!
//! Resolves the requested targets into rules, compares their rule keys with the
//! stored build metadata and runs only the rules that changed.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use buckle_lib::build_info::open_build_info_store;
use buckle_lib::execute::{
  BuildDecision, BuildReport, CommandExecutor, ExecuteConfig, ExecuteError, IncrementalEngine, execute_build, plan_build,
};
use buckle_lib::target::BuildTarget;
use serde_json::json;
use tracing::info;

use super::{GlobalOpts, Project};
use crate::output::{
  format_duration, print_error, print_info, print_json, print_skipped, print_stat, print_success, symbols,
  truncate_hash,
};

pub fn cmd_build(
  opts: &GlobalOpts,
  manifest: &Path,
  targets: &[BuildTarget],
  jobs: Option<usize>,
  dry_run: bool,
) -> Result<()> {
  let mut project = Project::load(opts, manifest)?;
  if let Some(jobs) = jobs {
    if jobs == 0 {
      bail!("--jobs must be at least 1");
    }
    project.config.parallelism = jobs;
  }

  let store = open_build_info_store(&project.config).context("Failed to open build metadata")?;
  let engine = Arc::new(IncrementalEngine::new(store, &project.config.project_root));
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  if dry_run {
    let plan = rt
      .block_on(plan_build(&project.resolver, targets, &engine))
      .context("Failed to plan build")?;

    if opts.format.is_json() {
      let items: Vec<_> = plan
        .iter()
        .map(|(rule, key, decision)| {
          json!({
            "target": rule.target().to_string(),
            "rule_key": key.0,
            "up_to_date": *decision == BuildDecision::UpToDate,
            "decision": decision.to_string(),
          })
        })
        .collect();
      return print_json(&items);
    }

    for (rule, key, decision) in &plan {
      println!(
        "{} {} [{}] {} {}",
        symbols::INFO,
        rule.target(),
        truncate_hash(&key.0),
        symbols::ARROW,
        decision
      );
    }
    let pending = plan
      .iter()
      .filter(|(_, _, decision)| *decision != BuildDecision::UpToDate)
      .count();
    print_info(&format!("{} of {} rule(s) would run", pending, plan.len()));
    return Ok(());
  }

  let executor = Arc::new(CommandExecutor::new(&project.config.project_root));
  let config = ExecuteConfig {
    parallelism: project.config.parallelism,
  };

  let started = Instant::now();
  let report = rt
    .block_on(execute_build(&project.resolver, targets, &engine, &executor, &config))
    .context("Build failed")?;
  let elapsed = started.elapsed();
  info!(build_id = engine.build_id(), elapsed = ?elapsed, "build finished");

  if opts.format.is_json() {
    print_json(&report_json(&report, engine.build_id()))?;
  } else {
    print_report(&report);
    print_stat("Time", &format_duration(elapsed));
  }

  if !report.is_success() {
    bail!("{} rule(s) failed", report.failed.len());
  }
  Ok(())
}

fn names(targets: &BTreeSet<BuildTarget>) -> Vec<String> {
  targets.iter().map(ToString::to_string).collect()
}

fn report_json(report: &BuildReport, build_id: &str) -> serde_json::Value {
  let failed: serde_json::Map<_, _> = report
    .failed
    .iter()
    .map(|(target, err)| (target.to_string(), json!(err.to_string())))
    .collect();
  let skipped: serde_json::Map<_, _> = report
    .skipped
    .iter()
    .map(|(target, blocker)| (target.to_string(), json!(blocker.to_string())))
    .collect();
  json!({
    "build_id": build_id,
    "success": report.is_success(),
    "built": names(&report.built),
    "up_to_date": names(&report.up_to_date),
    "failed": failed,
    "skipped": skipped,
  })
}

fn print_report(report: &BuildReport) {
  for target in &report.built {
    print_success(&format!("Built {}", target));
  }
  for err in report.failed.values() {
    print_error(&err.to_string());
    if let ExecuteError::CmdFailed { stderr, .. } = err
      && !stderr.is_empty()
    {
      eprintln!("    {}", stderr.replace('\n', "\n    "));
    }
  }
  for (target, blocker) in &report.skipped {
    print_skipped(&format!("Skipped {} (blocked by {})", target, blocker));
  }

  println!();
  print_stat("Built", &report.built.len().to_string());
  print_stat("Up to date", &report.up_to_date.len().to_string());
  if !report.failed.is_empty() {
    print_stat("Failed", &report.failed.len().to_string());
  }
  if !report.skipped.is_empty() {
    print_stat("Skipped", &report.skipped.len().to_string());
  }
}
