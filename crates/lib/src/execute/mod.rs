//! Incremental build execution.
//!
//! This module provides the entry points for building a set of targets:
//! - Resolution of the root rules on blocking worker threads
//! - Wave-ordered execution of the action graph with bounded parallelism
//! - Rule-key checks against stored metadata to skip up-to-date rules
//! - Failure propagation and skip tracking

mod command;
mod decision;
mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::rules::{ActionGraph, BuildRule, BuildRuleResolver, RuleKey};
use crate::target::BuildTarget;

pub use command::{CommandExecutor, RuleExecutor};
pub use decision::{BuildDecision, IncrementalEngine, RebuildReason};
pub use types::{BuildReport, ExecuteConfig, ExecuteError};

/// Resolve `targets` concurrently through the shared resolver.
pub async fn resolve_roots(
  resolver: &Arc<BuildRuleResolver>,
  targets: &[BuildTarget],
) -> Result<Vec<Arc<BuildRule>>, ExecuteError> {
  let mut join_set = JoinSet::new();
  for (index, target) in targets.iter().enumerate() {
    let resolver = resolver.clone();
    let target = target.clone();
    join_set.spawn_blocking(move || (index, resolver.require_rule(&target)));
  }

  let mut rules: Vec<Option<Arc<BuildRule>>> = vec![None; targets.len()];
  while let Some(joined) = join_set.join_next().await {
    let (index, rule) = joined.map_err(|e| ExecuteError::Task(e.to_string()))?;
    rules[index] = Some(rule?);
  }
  Ok(rules.into_iter().flatten().collect())
}

/// Decide, without running anything, what a build of `targets` would do.
///
/// Decisions are returned in dependency-first order.
pub async fn plan_build(
  resolver: &Arc<BuildRuleResolver>,
  targets: &[BuildTarget],
  engine: &IncrementalEngine,
) -> Result<Vec<(Arc<BuildRule>, RuleKey, BuildDecision)>, ExecuteError> {
  let roots = resolve_roots(resolver, targets).await?;
  let graph = ActionGraph::from_roots(roots);
  let mut plan = Vec::with_capacity(graph.len());
  for rule in graph.topological_order()? {
    let (key, decision) = engine.decide(&rule)?;
    plan.push((rule, key, decision));
  }
  Ok(plan)
}

/// Build `targets` and everything they depend on.
///
/// Rules run wave by wave, with at most `config.parallelism` actions at once.
/// A rule whose stored rule key matches and whose output exists is not run.
/// Dependents of a failed rule are skipped. Metadata of a failed rule is
/// deleted so it is never trusted later.
pub async fn execute_build<E: RuleExecutor>(
  resolver: &Arc<BuildRuleResolver>,
  targets: &[BuildTarget],
  engine: &Arc<IncrementalEngine>,
  executor: &Arc<E>,
  config: &ExecuteConfig,
) -> Result<BuildReport, ExecuteError> {
  info!(roots = targets.len(), "starting build");

  let roots = resolve_roots(resolver, targets).await?;
  let graph = ActionGraph::from_roots(roots);
  let waves = graph.waves()?;
  info!(rules = graph.len(), wave_count = waves.len(), "computed execution waves");

  let mut report = BuildReport::default();
  // Rules that failed or were skipped; their dependents cannot run.
  let mut blocked: BTreeSet<BuildTarget> = BTreeSet::new();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

  for (wave_idx, wave) in waves.into_iter().enumerate() {
    debug!(wave = wave_idx, rules = wave.len(), "executing wave");

    let mut join_set = JoinSet::new();
    for rule in wave {
      let blocked_by = rule
        .build_deps()
        .iter()
        .map(|dep| dep.target())
        .find(|dep| blocked.contains(*dep))
        .cloned();
      if let Some(dep) = blocked_by {
        warn!(target = %rule.target(), failed_dep = %dep, "skipping rule due to failed dependency");
        blocked.insert(rule.target().clone());
        report.skipped.insert(rule.target().clone(), dep);
        continue;
      }

      let (key, decision) = engine.decide(&rule)?;
      if decision == BuildDecision::UpToDate {
        report.up_to_date.insert(rule.target().clone());
        continue;
      }
      debug!(target = %rule.target(), decision = %decision, "scheduling rule");

      let semaphore = semaphore.clone();
      let executor = executor.clone();
      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => executor.execute(rule.clone()).await,
          Err(e) => Err(ExecuteError::Task(e.to_string())),
        };
        (rule, key, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      let (rule, key, result) = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          error!(error = %e, "build task panicked");
          return Err(ExecuteError::Task(e.to_string()));
        }
      };
      let target = rule.target().clone();
      match result.and_then(|()| engine.record_success(&rule, &key)) {
        Ok(()) => {
          info!(target = %target, "rule built");
          report.built.insert(target);
        }
        Err(e) => {
          error!(target = %target, error = %e, "rule failed");
          if let Err(invalidate_err) = engine.invalidate(&target) {
            warn!(target = %target, error = %invalidate_err, "failed to invalidate metadata");
          }
          blocked.insert(target.clone());
          report.failed.insert(target, e);
        }
      }
    }
  }

  info!(
    built = report.built.len(),
    up_to_date = report.up_to_date.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    "build complete"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;
  use std::path::PathBuf;

  use parking_lot::Mutex;
  use tempfile::TempDir;

  use super::*;
  use crate::build_info::{BuildInfoStore, SqliteBuildInfoStore, keys};
  use crate::description::RuleType;
  use crate::rules::{BuildRuleParams, RuleAction, RuleSet};

  const STEP: RuleType = RuleType::new("step");

  /// Writes each rule's output instead of running its action, failing for targets in `fail`.
  struct FakeExecutor {
    root: PathBuf,
    fail: BTreeSet<String>,
    runs: Mutex<Vec<String>>,
  }

  impl FakeExecutor {
    fn new(root: &std::path::Path, fail: &[&str]) -> Arc<Self> {
      Arc::new(Self {
        root: root.to_path_buf(),
        fail: fail.iter().map(|s| s.to_string()).collect(),
        runs: Mutex::new(Vec::new()),
      })
    }

    fn runs(&self) -> Vec<String> {
      let mut runs = self.runs.lock().clone();
      runs.sort();
      runs
    }
  }

  impl RuleExecutor for FakeExecutor {
    async fn execute(&self, rule: Arc<BuildRule>) -> Result<(), ExecuteError> {
      let name = rule.target().to_string();
      self.runs.lock().push(name.clone());
      if self.fail.contains(&name) {
        return Err(ExecuteError::CmdFailed {
          target: rule.target().clone(),
          cmd: "fake".to_string(),
          code: Some(1),
          stderr: String::new(),
        });
      }
      if let Some(output) = rule.output() {
        let path = self.root.join(output);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, &name).unwrap();
      }
      Ok(())
    }
  }

  fn step(target: &BuildTarget, deps: &[&Arc<BuildRule>]) -> BuildRule {
    let deps: RuleSet = deps.iter().map(|d| (*d).clone()).collect();
    let file = target.to_string().replace(['/', ':'], "_");
    let params = BuildRuleParams::new(target.clone(), deps, RuleSet::new(), RuleSet::new());
    BuildRule::builder(params, STEP)
      .output(format!("out/{}", file))
      .action(RuleAction::shell(format!("touch {}", file)))
      .build()
  }

  /// `//c:top -> //b:mid -> //a:base`, plus an independent `//d:side`.
  fn chain_resolver() -> Arc<BuildRuleResolver> {
    let graph = Arc::new(crate::util::testutil::diamond_graph());
    let resolver = Arc::new(BuildRuleResolver::new(graph));
    let base = resolver
      .compute_if_absent(&"//a:base".parse().unwrap(), |t| Ok(step(t, &[])))
      .unwrap();
    let mid = resolver
      .compute_if_absent(&"//b:mid".parse().unwrap(), |t| Ok(step(t, &[&base])))
      .unwrap();
    resolver
      .compute_if_absent(&"//c:top".parse().unwrap(), |t| Ok(step(t, &[&mid])))
      .unwrap();
    resolver
      .compute_if_absent(&"//d:side".parse().unwrap(), |t| Ok(step(t, &[])))
      .unwrap();
    resolver
  }

  fn targets(names: &[&str]) -> Vec<BuildTarget> {
    names.iter().map(|n| n.parse().unwrap()).collect()
  }

  fn engine(temp: &TempDir) -> (Arc<IncrementalEngine>, Arc<SqliteBuildInfoStore>) {
    let store = Arc::new(
      SqliteBuildInfoStore::open(&temp.path().join("metadata.db"), std::time::Duration::from_secs(5)).unwrap(),
    );
    (Arc::new(IncrementalEngine::new(store.clone(), temp.path())), store)
  }

  #[tokio::test]
  async fn second_build_is_up_to_date() {
    let temp = TempDir::new().unwrap();
    let resolver = chain_resolver();
    let (engine, _) = engine(&temp);
    let config = ExecuteConfig { parallelism: 2 };
    let roots = targets(&["//c:top", "//d:side"]);

    let executor = FakeExecutor::new(temp.path(), &[]);
    let first = execute_build(&resolver, &roots, &engine, &executor, &config).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.built.len(), 4);
    assert_eq!(executor.runs(), vec!["//a:base", "//b:mid", "//c:top", "//d:side"]);

    let executor = FakeExecutor::new(temp.path(), &[]);
    let second = execute_build(&resolver, &roots, &engine, &executor, &config).await.unwrap();
    assert_eq!(second.up_to_date.len(), 4);
    assert!(executor.runs().is_empty());

    std::fs::remove_file(temp.path().join("out/__b_mid")).unwrap();
    let executor = FakeExecutor::new(temp.path(), &[]);
    let third = execute_build(&resolver, &roots, &engine, &executor, &config).await.unwrap();
    assert_eq!(executor.runs(), vec!["//b:mid"]);
    assert_eq!(third.built.len(), 1);
  }

  #[tokio::test]
  async fn failure_skips_dependents_and_invalidates() {
    let temp = TempDir::new().unwrap();
    let resolver = chain_resolver();
    let (engine, store) = engine(&temp);
    let config = ExecuteConfig { parallelism: 4 };
    let roots = targets(&["//c:top", "//d:side"]);

    // Seed stale metadata for the rule that will fail.
    store
      .update_metadata(
        &"//b:mid".parse().unwrap(),
        &BTreeMap::from([(keys::RULE_KEY.to_string(), "stale".to_string())]),
      )
      .unwrap();

    let executor = FakeExecutor::new(temp.path(), &["//b:mid"]);
    let report = execute_build(&resolver, &roots, &engine, &executor, &config).await.unwrap();

    assert!(!report.is_success());
    assert!(report.failed.contains_key(&"//b:mid".parse().unwrap()));
    assert_eq!(report.skipped.get(&"//c:top".parse().unwrap()), Some(&"//b:mid".parse().unwrap()));
    assert!(report.built.contains(&"//a:base".parse().unwrap()));
    assert!(report.built.contains(&"//d:side".parse().unwrap()));
    assert!(store.read_all_metadata(&"//b:mid".parse().unwrap()).unwrap().is_empty());
  }

  #[tokio::test]
  async fn plan_lists_decisions_in_dependency_order() {
    let temp = TempDir::new().unwrap();
    let resolver = chain_resolver();
    let (engine, _) = engine(&temp);

    let plan = plan_build(&resolver, &targets(&["//c:top"]), &engine).await.unwrap();
    let order: Vec<String> = plan.iter().map(|(rule, _, _)| rule.target().to_string()).collect();
    assert_eq!(order, vec!["//a:base", "//b:mid", "//c:top"]);
    assert!(plan
      .iter()
      .all(|(_, _, decision)| *decision == BuildDecision::Rebuild(RebuildReason::NoPriorMetadata)));
  }

  #[tokio::test]
  async fn unknown_root_is_a_resolve_error() {
    let resolver = chain_resolver();
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine(&temp);
    let executor = FakeExecutor::new(temp.path(), &[]);
    let err = execute_build(
      &resolver,
      &targets(&["//nope:nope"]),
      &engine,
      &executor,
      &ExecuteConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExecuteError::Resolve(_)));
  }
}
