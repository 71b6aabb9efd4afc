//! Types for incremental build execution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;

use crate::build_info::BuildInfoError;
use crate::graph::CycleError;
use crate::rules::{ResolveError, RuleKeyError};
use crate::target::BuildTarget;

/// Errors that can occur while deciding on or running builds.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  BuildInfo(#[from] BuildInfoError),

  #[error("failed to compute rule key: {0}")]
  RuleKey(#[from] RuleKeyError),

  #[error("action graph has a cycle: {0}")]
  Cycle(#[from] CycleError),

  /// The rule's command exited unsuccessfully.
  #[error("{target}: command failed with exit code {code:?}: {cmd}")]
  CmdFailed {
    target: BuildTarget,
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  /// The rule's command succeeded without producing its declared output.
  #[error("{target}: command did not produce {}", .path.display())]
  OutputMissing { target: BuildTarget, path: PathBuf },

  #[error("{target}: io error at {}: {source}", .path.display())]
  Io {
    target: BuildTarget,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A worker task panicked or was cancelled.
  #[error("build task failed: {0}")]
  Task(String),
}

/// Outcome of one incremental build.
#[derive(Debug, Default)]
pub struct BuildReport {
  /// Rules whose command ran successfully.
  pub built: BTreeSet<BuildTarget>,

  /// Rules whose stored rule key matched and whose output was present.
  pub up_to_date: BTreeSet<BuildTarget>,

  /// Rules whose command failed.
  pub failed: BTreeMap<BuildTarget, ExecuteError>,

  /// Rules not attempted, mapped to the failed or skipped dependency that blocked them.
  pub skipped: BTreeMap<BuildTarget, BuildTarget>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  pub fn total(&self) -> usize {
    self.built.len() + self.up_to_date.len() + self.failed.len() + self.skipped.len()
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of rules to run in parallel.
  pub parallelism: usize,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(s: &str) -> BuildTarget {
    s.parse().unwrap()
  }

  #[test]
  fn empty_report_is_success() {
    let report = BuildReport::default();
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
  }

  #[test]
  fn failure_and_skip_make_report_unsuccessful() {
    let mut report = BuildReport::default();
    report.built.insert(t("//a:a"));
    report.up_to_date.insert(t("//a:b"));
    assert!(report.is_success());

    report.failed.insert(
      t("//a:c"),
      ExecuteError::CmdFailed {
        target: t("//a:c"),
        cmd: "false".to_string(),
        code: Some(1),
        stderr: String::new(),
      },
    );
    report.skipped.insert(t("//a:d"), t("//a:c"));
    assert!(!report.is_success());
    assert_eq!(report.total(), 4);
  }

  #[test]
  fn errors_name_the_target() {
    let err = ExecuteError::OutputMissing {
      target: t("//gen:out"),
      path: PathBuf::from("buckle-out/gen/root/gen/out#/out.txt"),
    };
    assert_eq!(
      err.to_string(),
      "//gen:out: command did not produce buckle-out/gen/root/gen/out#/out.txt"
    );
  }
}
