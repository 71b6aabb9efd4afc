//! Up-to-date checks against stored build metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::types::ExecuteError;
use crate::build_info::{BuildInfoStore, keys};
use crate::rules::{BuildRule, RuleKey, RuleKeyFactory};
use crate::target::BuildTarget;
use crate::util::hash::hash_file;

/// Why a rule has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
  NoPriorMetadata,
  RuleKeyChanged { previous: String },
  OutputMissing,
  /// Stored metadata could not be read, so it is not trusted.
  MetadataUnreadable(String),
}

impl fmt::Display for RebuildReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RebuildReason::NoPriorMetadata => write!(f, "no prior build"),
      RebuildReason::RuleKeyChanged { previous } => write!(f, "rule key changed (was {})", previous),
      RebuildReason::OutputMissing => write!(f, "output missing"),
      RebuildReason::MetadataUnreadable(message) => write!(f, "metadata unreadable: {}", message),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDecision {
  UpToDate,
  Rebuild(RebuildReason),
}

impl fmt::Display for BuildDecision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildDecision::UpToDate => write!(f, "up to date"),
      BuildDecision::Rebuild(reason) => write!(f, "rebuild: {}", reason),
    }
  }
}

/// Compares rule keys with the metadata recorded by earlier builds.
pub struct IncrementalEngine {
  store: Arc<dyn BuildInfoStore>,
  rule_keys: RuleKeyFactory,
  project_root: PathBuf,
  build_id: String,
}

impl IncrementalEngine {
  pub fn new(store: Arc<dyn BuildInfoStore>, project_root: impl Into<PathBuf>) -> Self {
    let millis = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis())
      .unwrap_or_default();
    let project_root = project_root.into();
    Self {
      store,
      rule_keys: RuleKeyFactory::new(project_root.clone()),
      project_root,
      build_id: format!("{}-{}", millis, std::process::id()),
    }
  }

  pub fn build_id(&self) -> &str {
    &self.build_id
  }

  pub fn project_root(&self) -> &Path {
    &self.project_root
  }

  pub fn rule_key(&self, rule: &Arc<BuildRule>) -> Result<RuleKey, ExecuteError> {
    Ok(self.rule_keys.build(rule)?)
  }

  fn output_path(&self, rule: &BuildRule) -> Option<PathBuf> {
    rule.output().map(|output| self.project_root.join(output))
  }

  pub fn decide(&self, rule: &Arc<BuildRule>) -> Result<(RuleKey, BuildDecision), ExecuteError> {
    let key = self.rule_key(rule)?;
    let decision = match self.store.read_metadata(rule.target(), keys::RULE_KEY) {
      Err(e) => {
        warn!(target = %rule.target(), error = %e, "ignoring unreadable build metadata");
        BuildDecision::Rebuild(RebuildReason::MetadataUnreadable(e.to_string()))
      }
      Ok(None) => BuildDecision::Rebuild(RebuildReason::NoPriorMetadata),
      Ok(Some(previous)) if previous != key.0 => BuildDecision::Rebuild(RebuildReason::RuleKeyChanged { previous }),
      Ok(Some(_)) => match self.output_path(rule) {
        Some(path) if !path.exists() => BuildDecision::Rebuild(RebuildReason::OutputMissing),
        _ => BuildDecision::UpToDate,
      },
    };
    debug!(target = %rule.target(), rule_key = %key, decision = %decision, "build decision");
    Ok((key, decision))
  }

  /// Record a successful build of `rule` under `key`.
  pub fn record_success(&self, rule: &BuildRule, key: &RuleKey) -> Result<(), ExecuteError> {
    let mut metadata = BTreeMap::from([
      (keys::RULE_KEY.to_string(), key.0.clone()),
      (keys::TARGET.to_string(), rule.target().to_string()),
      (keys::BUILD_ID.to_string(), self.build_id.clone()),
    ]);

    if let Some(path) = self.output_path(rule)
      && path.is_file()
    {
      let io_error = |source| ExecuteError::Io {
        target: rule.target().clone(),
        path: path.clone(),
        source,
      };
      let size = std::fs::metadata(&path).map_err(io_error)?.len();
      let hash = hash_file(&path).map_err(io_error)?;
      metadata.insert(keys::OUTPUT_SIZE.to_string(), size.to_string());
      metadata.insert(keys::OUTPUT_HASH.to_string(), hash.0);
    }

    self.store.update_metadata(rule.target(), &metadata)?;
    Ok(())
  }

  /// Forget everything recorded for `target`.
  pub fn invalidate(&self, target: &BuildTarget) -> Result<(), ExecuteError> {
    self.store.delete_metadata(target)?;
    Ok(())
  }
}
