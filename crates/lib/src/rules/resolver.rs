use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;

use super::build_rule::BuildRule;
use super::transformer::{DefaultTargetNodeToBuildRuleTransformer, TargetNodeToBuildRuleTransformer};
use crate::consts::{DEFAULT_OUT_DIR, GEN_DIR};
use crate::flavor_domain::FlavorDomainError;
use crate::graph::{GraphError, TargetGraph};
use crate::multiarch::MultiarchError;
use crate::target::{BuildTarget, BuildTargetError, CellPathResolver, DefaultCellPathResolver};

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
  #[error("no such build target: {target}{}", referenced_by_suffix(.referenced_by))]
  NoSuchBuildTarget {
    target: BuildTarget,
    referenced_by: Option<BuildTarget>,
  },

  #[error("description for {expected} returned a rule for {actual}")]
  TargetMismatch { expected: BuildTarget, actual: BuildTarget },

  #[error("{target}: flavors {flavors} are not supported by {rule_type}")]
  UnsupportedFlavors {
    target: BuildTarget,
    rule_type: String,
    flavors: String,
  },

  #[error("{target}: {message}")]
  InvalidArgs { target: BuildTarget, message: String },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Target(#[from] BuildTargetError),

  #[error(transparent)]
  FlavorDomain(#[from] FlavorDomainError),

  #[error(transparent)]
  Multiarch(#[from] MultiarchError),
}

fn referenced_by_suffix(referenced_by: &Option<BuildTarget>) -> String {
  match referenced_by {
    Some(by) => format!(" (referenced by {})", by),
    None => String::new(),
  }
}

impl ResolveError {
  /// Attach the referencing target to a missing-target error that lacks one.
  pub fn referenced_by(self, referrer: &BuildTarget) -> Self {
    match self {
      Self::NoSuchBuildTarget {
        target,
        referenced_by: None,
      } => Self::NoSuchBuildTarget {
        target,
        referenced_by: Some(referrer.clone()),
      },
      other => other,
    }
  }
}

/// What a description sees while it creates a rule.
pub struct RuleContext<'a> {
  pub graph: &'a TargetGraph,
  pub resolver: &'a BuildRuleResolver,
  pub cells: &'a dyn CellPathResolver,
}

impl RuleContext<'_> {
  /// Output path for a file generated by `target`, relative to the project root.
  pub fn gen_path(&self, target: &BuildTarget, file_name: &str) -> PathBuf {
    self.resolver.gen_path(target, file_name)
  }
}

/// Creates build rules on demand, at most once per target.
///
/// Concurrent requests for the same target block until the first caller finishes
/// and then share its rule. Requests for different targets proceed in parallel.
pub struct BuildRuleResolver {
  graph: Arc<TargetGraph>,
  transformer: Arc<dyn TargetNodeToBuildRuleTransformer>,
  cells: Arc<dyn CellPathResolver>,
  out_dir: PathBuf,
  rules: DashMap<BuildTarget, Arc<OnceCell<Arc<BuildRule>>>>,
}

impl BuildRuleResolver {
  pub fn new(graph: Arc<TargetGraph>) -> Self {
    Self {
      graph,
      transformer: Arc::new(DefaultTargetNodeToBuildRuleTransformer),
      cells: Arc::new(DefaultCellPathResolver::new(".")),
      out_dir: PathBuf::from(DEFAULT_OUT_DIR),
      rules: DashMap::new(),
    }
  }

  pub fn with_transformer(mut self, transformer: Arc<dyn TargetNodeToBuildRuleTransformer>) -> Self {
    self.transformer = transformer;
    self
  }

  pub fn with_cells(mut self, cells: Arc<dyn CellPathResolver>) -> Self {
    self.cells = cells;
    self
  }

  /// Output directory, relative to the project root.
  pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
    self.out_dir = out_dir.into();
    self
  }

  pub fn graph(&self) -> &Arc<TargetGraph> {
    &self.graph
  }

  pub fn out_dir(&self) -> &Path {
    &self.out_dir
  }

  pub fn gen_path(&self, target: &BuildTarget, file_name: &str) -> PathBuf {
    self.out_dir.join(GEN_DIR).join(target.to_relative_path()).join(file_name)
  }

  /// The rule for `target`, creating it through the transformer if needed.
  pub fn require_rule(&self, target: &BuildTarget) -> Result<Arc<BuildRule>, ResolveError> {
    self.compute_if_absent(target, |target| {
      let node = self.graph.get_flavored(target).ok_or_else(|| ResolveError::NoSuchBuildTarget {
        target: target.clone(),
        referenced_by: None,
      })?;
      debug!(target = %target, rule_type = %node.rule_type(), "creating build rule");
      let ctx = RuleContext {
        graph: &self.graph,
        resolver: self,
        cells: self.cells.as_ref(),
      };
      self.transformer.transform(&ctx, &node)
    })
  }

  pub fn require_all_rules<'a>(
    &self,
    targets: impl IntoIterator<Item = &'a BuildTarget>,
  ) -> Result<Vec<Arc<BuildRule>>, ResolveError> {
    targets.into_iter().map(|target| self.require_rule(target)).collect()
  }

  /// The rule for `target` if it has already been created.
  pub fn get_rule(&self, target: &BuildTarget) -> Option<Arc<BuildRule>> {
    self.rules.get(target).and_then(|cell| cell.get().cloned())
  }

  /// The rule for `target`, creating it with `create` if absent.
  ///
  /// `create` runs at most once per target for the life of the resolver. A failed
  /// creation leaves the slot empty. `create` must not request `target` itself.
  pub fn compute_if_absent<F>(&self, target: &BuildTarget, create: F) -> Result<Arc<BuildRule>, ResolveError>
  where
    F: FnOnce(&BuildTarget) -> Result<BuildRule, ResolveError>,
  {
    // Clone the slot out so the map shard is not locked while the rule is created.
    let slot = self.rules.entry(target.clone()).or_default().clone();
    slot
      .get_or_try_init(|| {
        let rule = create(target)?;
        if rule.target() != target {
          return Err(ResolveError::TargetMismatch {
            expected: target.clone(),
            actual: rule.target().clone(),
          });
        }
        Ok(Arc::new(rule))
      })
      .cloned()
  }

  /// Every rule created so far, in target order.
  pub fn rules(&self) -> Vec<Arc<BuildRule>> {
    let mut rules: Vec<Arc<BuildRule>> = self.rules.iter().filter_map(|entry| entry.value().get().cloned()).collect();
    rules.sort();
    rules
  }
}
