use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use crate::description::{Described, DescribedNode, Description, Flavored, ImplicitDeps, Linkage, RuleCategory, RuleType};
use crate::rules::{BuildRule, BuildRuleParams, ResolveError, RuleContext};
use crate::target::{BuildTarget, BuildTargetError, CellPathResolver, DefaultCellPathResolver, flavor::names};

/// One declared rule instance: a target, its typed arguments, and its dependency edges.
///
/// Nodes are immutable and cheap to clone. Equality and ordering follow the target.
#[derive(Clone)]
pub struct TargetNode(Arc<NodeData>);

struct NodeData {
  target: BuildTarget,
  declared_deps: BTreeSet<BuildTarget>,
  extra_deps: BTreeSet<BuildTarget>,
  target_graph_only_deps: BTreeSet<BuildTarget>,
  parse_time_deps: BTreeSet<BuildTarget>,
  cells: Arc<dyn CellPathResolver>,
  described: Arc<dyn DescribedNode>,
}

impl TargetNode {
  /// Start building a node for `target` handled by `description`.
  pub fn builder<D: Description>(target: BuildTarget, description: Arc<D>, args: D::Args) -> TargetNodeBuilder {
    TargetNodeBuilder {
      target,
      described: Arc::new(Described::new(description, args)),
      deps: BTreeSet::new(),
      extra_deps: BTreeSet::new(),
      target_graph_only_deps: BTreeSet::new(),
      cells: None,
    }
  }

  pub fn target(&self) -> &BuildTarget {
    &self.0.target
  }

  pub fn rule_type(&self) -> RuleType {
    self.0.described.rule_type()
  }

  pub fn category(&self) -> RuleCategory {
    self.0.described.category()
  }

  /// Statically declared deps, including those named by dependency-typed arguments.
  pub fn declared_deps(&self) -> &BTreeSet<BuildTarget> {
    &self.0.declared_deps
  }

  /// Extra deps supplied when the node was built. Deps inferred from arguments are
  /// added by the rule transformer, not here.
  pub fn extra_deps(&self) -> &BTreeSet<BuildTarget> {
    &self.0.extra_deps
  }

  pub fn target_graph_only_deps(&self) -> &BTreeSet<BuildTarget> {
    &self.0.target_graph_only_deps
  }

  /// Declared and extra deps: the edges that order the build.
  pub fn build_deps(&self) -> BTreeSet<BuildTarget> {
    self.0.declared_deps.union(&self.0.extra_deps).cloned().collect()
  }

  /// Targets named inside the node's non-dependency arguments.
  pub fn parse_time_deps(&self) -> &BTreeSet<BuildTarget> {
    &self.0.parse_time_deps
  }

  /// Every outgoing edge of this node in the target graph.
  pub fn parse_deps(&self) -> BTreeSet<BuildTarget> {
    let mut deps = self.build_deps();
    deps.extend(self.0.target_graph_only_deps.iter().cloned());
    deps.extend(self.0.parse_time_deps.iter().cloned());
    deps
  }

  pub fn exported_deps(&self) -> BTreeSet<BuildTarget> {
    self.0.described.exported_deps()
  }

  pub fn bundle_binary(&self) -> Option<BuildTarget> {
    self.0.described.bundle_binary()
  }

  pub fn preferred_linkage(&self) -> Linkage {
    self.0.described.preferred_linkage()
  }

  pub fn walks_dependencies(&self) -> bool {
    self.0.described.walks_dependencies()
  }

  pub fn flavored(&self) -> Option<&dyn Flavored> {
    self.0.described.flavored()
  }

  pub fn cells(&self) -> &Arc<dyn CellPathResolver> {
    &self.0.cells
  }

  /// A library that will be linked as its own shared object.
  pub fn is_shared_library(&self) -> bool {
    if self.category() != RuleCategory::Library {
      return false;
    }
    let target = self.target();
    if target.has_flavor_named(names::SHARED) {
      return true;
    }
    self.preferred_linkage() == Linkage::Shared
      && !target.has_flavor_named(names::STATIC)
      && !target.has_flavor_named(names::STATIC_PIC)
  }

  /// Typed view of the node's arguments.
  pub fn args<T: 'static>(&self) -> Option<&T> {
    self.0.described.args().downcast_ref::<T>()
  }

  /// Ask the description for deps hidden in the node's arguments.
  pub fn infer_implicit_deps(&self) -> Result<Option<ImplicitDeps>, BuildTargetError> {
    self.0.described.infer_implicit_deps(&self.0.target, self.0.cells.as_ref())
  }

  /// Source files named by the node's arguments, relative to its package directory.
  pub fn infer_implicit_inputs(&self) -> Vec<PathBuf> {
    self.0.described.infer_implicit_inputs(&self.0.target)
  }

  pub(crate) fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
  ) -> Result<BuildRule, ResolveError> {
    self.0.described.create_build_rule(ctx, params)
  }

  /// The same declaration addressed by a different (usually flavored) target.
  pub fn with_target(&self, target: BuildTarget) -> Self {
    Self(Arc::new(NodeData {
      target,
      declared_deps: self.0.declared_deps.clone(),
      extra_deps: self.0.extra_deps.clone(),
      target_graph_only_deps: self.0.target_graph_only_deps.clone(),
      parse_time_deps: self.0.parse_time_deps.clone(),
      cells: self.0.cells.clone(),
      described: self.0.described.clone(),
    }))
  }
}

impl PartialEq for TargetNode {
  fn eq(&self, other: &Self) -> bool {
    self.0.target == other.0.target
  }
}

impl Eq for TargetNode {}

impl PartialOrd for TargetNode {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for TargetNode {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.target.cmp(&other.0.target)
  }
}

impl Hash for TargetNode {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.target.hash(state);
  }
}

impl fmt::Debug for TargetNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TargetNode")
      .field("target", &self.0.target)
      .field("rule_type", &self.rule_type())
      .field("deps", &self.0.declared_deps)
      .field("extra_deps", &self.0.extra_deps)
      .field("target_graph_only_deps", &self.0.target_graph_only_deps)
      .field("parse_time_deps", &self.0.parse_time_deps)
      .finish()
  }
}

impl fmt::Display for TargetNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.target)
  }
}

pub struct TargetNodeBuilder {
  target: BuildTarget,
  described: Arc<dyn DescribedNode>,
  deps: BTreeSet<BuildTarget>,
  extra_deps: BTreeSet<BuildTarget>,
  target_graph_only_deps: BTreeSet<BuildTarget>,
  cells: Option<Arc<dyn CellPathResolver>>,
}

impl TargetNodeBuilder {
  pub fn deps(mut self, deps: impl IntoIterator<Item = BuildTarget>) -> Self {
    self.deps.extend(deps);
    self
  }

  pub fn extra_deps(mut self, deps: impl IntoIterator<Item = BuildTarget>) -> Self {
    self.extra_deps.extend(deps);
    self
  }

  pub fn target_graph_only_deps(mut self, deps: impl IntoIterator<Item = BuildTarget>) -> Self {
    self.target_graph_only_deps.extend(deps);
    self
  }

  pub fn cells(mut self, cells: Arc<dyn CellPathResolver>) -> Self {
    self.cells = Some(cells);
    self
  }

  /// Finish the node, folding in deps named by dependency-typed arguments and the
  /// parse-time edges the description reports.
  pub fn build(self) -> Result<TargetNode, BuildTargetError> {
    let cells: Arc<dyn CellPathResolver> = match self.cells {
      Some(cells) => cells,
      None => Arc::new(DefaultCellPathResolver::new(".")),
    };

    let mut declared_deps = self.deps;
    declared_deps.extend(self.described.declared_deps());
    declared_deps.extend(self.described.exported_deps());
    declared_deps.extend(self.described.bundle_binary());

    let parse_time_deps = self.described.parse_time_deps(&self.target)?;

    Ok(TargetNode(Arc::new(NodeData {
      target: self.target,
      declared_deps,
      extra_deps: self.extra_deps,
      target_graph_only_deps: self.target_graph_only_deps,
      parse_time_deps,
      cells,
      described: self.described,
    })))
  }
}
