//! Rule descriptions: per-rule-type handlers with opt-in capabilities.
//!
//! A [`Description`] turns a target node's typed arguments into a [`BuildRule`].
//! Optional behavior is exposed through capability queries
//! ([`Description::implicit_deps`], [`Description::implicit_inputs`], [`Description::flavored`])
//! instead of type checks.

pub mod builtin;
mod registry;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use registry::DescriptionRegistry;

use crate::flavor_domain::FlavorDomain;
use crate::platform::CxxPlatform;
use crate::rules::{BuildRule, BuildRuleParams, ResolveError, RuleContext};
use crate::target::{BuildTarget, BuildTargetError, CellPathResolver, Flavor};

/// Name of a rule type, e.g. `cxx_library`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleType(&'static str);

impl RuleType {
  pub const fn new(name: &'static str) -> Self {
    Self(name)
  }

  pub fn name(&self) -> &'static str {
    self.0
  }
}

impl fmt::Display for RuleType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.0)
  }
}

/// Broad role of a rule type, consulted by recursive traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCategory {
  Library,
  Binary,
  Bundle,
  Resource,
  AssetCatalog,
  WrapperResource,
  Other,
}

impl RuleCategory {
  /// Categories whose non-exported deps do not propagate when copying or linking.
  pub fn stops_recursive_walk(&self) -> bool {
    matches!(self, Self::Bundle | Self::Resource)
  }
}

/// How a native library prefers to be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
  Static,
  Shared,
  #[default]
  Any,
}

/// Dependencies found inside argument fields that are not dependency-typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplicitDeps {
  /// Real build dependencies.
  pub extra: BTreeSet<BuildTarget>,
  /// Edges the graph must follow that never order the build.
  pub target_graph_only: BTreeSet<BuildTarget>,
}

impl ImplicitDeps {
  pub fn is_empty(&self) -> bool {
    self.extra.is_empty() && self.target_graph_only.is_empty()
  }
}

/// Capability: a description that finds deps embedded in its arguments.
pub trait ImplicitDepsInferring<A>: Send + Sync {
  fn find_deps_from_args(
    &self,
    target: &BuildTarget,
    cells: &dyn CellPathResolver,
    args: &A,
  ) -> Result<ImplicitDeps, BuildTargetError>;
}

/// Capability: a description whose arguments name source files the rule reads.
pub trait ImplicitInputsInferring<A>: Send + Sync {
  /// Source files, relative to the directory of the target's package.
  fn inputs_from_args(&self, target: &BuildTarget, args: &A) -> Vec<PathBuf>;
}

/// Capability: a description that accepts flavored variants of its targets.
pub trait Flavored: Send + Sync {
  fn has_flavors(&self, flavors: &BTreeSet<Flavor>) -> bool;

  fn flavor_domains(&self) -> Option<Vec<&FlavorDomain<CxxPlatform>>> {
    None
  }
}

/// A handler for one rule type.
pub trait Description: Send + Sync + 'static {
  type Args: fmt::Debug + Send + Sync + 'static;

  fn rule_type(&self) -> RuleType;

  fn category(&self) -> RuleCategory {
    RuleCategory::Other
  }

  /// Targets named by dependency-typed argument fields.
  fn declared_deps(&self, _args: &Self::Args) -> BTreeSet<BuildTarget> {
    BTreeSet::new()
  }

  /// Deps whose consumers also see them, e.g. a library's exported deps.
  fn exported_deps(&self, _args: &Self::Args) -> BTreeSet<BuildTarget> {
    BTreeSet::new()
  }

  /// Targets named inside non-dependency arguments. These become graph edges when the
  /// node is parsed; how each one is used is left to [`ImplicitDepsInferring`].
  fn parse_time_deps(
    &self,
    _target: &BuildTarget,
    _args: &Self::Args,
  ) -> Result<BTreeSet<BuildTarget>, BuildTargetError> {
    Ok(BTreeSet::new())
  }

  /// The binary a bundle wraps.
  fn bundle_binary(&self, _args: &Self::Args) -> Option<BuildTarget> {
    None
  }

  fn preferred_linkage(&self, _args: &Self::Args) -> Linkage {
    Linkage::Any
  }

  /// Whether recursive traversal walks through nodes of this type.
  fn walks_dependencies(&self) -> bool {
    true
  }

  fn implicit_deps(&self) -> Option<&dyn ImplicitDepsInferring<Self::Args>> {
    None
  }

  fn implicit_inputs(&self) -> Option<&dyn ImplicitInputsInferring<Self::Args>> {
    None
  }

  fn flavored(&self) -> Option<&dyn Flavored> {
    None
  }

  fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &Self::Args,
  ) -> Result<BuildRule, ResolveError>;
}

/// A description paired with one node's arguments, with the argument type erased.
pub(crate) trait DescribedNode: fmt::Debug + Send + Sync {
  fn rule_type(&self) -> RuleType;
  fn category(&self) -> RuleCategory;
  fn declared_deps(&self) -> BTreeSet<BuildTarget>;
  fn exported_deps(&self) -> BTreeSet<BuildTarget>;
  fn bundle_binary(&self) -> Option<BuildTarget>;
  fn preferred_linkage(&self) -> Linkage;
  fn walks_dependencies(&self) -> bool;
  fn flavored(&self) -> Option<&dyn Flavored>;
  fn parse_time_deps(&self, target: &BuildTarget) -> Result<BTreeSet<BuildTarget>, BuildTargetError>;
  fn infer_implicit_inputs(&self, target: &BuildTarget) -> Vec<PathBuf>;
  fn infer_implicit_deps(
    &self,
    target: &BuildTarget,
    cells: &dyn CellPathResolver,
  ) -> Result<Option<ImplicitDeps>, BuildTargetError>;
  fn create_build_rule(&self, ctx: &RuleContext<'_>, params: BuildRuleParams) -> Result<BuildRule, ResolveError>;
  fn args(&self) -> &dyn Any;
}

pub(crate) struct Described<D: Description> {
  description: Arc<D>,
  args: D::Args,
}

impl<D: Description> Described<D> {
  pub(crate) fn new(description: Arc<D>, args: D::Args) -> Self {
    Self { description, args }
  }
}

impl<D: Description> fmt::Debug for Described<D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Described")
      .field("rule_type", &self.description.rule_type())
      .field("args", &self.args)
      .finish()
  }
}

impl<D: Description> DescribedNode for Described<D> {
  fn rule_type(&self) -> RuleType {
    self.description.rule_type()
  }

  fn category(&self) -> RuleCategory {
    self.description.category()
  }

  fn declared_deps(&self) -> BTreeSet<BuildTarget> {
    self.description.declared_deps(&self.args)
  }

  fn exported_deps(&self) -> BTreeSet<BuildTarget> {
    self.description.exported_deps(&self.args)
  }

  fn bundle_binary(&self) -> Option<BuildTarget> {
    self.description.bundle_binary(&self.args)
  }

  fn preferred_linkage(&self) -> Linkage {
    self.description.preferred_linkage(&self.args)
  }

  fn walks_dependencies(&self) -> bool {
    self.description.walks_dependencies()
  }

  fn flavored(&self) -> Option<&dyn Flavored> {
    self.description.flavored()
  }

  fn parse_time_deps(&self, target: &BuildTarget) -> Result<BTreeSet<BuildTarget>, BuildTargetError> {
    self.description.parse_time_deps(target, &self.args)
  }

  fn infer_implicit_inputs(&self, target: &BuildTarget) -> Vec<PathBuf> {
    match self.description.implicit_inputs() {
      Some(inferring) => inferring.inputs_from_args(target, &self.args),
      None => Vec::new(),
    }
  }

  fn infer_implicit_deps(
    &self,
    target: &BuildTarget,
    cells: &dyn CellPathResolver,
  ) -> Result<Option<ImplicitDeps>, BuildTargetError> {
    match self.description.implicit_deps() {
      Some(inferring) => inferring.find_deps_from_args(target, cells, &self.args).map(Some),
      None => Ok(None),
    }
  }

  fn create_build_rule(&self, ctx: &RuleContext<'_>, params: BuildRuleParams) -> Result<BuildRule, ResolveError> {
    self.description.create_build_rule(ctx, params, &self.args)
  }

  fn args(&self) -> &dyn Any {
    &self.args
  }
}
