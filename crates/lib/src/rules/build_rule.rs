use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::description::RuleType;
use crate::target::BuildTarget;

/// Rules ordered by target, then rule type.
pub type RuleSet = BTreeSet<Arc<BuildRule>>;

/// A command that produces a rule's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
  pub program: String,
  pub args: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

impl RuleAction {
  pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      program: program.into(),
      args: args.into_iter().map(Into::into).collect(),
      env: BTreeMap::new(),
    }
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// A POSIX shell invocation of `script`.
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new("sh", ["-c".to_string(), script.into()])
  }
}

impl fmt::Display for RuleAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// Resolved dependencies handed to a description when it creates a rule.
///
/// Target-graph-only rules that are also build deps are dropped from the
/// target-graph-only set, so build deps and target-graph-only deps never overlap.
#[derive(Debug, Clone)]
pub struct BuildRuleParams {
  target: BuildTarget,
  declared_deps: RuleSet,
  extra_deps: RuleSet,
  target_graph_only_deps: RuleSet,
  inputs: BTreeSet<PathBuf>,
}

impl BuildRuleParams {
  pub fn new(target: BuildTarget, declared_deps: RuleSet, extra_deps: RuleSet, target_graph_only_deps: RuleSet) -> Self {
    let target_graph_only_deps = target_graph_only_deps
      .into_iter()
      .filter(|rule| !declared_deps.contains(rule) && !extra_deps.contains(rule))
      .collect();
    Self {
      target,
      declared_deps,
      extra_deps,
      target_graph_only_deps,
      inputs: BTreeSet::new(),
    }
  }

  /// Source files the rule reads, relative to the project root unless absolute.
  pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = PathBuf>) -> Self {
    self.inputs.extend(inputs);
    self
  }

  pub fn target(&self) -> &BuildTarget {
    &self.target
  }

  pub fn declared_deps(&self) -> &RuleSet {
    &self.declared_deps
  }

  pub fn extra_deps(&self) -> &RuleSet {
    &self.extra_deps
  }

  pub fn target_graph_only_deps(&self) -> &RuleSet {
    &self.target_graph_only_deps
  }

  pub fn inputs(&self) -> &BTreeSet<PathBuf> {
    &self.inputs
  }

  /// The same deps for a different target.
  pub fn with_target(self, target: BuildTarget) -> Self {
    Self { target, ..self }
  }

  /// Replace the declared deps.
  pub fn with_declared_deps(self, declared_deps: RuleSet) -> Self {
    Self::new(self.target, declared_deps, self.extra_deps, self.target_graph_only_deps).with_inputs(self.inputs)
  }
}

/// A concrete, buildable unit created from one target node.
///
/// Identity is the `(target, rule type)` pair.
pub struct BuildRule {
  target: BuildTarget,
  rule_type: RuleType,
  declared_deps: RuleSet,
  extra_deps: RuleSet,
  target_graph_only_deps: RuleSet,
  build_deps: OnceCell<RuleSet>,
  inputs: BTreeSet<PathBuf>,
  output: Option<PathBuf>,
  action: Option<RuleAction>,
  attributes: BTreeMap<String, String>,
}

impl BuildRule {
  pub fn builder(params: BuildRuleParams, rule_type: RuleType) -> BuildRuleBuilder {
    BuildRuleBuilder {
      params,
      rule_type,
      output: None,
      action: None,
      attributes: BTreeMap::new(),
    }
  }

  pub fn target(&self) -> &BuildTarget {
    &self.target
  }

  pub fn rule_type(&self) -> RuleType {
    self.rule_type
  }

  pub fn declared_deps(&self) -> &RuleSet {
    &self.declared_deps
  }

  pub fn extra_deps(&self) -> &RuleSet {
    &self.extra_deps
  }

  /// Rules this one depends on only for graph traversal. Never part of [`BuildRule::build_deps`].
  pub fn target_graph_only_deps(&self) -> &RuleSet {
    &self.target_graph_only_deps
  }

  /// Declared and extra deps: everything that must be built first.
  pub fn build_deps(&self) -> &RuleSet {
    self
      .build_deps
      .get_or_init(|| self.declared_deps.union(&self.extra_deps).cloned().collect())
  }

  /// Source files whose contents feed the rule key.
  pub fn inputs(&self) -> &BTreeSet<PathBuf> {
    &self.inputs
  }

  /// Output path, relative to the project root.
  pub fn output(&self) -> Option<&Path> {
    self.output.as_deref()
  }

  pub fn action(&self) -> Option<&RuleAction> {
    self.action.as_ref()
  }

  pub fn attributes(&self) -> &BTreeMap<String, String> {
    &self.attributes
  }
}

impl PartialEq for BuildRule {
  fn eq(&self, other: &Self) -> bool {
    self.target == other.target && self.rule_type == other.rule_type
  }
}

impl Eq for BuildRule {}

impl PartialOrd for BuildRule {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for BuildRule {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .target
      .cmp(&other.target)
      .then_with(|| self.rule_type.cmp(&other.rule_type))
  }
}

impl Hash for BuildRule {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.target.hash(state);
    self.rule_type.hash(state);
  }
}

impl fmt::Debug for BuildRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names = |rules: &RuleSet| rules.iter().map(|r| r.target.to_string()).collect::<Vec<_>>();
    f.debug_struct("BuildRule")
      .field("target", &self.target.to_string())
      .field("rule_type", &self.rule_type.name())
      .field("declared_deps", &names(&self.declared_deps))
      .field("extra_deps", &names(&self.extra_deps))
      .field("target_graph_only_deps", &names(&self.target_graph_only_deps))
      .field("inputs", &self.inputs)
      .field("output", &self.output)
      .field("action", &self.action)
      .finish()
  }
}

impl fmt::Display for BuildRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.target, self.rule_type)
  }
}

pub struct BuildRuleBuilder {
  params: BuildRuleParams,
  rule_type: RuleType,
  output: Option<PathBuf>,
  action: Option<RuleAction>,
  attributes: BTreeMap<String, String>,
}

impl BuildRuleBuilder {
  pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
    self.output = Some(output.into());
    self
  }

  pub fn action(mut self, action: RuleAction) -> Self {
    self.action = Some(action);
    self
  }

  /// A source file read by the rule, in addition to those in the params.
  pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
    self.params.inputs.insert(path.into());
    self
  }

  /// A value that feeds the rule key.
  pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.attributes.insert(key.into(), value.into());
    self
  }

  pub fn build(self) -> BuildRule {
    BuildRule {
      target: self.params.target,
      rule_type: self.rule_type,
      declared_deps: self.params.declared_deps,
      extra_deps: self.params.extra_deps,
      target_graph_only_deps: self.params.target_graph_only_deps,
      build_deps: OnceCell::new(),
      inputs: self.params.inputs,
      output: self.output,
      action: self.action,
      attributes: self.attributes,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const LEAF: RuleType = RuleType::new("leaf");

  fn leaf(target: &str) -> Arc<BuildRule> {
    let params = BuildRuleParams::new(target.parse().unwrap(), RuleSet::new(), RuleSet::new(), RuleSet::new());
    Arc::new(BuildRule::builder(params, LEAF).build())
  }

  #[test]
  fn build_deps_exclude_target_graph_only() {
    let a = leaf("//x:a");
    let b = leaf("//x:b");
    let c = leaf("//x:c");
    let params = BuildRuleParams::new(
      "//x:top".parse().unwrap(),
      RuleSet::from([a.clone()]),
      RuleSet::from([b.clone()]),
      RuleSet::from([b.clone(), c.clone()]),
    );
    let rule = BuildRule::builder(params, LEAF).build();

    assert_eq!(rule.build_deps(), &RuleSet::from([a, b]));
    assert_eq!(rule.target_graph_only_deps(), &RuleSet::from([c.clone()]));
    assert!(!rule.build_deps().contains(&c));
  }

  #[test]
  fn identity_is_target_and_type() {
    let one = leaf("//x:a");
    let two = leaf("//x:a");
    assert_eq!(one, two);
    let params = BuildRuleParams::new("//x:a".parse().unwrap(), RuleSet::new(), RuleSet::new(), RuleSet::new());
    let other_type = BuildRule::builder(params, RuleType::new("other")).build();
    assert_ne!(*one, other_type);
  }

  #[test]
  fn shell_action_display() {
    let action = RuleAction::shell("echo hi > out");
    assert_eq!(action.to_string(), "sh -c echo hi > out");
  }
}
