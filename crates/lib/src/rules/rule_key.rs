use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::build_rule::{BuildRule, RuleAction};
use crate::target::BuildTarget;
use crate::util::hash::{Fingerprint, HashError, Hashable, hash_file};

#[derive(Debug, Error)]
pub enum RuleKeyError {
  #[error("{target}: input {} does not exist", path.display())]
  MissingInput { target: BuildTarget, path: PathBuf },

  #[error("{target}: failed to read input {}: {source}", path.display())]
  Input {
    target: BuildTarget,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize rule key inputs: {0}")]
  Serialize(#[from] HashError),
}

/// Fingerprint of a rule's inputs. Equal keys mean the previous output can be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey(pub String);

impl fmt::Display for RuleKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Serialize)]
struct RuleKeyInputs<'a> {
  rule_type: &'a str,
  target: String,
  attributes: &'a BTreeMap<String, String>,
  action: Option<&'a RuleAction>,
  inputs: Vec<(String, Fingerprint)>,
  deps: Vec<(String, RuleKey)>,
}

impl Hashable for RuleKeyInputs<'_> {}

/// Computes rule keys, memoized per target.
///
/// A key covers the rule type, target, attributes, action, the contents of the
/// rule's input files, and the keys of the rule's build deps. Target-graph-only
/// deps do not contribute. Inputs are read relative to `root`.
pub struct RuleKeyFactory {
  root: PathBuf,
  keys: DashMap<BuildTarget, RuleKey>,
}

impl RuleKeyFactory {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      keys: DashMap::new(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn build(&self, rule: &Arc<BuildRule>) -> Result<RuleKey, RuleKeyError> {
    if let Some(key) = self.keys.get(rule.target()) {
      return Ok(key.clone());
    }

    let mut deps = Vec::with_capacity(rule.build_deps().len());
    for dep in rule.build_deps() {
      deps.push((dep.target().to_string(), self.build(dep)?));
    }

    let mut inputs = Vec::with_capacity(rule.inputs().len());
    for input in rule.inputs() {
      inputs.push(self.hash_input(rule.target(), input)?);
    }

    let key_inputs = RuleKeyInputs {
      rule_type: rule.rule_type().name(),
      target: rule.target().to_string(),
      attributes: rule.attributes(),
      action: rule.action(),
      inputs,
      deps,
    };
    let key = RuleKey(key_inputs.fingerprint()?.0);
    self.keys.insert(rule.target().clone(), key.clone());
    Ok(key)
  }

  pub fn get(&self, target: &BuildTarget) -> Option<RuleKey> {
    self.keys.get(target).map(|key| key.clone())
  }

  /// Content fingerprint of one input, named by its root-relative path so keys do
  /// not depend on where the project is checked out.
  fn hash_input(&self, target: &BuildTarget, input: &Path) -> Result<(String, Fingerprint), RuleKeyError> {
    let path = self.root.join(input);
    let fingerprint = hash_file(&path).map_err(|source| match source.kind() {
      io::ErrorKind::NotFound => RuleKeyError::MissingInput {
        target: target.clone(),
        path: path.clone(),
      },
      _ => RuleKeyError::Input {
        target: target.clone(),
        path: path.clone(),
        source,
      },
    })?;
    let relative: PathBuf = path
      .strip_prefix(&self.root)
      .unwrap_or(&path)
      .components()
      .filter(|c| !matches!(c, Component::CurDir))
      .collect();
    Ok((relative.to_string_lossy().replace('\\', "/"), fingerprint))
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::description::RuleType;
  use crate::rules::{BuildRuleParams, RuleSet};

  const LEAF: RuleType = RuleType::new("leaf");

  fn rule(target: &str, deps: RuleSet, tgo: RuleSet, attr: &str) -> Arc<BuildRule> {
    let params = BuildRuleParams::new(target.parse().unwrap(), deps, RuleSet::new(), tgo);
    Arc::new(
      BuildRule::builder(params, LEAF)
        .attribute("value", attr)
        .action(RuleAction::shell("true"))
        .build(),
    )
  }

  #[test]
  fn key_is_stable_and_memoized() {
    let factory = RuleKeyFactory::new(".");
    let leaf = rule("//k:leaf", RuleSet::new(), RuleSet::new(), "1");
    let first = factory.build(&leaf).unwrap();
    assert_eq!(first.0.len(), 64);
    assert_eq!(factory.get(leaf.target()), Some(first.clone()));
    assert_eq!(RuleKeyFactory::new(".").build(&leaf).unwrap(), first);
  }

  #[test]
  fn dep_changes_propagate() {
    let v1 = rule("//k:leaf", RuleSet::new(), RuleSet::new(), "1");
    let v2 = rule("//k:leaf", RuleSet::new(), RuleSet::new(), "2");
    let top_v1 = rule("//k:top", RuleSet::from([v1]), RuleSet::new(), "x");
    let top_v2 = rule("//k:top", RuleSet::from([v2]), RuleSet::new(), "x");
    assert_ne!(
      RuleKeyFactory::new(".").build(&top_v1).unwrap(),
      RuleKeyFactory::new(".").build(&top_v2).unwrap()
    );
  }

  #[test]
  fn target_graph_only_deps_do_not_contribute() {
    let v1 = rule("//k:query", RuleSet::new(), RuleSet::new(), "1");
    let v2 = rule("//k:query", RuleSet::new(), RuleSet::new(), "2");
    let with_v1 = rule("//k:top", RuleSet::new(), RuleSet::from([v1]), "x");
    let with_v2 = rule("//k:top", RuleSet::new(), RuleSet::from([v2]), "x");
    let without = rule("//k:top", RuleSet::new(), RuleSet::new(), "x");
    let key = RuleKeyFactory::new(".").build(&without).unwrap();
    assert_eq!(RuleKeyFactory::new(".").build(&with_v1).unwrap(), key);
    assert_eq!(RuleKeyFactory::new(".").build(&with_v2).unwrap(), key);
  }

  fn with_input(target: &str, input: &str) -> Arc<BuildRule> {
    let params = BuildRuleParams::new(target.parse().unwrap(), RuleSet::new(), RuleSet::new(), RuleSet::new())
      .with_inputs([PathBuf::from(input)]);
    Arc::new(BuildRule::builder(params, LEAF).action(RuleAction::shell("true")).build())
  }

  #[test]
  fn input_contents_change_the_key() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("src")).unwrap();
    std::fs::write(temp.path().join("src/a.c"), "int a;").unwrap();
    let rule = with_input("//src:a", "src/a.c");

    let before = RuleKeyFactory::new(temp.path()).build(&rule).unwrap();
    assert_eq!(RuleKeyFactory::new(temp.path()).build(&rule).unwrap(), before);

    std::fs::write(temp.path().join("src/a.c"), "int b;").unwrap();
    let after = RuleKeyFactory::new(temp.path()).build(&rule).unwrap();
    assert_ne!(before, after);
  }

  #[test]
  fn input_changes_propagate_to_dependents() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("leaf.txt"), "1").unwrap();
    let leaf = with_input("//k:leaf", "leaf.txt");
    let top = rule("//k:top", RuleSet::from([leaf]), RuleSet::new(), "x");

    let before = RuleKeyFactory::new(temp.path()).build(&top).unwrap();
    std::fs::write(temp.path().join("leaf.txt"), "2").unwrap();
    assert_ne!(RuleKeyFactory::new(temp.path()).build(&top).unwrap(), before);
  }

  #[test]
  fn keys_do_not_depend_on_checkout_location() {
    let one = TempDir::new().unwrap();
    let two = TempDir::new().unwrap();
    for temp in [&one, &two] {
      std::fs::write(temp.path().join("in.txt"), "same").unwrap();
    }
    let rule = with_input("//k:copy", "in.txt");
    assert_eq!(
      RuleKeyFactory::new(one.path()).build(&rule).unwrap(),
      RuleKeyFactory::new(two.path()).build(&rule).unwrap()
    );
  }

  #[test]
  fn missing_input_names_the_target() {
    let temp = TempDir::new().unwrap();
    let rule = with_input("//k:copy", "gone.txt");
    let err = RuleKeyFactory::new(temp.path()).build(&rule).unwrap_err();
    assert!(matches!(err, RuleKeyError::MissingInput { .. }));
    let message = err.to_string();
    assert!(message.starts_with("//k:copy: input "), "{}", message);
    assert!(message.ends_with("gone.txt does not exist"), "{}", message);
  }
}
