use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::trace;

use super::build_rule::{BuildRule, BuildRuleParams, RuleSet};
use super::resolver::{ResolveError, RuleContext};
use crate::graph::TargetNode;
use crate::target::BuildTarget;

/// Turns one target node into its build rule.
pub trait TargetNodeToBuildRuleTransformer: Send + Sync {
  fn transform(&self, ctx: &RuleContext<'_>, node: &TargetNode) -> Result<BuildRule, ResolveError>;
}

/// Resolves a node's deps through the resolver and hands them to the node's description.
///
/// This is the one place implicit deps are inferred: they are unioned with the
/// node's own extra and target-graph-only deps before resolution. Source files the
/// description names are resolved against the target's cell and package and
/// passed on as rule inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTargetNodeToBuildRuleTransformer;

impl TargetNodeToBuildRuleTransformer for DefaultTargetNodeToBuildRuleTransformer {
  fn transform(&self, ctx: &RuleContext<'_>, node: &TargetNode) -> Result<BuildRule, ResolveError> {
    let mut extra_deps = node.extra_deps().clone();
    let mut target_graph_only_deps = node.target_graph_only_deps().clone();
    if let Some(implicit) = node.infer_implicit_deps()? {
      trace!(
        target = %node.target(),
        extra = implicit.extra.len(),
        target_graph_only = implicit.target_graph_only.len(),
        "inferred implicit deps"
      );
      extra_deps.extend(implicit.extra);
      target_graph_only_deps.extend(implicit.target_graph_only);
    }

    let resolve = |targets: &BTreeSet<BuildTarget>| -> Result<RuleSet, ResolveError> {
      targets
        .iter()
        .map(|dep| ctx.resolver.require_rule(dep).map_err(|e| e.referenced_by(node.target())))
        .collect()
    };

    let params = BuildRuleParams::new(
      node.target().clone(),
      resolve(node.declared_deps())?,
      resolve(&extra_deps)?,
      resolve(&target_graph_only_deps)?,
    )
    .with_inputs(package_inputs(ctx, node)?);

    let rule = node.create_build_rule(ctx, params)?;
    if rule.target() != node.target() {
      return Err(ResolveError::TargetMismatch {
        expected: node.target().clone(),
        actual: rule.target().clone(),
      });
    }
    Ok(rule)
  }
}

/// The node's source files, joined onto its cell root and package directory.
fn package_inputs(ctx: &RuleContext<'_>, node: &TargetNode) -> Result<Vec<PathBuf>, ResolveError> {
  let sources = node.infer_implicit_inputs();
  if sources.is_empty() {
    return Ok(sources);
  }

  let target = node.target();
  let cell_root = ctx
    .cells
    .cell_path(target.cell())
    .ok_or_else(|| ResolveError::InvalidArgs {
      target: target.clone(),
      message: format!("unknown cell '{}'", target.cell().map(|c| c.as_str()).unwrap_or_default()),
    })?;
  let package = target
    .base_path()
    .split('/')
    .filter(|segment| !segment.is_empty())
    .fold(cell_root, |path, segment| path.join(segment));
  Ok(sources.into_iter().map(|source| package.join(source)).collect())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::description::builtin::{GenruleArgs, GenruleDescription};
  use crate::description::{Description, ImplicitDeps, ImplicitDepsInferring, RuleType};
  use crate::graph::TargetGraph;
  use crate::rules::BuildRuleResolver;
  use crate::target::{BuildTargetError, CellPathResolver};
  use crate::util::testutil::{genrule, lib, t};

  /// Names one dep in its args and counts how often it is asked to infer deps.
  #[derive(Default)]
  struct CountingInference {
    inferred: AtomicUsize,
  }

  impl ImplicitDepsInferring<BuildTarget> for CountingInference {
    fn find_deps_from_args(
      &self,
      _target: &BuildTarget,
      _cells: &dyn CellPathResolver,
      dep: &BuildTarget,
    ) -> Result<ImplicitDeps, BuildTargetError> {
      self.inferred.fetch_add(1, Ordering::SeqCst);
      Ok(ImplicitDeps {
        extra: BTreeSet::from([dep.clone()]),
        target_graph_only: BTreeSet::new(),
      })
    }
  }

  impl Description for CountingInference {
    type Args = BuildTarget;

    fn rule_type(&self) -> RuleType {
      RuleType::new("counting_inference")
    }

    fn parse_time_deps(
      &self,
      _target: &BuildTarget,
      dep: &BuildTarget,
    ) -> Result<BTreeSet<BuildTarget>, BuildTargetError> {
      Ok(BTreeSet::from([dep.clone()]))
    }

    fn implicit_deps(&self) -> Option<&dyn ImplicitDepsInferring<BuildTarget>> {
      Some(self)
    }

    fn create_build_rule(
      &self,
      _ctx: &RuleContext<'_>,
      params: BuildRuleParams,
      _dep: &BuildTarget,
    ) -> Result<BuildRule, ResolveError> {
      Ok(BuildRule::builder(params, self.rule_type()).build())
    }
  }

  #[test]
  fn implicit_deps_are_inferred_once_per_rule() {
    let description = Arc::new(CountingInference::default());
    let node = TargetNode::builder(t("//app:uses"), description.clone(), t("//lib:used"))
      .build()
      .unwrap();
    assert_eq!(description.inferred.load(Ordering::SeqCst), 0);
    assert!(node.extra_deps().is_empty());
    assert!(node.parse_deps().contains(&t("//lib:used")));

    let graph = Arc::new(TargetGraph::new([node, lib("//lib:used", &[])]).unwrap());
    let dependents: Vec<String> = graph
      .dependents(&t("//lib:used"))
      .iter()
      .map(|n| n.target().to_string())
      .collect();
    assert_eq!(dependents, vec!["//app:uses"]);

    let resolver = BuildRuleResolver::new(graph);
    let rule = resolver.require_rule(&t("//app:uses")).unwrap();
    assert_eq!(description.inferred.load(Ordering::SeqCst), 1);
    let extra: Vec<String> = rule.extra_deps().iter().map(|r| r.target().to_string()).collect();
    assert_eq!(extra, vec!["//lib:used"]);
  }

  #[test]
  fn genrule_srcs_become_package_relative_inputs() {
    let args = GenruleArgs {
      cmd: "cat $SRCS > $OUT".to_string(),
      out: "copy.txt".to_string(),
      srcs: vec!["input.txt".to_string(), "data/more.txt".to_string()],
    };
    let node = TargetNode::builder(t("//gen/sub:copy"), Arc::new(GenruleDescription), args)
      .build()
      .unwrap();
    let resolver = BuildRuleResolver::new(Arc::new(TargetGraph::new([node]).unwrap()));

    let rule = resolver.require_rule(&t("//gen/sub:copy")).unwrap();
    let inputs: Vec<PathBuf> = rule.inputs().iter().cloned().collect();
    assert_eq!(
      inputs,
      vec![PathBuf::from("./gen/sub/data/more.txt"), PathBuf::from("./gen/sub/input.txt")]
    );
  }

  #[test]
  fn inferred_deps_split_into_extra_and_target_graph_only() {
    let graph = TargetGraph::new([
      lib("//tools:gen", &[]),
      lib("//lib:query", &[]),
      genrule("//app:gen", "$(exe //tools:gen) --query $(query_targets //lib:query) > $OUT"),
    ])
    .unwrap();
    let resolver = BuildRuleResolver::new(Arc::new(graph));

    let rule = resolver.require_rule(&t("//app:gen")).unwrap();
    let extra: Vec<String> = rule.extra_deps().iter().map(|r| r.target().to_string()).collect();
    let tgo: Vec<String> = rule.target_graph_only_deps().iter().map(|r| r.target().to_string()).collect();
    let build: Vec<String> = rule.build_deps().iter().map(|r| r.target().to_string()).collect();

    assert_eq!(extra, vec!["//tools:gen"]);
    assert_eq!(tgo, vec!["//lib:query"]);
    assert_eq!(build, vec!["//tools:gen"]);
  }

  #[test]
  fn resolving_all_deps_reuses_rules() {
    let graph = TargetGraph::new([lib("//a:shared", &[]), lib("//a:x", &["//a:shared"]), lib("//a:y", &["//a:shared"])])
      .unwrap();
    let resolver = BuildRuleResolver::new(Arc::new(graph));
    let rules = resolver.require_all_rules([&t("//a:x"), &t("//a:y")]).unwrap();
    let from_x = rules[0].build_deps().iter().next().unwrap().clone();
    let from_y = rules[1].build_deps().iter().next().unwrap().clone();
    assert!(Arc::ptr_eq(&from_x, &from_y));
  }
}
