//! Mode-sensitive recursive dependency collection over the target graph.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::deps_cache::{DependencyCache, DirectDeps, direct_and_exported_deps};
use super::node::TargetNode;
use super::target_graph::{GraphError, TargetGraph};
use super::traversal::AcyclicDepthFirstPostOrderTraversal;
use crate::description::{RuleCategory, RuleType};

/// Which edges propagate during a recursive walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecursiveDependenciesMode {
  /// Everything needed to build the root.
  Building,
  /// Resources to copy; bundles and resources only pass on their exports.
  Copying,
  /// Libraries to link; shared libraries only pass on their exports.
  Linking,
}

impl fmt::Display for RecursiveDependenciesMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Building => "building",
      Self::Copying => "copying",
      Self::Linking => "linking",
    };
    f.write_str(name)
  }
}

impl std::str::FromStr for RecursiveDependenciesMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "building" => Ok(Self::Building),
      "copying" => Ok(Self::Copying),
      "linking" => Ok(Self::Linking),
      other => Err(format!("unknown traversal mode '{}'", other)),
    }
  }
}

fn lookup(graph: &TargetGraph, cache: Option<&DependencyCache>, node: &TargetNode) -> Result<DirectDeps, GraphError> {
  match cache {
    Some(cache) => Ok(cache.get(node)?.as_ref().clone()),
    None => direct_and_exported_deps(graph, node),
  }
}

/// Deps of `node` with a bundle's edge to its own binary replaced by the binary's deps.
fn rewrite_bundle_binary(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  node: &TargetNode,
  deps: DirectDeps,
) -> Result<DirectDeps, GraphError> {
  let Some(binary) = node.bundle_binary().filter(|_| node.category() == RuleCategory::Bundle) else {
    return Ok(deps);
  };

  let mut edited = DirectDeps::default();
  let binary_deps = match graph.get_flavored(&binary) {
    Some(binary_node) => Some(lookup(graph, cache, &binary_node)?),
    None => None,
  };

  for dep in deps.default {
    if dep.target() != &binary {
      edited.default.insert(dep);
    } else if let Some(binary_deps) = &binary_deps {
      edited.default.extend(binary_deps.default.iter().cloned());
      edited.exported.extend(binary_deps.exported.iter().cloned());
    }
  }
  for dep in deps.exported {
    if dep.target() != &binary {
      edited.exported.insert(dep);
    } else if let Some(binary_deps) = &binary_deps {
      edited.default.extend(binary_deps.default.iter().cloned());
      edited.exported.extend(binary_deps.exported.iter().cloned());
    }
  }
  Ok(edited)
}

fn walked_deps(mode: RecursiveDependenciesMode, node: &TargetNode, deps: DirectDeps) -> BTreeSet<TargetNode> {
  let stops = node.category().stops_recursive_walk();
  match mode {
    RecursiveDependenciesMode::Linking if node.category() == RuleCategory::Library => {
      if node.is_shared_library() {
        deps.exported
      } else {
        deps.default
      }
    }
    RecursiveDependenciesMode::Linking | RecursiveDependenciesMode::Copying if stops => deps.exported,
    _ => deps.default,
  }
}

/// Every node reachable from `root` (excluding `root`) whose rule type is in `types`,
/// in dependency-first order.
///
/// The root walks its default and exported deps. Other nodes walk the edges `mode`
/// selects. Nodes whose description does not walk dependencies are leaves. When a
/// cache is supplied it must wrap the same graph.
pub fn get_recursive_target_node_dependencies_of_types(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  mode: RecursiveDependenciesMode,
  root: &TargetNode,
  types: Option<&BTreeSet<RuleType>>,
) -> Result<Vec<TargetNode>, GraphError> {
  let children = |node: &TargetNode| -> Result<Vec<TargetNode>, GraphError> {
    if !node.walks_dependencies() {
      return Ok(Vec::new());
    }

    let deps = lookup(graph, cache, node)?;
    let deps = rewrite_bundle_binary(graph, cache, node, deps)?;

    let walked: BTreeSet<TargetNode> = if node == root {
      deps.default.union(&deps.exported).cloned().collect()
    } else {
      walked_deps(mode, node, deps)
    };
    trace!(node = %node, %mode, children = walked.len(), "recursive deps");
    Ok(walked.into_iter().collect())
  };

  let order = AcyclicDepthFirstPostOrderTraversal::new(children).traverse([root.clone()])?;
  Ok(
    order
      .into_iter()
      .filter(|node| node != root)
      .filter(|node| types.is_none_or(|types| types.contains(&node.rule_type())))
      .collect(),
  )
}

/// The root plus everything it needs built, limited to nodes that walk dependencies.
pub fn get_schemes_buildable_nodes(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  root: &TargetNode,
) -> Result<Vec<TargetNode>, GraphError> {
  let mut nodes =
    get_recursive_target_node_dependencies_of_types(graph, cache, RecursiveDependenciesMode::Building, root, None)?;
  nodes.push(root.clone());
  nodes.retain(TargetNode::walks_dependencies);
  Ok(nodes)
}

fn collect_category(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  root: &TargetNode,
  category: RuleCategory,
) -> Result<Vec<TargetNode>, GraphError> {
  let nodes =
    get_recursive_target_node_dependencies_of_types(graph, cache, RecursiveDependenciesMode::Copying, root, None)?;
  Ok(nodes.into_iter().filter(|n| n.category() == category).collect())
}

pub fn collect_recursive_resources(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  root: &TargetNode,
) -> Result<Vec<TargetNode>, GraphError> {
  collect_category(graph, cache, root, RuleCategory::Resource)
}

pub fn collect_recursive_asset_catalogs(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  root: &TargetNode,
) -> Result<Vec<TargetNode>, GraphError> {
  collect_category(graph, cache, root, RuleCategory::AssetCatalog)
}

pub fn collect_recursive_wrapper_resources(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  root: &TargetNode,
) -> Result<Vec<TargetNode>, GraphError> {
  collect_category(graph, cache, root, RuleCategory::WrapperResource)
}

/// Nodes of `rule_type` reachable from any of `roots` in copying mode, deduplicated,
/// in the order first seen.
pub fn get_recursive_nodes_of_type<'a>(
  graph: &TargetGraph,
  cache: Option<&DependencyCache>,
  roots: impl IntoIterator<Item = &'a TargetNode>,
  rule_type: RuleType,
) -> Result<Vec<TargetNode>, GraphError> {
  let types = BTreeSet::from([rule_type]);
  let mut seen = BTreeSet::new();
  let mut collected = Vec::new();
  for root in roots {
    let nodes =
      get_recursive_target_node_dependencies_of_types(graph, cache, RecursiveDependenciesMode::Copying, root, Some(&types))?;
    for node in nodes {
      if seen.insert(node.clone()) {
        collected.push(node);
      }
    }
  }
  Ok(collected)
}
