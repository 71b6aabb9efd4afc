use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use super::node::TargetNode;
use super::target_graph::{GraphError, TargetGraph};
use crate::description::RuleCategory;
use crate::target::BuildTarget;

/// The default and exported dependency nodes of one target node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectDeps {
  /// Build deps plus exported deps.
  pub default: BTreeSet<TargetNode>,
  /// Deps a library re-exports to its consumers.
  pub exported: BTreeSet<TargetNode>,
}

/// Compute the direct and exported deps of `node`.
///
/// Both the cached and uncached traversal paths go through this function.
pub fn direct_and_exported_deps(graph: &TargetGraph, node: &TargetNode) -> Result<DirectDeps, GraphError> {
  let mut deps = DirectDeps {
    default: graph.get_all(&node.build_deps())?,
    exported: BTreeSet::new(),
  };
  if node.category() == RuleCategory::Library {
    let exported = graph.get_all(&node.exported_deps())?;
    deps.default.extend(exported.iter().cloned());
    deps.exported = exported;
  }
  Ok(deps)
}

/// Per-graph memo of [`direct_and_exported_deps`].
///
/// Entries are computed once, even when several threads ask for the same node at
/// the same time. The graph is immutable, so entries are never invalidated.
pub struct DependencyCache {
  graph: Arc<TargetGraph>,
  entries: DashMap<BuildTarget, Arc<OnceCell<Arc<DirectDeps>>>>,
}

impl DependencyCache {
  pub fn new(graph: Arc<TargetGraph>) -> Self {
    Self {
      graph,
      entries: DashMap::new(),
    }
  }

  pub fn graph(&self) -> &Arc<TargetGraph> {
    &self.graph
  }

  pub fn get(&self, node: &TargetNode) -> Result<Arc<DirectDeps>, GraphError> {
    let cell = self.entries.entry(node.target().clone()).or_default().clone();
    cell
      .get_or_try_init(|| direct_and_exported_deps(&self.graph, node).map(Arc::new))
      .cloned()
  }

  pub fn default_deps(&self, node: &TargetNode) -> Result<BTreeSet<TargetNode>, GraphError> {
    Ok(self.get(node)?.default.clone())
  }

  pub fn exported_deps(&self, node: &TargetNode) -> Result<BTreeSet<TargetNode>, GraphError> {
    Ok(self.get(node)?.exported.clone())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
