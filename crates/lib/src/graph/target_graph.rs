//! The immutable, validated graph of target nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use super::node::TargetNode;
use super::traversal::{CycleError, breadth_first};
use crate::target::BuildTarget;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("duplicate target in graph: {target}")]
  DuplicateTarget { target: BuildTarget },

  #[error("{target} depends on {dependency}, which is not in the target graph")]
  MissingDependency { target: BuildTarget, dependency: BuildTarget },

  #[error("no such target in the target graph: {target}")]
  NoSuchNode { target: BuildTarget },

  #[error(transparent)]
  Cycle(#[from] CycleError),
}

/// Declarative dependency graph of target nodes.
///
/// Edges point from a node to each of its parse deps (declared, extra and
/// target-graph-only). A dependency may name a flavored variant of a declared
/// node when that node's description accepts the flavors.
pub struct TargetGraph {
  graph: DiGraph<BuildTarget, ()>,
  indices: HashMap<BuildTarget, NodeIndex>,
  nodes: BTreeMap<BuildTarget, TargetNode>,
}

impl TargetGraph {
  /// Build a graph, rejecting duplicates, dangling edges and cycles.
  pub fn new(nodes: impl IntoIterator<Item = TargetNode>) -> Result<Self, GraphError> {
    let graph = Self::new_unchecked(nodes)?;
    graph.verify_acyclic()?;
    debug!(nodes = graph.nodes.len(), edges = graph.graph.edge_count(), "target graph built");
    Ok(graph)
  }

  /// Build a graph without the cycle check. Traversals over it still fail on cycles.
  pub(crate) fn new_unchecked(nodes: impl IntoIterator<Item = TargetNode>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    let mut by_target = BTreeMap::new();

    for node in nodes {
      let target = node.target().clone();
      if by_target.contains_key(&target) {
        return Err(GraphError::DuplicateTarget { target });
      }
      indices.insert(target.clone(), graph.add_node(target.clone()));
      by_target.insert(target, node);
    }

    let mut target_graph = Self {
      graph,
      indices,
      nodes: by_target,
    };

    let mut edges = Vec::new();
    for (target, node) in &target_graph.nodes {
      for dep in node.parse_deps() {
        let dep_idx = target_graph
          .index_of(&dep)
          .ok_or_else(|| GraphError::MissingDependency {
            target: target.clone(),
            dependency: dep.clone(),
          })?;
        edges.push((target_graph.indices[target], dep_idx));
      }
    }
    for (from, to) in edges {
      target_graph.graph.update_edge(from, to, ());
    }

    Ok(target_graph)
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    for component in tarjan_scc(&self.graph) {
      let is_cycle = component.len() > 1 || self.graph.contains_edge(component[0], component[0]);
      if is_cycle {
        let mut path: Vec<String> = component.iter().map(|idx| self.graph[*idx].to_string()).collect();
        path.sort();
        if let Some(first) = path.first().cloned() {
          path.push(first);
        }
        return Err(CycleError { path }.into());
      }
    }
    Ok(())
  }

  /// Index of the declared node that satisfies `target`, directly or as a flavored variant.
  fn index_of(&self, target: &BuildTarget) -> Option<NodeIndex> {
    if let Some(idx) = self.indices.get(target) {
      return Some(*idx);
    }
    self.flavored_base(target).and_then(|base| self.indices.get(base.target()).copied())
  }

  fn flavored_base(&self, target: &BuildTarget) -> Option<&TargetNode> {
    if !target.is_flavored() {
      return None;
    }
    let base = self.nodes.get(&target.without_all_flavors())?;
    let flavored = base.flavored()?;
    flavored.has_flavors(target.flavors()).then_some(base)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// The node declared for exactly `target`.
  pub fn get(&self, target: &BuildTarget) -> Option<&TargetNode> {
    self.nodes.get(target)
  }

  pub fn require(&self, target: &BuildTarget) -> Result<&TargetNode, GraphError> {
    self.get(target).ok_or_else(|| GraphError::NoSuchNode { target: target.clone() })
  }

  /// The node for `target`, deriving a flavored variant from the unflavored declaration
  /// when its description accepts the requested flavors.
  pub fn get_flavored(&self, target: &BuildTarget) -> Option<TargetNode> {
    if let Some(node) = self.nodes.get(target) {
      return Some(node.clone());
    }
    self.flavored_base(target).map(|base| base.with_target(target.clone()))
  }

  pub fn require_flavored(&self, target: &BuildTarget) -> Result<TargetNode, GraphError> {
    self
      .get_flavored(target)
      .ok_or_else(|| GraphError::NoSuchNode { target: target.clone() })
  }

  /// Nodes for each of `targets`, in natural order.
  pub fn get_all<'a>(
    &self,
    targets: impl IntoIterator<Item = &'a BuildTarget>,
  ) -> Result<BTreeSet<TargetNode>, GraphError> {
    targets.into_iter().map(|t| self.require_flavored(t)).collect()
  }

  pub fn nodes(&self) -> impl Iterator<Item = &TargetNode> {
    self.nodes.values()
  }

  pub fn targets(&self) -> impl Iterator<Item = &BuildTarget> {
    self.nodes.keys()
  }

  /// Declared nodes with an edge to `target`.
  pub fn dependents(&self, target: &BuildTarget) -> Vec<&TargetNode> {
    let Some(&idx) = self.indices.get(target) else {
      return Vec::new();
    };
    let mut dependents: Vec<&TargetNode> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .filter_map(|dep_idx| self.nodes.get(&self.graph[dep_idx]))
      .collect();
    dependents.sort();
    dependents.dedup();
    dependents
  }

  /// Every node, dependencies before dependents; ties broken by natural target order.
  pub fn topological_sort(&self) -> Result<Vec<TargetNode>, GraphError> {
    let mut remaining: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Outgoing).count()))
      .collect();

    let mut ready: BTreeSet<&BuildTarget> = remaining
      .iter()
      .filter(|(_, deps)| **deps == 0)
      .map(|(idx, _)| &self.graph[*idx])
      .collect();

    let mut sorted = Vec::with_capacity(self.nodes.len());
    while let Some(target) = ready.pop_first() {
      let idx = self.indices[target];
      for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if let Some(count) = remaining.get_mut(&dependent) {
          *count -= 1;
          if *count == 0 {
            ready.insert(&self.graph[dependent]);
          }
        }
      }
      sorted.push(self.nodes[target].clone());
    }

    if sorted.len() != self.nodes.len() {
      let stuck: Vec<String> = remaining
        .iter()
        .filter(|(_, deps)| **deps > 0)
        .map(|(idx, _)| self.graph[*idx].to_string())
        .collect();
      return Err(CycleError { path: stuck }.into());
    }
    Ok(sorted)
  }

  /// The graph restricted to everything reachable from `roots`.
  pub fn subgraph<'a>(&self, roots: impl IntoIterator<Item = &'a BuildTarget>) -> Result<TargetGraph, GraphError> {
    let roots: Vec<TargetNode> = roots.into_iter().map(|t| self.require(t).cloned()).collect::<Result<_, _>>()?;
    let reachable = breadth_first(roots, |node: &TargetNode| {
      node
        .parse_deps()
        .iter()
        .map(|dep| self.declared_for(dep).cloned())
        .collect::<Result<Vec<_>, GraphError>>()
    })?;
    Self::new_unchecked(reachable)
  }

  fn declared_for(&self, target: &BuildTarget) -> Result<&TargetNode, GraphError> {
    self
      .index_of(target)
      .and_then(|idx| self.nodes.get(&self.graph[idx]))
      .ok_or_else(|| GraphError::NoSuchNode { target: target.clone() })
  }
}

impl std::fmt::Debug for TargetGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TargetGraph").field("nodes", &self.nodes.keys()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{cycle_nodes, diamond_graph, lib, t};

  #[test]
  fn rejects_duplicates() {
    let err = TargetGraph::new([lib("//a:a", &[]), lib("//a:a", &[])]).unwrap_err();
    assert_eq!(err, GraphError::DuplicateTarget { target: t("//a:a") });
  }

  #[test]
  fn rejects_missing_dependency() {
    let err = TargetGraph::new([lib("//a:a", &["//b:b"])]).unwrap_err();
    assert_eq!(
      err,
      GraphError::MissingDependency {
        target: t("//a:a"),
        dependency: t("//b:b"),
      }
    );
  }

  #[test]
  fn rejects_cycles_at_construction() {
    let err = TargetGraph::new(cycle_nodes()).unwrap_err();
    match err {
      GraphError::Cycle(cycle) => {
        assert_eq!(cycle.path, vec!["//cycle:a", "//cycle:b", "//cycle:c", "//cycle:a"]);
      }
      other => panic!("expected cycle, got {:?}", other),
    }
  }

  #[test]
  fn topological_sort_breaks_ties_by_target() {
    let graph = diamond_graph();
    let order: Vec<String> = graph
      .topological_sort()
      .unwrap()
      .iter()
      .map(|n| n.target().to_string())
      .collect();
    assert_eq!(order, vec!["//lib:d", "//lib:c", "//lib:a", "//lib:b", "//app:root"]);
  }

  #[test]
  fn dependents_are_reverse_edges() {
    let graph = diamond_graph();
    let dependents: Vec<String> = graph
      .dependents(&t("//lib:c"))
      .iter()
      .map(|n| n.target().to_string())
      .collect();
    assert_eq!(dependents, vec!["//lib:a", "//lib:b"]);
  }

  #[test]
  fn flavored_lookup_derives_variants() {
    let graph = diamond_graph();
    let shared = t("//lib:c#shared");
    assert!(graph.get(&shared).is_none());
    let node = graph.get_flavored(&shared).unwrap();
    assert_eq!(node.target(), &shared);
    assert!(node.is_shared_library());
    assert!(graph.get_flavored(&t("//lib:c#no-such-flavor")).is_none());
  }

  #[test]
  fn subgraph_is_transitive_closure() {
    let graph = diamond_graph();
    let sub = graph.subgraph([&t("//lib:a")]).unwrap();
    let targets: Vec<String> = sub.targets().map(|t| t.to_string()).collect();
    assert_eq!(targets, vec!["//lib:a", "//lib:c", "//lib:d"]);
  }
}
