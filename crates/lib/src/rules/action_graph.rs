//! The graph of build rules reachable from a set of roots.
//!
//! Provides a deterministic topological order and parallel execution waves.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use super::build_rule::BuildRule;
use crate::graph::CycleError;
use crate::target::BuildTarget;

/// Build rules linked by their build deps. Edges run from dependency to dependent.
pub struct ActionGraph {
  graph: DiGraph<Arc<BuildRule>, ()>,
  nodes: HashMap<BuildTarget, NodeIndex>,
}

impl ActionGraph {
  /// Collect `roots` and everything they build-depend on.
  pub fn from_roots(roots: impl IntoIterator<Item = Arc<BuildRule>>) -> Self {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<BuildTarget, NodeIndex> = HashMap::new();
    let mut pending: Vec<Arc<BuildRule>> = roots.into_iter().collect();

    while let Some(rule) = pending.pop() {
      if nodes.contains_key(rule.target()) {
        continue;
      }
      nodes.insert(rule.target().clone(), graph.add_node(rule.clone()));
      pending.extend(rule.build_deps().iter().cloned());
    }

    let edges: Vec<(NodeIndex, NodeIndex)> = graph
      .node_indices()
      .flat_map(|idx| {
        let nodes = &nodes;
        graph[idx]
          .build_deps()
          .iter()
          .filter_map(move |dep| nodes.get(dep.target()).map(|dep_idx| (*dep_idx, idx)))
          .collect::<Vec<_>>()
      })
      .collect();
    for (from, to) in edges {
      graph.update_edge(from, to, ());
    }

    Self { graph, nodes }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn get(&self, target: &BuildTarget) -> Option<&Arc<BuildRule>> {
    self.nodes.get(target).map(|idx| &self.graph[*idx])
  }

  /// Rules grouped so that every rule's deps are in earlier waves.
  ///
  /// Each wave is in natural target order.
  pub fn waves(&self) -> Result<Vec<Vec<Arc<BuildRule>>>, CycleError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut ready: Vec<NodeIndex> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(i, _)| *i).collect();
    let mut waves = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
      let mut wave: Vec<Arc<BuildRule>> = ready.iter().map(|idx| self.graph[*idx].clone()).collect();
      wave.sort();
      placed += wave.len();

      let mut next = Vec::new();
      for idx in ready {
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree -= 1;
            if *degree == 0 {
              next.push(dependent);
            }
          }
        }
      }
      waves.push(wave);
      ready = next;
    }

    if placed != self.graph.node_count() {
      let path = in_degree
        .iter()
        .filter(|(_, d)| **d > 0)
        .map(|(idx, _)| self.graph[*idx].target().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
      return Err(CycleError { path });
    }
    Ok(waves)
  }

  /// Every rule, dependencies first, ties broken by natural target order.
  pub fn topological_order(&self) -> Result<Vec<Arc<BuildRule>>, CycleError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut ready: BTreeSet<(Arc<BuildRule>, NodeIndex)> = in_degree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(idx, _)| (self.graph[*idx].clone(), *idx))
      .collect();

    let mut order = Vec::with_capacity(self.graph.node_count());
    while let Some((rule, idx)) = ready.pop_first() {
      for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(degree) = in_degree.get_mut(&dependent) {
          *degree -= 1;
          if *degree == 0 {
            ready.insert((self.graph[dependent].clone(), dependent));
          }
        }
      }
      order.push(rule);
    }

    if order.len() != self.graph.node_count() {
      return Err(CycleError {
        path: order.iter().map(|r| r.target().to_string()).collect(),
      });
    }
    Ok(order)
  }

  /// Direct build deps of `target` inside this graph.
  pub fn dependencies(&self, target: &BuildTarget) -> Vec<Arc<BuildRule>> {
    let Some(&idx) = self.nodes.get(target) else {
      return Vec::new();
    };
    let mut deps: Vec<Arc<BuildRule>> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep].clone())
      .collect();
    deps.sort();
    deps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::description::RuleType;
  use crate::rules::{BuildRuleParams, RuleSet};

  fn rule(target: &str, deps: &[&Arc<BuildRule>]) -> Arc<BuildRule> {
    let deps: RuleSet = deps.iter().map(|d| (*d).clone()).collect();
    let params = BuildRuleParams::new(target.parse().unwrap(), deps, RuleSet::new(), RuleSet::new());
    Arc::new(BuildRule::builder(params, RuleType::new("leaf")).build())
  }

  fn targets(rules: &[Arc<BuildRule>]) -> Vec<String> {
    rules.iter().map(|r| r.target().to_string()).collect()
  }

  #[test]
  fn empty_graph() {
    let graph = ActionGraph::from_roots([]);
    assert!(graph.is_empty());
    assert!(graph.waves().unwrap().is_empty());
  }

  #[test]
  fn diamond_waves() {
    let d = rule("//w:d", &[]);
    let b = rule("//w:b", &[&d]);
    let c = rule("//w:c", &[&d]);
    let a = rule("//w:a", &[&b, &c]);
    let graph = ActionGraph::from_roots([a]);

    let waves = graph.waves().unwrap();
    assert_eq!(waves.len(), 3);
    assert_eq!(targets(&waves[0]), vec!["//w:d"]);
    assert_eq!(targets(&waves[1]), vec!["//w:b", "//w:c"]);
    assert_eq!(targets(&waves[2]), vec!["//w:a"]);
  }

  #[test]
  fn topological_order_is_deterministic() {
    let z = rule("//w:z", &[]);
    let y = rule("//w:y", &[]);
    let x = rule("//w:x", &[&z, &y]);
    let graph = ActionGraph::from_roots([x.clone()]);
    assert_eq!(targets(&graph.topological_order().unwrap()), vec!["//w:y", "//w:z", "//w:x"]);
    assert_eq!(targets(&graph.dependencies(x.target())), vec!["//w:y", "//w:z"]);
  }

  #[test]
  fn independent_roots_share_a_wave() {
    let graph = ActionGraph::from_roots([rule("//w:two", &[]), rule("//w:one", &[])]);
    let waves = graph.waves().unwrap();
    assert_eq!(waves.len(), 1);
    assert_eq!(targets(&waves[0]), vec!["//w:one", "//w:two"]);
  }
}
