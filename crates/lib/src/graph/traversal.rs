//! Generic graph walks over caller-supplied child functions.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

use thiserror::Error;
use tracing::trace;

/// A cycle found while walking a graph that must be acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected: {}", .path.join(" -> "))]
pub struct CycleError {
  /// The nodes on the cycle, starting and ending with the same node.
  pub path: Vec<String>,
}

/// Depth-first post-order walk that fails on cycles.
///
/// Each node is emitted once, after all of its children. The walk uses an explicit
/// stack of frames, so graph depth is not limited by the call stack. Children are
/// visited in the order the child function returns them.
pub struct AcyclicDepthFirstPostOrderTraversal<F> {
  children: F,
}

struct Frame<T> {
  node: T,
  children: std::vec::IntoIter<T>,
}

impl<F> AcyclicDepthFirstPostOrderTraversal<F> {
  pub fn new(children: F) -> Self {
    Self { children }
  }

  /// Walk from `roots`, returning every reachable node in dependency-first order.
  pub fn traverse<T, E>(&mut self, roots: impl IntoIterator<Item = T>) -> Result<Vec<T>, E>
  where
    T: Clone + Eq + Hash + fmt::Display,
    F: FnMut(&T) -> Result<Vec<T>, E>,
    E: From<CycleError>,
  {
    let mut explored: HashSet<T> = HashSet::new();
    let mut order = Vec::new();

    for root in roots {
      if explored.contains(&root) {
        continue;
      }

      let mut on_stack: HashSet<T> = HashSet::new();
      let mut stack: Vec<Frame<T>> = Vec::new();
      on_stack.insert(root.clone());
      let children = (self.children)(&root)?;
      stack.push(Frame {
        node: root,
        children: children.into_iter(),
      });

      while let Some(frame) = stack.last_mut() {
        match frame.children.next() {
          Some(child) => {
            if explored.contains(&child) {
              continue;
            }
            if on_stack.contains(&child) {
              return Err(cycle_error(&stack, &child).into());
            }
            let grandchildren = (self.children)(&child)?;
            trace!(node = %child, children = grandchildren.len(), "descending");
            on_stack.insert(child.clone());
            stack.push(Frame {
              node: child,
              children: grandchildren.into_iter(),
            });
          }
          None => {
            if let Some(done) = stack.pop() {
              on_stack.remove(&done.node);
              explored.insert(done.node.clone());
              order.push(done.node);
            }
          }
        }
      }
    }

    Ok(order)
  }
}

fn cycle_error<T: PartialEq + fmt::Display>(stack: &[Frame<T>], repeated: &T) -> CycleError {
  let start = stack.iter().position(|frame| &frame.node == repeated).unwrap_or(0);
  let mut path: Vec<String> = stack[start..].iter().map(|frame| frame.node.to_string()).collect();
  path.push(repeated.to_string());
  CycleError { path }
}

/// Breadth-first walk from `roots`, visiting each node once. Roots are included.
pub fn breadth_first<T, E, F>(roots: impl IntoIterator<Item = T>, mut children: F) -> Result<Vec<T>, E>
where
  T: Clone + Eq + Hash,
  F: FnMut(&T) -> Result<Vec<T>, E>,
{
  let mut seen: HashSet<T> = HashSet::new();
  let mut queue: VecDeque<T> = VecDeque::new();
  for root in roots {
    if seen.insert(root.clone()) {
      queue.push_back(root);
    }
  }

  let mut visited = Vec::new();
  while let Some(node) = queue.pop_front() {
    for child in children(&node)? {
      if seen.insert(child.clone()) {
        queue.push_back(child);
      }
    }
    visited.push(node);
  }
  Ok(visited)
}
