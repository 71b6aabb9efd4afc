//! The target graph and the walks over it.

mod deps_cache;
pub mod manifest;
mod node;
pub mod recursive;
mod target_graph;
mod traversal;

pub use deps_cache::{DependencyCache, DirectDeps, direct_and_exported_deps};
pub use node::{TargetNode, TargetNodeBuilder};
pub use recursive::{RecursiveDependenciesMode, get_recursive_target_node_dependencies_of_types};
pub use target_graph::{GraphError, TargetGraph};
pub use traversal::{AcyclicDepthFirstPostOrderTraversal, CycleError, breadth_first};
