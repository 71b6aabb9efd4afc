//! JSON target graph manifests.
//!
//! ```json
//! {
//!   "cells": { "third_party": "vendor" },
//!   "targets": [
//!     { "name": "//app:bin", "type": "cxx_binary", "deps": [":util"], "args": { "srcs": ["main.c"] } },
//!     { "name": "//app:util", "type": "cxx_library", "args": { "srcs": ["util.c"] } }
//!   ]
//! }
//! ```
//!
//! Deps may be relative to the declaring target's base path. Targets inside
//! `args` must be fully qualified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{GraphError, TargetGraph, TargetNode};
use crate::description::DescriptionRegistry;
use crate::target::{BuildTarget, BuildTargetError, BuildTargetParser, CellName, CellPathResolver, DefaultCellPathResolver};

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse manifest {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid cell '{name}': {reason}")]
  InvalidCell { name: String, reason: String },

  #[error("{target}: unknown rule type '{rule_type}'")]
  UnknownRuleType { target: BuildTarget, rule_type: String },

  #[error("{target}: invalid {rule_type} arguments: {source}")]
  InvalidArgs {
    target: BuildTarget,
    rule_type: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Target(#[from] BuildTargetError),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestTarget {
  pub name: String,
  #[serde(rename = "type")]
  pub rule_type: String,
  #[serde(default)]
  pub deps: Vec<String>,
  #[serde(default)]
  pub extra_deps: Vec<String>,
  #[serde(default)]
  pub target_graph_only_deps: Vec<String>,
  #[serde(default = "empty_args")]
  pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
  serde_json::Value::Object(Default::default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetGraphManifest {
  #[serde(default)]
  pub cells: BTreeMap<String, PathBuf>,
  #[serde(default)]
  pub targets: Vec<ManifestTarget>,
}

impl TargetGraphManifest {
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Cell resolver rooted at `project_root`, with named cells relative to it.
  pub fn cell_resolver(&self, project_root: &Path) -> Result<DefaultCellPathResolver, ManifestError> {
    let mut resolver = DefaultCellPathResolver::new(project_root);
    for (name, path) in &self.cells {
      let cell = CellName::new(name.as_str()).map_err(|reason| ManifestError::InvalidCell {
        name: name.clone(),
        reason,
      })?;
      resolver = resolver.with_cell(cell, project_root.join(path));
    }
    Ok(resolver)
  }

  /// Decode every target through `registry` and build a validated graph.
  pub fn into_graph(
    &self,
    registry: &DescriptionRegistry,
    project_root: &Path,
  ) -> Result<TargetGraph, ManifestError> {
    let cells: Arc<dyn CellPathResolver> = Arc::new(self.cell_resolver(project_root)?);

    let mut nodes = Vec::with_capacity(self.targets.len());
    for declared in &self.targets {
      let target = BuildTargetParser::parse_fully_qualified(&declared.name)?;
      let parse_all = |deps: &[String]| -> Result<Vec<BuildTarget>, BuildTargetError> {
        deps.iter().map(|dep| BuildTargetParser::parse(dep, target.base_path())).collect()
      };
      let deps = parse_all(&declared.deps)?;
      let extra_deps = parse_all(&declared.extra_deps)?;
      let target_graph_only_deps = parse_all(&declared.target_graph_only_deps)?;

      let node: TargetNode = registry
        .node_builder(target.clone(), &declared.rule_type, declared.args.clone())?
        .deps(deps)
        .extra_deps(extra_deps)
        .target_graph_only_deps(target_graph_only_deps)
        .cells(cells.clone())
        .build()?;
      nodes.push(node);
    }

    debug!(targets = nodes.len(), "manifest decoded");
    Ok(TargetGraph::new(nodes)?)
  }
}
