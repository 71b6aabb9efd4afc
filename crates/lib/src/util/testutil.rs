//! Test fixtures: small target graphs built from the built-in rule types.

use std::sync::Arc;

use crate::description::Linkage;
use crate::description::builtin::{
  AppleBundleArgs, AppleBundleDescription, CxxBinaryArgs, CxxBinaryDescription, CxxLibraryArgs, CxxLibraryDescription,
  GenruleArgs, GenruleDescription, ResourceArgs, ResourceDescription,
};
use crate::flavor_domain::FlavorDomain;
use crate::graph::{TargetGraph, TargetNode};
use crate::platform::{CxxPlatform, default_platforms};
use crate::target::BuildTarget;

pub fn t(target: &str) -> BuildTarget {
  target.parse().unwrap()
}

fn targets(deps: &[&str]) -> Vec<BuildTarget> {
  deps.iter().map(|d| t(d)).collect()
}

fn platforms() -> Arc<FlavorDomain<CxxPlatform>> {
  Arc::new(default_platforms().unwrap())
}

pub fn names(nodes: &[TargetNode]) -> Vec<String> {
  nodes.iter().map(|n| n.target().to_string()).collect()
}

fn library(name: &str, args: CxxLibraryArgs, deps: &[&str]) -> TargetNode {
  TargetNode::builder(t(name), Arc::new(CxxLibraryDescription::new(platforms())), args)
    .deps(targets(deps))
    .build()
    .unwrap()
}

/// A `cxx_library` with private deps.
pub fn lib(name: &str, deps: &[&str]) -> TargetNode {
  library(name, CxxLibraryArgs::default(), deps)
}

pub fn binary(name: &str, deps: &[&str]) -> TargetNode {
  TargetNode::builder(t(name), Arc::new(CxxBinaryDescription::new(platforms())), CxxBinaryArgs::default())
    .deps(targets(deps))
    .build()
    .unwrap()
}

pub fn genrule(name: &str, cmd: &str) -> TargetNode {
  let args = GenruleArgs {
    cmd: cmd.to_string(),
    out: "out.txt".to_string(),
    srcs: Vec::new(),
  };
  TargetNode::builder(t(name), Arc::new(GenruleDescription), args)
    .build()
    .unwrap()
}

/// ```text
/// //app:root -> //lib:a -> //lib:c (shared) -> //lib:d
///            -> //lib:b =exports=> //lib:c
/// ```
pub fn diamond_graph() -> TargetGraph {
  let b = CxxLibraryArgs {
    exported_deps: [t("//lib:c")].into(),
    ..Default::default()
  };
  let c = CxxLibraryArgs {
    preferred_linkage: Linkage::Shared,
    ..Default::default()
  };
  TargetGraph::new([
    binary("//app:root", &["//lib:a", "//lib:b"]),
    lib("//lib:a", &["//lib:c"]),
    library("//lib:b", b, &[]),
    library("//lib:c", c, &["//lib:d"]),
    lib("//lib:d", &[]),
  ])
  .unwrap()
}

/// `//cycle:a -> b -> c -> a`
pub fn cycle_nodes() -> Vec<TargetNode> {
  vec![
    lib("//cycle:a", &["//cycle:b"]),
    lib("//cycle:b", &["//cycle:c"]),
    lib("//cycle:c", &["//cycle:a"]),
  ]
}

pub fn cycle_graph() -> TargetGraph {
  TargetGraph::new_unchecked(cycle_nodes()).unwrap()
}

/// An app bundle wrapping `//app:bin`, with one resource that has a build tool dep.
pub fn bundle_graph() -> TargetGraph {
  let bundle = TargetNode::builder(
    t("//app:bundle"),
    Arc::new(AppleBundleDescription),
    AppleBundleArgs {
      binary: t("//app:bin"),
      extension: "app".to_string(),
    },
  )
  .deps(targets(&["//app:strings"]))
  .build()
  .unwrap();
  let strings = TargetNode::builder(
    t("//app:strings"),
    Arc::new(ResourceDescription::apple_resource()),
    ResourceArgs {
      files: vec!["Localizable.strings".to_string()],
      dirs: Vec::new(),
    },
  )
  .deps(targets(&["//app:resource_tool"]))
  .build()
  .unwrap();

  TargetGraph::new([
    bundle,
    binary("//app:bin", &["//app:lib"]),
    lib("//app:lib", &[]),
    strings,
    binary("//app:resource_tool", &[]),
  ])
  .unwrap()
}
