//! Omnibus root classification.
//!
//! Native link roots are merged into one shared object unless they are excluded,
//! either explicitly or because a library they reach insists on shared linkage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::description::{Linkage, RuleCategory};
use crate::graph::{GraphError, TargetGraph, TargetNode, breadth_first};
use crate::platform::CxxPlatform;
use crate::target::BuildTarget;

/// Read-only view of a native library for one platform.
pub trait NativeLinkable: Send + Sync {
  fn build_target(&self) -> &BuildTarget;

  fn preferred_linkage(&self, platform: &CxxPlatform) -> Linkage;

  fn native_linkable_deps(&self, platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>>;

  fn native_linkable_exported_deps(&self, platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>>;

  /// Whether this library can be merged into an omnibus object.
  fn supports_omnibus_linking(&self, platform: &CxxPlatform) -> bool {
    self.preferred_linkage(platform) != Linkage::Shared
  }

  /// The link-target view of this library, when it can act as a link root.
  fn native_link_target(&self, _platform: &CxxPlatform) -> Option<Arc<dyn NativeLinkTarget>> {
    None
  }
}

/// Something that is linked as a root of an omnibus link.
pub trait NativeLinkTarget: Send + Sync {
  fn build_target(&self) -> &BuildTarget;

  fn native_link_target_deps(&self, platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>>;
}

/// Classified roots of an omnibus link.
pub struct OmnibusRoots {
  /// Roots merged into the omnibus object.
  pub included_roots: BTreeMap<BuildTarget, Arc<dyn NativeLinkTarget>>,
  /// Roots linked on their own.
  pub excluded_roots: BTreeMap<BuildTarget, Arc<dyn NativeLinkable>>,
  /// Every library linked outside the omnibus object, roots included.
  pub excluded: BTreeSet<BuildTarget>,
}

impl fmt::Debug for OmnibusRoots {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OmnibusRoots")
      .field("included_roots", &self.included_roots.keys().collect::<Vec<_>>())
      .field("excluded_roots", &self.excluded_roots.keys().collect::<Vec<_>>())
      .field("excluded", &self.excluded)
      .finish()
  }
}

/// Node identity for breadth-first walks over trait objects.
#[derive(Clone)]
struct ByTarget(Arc<dyn NativeLinkable>);

impl PartialEq for ByTarget {
  fn eq(&self, other: &Self) -> bool {
    self.0.build_target() == other.0.build_target()
  }
}

impl Eq for ByTarget {}

impl std::hash::Hash for ByTarget {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.0.build_target().hash(state);
  }
}

pub struct OmnibusRootsBuilder<'a> {
  platform: &'a CxxPlatform,
  excludes: BTreeSet<BuildTarget>,
  included_roots: BTreeMap<BuildTarget, Arc<dyn NativeLinkTarget>>,
  excluded_roots: BTreeMap<BuildTarget, Arc<dyn NativeLinkable>>,
}

impl<'a> OmnibusRootsBuilder<'a> {
  pub fn new(platform: &'a CxxPlatform, excludes: impl IntoIterator<Item = BuildTarget>) -> Self {
    Self {
      platform,
      excludes: excludes.into_iter().collect(),
      included_roots: BTreeMap::new(),
      excluded_roots: BTreeMap::new(),
    }
  }

  pub fn add_included_root(&mut self, root: Arc<dyn NativeLinkTarget>) -> &mut Self {
    self.included_roots.insert(root.build_target().clone(), root);
    self
  }

  pub fn add_excluded_root(&mut self, root: Arc<dyn NativeLinkable>) -> &mut Self {
    self.excluded_roots.insert(root.build_target().clone(), root);
    self
  }

  /// Include `node` if it is a link target, not excluded, and mergeable; exclude it otherwise.
  pub fn add_potential_root(&mut self, node: Arc<dyn NativeLinkable>) -> &mut Self {
    let target = node.native_link_target(self.platform);
    match target {
      Some(target)
        if !self.excludes.contains(node.build_target()) && node.supports_omnibus_linking(self.platform) =>
      {
        self.add_included_root(target)
      }
      _ => self.add_excluded_root(node),
    }
  }

  fn all_deps(&self, linkable: &dyn NativeLinkable) -> Vec<ByTarget> {
    linkable
      .native_linkable_deps(self.platform)
      .into_iter()
      .chain(linkable.native_linkable_exported_deps(self.platform))
      .map(ByTarget)
      .collect()
  }

  pub fn build(self) -> OmnibusRoots {
    let platform = self.platform;

    // Libraries reachable from included roots that cannot be merged.
    let mut excluded: Vec<ByTarget> = self.excluded_roots.values().cloned().map(ByTarget).collect();
    let root_deps: Vec<ByTarget> = self
      .included_roots
      .values()
      .flat_map(|root| root.native_link_target_deps(platform))
      .map(ByTarget)
      .collect();
    let walk = breadth_first::<_, std::convert::Infallible, _>(root_deps, |linkable: &ByTarget| {
      if !linkable.0.supports_omnibus_linking(platform) {
        return Ok(Vec::new());
      }
      Ok(self.all_deps(linkable.0.as_ref()))
    });
    for linkable in walk.unwrap_or_default() {
      if !linkable.0.supports_omnibus_linking(platform) {
        excluded.push(linkable);
      }
    }

    // Everything the excluded libraries pull in is linked outside the omnibus object too,
    // including any included root it reaches.
    let mut excluded_roots = self.excluded_roots.clone();
    let expanded = breadth_first::<_, std::convert::Infallible, _>(excluded, |linkable: &ByTarget| {
      Ok(self.all_deps(linkable.0.as_ref()))
    })
    .unwrap_or_default();
    for linkable in &expanded {
      let target = linkable.0.build_target();
      if self.included_roots.contains_key(target) {
        excluded_roots.insert(target.clone(), linkable.0.clone());
      }
    }

    let included_roots: BTreeMap<BuildTarget, Arc<dyn NativeLinkTarget>> = self
      .included_roots
      .iter()
      .filter(|(target, _)| !excluded_roots.contains_key(*target))
      .map(|(target, root)| (target.clone(), root.clone()))
      .collect();

    debug!(
      included = included_roots.len(),
      excluded_roots = excluded_roots.len(),
      excluded = expanded.len(),
      "omnibus roots"
    );

    OmnibusRoots {
      included_roots,
      excluded_roots,
      excluded: expanded.iter().map(|l| l.0.build_target().clone()).collect(),
    }
  }
}

/// A library node of the target graph viewed as a native linkable.
///
/// Deps are the node's build deps and exported deps that are themselves libraries.
pub struct NodeLinkable {
  graph: Arc<TargetGraph>,
  node: TargetNode,
}

impl NodeLinkable {
  pub fn new(graph: Arc<TargetGraph>, node: TargetNode) -> Self {
    Self { graph, node }
  }

  /// Wrap `target`, failing unless it names a library.
  pub fn for_target(graph: &Arc<TargetGraph>, target: &BuildTarget) -> Result<Arc<Self>, GraphError> {
    let node = graph.require_flavored(target)?;
    Ok(Arc::new(Self::new(graph.clone(), node)))
  }

  fn libraries<'t>(&self, targets: impl IntoIterator<Item = &'t BuildTarget>) -> Vec<Arc<dyn NativeLinkable>> {
    targets
      .into_iter()
      .filter_map(|target| self.graph.get_flavored(target))
      .filter(|node| node.category() == RuleCategory::Library)
      .map(|node| Arc::new(NodeLinkable::new(self.graph.clone(), node)) as Arc<dyn NativeLinkable>)
      .collect()
  }
}

impl NativeLinkable for NodeLinkable {
  fn build_target(&self) -> &BuildTarget {
    self.node.target()
  }

  fn preferred_linkage(&self, _platform: &CxxPlatform) -> Linkage {
    if self.node.is_shared_library() {
      Linkage::Shared
    } else {
      self.node.preferred_linkage()
    }
  }

  fn native_linkable_deps(&self, _platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
    let exported = self.node.exported_deps();
    self.libraries(self.node.build_deps().iter().filter(|t| !exported.contains(*t)))
  }

  fn native_linkable_exported_deps(&self, _platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
    self.libraries(&self.node.exported_deps())
  }

  fn native_link_target(&self, _platform: &CxxPlatform) -> Option<Arc<dyn NativeLinkTarget>> {
    (self.node.category() == RuleCategory::Library).then(|| {
      Arc::new(NodeLinkable::new(self.graph.clone(), self.node.clone())) as Arc<dyn NativeLinkTarget>
    })
  }
}

impl NativeLinkTarget for NodeLinkable {
  fn build_target(&self) -> &BuildTarget {
    self.node.target()
  }

  fn native_link_target_deps(&self, platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
    let mut deps = self.native_linkable_deps(platform);
    deps.extend(self.native_linkable_exported_deps(platform));
    deps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::default_platforms;
  use crate::target::Flavor;
  use crate::util::testutil::{diamond_graph, t};

  struct Fake {
    target: BuildTarget,
    linkage: Linkage,
    deps: Vec<Arc<Fake>>,
    root: bool,
  }

  impl Fake {
    fn new(target: &str, linkage: Linkage, deps: &[&Arc<Fake>], root: bool) -> Arc<Self> {
      Arc::new(Self {
        target: t(target),
        linkage,
        deps: deps.iter().map(|d| (*d).clone()).collect(),
        root,
      })
    }
  }

  impl NativeLinkable for Fake {
    fn build_target(&self) -> &BuildTarget {
      &self.target
    }

    fn preferred_linkage(&self, _platform: &CxxPlatform) -> Linkage {
      self.linkage
    }

    fn native_linkable_deps(&self, _platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
      self.deps.iter().map(|d| d.clone() as Arc<dyn NativeLinkable>).collect()
    }

    fn native_linkable_exported_deps(&self, _platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
      Vec::new()
    }

    fn native_link_target(&self, _platform: &CxxPlatform) -> Option<Arc<dyn NativeLinkTarget>> {
      self.root.then(|| {
        Arc::new(FakeRoot {
          target: self.target.clone(),
          deps: self.deps.clone(),
        }) as Arc<dyn NativeLinkTarget>
      })
    }
  }

  struct FakeRoot {
    target: BuildTarget,
    deps: Vec<Arc<Fake>>,
  }

  impl NativeLinkTarget for FakeRoot {
    fn build_target(&self) -> &BuildTarget {
      &self.target
    }

    fn native_link_target_deps(&self, _platform: &CxxPlatform) -> Vec<Arc<dyn NativeLinkable>> {
      self.deps.iter().map(|d| d.clone() as Arc<dyn NativeLinkable>).collect()
    }
  }

  fn platform() -> CxxPlatform {
    default_platforms()
      .unwrap()
      .value(&Flavor::new("macosx-arm64").unwrap())
      .unwrap()
      .clone()
  }

  fn keys<V>(map: &BTreeMap<BuildTarget, V>) -> Vec<String> {
    map.keys().map(|t| t.to_string()).collect()
  }

  #[test]
  fn classifies_potential_roots() {
    let platform = platform();
    let plain = Fake::new("//o:plain", Linkage::Any, &[], true);
    let not_target = Fake::new("//o:not_target", Linkage::Any, &[], false);
    let shared = Fake::new("//o:shared", Linkage::Shared, &[], true);
    let listed = Fake::new("//o:listed", Linkage::Any, &[], true);

    let mut builder = OmnibusRootsBuilder::new(&platform, [t("//o:listed")]);
    for node in [plain, not_target, shared, listed] {
      builder.add_potential_root(node);
    }
    let roots = builder.build();

    assert_eq!(keys(&roots.included_roots), vec!["//o:plain"]);
    assert_eq!(keys(&roots.excluded_roots), vec!["//o:listed", "//o:not_target", "//o:shared"]);
  }

  #[test]
  fn shared_dependency_excludes_reachable_roots() {
    let platform = platform();
    // root_a -> shared_dep -> root_b: root_b is linked by the shared object, so it cannot be merged.
    let root_b = Fake::new("//o:root_b", Linkage::Any, &[], true);
    let shared_dep = Fake::new("//o:shared_dep", Linkage::Shared, &[&root_b], false);
    let root_a = Fake::new("//o:root_a", Linkage::Any, &[&shared_dep], true);

    let mut builder = OmnibusRootsBuilder::new(&platform, []);
    builder.add_potential_root(root_a).add_potential_root(root_b);
    let roots = builder.build();

    assert_eq!(keys(&roots.included_roots), vec!["//o:root_a"]);
    assert_eq!(keys(&roots.excluded_roots), vec!["//o:root_b"]);
    let excluded: Vec<String> = roots.excluded.iter().map(|t| t.to_string()).collect();
    assert_eq!(excluded, vec!["//o:root_b", "//o:shared_dep"]);
  }

  #[test]
  fn graph_libraries_as_linkables() {
    let platform = platform();
    let graph = Arc::new(diamond_graph());
    let a = NodeLinkable::for_target(&graph, &t("//lib:a")).unwrap();
    let b = NodeLinkable::for_target(&graph, &t("//lib:b")).unwrap();

    let mut builder = OmnibusRootsBuilder::new(&platform, []);
    builder.add_potential_root(a).add_potential_root(b);
    let roots = builder.build();

    // //lib:c prefers shared linkage, so it and its private dep stay out of the omnibus object.
    assert_eq!(keys(&roots.included_roots), vec!["//lib:a", "//lib:b"]);
    let excluded: Vec<String> = roots.excluded.iter().map(|t| t.to_string()).collect();
    assert_eq!(excluded, vec!["//lib:c", "//lib:d"]);
  }
}
