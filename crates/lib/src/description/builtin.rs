//! Built-in rule types.
//!
//! These are generic stand-ins for the native and Apple rule families. They
//! exercise every capability the engine consumes: linkage, exported deps,
//! bundles, resources, platform flavors, fat binaries and implicit deps.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::{
  Description, Flavored, ImplicitDeps, ImplicitDepsInferring, ImplicitInputsInferring, Linkage, RuleCategory, RuleType,
};
use crate::flavor_domain::FlavorDomain;
use crate::graph::recursive::{collect_recursive_asset_catalogs, collect_recursive_resources, collect_recursive_wrapper_resources};
use crate::multiarch::{MultiarchFileInfo, create_multiarch_rule};
use crate::platform::CxxPlatform;
use crate::rules::{BuildRule, BuildRuleParams, ResolveError, RuleAction, RuleContext};
use crate::target::{BuildTarget, BuildTargetError, BuildTargetParser, CellPathResolver, Flavor, flavor::names};

pub const CXX_LIBRARY: RuleType = RuleType::new("cxx_library");
pub const CXX_BINARY: RuleType = RuleType::new("cxx_binary");
pub const APPLE_BUNDLE: RuleType = RuleType::new("apple_bundle");
pub const APPLE_RESOURCE: RuleType = RuleType::new("apple_resource");
pub const APPLE_ASSET_CATALOG: RuleType = RuleType::new("apple_asset_catalog");
pub const APPLE_WRAPPER_RESOURCE: RuleType = RuleType::new("apple_wrapper_resource");
pub const GENRULE: RuleType = RuleType::new("genrule");

const LINKAGE_FLAVORS: [&str; 3] = [names::SHARED, names::STATIC, names::STATIC_PIC];
const ANALYSIS_FLAVORS: [&str; 4] = [
  names::COMPILATION_DATABASE,
  names::INFER,
  names::INFER_ANALYZE,
  names::INFER_CAPTURE_ALL,
];

fn join_paths<'a>(paths: impl IntoIterator<Item = &'a std::path::Path>) -> Vec<String> {
  paths.into_iter().map(|p| p.display().to_string()).collect()
}

/// Source paths are relative to the declaring target's base path.
fn source_paths(target: &BuildTarget, srcs: &[String]) -> Vec<String> {
  srcs
    .iter()
    .map(|src| {
      if target.base_path().is_empty() {
        src.clone()
      } else {
        format!("{}/{}", target.base_path(), src)
      }
    })
    .collect()
}

fn package_files(srcs: &[String]) -> Vec<PathBuf> {
  srcs.iter().map(PathBuf::from).collect()
}

fn platform_of<'a>(
  platforms: &'a FlavorDomain<CxxPlatform>,
  target: &BuildTarget,
) -> Result<Option<&'a CxxPlatform>, ResolveError> {
  Ok(platforms.get_value_for_target(target)?)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CxxLibraryArgs {
  pub srcs: Vec<String>,
  pub compiler_flags: Vec<String>,
  pub exported_deps: BTreeSet<BuildTarget>,
  pub preferred_linkage: Linkage,
}

/// A native library. Links statically unless flavored `shared` or preferring shared linkage.
pub struct CxxLibraryDescription {
  platforms: Arc<FlavorDomain<CxxPlatform>>,
}

impl CxxLibraryDescription {
  pub fn new(platforms: Arc<FlavorDomain<CxxPlatform>>) -> Self {
    Self { platforms }
  }
}

impl Flavored for CxxLibraryDescription {
  fn has_flavors(&self, flavors: &BTreeSet<Flavor>) -> bool {
    let platform_count = flavors.iter().filter(|f| self.platforms.contains(f)).count();
    let linkage_count = flavors.iter().filter(|f| LINKAGE_FLAVORS.contains(&f.name())).count();
    platform_count <= 1
      && linkage_count <= 1
      && flavors.iter().all(|f| {
        self.platforms.contains(f) || LINKAGE_FLAVORS.contains(&f.name()) || ANALYSIS_FLAVORS.contains(&f.name())
      })
  }

  fn flavor_domains(&self) -> Option<Vec<&FlavorDomain<CxxPlatform>>> {
    Some(vec![self.platforms.as_ref()])
  }
}

impl ImplicitInputsInferring<CxxLibraryArgs> for CxxLibraryDescription {
  fn inputs_from_args(&self, _target: &BuildTarget, args: &CxxLibraryArgs) -> Vec<PathBuf> {
    package_files(&args.srcs)
  }
}

impl Description for CxxLibraryDescription {
  type Args = CxxLibraryArgs;

  fn rule_type(&self) -> RuleType {
    CXX_LIBRARY
  }

  fn category(&self) -> RuleCategory {
    RuleCategory::Library
  }

  fn exported_deps(&self, args: &CxxLibraryArgs) -> BTreeSet<BuildTarget> {
    args.exported_deps.clone()
  }

  fn preferred_linkage(&self, args: &CxxLibraryArgs) -> Linkage {
    args.preferred_linkage
  }

  fn implicit_inputs(&self) -> Option<&dyn ImplicitInputsInferring<CxxLibraryArgs>> {
    Some(self)
  }

  fn flavored(&self) -> Option<&dyn Flavored> {
    Some(self)
  }

  fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &CxxLibraryArgs,
  ) -> Result<BuildRule, ResolveError> {
    let target = params.target().clone();
    let node = ctx.graph.require_flavored(&target)?;
    let shared = node.is_shared_library();
    let name = target.short_name();
    let output = ctx.gen_path(&target, &if shared { format!("lib{}.so", name) } else { format!("lib{}.o", name) });

    let mut cmd = vec![if shared { "-shared".to_string() } else { "-r".to_string() }];
    if let Some(platform) = platform_of(&self.platforms, &target)? {
      cmd.extend(["-arch".to_string(), platform.arch.to_string()]);
    }
    cmd.extend(args.compiler_flags.iter().cloned());
    cmd.extend(source_paths(&target, &args.srcs));
    cmd.extend(["-o".to_string(), output.display().to_string()]);

    Ok(
      BuildRule::builder(params, CXX_LIBRARY)
        .attribute("srcs", args.srcs.join(" "))
        .attribute("linkage", if shared { "shared" } else { "static" })
        .action(RuleAction::new("c++", cmd))
        .output(output)
        .build(),
    )
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CxxBinaryArgs {
  pub srcs: Vec<String>,
  pub compiler_flags: Vec<String>,
  pub linker_flags: Vec<String>,
}

/// A native executable. More than one platform flavor makes it a fat binary.
pub struct CxxBinaryDescription {
  platforms: Arc<FlavorDomain<CxxPlatform>>,
}

impl CxxBinaryDescription {
  pub fn new(platforms: Arc<FlavorDomain<CxxPlatform>>) -> Self {
    Self { platforms }
  }
}

impl Flavored for CxxBinaryDescription {
  fn has_flavors(&self, flavors: &BTreeSet<Flavor>) -> bool {
    flavors.iter().all(|f| {
      self.platforms.contains(f) || LINKAGE_FLAVORS.contains(&f.name()) || ANALYSIS_FLAVORS.contains(&f.name())
    })
  }

  fn flavor_domains(&self) -> Option<Vec<&FlavorDomain<CxxPlatform>>> {
    Some(vec![self.platforms.as_ref()])
  }
}

impl ImplicitInputsInferring<CxxBinaryArgs> for CxxBinaryDescription {
  fn inputs_from_args(&self, _target: &BuildTarget, args: &CxxBinaryArgs) -> Vec<PathBuf> {
    package_files(&args.srcs)
  }
}

impl Description for CxxBinaryDescription {
  type Args = CxxBinaryArgs;

  fn rule_type(&self) -> RuleType {
    CXX_BINARY
  }

  fn category(&self) -> RuleCategory {
    RuleCategory::Binary
  }

  fn implicit_inputs(&self) -> Option<&dyn ImplicitInputsInferring<CxxBinaryArgs>> {
    Some(self)
  }

  fn flavored(&self) -> Option<&dyn Flavored> {
    Some(self)
  }

  fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &CxxBinaryArgs,
  ) -> Result<BuildRule, ResolveError> {
    let target = params.target().clone();
    if let Some(info) = MultiarchFileInfo::create(&self.platforms, &target)? {
      return create_multiarch_rule(ctx, params, &info);
    }

    let output = ctx.gen_path(&target, target.short_name());
    let mut cmd = Vec::new();
    if let Some(platform) = platform_of(&self.platforms, &target)? {
      cmd.extend(["-arch".to_string(), platform.arch.to_string()]);
    }
    cmd.extend(args.compiler_flags.iter().cloned());
    cmd.extend(source_paths(&target, &args.srcs));
    cmd.extend(join_paths(params.declared_deps().iter().filter_map(|dep| dep.output())));
    cmd.extend(args.linker_flags.iter().cloned());
    cmd.extend(["-o".to_string(), output.display().to_string()]);

    Ok(
      BuildRule::builder(params, CXX_BINARY)
        .attribute("srcs", args.srcs.join(" "))
        .action(RuleAction::new("c++", cmd))
        .output(output)
        .build(),
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppleBundleArgs {
  pub binary: BuildTarget,
  #[serde(default = "default_extension")]
  pub extension: String,
}

fn default_extension() -> String {
  "app".to_string()
}

/// Packages a binary with the resources reachable from the bundle.
#[derive(Debug, Default)]
pub struct AppleBundleDescription;

impl Description for AppleBundleDescription {
  type Args = AppleBundleArgs;

  fn rule_type(&self) -> RuleType {
    APPLE_BUNDLE
  }

  fn category(&self) -> RuleCategory {
    RuleCategory::Bundle
  }

  fn bundle_binary(&self, args: &AppleBundleArgs) -> Option<BuildTarget> {
    Some(args.binary.clone())
  }

  fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &AppleBundleArgs,
  ) -> Result<BuildRule, ResolveError> {
    let target = params.target().clone();
    let node = ctx.graph.require_flavored(&target)?;
    let binary = ctx.resolver.require_rule(&args.binary)?;
    let binary_output = binary.output().ok_or_else(|| ResolveError::InvalidArgs {
      target: target.clone(),
      message: format!("bundle binary {} has no output", args.binary),
    })?;

    let mut copied: Vec<String> = Vec::new();
    for resource in collect_recursive_resources(ctx.graph, None, &node)?
      .iter()
      .chain(collect_recursive_asset_catalogs(ctx.graph, None, &node)?.iter())
      .chain(collect_recursive_wrapper_resources(ctx.graph, None, &node)?.iter())
    {
      let rule = ctx.resolver.require_rule(resource.target())?;
      if let Some(files) = rule.attributes().get("files") {
        copied.extend(files.split_whitespace().map(str::to_string));
      }
    }

    let output = ctx.gen_path(&target, &format!("{}.{}", target.short_name(), args.extension));
    let out = output.display().to_string();
    let mut script = format!("mkdir -p '{}' && cp '{}' '{}/'", out, binary_output.display(), out);
    for file in &copied {
      script.push_str(&format!(" && cp -R '{}' '{}/'", file, out));
    }

    Ok(
      BuildRule::builder(params, APPLE_BUNDLE)
        .attribute("binary", args.binary.to_string())
        .attribute("resources", copied.join(" "))
        .action(RuleAction::shell(script))
        .output(output)
        .build(),
    )
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceArgs {
  pub files: Vec<String>,
  pub dirs: Vec<String>,
}

/// Files copied into a bundle. Produces no output of its own.
pub struct ResourceDescription {
  rule_type: RuleType,
  category: RuleCategory,
}

impl ResourceDescription {
  pub fn apple_resource() -> Self {
    Self {
      rule_type: APPLE_RESOURCE,
      category: RuleCategory::Resource,
    }
  }

  pub fn apple_asset_catalog() -> Self {
    Self {
      rule_type: APPLE_ASSET_CATALOG,
      category: RuleCategory::AssetCatalog,
    }
  }

  pub fn apple_wrapper_resource() -> Self {
    Self {
      rule_type: APPLE_WRAPPER_RESOURCE,
      category: RuleCategory::WrapperResource,
    }
  }
}

impl ImplicitInputsInferring<ResourceArgs> for ResourceDescription {
  /// Directories are copied whole and are not fingerprinted.
  fn inputs_from_args(&self, _target: &BuildTarget, args: &ResourceArgs) -> Vec<PathBuf> {
    package_files(&args.files)
  }
}

impl Description for ResourceDescription {
  type Args = ResourceArgs;

  fn rule_type(&self) -> RuleType {
    self.rule_type
  }

  fn category(&self) -> RuleCategory {
    self.category
  }

  fn implicit_inputs(&self) -> Option<&dyn ImplicitInputsInferring<ResourceArgs>> {
    Some(self)
  }

  fn create_build_rule(
    &self,
    _ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &ResourceArgs,
  ) -> Result<BuildRule, ResolveError> {
    let mut files = source_paths(params.target(), &args.files);
    files.extend(source_paths(params.target(), &args.dirs));
    Ok(
      BuildRule::builder(params, self.rule_type)
        .attribute("files", files.join(" "))
        .build(),
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenruleArgs {
  pub cmd: String,
  pub out: String,
  #[serde(default)]
  pub srcs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacroKind {
  Location,
  Exe,
  QueryTargets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MacroUse {
  kind: MacroKind,
  arg: String,
  start: usize,
  end: usize,
}

/// Find `$(name arg)` macros in a genrule command. Unknown macro names are left alone.
fn parse_macros(cmd: &str) -> Vec<MacroUse> {
  let mut macros = Vec::new();
  let mut offset = 0;
  while let Some(found) = cmd[offset..].find("$(") {
    let start = offset + found;
    let Some(close) = cmd[start..].find(')') else {
      break;
    };
    let end = start + close + 1;
    let body = &cmd[start + 2..end - 1];
    let mut parts = body.split_whitespace();
    let kind = match parts.next() {
      Some("location") => Some(MacroKind::Location),
      Some("exe") => Some(MacroKind::Exe),
      Some("query_targets") => Some(MacroKind::QueryTargets),
      _ => None,
    };
    if let (Some(kind), Some(arg)) = (kind, parts.next()) {
      macros.push(MacroUse {
        kind,
        arg: arg.to_string(),
        start,
        end,
      });
    }
    offset = end;
  }
  macros
}

/// Runs a shell command producing `out`. Targets named in `$(location ...)` and
/// `$(exe ...)` become build deps; `$(query_targets ...)` only adds a graph edge.
#[derive(Debug, Default)]
pub struct GenruleDescription;

/// Targets named by the macros in `cmd`, resolved against the declaring package.
fn macro_targets(target: &BuildTarget, cmd: &str) -> Result<Vec<(MacroKind, BuildTarget)>, BuildTargetError> {
  parse_macros(cmd)
    .into_iter()
    .map(|found| BuildTargetParser::parse(&found.arg, target.base_path()).map(|dep| (found.kind, dep)))
    .collect()
}

impl ImplicitDepsInferring<GenruleArgs> for GenruleDescription {
  fn find_deps_from_args(
    &self,
    target: &BuildTarget,
    _cells: &dyn CellPathResolver,
    args: &GenruleArgs,
  ) -> Result<ImplicitDeps, BuildTargetError> {
    let mut deps = ImplicitDeps::default();
    for (kind, dep) in macro_targets(target, &args.cmd)? {
      match kind {
        MacroKind::Location | MacroKind::Exe => deps.extra.insert(dep),
        MacroKind::QueryTargets => deps.target_graph_only.insert(dep),
      };
    }
    Ok(deps)
  }
}

impl ImplicitInputsInferring<GenruleArgs> for GenruleDescription {
  fn inputs_from_args(&self, _target: &BuildTarget, args: &GenruleArgs) -> Vec<PathBuf> {
    package_files(&args.srcs)
  }
}

impl Description for GenruleDescription {
  type Args = GenruleArgs;

  fn rule_type(&self) -> RuleType {
    GENRULE
  }

  fn parse_time_deps(
    &self,
    target: &BuildTarget,
    args: &GenruleArgs,
  ) -> Result<BTreeSet<BuildTarget>, BuildTargetError> {
    Ok(macro_targets(target, &args.cmd)?.into_iter().map(|(_, dep)| dep).collect())
  }

  fn walks_dependencies(&self) -> bool {
    false
  }

  fn implicit_deps(&self) -> Option<&dyn ImplicitDepsInferring<GenruleArgs>> {
    Some(self)
  }

  fn implicit_inputs(&self) -> Option<&dyn ImplicitInputsInferring<GenruleArgs>> {
    Some(self)
  }

  fn create_build_rule(
    &self,
    ctx: &RuleContext<'_>,
    params: BuildRuleParams,
    args: &GenruleArgs,
  ) -> Result<BuildRule, ResolveError> {
    let target = params.target().clone();
    let mut expanded = String::with_capacity(args.cmd.len());
    let mut last = 0;
    for found in parse_macros(&args.cmd) {
      expanded.push_str(&args.cmd[last..found.start]);
      let dep = BuildTargetParser::parse(&found.arg, target.base_path())?;
      match found.kind {
        MacroKind::Location | MacroKind::Exe => {
          let rule = ctx.resolver.require_rule(&dep).map_err(|e| e.referenced_by(&target))?;
          let output = rule.output().ok_or_else(|| ResolveError::InvalidArgs {
            target: target.clone(),
            message: format!("{} has no output for $(location)", dep),
          })?;
          expanded.push_str(&output.display().to_string());
        }
        MacroKind::QueryTargets => expanded.push_str(&dep.to_string()),
      }
      last = found.end;
    }
    expanded.push_str(&args.cmd[last..]);

    let output = ctx.gen_path(&target, &args.out);
    let srcs = source_paths(&target, &args.srcs).join(" ");
    let action = RuleAction::shell(expanded)
      .with_env("OUT", output.display().to_string())
      .with_env("SRCS", srcs.clone());

    Ok(
      BuildRule::builder(params, GENRULE)
        .attribute("cmd", args.cmd.clone())
        .attribute("srcs", srcs)
        .action(action)
        .output(output)
        .build(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::target::DefaultCellPathResolver;

  #[test]
  fn parses_known_macros() {
    let macros = parse_macros("$(exe //t:a) in $(location :b) $(unknown x) $(query_targets //q:c)");
    let kinds: Vec<_> = macros.iter().map(|m| (m.kind, m.arg.as_str())).collect();
    assert_eq!(
      kinds,
      vec![
        (MacroKind::Exe, "//t:a"),
        (MacroKind::Location, ":b"),
        (MacroKind::QueryTargets, "//q:c"),
      ]
    );
  }

  #[test]
  fn genrule_infers_relative_targets() {
    let args = GenruleArgs {
      cmd: "cat $(location :data) > $OUT".to_string(),
      out: "copy.txt".to_string(),
      srcs: vec![],
    };
    let target: BuildTarget = "//pkg/sub:gen".parse().unwrap();
    let deps = GenruleDescription
      .find_deps_from_args(&target, &DefaultCellPathResolver::new("."), &args)
      .unwrap();
    assert_eq!(deps.extra, BTreeSet::from(["//pkg/sub:data".parse().unwrap()]));
    assert!(deps.target_graph_only.is_empty());
  }

  #[test]
  fn genrule_rejects_bad_macro_target() {
    let args = GenruleArgs {
      cmd: "$(location bad-target)".to_string(),
      out: "x".to_string(),
      srcs: vec![],
    };
    let target: BuildTarget = "//a:gen".parse().unwrap();
    assert!(
      GenruleDescription
        .find_deps_from_args(&target, &DefaultCellPathResolver::new("."), &args)
        .is_err()
    );
  }

  #[test]
  fn library_flavors() {
    let platforms = Arc::new(crate::platform::default_platforms().unwrap());
    let lib = CxxLibraryDescription::new(platforms);
    let set = |names: &[&str]| names.iter().map(|n| Flavor::new(*n).unwrap()).collect::<BTreeSet<_>>();
    assert!(lib.has_flavors(&set(&["shared"])));
    assert!(lib.has_flavors(&set(&["static", "iphoneos-arm64"])));
    assert!(!lib.has_flavors(&set(&["shared", "static"])));
    assert!(!lib.has_flavors(&set(&["iphoneos-arm64", "iphoneos-armv7"])));
    assert!(!lib.has_flavors(&set(&["made-up"])));
  }
}
