//! Fat binaries: one target carrying several platform flavors, built by merging
//! per-architecture ("thin") builds with `lipo`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::description::RuleType;
use crate::flavor_domain::{FlavorDomain, FlavorDomainError};
use crate::platform::CxxPlatform;
use crate::rules::{BuildRule, BuildRuleParams, ResolveError, RuleAction, RuleContext, RuleSet};
use crate::target::{BuildTarget, Flavor, flavor::names};

pub const MULTIARCH: RuleType = RuleType::new("multiarch_binary");

/// Flavors that make no sense on a fat binary.
const FORBIDDEN_FLAVORS: [&str; 4] = [
  names::COMPILATION_DATABASE,
  names::INFER,
  names::INFER_ANALYZE,
  names::INFER_CAPTURE_ALL,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiarchError {
  #[error("{target}: Fat binaries is only supported when building an actual binary.")]
  ForbiddenFlavor { target: BuildTarget, flavor: Flavor },

  #[error("{target}: Fat binaries can only be generated from binaries compiled for the same SDK.")]
  SdkMismatch { target: BuildTarget, sdks: Vec<String> },

  #[error("{target}: thin slice {thin} has no output to merge")]
  MissingThinOutput { target: BuildTarget, thin: BuildTarget },

  #[error(transparent)]
  FlavorDomain(#[from] FlavorDomainError),
}

/// How a fat target decomposes into thin, single-architecture targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiarchFileInfo {
  pub fat_target: BuildTarget,
  /// The platform-free target with each platform flavor appended, in flavor order.
  pub thin_targets: Vec<BuildTarget>,
  /// Platform whose tools (e.g. `lipo`) build the fat output.
  pub representative_platform: CxxPlatform,
}

impl MultiarchFileInfo {
  /// Decompose `target` if it carries more than one flavor of `platforms`.
  ///
  /// Returns `None` for thin targets. Fails when the target also carries an
  /// analysis flavor or when the platforms do not share one SDK.
  pub fn create(platforms: &FlavorDomain<CxxPlatform>, target: &BuildTarget) -> Result<Option<Self>, MultiarchError> {
    let platform_flavors: Vec<Flavor> = target.flavors().iter().filter(|f| platforms.contains(f)).cloned().collect();
    if platform_flavors.len() <= 1 {
      return Ok(None);
    }

    if let Some(flavor) = target.flavors().iter().find(|f| FORBIDDEN_FLAVORS.contains(&f.name())) {
      return Err(MultiarchError::ForbiddenFlavor {
        target: target.clone(),
        flavor: flavor.clone(),
      });
    }

    let mut selected = Vec::with_capacity(platform_flavors.len());
    for flavor in &platform_flavors {
      selected.push(platforms.value(flavor)?);
    }

    let sdks: BTreeSet<String> = selected.iter().map(|p| p.sdk.to_string()).collect();
    if sdks.len() > 1 {
      return Err(MultiarchError::SdkMismatch {
        target: target.clone(),
        sdks: sdks.into_iter().collect(),
      });
    }

    let platform_free = target.without_flavors(&platform_flavors);
    let thin_targets = platform_flavors
      .iter()
      .map(|flavor| platform_free.with_appended_flavors([flavor.clone()]))
      .collect();

    debug!(target = %target, slices = platform_flavors.len(), "fat binary");
    Ok(Some(Self {
      fat_target: target.clone(),
      thin_targets,
      representative_platform: selected[0].clone(),
    }))
  }
}

/// A rule that merges `thin_rules` outputs into `output` with the platform's `lipo`.
pub fn multiarch_rule(
  params: BuildRuleParams,
  info: &MultiarchFileInfo,
  thin_rules: &[Arc<BuildRule>],
  output: &Path,
) -> Result<BuildRule, MultiarchError> {
  let mut args = vec![
    "-create".to_string(),
    "-output".to_string(),
    output.display().to_string(),
  ];
  for thin in thin_rules {
    let thin_output = thin.output().ok_or_else(|| MultiarchError::MissingThinOutput {
      target: info.fat_target.clone(),
      thin: thin.target().clone(),
    })?;
    args.push(thin_output.display().to_string());
  }

  let mut declared: RuleSet = params.declared_deps().clone();
  declared.extend(thin_rules.iter().cloned());

  Ok(
    BuildRule::builder(params.with_declared_deps(declared), MULTIARCH)
      .output(output.to_path_buf())
      .action(RuleAction::new(info.representative_platform.lipo.clone(), args))
      .attribute("sdk", info.representative_platform.sdk.to_string())
      .build(),
  )
}

/// Resolve every thin slice through the resolver and build the fat rule.
pub fn create_multiarch_rule(
  ctx: &RuleContext<'_>,
  params: BuildRuleParams,
  info: &MultiarchFileInfo,
) -> Result<BuildRule, ResolveError> {
  let thin_rules = ctx.resolver.require_all_rules(&info.thin_targets)?;
  let output: PathBuf = ctx.gen_path(&info.fat_target, info.fat_target.short_name());
  Ok(multiarch_rule(params, info, &thin_rules, &output)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{Arch, Sdk, default_platforms};

  fn t(s: &str) -> BuildTarget {
    s.parse().unwrap()
  }

  #[test]
  fn thin_target_is_not_multiarch() {
    let platforms = default_platforms().unwrap();
    assert_eq!(MultiarchFileInfo::create(&platforms, &t("//app:bin#iphoneos-arm64")).unwrap(), None);
    assert_eq!(MultiarchFileInfo::create(&platforms, &t("//app:bin")).unwrap(), None);
  }

  #[test]
  fn matching_sdks_decompose_into_thin_targets() {
    let platforms = default_platforms().unwrap();
    let fat = t("//app:bin#iphoneos-arm64,iphoneos-armv7,static");
    let info = MultiarchFileInfo::create(&platforms, &fat).unwrap().unwrap();

    let base = t("//app:bin#static");
    let expected = vec![
      base.with_appended_flavors([Flavor::new("iphoneos-arm64").unwrap()]),
      base.with_appended_flavors([Flavor::new("iphoneos-armv7").unwrap()]),
    ];
    assert_eq!(info.thin_targets, expected);
    assert_eq!(info.representative_platform.sdk, Sdk::new("iphoneos", "17.0"));
    assert_eq!(info.representative_platform.arch, Arch::Arm64);
  }

  #[test]
  fn mismatched_sdks_rejected() {
    let platforms = default_platforms().unwrap();
    let fat = t("//app:bin#iphoneos-arm64,iphonesimulator-x86_64");
    let err = MultiarchFileInfo::create(&platforms, &fat).unwrap_err();
    assert_eq!(
      err.to_string(),
      "//app:bin#iphoneos-arm64,iphonesimulator-x86_64: Fat binaries can only be generated from binaries compiled for the same SDK."
    );
  }

  #[test]
  fn analysis_flavors_rejected() {
    let platforms = default_platforms().unwrap();
    let fat = t("//app:bin#compilation-database,iphoneos-arm64,iphoneos-armv7");
    let err = MultiarchFileInfo::create(&platforms, &fat).unwrap_err();
    assert!(matches!(err, MultiarchError::ForbiddenFlavor { ref flavor, .. } if flavor.name() == "compilation-database"));
    assert!(err.to_string().ends_with("Fat binaries is only supported when building an actual binary."));
  }

  #[test]
  fn lipo_action_lists_thin_outputs() {
    let platforms = default_platforms().unwrap();
    let fat = t("//app:bin#iphoneos-arm64,iphoneos-armv7");
    let info = MultiarchFileInfo::create(&platforms, &fat).unwrap().unwrap();

    let thin: Vec<Arc<BuildRule>> = info
      .thin_targets
      .iter()
      .map(|target| {
        let params = BuildRuleParams::new(target.clone(), RuleSet::new(), RuleSet::new(), RuleSet::new());
        let output = format!("out/{}", target.short_name_and_flavor_postfix());
        Arc::new(BuildRule::builder(params, RuleType::new("thin")).output(output).build())
      })
      .collect();

    let params = BuildRuleParams::new(fat.clone(), RuleSet::new(), RuleSet::new(), RuleSet::new());
    let rule = multiarch_rule(params, &info, &thin, Path::new("out/bin")).unwrap();
    let action = rule.action().unwrap();
    assert_eq!(action.program, "lipo");
    assert_eq!(
      action.args,
      vec!["-create", "-output", "out/bin", "out/bin#iphoneos-arm64", "out/bin#iphoneos-armv7"]
    );
    assert_eq!(rule.build_deps().len(), 2);
  }
}
