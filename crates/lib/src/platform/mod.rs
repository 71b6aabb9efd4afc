//! C/C++ platforms: one per SDK and architecture, addressed by flavor.

pub mod arch;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use arch::Arch;

use crate::flavor_domain::{FlavorConvertible, FlavorDomain, FlavorDomainError};
use crate::target::{Flavor, FlavorError};

/// Name of the platform flavor domain.
pub const CXX_PLATFORM_DOMAIN: &str = "C/C++ Platform";

/// An SDK a platform compiles against. Slices of one fat binary must share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sdk {
  pub name: String,
  pub version: String,
}

impl Sdk {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }
}

impl fmt::Display for Sdk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.name, self.version)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CxxPlatform {
  pub flavor: Flavor,
  pub arch: Arch,
  pub sdk: Sdk,
  /// Tool used to merge architecture slices into a fat binary.
  pub lipo: String,
}

impl CxxPlatform {
  pub fn new(flavor: Flavor, arch: Arch, sdk: Sdk) -> Self {
    Self {
      flavor,
      arch,
      sdk,
      lipo: "lipo".to_string(),
    }
  }
}

impl FlavorConvertible for CxxPlatform {
  fn flavor(&self) -> Flavor {
    self.flavor.clone()
  }
}

/// Errors building a platform domain.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error(transparent)]
  Flavor(#[from] FlavorError),

  #[error(transparent)]
  Domain(#[from] FlavorDomainError),
}

/// The Apple-style platforms known without configuration.
pub fn default_platforms() -> Result<FlavorDomain<CxxPlatform>, PlatformError> {
  const SDK_VERSION: &str = "17.0";
  let entries = [
    ("iphoneos", Arch::Armv7),
    ("iphoneos", Arch::Arm64),
    ("iphonesimulator", Arch::I386),
    ("iphonesimulator", Arch::X86_64),
    ("macosx", Arch::X86_64),
    ("macosx", Arch::Arm64),
  ];

  let mut platforms = Vec::with_capacity(entries.len());
  for (sdk, arch) in entries {
    let flavor = Flavor::new(format!("{}-{}", sdk, arch))?;
    platforms.push(CxxPlatform::new(flavor, arch, Sdk::new(sdk, SDK_VERSION)));
  }
  Ok(FlavorDomain::from_values(CXX_PLATFORM_DOMAIN, platforms)?)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::*;

  #[test]
  fn default_domain_has_six_platforms() {
    let domain = default_platforms().unwrap();
    let names: Vec<_> = domain.flavors().map(Flavor::name).collect();
    assert_eq!(
      names,
      vec![
        "iphoneos-arm64",
        "iphoneos-armv7",
        "iphonesimulator-i386",
        "iphonesimulator-x86_64",
        "macosx-arm64",
        "macosx-x86_64",
      ]
    );
  }

  #[test]
  fn iphoneos_slices_share_an_sdk() {
    let domain = default_platforms().unwrap();
    let armv7 = domain.value(&Flavor::new("iphoneos-armv7").unwrap()).unwrap();
    let arm64 = domain.value(&Flavor::new("iphoneos-arm64").unwrap()).unwrap();
    let sim = domain.value(&Flavor::new("iphonesimulator-x86_64").unwrap()).unwrap();
    assert_eq!(armv7.sdk, arm64.sdk);
    assert_ne!(armv7.sdk, sim.sdk);
    assert_eq!(arm64.arch, Arch::Arm64);
  }

  #[test]
  fn lookup_by_target_flavors() {
    let domain = default_platforms().unwrap();
    let flavors: BTreeSet<Flavor> = ["shared", "macosx-arm64"].iter().map(|n| Flavor::new(*n).unwrap()).collect();
    let platform = domain.get_value(&flavors).unwrap().unwrap();
    assert_eq!(platform.sdk.name, "macosx");
  }
}
