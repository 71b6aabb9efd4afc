//! Flavors: validated build-variant tags attached to targets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when validating a flavor name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlavorError {
  #[error("empty flavor name")]
  Empty,

  #[error("invalid characters in flavor name '{flavor}': {invalid:?} (allowed: [-a-zA-Z0-9_.])")]
  InvalidCharacters { flavor: String, invalid: Vec<char> },
}

/// A build-variant tag such as `shared` or `iphoneos-arm64`.
///
/// Flavors compare by name. A target carries them in a sorted set, so the
/// natural ordering here is the canonical ordering of flavored targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Flavor(String);

impl Flavor {
  /// Create a flavor, validating its name.
  pub fn new(name: impl Into<String>) -> Result<Self, FlavorError> {
    let name = name.into();
    Self::check(&name)?;
    Ok(Self(name))
  }

  /// Validate a flavor name without constructing a flavor.
  pub fn check(name: &str) -> Result<(), FlavorError> {
    if name.is_empty() {
      return Err(FlavorError::Empty);
    }

    let invalid: Vec<char> = name.chars().filter(|c| !is_valid_flavor_char(*c)).collect();
    if !invalid.is_empty() {
      return Err(FlavorError::InvalidCharacters {
        flavor: name.to_string(),
        invalid,
      });
    }

    Ok(())
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

fn is_valid_flavor_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl fmt::Display for Flavor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for Flavor {
  type Err = FlavorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::new(s)
  }
}

impl TryFrom<String> for Flavor {
  type Error = FlavorError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<Flavor> for String {
  fn from(flavor: Flavor) -> Self {
    flavor.0
  }
}

/// Well-known flavor names.
pub mod names {
  pub const SHARED: &str = "shared";
  pub const STATIC: &str = "static";
  pub const STATIC_PIC: &str = "static-pic";
  pub const COMPILATION_DATABASE: &str = "compilation-database";
  pub const INFER: &str = "infer";
  pub const INFER_ANALYZE: &str = "infer-analyze";
  pub const INFER_CAPTURE_ALL: &str = "infer-capture-all";
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_allowed_charset() {
    for name in ["shared", "iphoneos-arm64", "macosx_x86_64", "v1.2", "A-z_0.9"] {
      assert!(Flavor::check(name).is_ok(), "{} should be valid", name);
    }
  }

  #[test]
  fn rejects_empty() {
    assert_eq!(Flavor::check(""), Err(FlavorError::Empty));
  }

  #[test]
  fn rejects_every_character_outside_charset() {
    for c in [' ', '#', ',', '/', ':', '$', '+', 'é', '\n'] {
      let name = format!("ok{}ok", c);
      match Flavor::check(&name) {
        Err(FlavorError::InvalidCharacters { invalid, .. }) => assert_eq!(invalid, vec![c]),
        other => panic!("expected invalid characters for {:?}, got {:?}", name, other),
      }
    }
  }

  #[test]
  fn ordering_is_lexicographic() {
    let mut flavors = vec![
      Flavor::new("static").unwrap(),
      Flavor::new("iphoneos-arm64").unwrap(),
      Flavor::new("shared").unwrap(),
    ];
    flavors.sort();
    let names: Vec<_> = flavors.iter().map(Flavor::name).collect();
    assert_eq!(names, vec!["iphoneos-arm64", "shared", "static"]);
  }

  #[test]
  fn deserialization_validates() {
    assert!(serde_json::from_str::<Flavor>("\"ok-flavor\"").is_ok());
    assert!(serde_json::from_str::<Flavor>("\"bad flavor\"").is_err());
  }
}
