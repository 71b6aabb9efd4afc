//! Build target identity: `cell//base/path:name#flavor1,flavor2`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cell::CellName;
use super::flavor::{Flavor, FlavorError};

const ROOT_CELL_DIR: &str = "root";
const NAMED_CELLS_DIR: &str = "cells";

/// Errors raised while parsing or constructing build targets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildTargetError {
  #[error("invalid build target '{target}': {reason}")]
  Parse { target: String, reason: String },

  #[error("invalid flavor in build target '{target}': {source}")]
  Flavor {
    target: String,
    #[source]
    source: FlavorError,
  },

  #[error("flavors of {target} are not in natural order: {flavors:?}")]
  FlavorsNotOrdered { target: String, flavors: Vec<String> },
}

/// A rule identity without any flavors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnflavoredBuildTarget {
  cell: Option<CellName>,
  base_path: String,
  short_name: String,
}

impl UnflavoredBuildTarget {
  /// Create an unflavored target. `base_path` is cell-relative without a leading `//`.
  pub fn new(cell: Option<CellName>, base_path: impl Into<String>, short_name: impl Into<String>) -> Self {
    Self {
      cell,
      base_path: base_path.into(),
      short_name: short_name.into(),
    }
  }

  pub fn cell(&self) -> Option<&CellName> {
    self.cell.as_ref()
  }

  pub fn base_path(&self) -> &str {
    &self.base_path
  }

  pub fn short_name(&self) -> &str {
    &self.short_name
  }

  pub fn fully_qualified_name(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for UnflavoredBuildTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(cell) = &self.cell {
      write!(f, "{}", cell)?;
    }
    write!(f, "//{}:{}", self.base_path, self.short_name)
  }
}

/// The identity of one buildable unit: an unflavored target plus a sorted flavor set.
///
/// Flavors are part of identity: `//a:b` and `//a:b#shared` are distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildTarget {
  unflavored: UnflavoredBuildTarget,
  flavors: BTreeSet<Flavor>,
}

impl BuildTarget {
  /// Create a target, sorting and deduplicating the given flavors.
  pub fn new(unflavored: UnflavoredBuildTarget, flavors: impl IntoIterator<Item = Flavor>) -> Self {
    Self {
      unflavored,
      flavors: flavors.into_iter().collect(),
    }
  }

  /// Create a target from flavors that must already be in natural order.
  pub fn from_ordered_flavors(unflavored: UnflavoredBuildTarget, flavors: Vec<Flavor>) -> Result<Self, BuildTargetError> {
    if flavors.windows(2).any(|pair| pair[0] >= pair[1]) {
      return Err(BuildTargetError::FlavorsNotOrdered {
        target: unflavored.to_string(),
        flavors: flavors.iter().map(|f| f.name().to_string()).collect(),
      });
    }
    Ok(Self::new(unflavored, flavors))
  }

  /// Shorthand for an unflavored target.
  pub fn of(unflavored: UnflavoredBuildTarget) -> Self {
    Self::new(unflavored, [])
  }

  pub fn unflavored(&self) -> &UnflavoredBuildTarget {
    &self.unflavored
  }

  pub fn cell(&self) -> Option<&CellName> {
    self.unflavored.cell()
  }

  pub fn base_path(&self) -> &str {
    self.unflavored.base_path()
  }

  pub fn short_name(&self) -> &str {
    self.unflavored.short_name()
  }

  pub fn flavors(&self) -> &BTreeSet<Flavor> {
    &self.flavors
  }

  pub fn is_flavored(&self) -> bool {
    !self.flavors.is_empty()
  }

  pub fn has_flavor(&self, flavor: &Flavor) -> bool {
    self.flavors.contains(flavor)
  }

  pub fn has_flavor_named(&self, name: &str) -> bool {
    self.flavors.iter().any(|f| f.name() == name)
  }

  /// Return a copy with exactly the named flavors removed.
  pub fn without_flavors<'a>(&self, flavors: impl IntoIterator<Item = &'a Flavor>) -> Self {
    let mut remaining = self.flavors.clone();
    for flavor in flavors {
      remaining.remove(flavor);
    }
    Self {
      unflavored: self.unflavored.clone(),
      flavors: remaining,
    }
  }

  pub fn without_all_flavors(&self) -> Self {
    Self::of(self.unflavored.clone())
  }

  /// Return a copy with the given flavors unioned in.
  pub fn with_appended_flavors(&self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
    let mut all = self.flavors.clone();
    all.extend(flavors);
    Self {
      unflavored: self.unflavored.clone(),
      flavors: all,
    }
  }

  /// Return a copy carrying exactly the given flavors.
  pub fn with_flavors(&self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
    Self::new(self.unflavored.clone(), flavors)
  }

  /// `name` or `name#f1,f2`.
  pub fn short_name_and_flavor_postfix(&self) -> String {
    if self.flavors.is_empty() {
      return self.short_name().to_string();
    }
    format!("{}#{}", self.short_name(), self.flavor_postfix())
  }

  fn flavor_postfix(&self) -> String {
    self.flavors.iter().map(Flavor::name).collect::<Vec<_>>().join(",")
  }

  pub fn fully_qualified_name(&self) -> String {
    self.to_string()
  }

  /// Relative path identifying this target on disk.
  ///
  /// Root-cell targets live under `root/` and named cells under `cells/<cell>/`, so
  /// a cell name never reads as a package directory. The last segment is always
  /// `name#flavors` (with an empty flavor list for unflavored targets). Package
  /// segments cannot contain `#`, so no target's path is a prefix of another's.
  pub fn to_relative_path(&self) -> PathBuf {
    let mut path = PathBuf::new();
    match self.cell() {
      Some(cell) => {
        path.push(NAMED_CELLS_DIR);
        path.push(cell.as_str());
      }
      None => path.push(ROOT_CELL_DIR),
    }
    for segment in self.base_path().split('/').filter(|s| !s.is_empty()) {
      path.push(segment);
    }
    path.push(format!("{}#{}", self.short_name(), self.flavor_postfix()));
    path
  }

}

impl fmt::Display for BuildTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.unflavored)?;
    if !self.flavors.is_empty() {
      write!(f, "#{}", self.flavor_postfix())?;
    }
    Ok(())
  }
}

impl FromStr for BuildTarget {
  type Err = BuildTargetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BuildTargetParser::parse_fully_qualified(s)
  }
}

impl Serialize for BuildTarget {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for BuildTarget {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// Parses target strings relative to the base path of the declaring build file.
pub struct BuildTargetParser;

impl BuildTargetParser {
  /// Parse a target that must not depend on a base path context.
  pub fn parse_fully_qualified(text: &str) -> Result<BuildTarget, BuildTargetError> {
    if text.starts_with(':') {
      return Err(parse_error(text, "relative target without a base path context"));
    }
    Self::parse(text, "")
  }

  /// Parse `text`, resolving `:name` against `base_path_context`.
  ///
  /// Accepted forms: `//a/b:c`, `cell//a/b:c`, `:c`, `//a/b` (name defaults to `b`),
  /// each optionally followed by `#flavor1,flavor2`.
  pub fn parse(text: &str, base_path_context: &str) -> Result<BuildTarget, BuildTargetError> {
    let (body, flavor_part) = match text.split_once('#') {
      Some((body, flavors)) => (body, Some(flavors)),
      None => (text, None),
    };

    let unflavored = if let Some(short_name) = body.strip_prefix(':') {
      UnflavoredBuildTarget::new(None, base_path_context.trim_matches('/'), check_short_name(text, short_name)?)
    } else {
      let Some((cell_part, rest)) = body.split_once("//") else {
        return Err(parse_error(text, "expected '//' or ':'"));
      };

      let cell = if cell_part.is_empty() {
        None
      } else {
        Some(CellName::new(cell_part).map_err(|reason| parse_error(text, &reason))?)
      };

      let (base_path, short_name) = match rest.split_once(':') {
        Some((base, name)) => (base, name),
        None => {
          let name = rest.rsplit('/').next().unwrap_or_default();
          (rest, name)
        }
      };

      if base_path.ends_with('/') {
        return Err(parse_error(text, "base path must not end with '/'"));
      }
      if base_path.split('/').any(|segment| segment == "..") {
        return Err(parse_error(text, "base path must not contain '..'"));
      }
      if !base_path.is_empty() && base_path.split('/').any(|segment| segment.is_empty() || segment == ".") {
        return Err(parse_error(text, "base path must not contain empty or '.' segments"));
      }

      UnflavoredBuildTarget::new(cell, base_path, check_short_name(text, short_name)?)
    };

    let mut flavors = BTreeSet::new();
    if let Some(flavor_part) = flavor_part {
      for name in flavor_part.split(',') {
        let flavor = Flavor::new(name).map_err(|source| BuildTargetError::Flavor {
          target: text.to_string(),
          source,
        })?;
        flavors.insert(flavor);
      }
    }

    Ok(BuildTarget::new(unflavored, flavors))
  }
}

fn check_short_name<'a>(text: &str, name: &'a str) -> Result<&'a str, BuildTargetError> {
  if name.is_empty() {
    return Err(parse_error(text, "target name must not be empty"));
  }
  if name.contains(['/', ':', '#', ',']) {
    return Err(parse_error(text, "target name contains a reserved character"));
  }
  if name == "." || name == ".." {
    return Err(parse_error(text, "target name must not be '.' or '..'"));
  }
  Ok(name)
}

fn parse_error(text: &str, reason: &str) -> BuildTargetError {
  BuildTargetError::Parse {
    target: text.to_string(),
    reason: reason.to_string(),
  }
}
