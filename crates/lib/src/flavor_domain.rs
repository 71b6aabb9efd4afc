//! Flavor domains: closed, named mappings from mutually exclusive flavors to values.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::target::{BuildTarget, Flavor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlavorDomainError {
  #[error("flavor domain '{domain}' has duplicate flavor '{flavor}'")]
  DuplicateFlavor { domain: String, flavor: Flavor },

  #[error("multiple {domain} flavors in {target}: {}", join(.flavors))]
  Ambiguous {
    domain: String,
    target: String,
    flavors: Vec<Flavor>,
  },

  #[error("flavor '{flavor}' is not in domain '{domain}'")]
  Unknown { domain: String, flavor: Flavor },
}

fn join(flavors: &[Flavor]) -> String {
  flavors.iter().map(Flavor::name).collect::<Vec<_>>().join(", ")
}

/// A value that names its own flavor, e.g. a platform.
pub trait FlavorConvertible {
  fn flavor(&self) -> Flavor;
}

/// A named, closed mapping from flavor to value.
///
/// Flavors of one domain are mutually exclusive on a target. The domain does
/// not enforce that on targets; callers check with [`FlavorDomain::contains_any_of`]
/// and [`FlavorDomain::get_value`].
#[derive(Debug, Clone)]
pub struct FlavorDomain<V> {
  name: String,
  values: BTreeMap<Flavor, V>,
}

impl<V> FlavorDomain<V> {
  /// Build a domain from explicit `(flavor, value)` pairs. Fails on a repeated flavor.
  pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = (Flavor, V)>) -> Result<Self, FlavorDomainError> {
    let name = name.into();
    let mut values = BTreeMap::new();
    for (flavor, value) in entries {
      if values.contains_key(&flavor) {
        return Err(FlavorDomainError::DuplicateFlavor { domain: name, flavor });
      }
      values.insert(flavor, value);
    }
    Ok(Self { name, values })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn flavors(&self) -> impl Iterator<Item = &Flavor> {
    self.values.keys()
  }

  pub fn values(&self) -> impl Iterator<Item = &V> {
    self.values.values()
  }

  pub fn contains(&self, flavor: &Flavor) -> bool {
    self.values.contains_key(flavor)
  }

  pub fn contains_any_of(&self, flavors: &BTreeSet<Flavor>) -> bool {
    flavors.iter().any(|f| self.values.contains_key(f))
  }

  /// The value for one flavor of this domain.
  pub fn value(&self, flavor: &Flavor) -> Result<&V, FlavorDomainError> {
    self.values.get(flavor).ok_or_else(|| FlavorDomainError::Unknown {
      domain: self.name.clone(),
      flavor: flavor.clone(),
    })
  }

  /// The single flavor of `flavors` belonging to this domain, if any.
  pub fn get_flavor(&self, flavors: &BTreeSet<Flavor>) -> Result<Option<&Flavor>, FlavorDomainError> {
    self.get_flavor_for("<flavor set>", flavors)
  }

  /// The value for the single flavor of `flavors` belonging to this domain, if any.
  pub fn get_value(&self, flavors: &BTreeSet<Flavor>) -> Result<Option<&V>, FlavorDomainError> {
    Ok(self.get_flavor(flavors)?.and_then(|f| self.values.get(f)))
  }

  pub fn get_value_for_target(&self, target: &BuildTarget) -> Result<Option<&V>, FlavorDomainError> {
    let flavor = self.get_flavor_for(&target.to_string(), target.flavors())?;
    Ok(flavor.and_then(|f| self.values.get(f)))
  }

  fn get_flavor_for(&self, context: &str, flavors: &BTreeSet<Flavor>) -> Result<Option<&Flavor>, FlavorDomainError> {
    let mut matching = self.values.keys().filter(|f| flavors.contains(*f));
    let first = matching.next();
    let rest: Vec<&Flavor> = matching.collect();
    match first {
      Some(first) if !rest.is_empty() => Err(FlavorDomainError::Ambiguous {
        domain: self.name.clone(),
        target: context.to_string(),
        flavors: std::iter::once(first).chain(rest).cloned().collect(),
      }),
      other => Ok(other),
    }
  }
}

impl<V: FlavorConvertible> FlavorDomain<V> {
  /// Build a domain whose values name their own flavors.
  pub fn from_values(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Result<Self, FlavorDomainError> {
    Self::new(name, values.into_iter().map(|v| (v.flavor(), v)))
  }
}
