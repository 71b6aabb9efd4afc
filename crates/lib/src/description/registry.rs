use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::Description;
use super::builtin::{
  AppleBundleDescription, CxxBinaryDescription, CxxLibraryDescription, GenruleDescription, ResourceDescription,
};
use crate::flavor_domain::FlavorDomain;
use crate::graph::TargetNodeBuilder;
use crate::graph::TargetNode;
use crate::graph::manifest::ManifestError;
use crate::platform::CxxPlatform;
use crate::target::BuildTarget;

trait NodeFactory: Send + Sync {
  fn builder(&self, target: BuildTarget, args: serde_json::Value) -> Result<TargetNodeBuilder, ManifestError>;
}

struct TypedFactory<D: Description>(Arc<D>);

impl<D> NodeFactory for TypedFactory<D>
where
  D: Description,
  D::Args: DeserializeOwned,
{
  fn builder(&self, target: BuildTarget, args: serde_json::Value) -> Result<TargetNodeBuilder, ManifestError> {
    let args: D::Args = serde_json::from_value(args).map_err(|source| ManifestError::InvalidArgs {
      target: target.clone(),
      rule_type: self.0.rule_type().to_string(),
      source,
    })?;
    Ok(TargetNode::builder(target, self.0.clone(), args))
  }
}

/// Maps rule type names to descriptions and decodes each node's arguments.
#[derive(Default)]
pub struct DescriptionRegistry {
  factories: BTreeMap<&'static str, Arc<dyn NodeFactory>>,
}

impl DescriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with every built-in rule type, using `platforms` for native rules.
  pub fn with_builtins(platforms: Arc<FlavorDomain<CxxPlatform>>) -> Self {
    let mut registry = Self::new();
    registry.register(Arc::new(CxxLibraryDescription::new(platforms.clone())));
    registry.register(Arc::new(CxxBinaryDescription::new(platforms)));
    registry.register(Arc::new(AppleBundleDescription));
    registry.register(Arc::new(ResourceDescription::apple_resource()));
    registry.register(Arc::new(ResourceDescription::apple_asset_catalog()));
    registry.register(Arc::new(ResourceDescription::apple_wrapper_resource()));
    registry.register(Arc::new(GenruleDescription));
    registry
  }

  /// Register `description` under its rule type, replacing any earlier registration.
  pub fn register<D>(&mut self, description: Arc<D>)
  where
    D: Description,
    D::Args: DeserializeOwned,
  {
    let name = description.rule_type().name();
    self.factories.insert(name, Arc::new(TypedFactory(description)));
  }

  pub fn rule_types(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.factories.keys().copied()
  }

  pub fn contains(&self, rule_type: &str) -> bool {
    self.factories.contains_key(rule_type)
  }

  /// Start a node of `rule_type`, decoding `args` into the description's argument type.
  pub fn node_builder(
    &self,
    target: BuildTarget,
    rule_type: &str,
    args: serde_json::Value,
  ) -> Result<TargetNodeBuilder, ManifestError> {
    let factory = self.factories.get(rule_type).ok_or_else(|| ManifestError::UnknownRuleType {
      target: target.clone(),
      rule_type: rule_type.to_string(),
    })?;
    factory.builder(target, args)
  }
}
