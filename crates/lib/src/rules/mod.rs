//! Build rules and their construction from target nodes.

mod action_graph;
mod build_rule;
mod resolver;
mod rule_key;
mod transformer;

pub use action_graph::ActionGraph;
pub use build_rule::{BuildRule, BuildRuleBuilder, BuildRuleParams, RuleAction, RuleSet};
pub use resolver::{BuildRuleResolver, ResolveError, RuleContext};
pub use rule_key::{RuleKey, RuleKeyError, RuleKeyFactory};
pub use transformer::{DefaultTargetNodeToBuildRuleTransformer, TargetNodeToBuildRuleTransformer};
