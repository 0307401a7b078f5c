//! Path rules and the rule tree

pub mod rule;
pub mod tree;

pub use rule::{Rule, RuleKind, TypeRestriction};
pub use tree::{NodeId, RuleMatch, RuleTree, RuleTreeBuilder};
