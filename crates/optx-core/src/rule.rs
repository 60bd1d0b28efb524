//! # Rule System
//!
//! Rules are the rewrite steps of an optimization pass. Each consumes a
//! [`LogicalPlan`] and either returns a replacement or declines.
//!
//! ## Rule Types
//!
//! - **Node rules** (`RuleType::Node`): rewrite one node at a time. The driver
//!   offers them every node of the tree, children before parents. The costed
//!   index scan, which replaces a Filter over a table with an indexed access,
//!   is a node rule.
//! - **Plan rules** (`RuleType::Plan`): see the whole tree once. Join planning
//!   needs every join and its inputs at the same time, so it is a plan rule.
//!
//! ## Context
//!
//! [`OptContext`] carries what rules read but never write: the statistics
//! provider, the optional index registry, the configuration and the query's
//! parsed hints. Each query gets its own context; the provider is the only
//! state shared between concurrent passes.
//!
//! ## Rule Registry
//!
//! The `RuleRegistry` keeps rules in the order they run.

use crate::catalog::{IndexRegistry, StatsProvider};
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::hints::Hint;
use crate::plan::LogicalPlan;
use std::sync::Arc;

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Applied to every node, bottom-up.
    Node,
    /// Applied once to the root.
    Plan,
}

/// Context passed to rules during application.
#[derive(Clone)]
pub struct OptContext {
    pub stats: Arc<dyn StatsProvider>,
    pub registry: Option<Arc<dyn IndexRegistry>>,
    pub config: OptimizerConfig,
    pub hints: Vec<Hint>,
}

impl OptContext {
    pub fn new(stats: Arc<dyn StatsProvider>, config: OptimizerConfig) -> Self {
        Self {
            stats,
            registry: None,
            config,
            hints: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn IndexRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_hints(mut self, hints: Vec<Hint>) -> Self {
        self.hints = hints;
        self
    }
}

/// A rewrite step.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Rewrite `plan`, or return `Ok(None)` to leave it unchanged. Errors abort
    /// the pass.
    fn apply(&self, plan: &LogicalPlan, ctx: &OptContext) -> Result<Option<LogicalPlan>>;
}

/// Registry of optimization rules, in application order.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn rule(&self, name: &str) -> Option<&dyn Rule> {
        self.rules().find(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Rule for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Node
        }

        fn apply(&self, _plan: &LogicalPlan, _ctx: &OptContext) -> Result<Option<LogicalPlan>> {
            Ok(None)
        }
    }

    #[test]
    fn test_registry_keeps_order() {
        let mut registry = RuleRegistry::new();
        assert!(registry.is_empty());
        registry.add_rule(Box::new(Noop));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rule("noop").unwrap().rule_type(), RuleType::Node);
        assert!(registry.rule("missing").is_none());
    }
}
