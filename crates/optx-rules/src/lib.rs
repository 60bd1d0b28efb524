//! # Built-in Optimization Rules
//!
//! This crate provides the rules that drive the `optx-core` machinery, and a
//! small driver that runs them over a plan.
//!
//! ## Rules
//!
//! - **`CostedIndexScanRule`** (node rule): replaces a filter over a table with
//!   an indexed access on the index that returns the fewest rows, keeping the
//!   part of the filter the index cannot decide as a residual filter.
//! - **`OptimizeJoinsRule`** (plan rule): memoizes the join trees, applies the
//!   query's join hints and extracts the cheapest plan.
//!
//! Index scans run first so that join planning costs the narrowed accesses.
//!
//! ## Building Blocks
//!
//! - **`index_filter`**: flattens a predicate into a tree of index-addressable
//!   leaves, conjunctions and disjunctions.
//! - **`index_coster`**: scores every index against that tree.
//! - **`range_builder`**: turns the winning index's filters into scan ranges.

pub mod costed_index_scan;
pub mod index_coster;
pub mod index_filter;
pub mod optimize_joins;
pub mod range_builder;

use optx_core::error::Result;
use optx_core::plan::LogicalPlan;
use optx_core::rule::{OptContext, RuleRegistry, RuleType};
use tracing::debug;

/// Create a rule registry with all built-in rules, in the order they run.
pub fn default_rules() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.add_rule(Box::new(costed_index_scan::CostedIndexScanRule));
    registry.add_rule(Box::new(optimize_joins::OptimizeJoinsRule));
    registry
}

/// Optimize `plan` with the built-in rules.
pub fn optimize(plan: LogicalPlan, ctx: &OptContext) -> Result<LogicalPlan> {
    optimize_with(&default_rules(), plan, ctx)
}

/// Run every rule of `registry` over `plan`. Node rules see each node bottom-up;
/// plan rules see the whole tree once.
pub fn optimize_with(registry: &RuleRegistry, plan: LogicalPlan, ctx: &OptContext) -> Result<LogicalPlan> {
    let mut plan = plan;
    for rule in registry.rules() {
        debug!("Applying rule {}", rule.name());
        plan = match rule.rule_type() {
            RuleType::Node => plan.transform_up(&mut |node| match rule.apply(&node, ctx)? {
                Some(rewritten) => Ok(rewritten),
                None => Ok(node),
            })?,
            RuleType::Plan => match rule.apply(&plan, ctx)? {
                Some(rewritten) => rewritten,
                None => plan,
            },
        };
    }
    Ok(plan)
}
