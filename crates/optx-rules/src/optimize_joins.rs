//! # Join Planning
//!
//! Chooses the order and physical operators of a plan's joins. The plan is
//! memoized by the [`JoinOrderBuilder`], the query's hints are applied to the
//! memo, and the cheapest plan that satisfies them is read back out.
//!
//! Subqueries are planned on their own before the enclosing tree, since the
//! memo treats them as opaque sources.

use optx_core::error::Result;
use optx_core::hints::HintType;
use optx_core::join_order::JoinOrderBuilder;
use optx_core::memo::Memo;
use optx_core::plan::LogicalPlan;
use optx_core::rule::{OptContext, Rule, RuleType};
use std::sync::Arc;
use tracing::{debug, trace};

/// Plans every join tree of a query.
pub struct OptimizeJoinsRule;

impl Rule for OptimizeJoinsRule {
    fn name(&self) -> &str {
        "OptimizeJoins"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Plan
    }

    fn apply(&self, plan: &LogicalPlan, ctx: &OptContext) -> Result<Option<LogicalPlan>> {
        if !contains_join(plan) {
            return Ok(None);
        }
        plan_joins(plan.clone(), ctx).map(Some)
    }
}

/// True if any join sits under `plan`, including inside subqueries.
fn contains_join(plan: &LogicalPlan) -> bool {
    matches!(plan, LogicalPlan::Join { .. }) || plan.children().into_iter().any(contains_join)
}

/// True if a join sits under `plan` outside of any memo source.
fn has_local_join(plan: &LogicalPlan) -> bool {
    match plan {
        LogicalPlan::Join { .. } => true,
        LogicalPlan::TableAlias { .. }
        | LogicalPlan::SubqueryAlias { .. }
        | LogicalPlan::Max1Row { .. }
        | LogicalPlan::RecursiveCte { .. } => false,
        other => other.children().into_iter().any(has_local_join),
    }
}

fn plan_subqueries(plan: LogicalPlan, ctx: &OptContext) -> Result<LogicalPlan> {
    match plan {
        LogicalPlan::TableAlias { alias, input } => Ok(LogicalPlan::TableAlias {
            alias,
            input: Box::new(plan_joins(*input, ctx)?),
        }),
        LogicalPlan::SubqueryAlias { name, input } => Ok(LogicalPlan::SubqueryAlias {
            name,
            input: Box::new(plan_joins(*input, ctx)?),
        }),
        LogicalPlan::Max1Row { input } => Ok(LogicalPlan::Max1Row {
            input: Box::new(plan_joins(*input, ctx)?),
        }),
        LogicalPlan::RecursiveCte { name, input } => Ok(LogicalPlan::RecursiveCte {
            name,
            input: Box::new(plan_joins(*input, ctx)?),
        }),
        other => other.map_children(&mut |child| plan_subqueries(child, ctx)),
    }
}

fn plan_joins(plan: LogicalPlan, ctx: &OptContext) -> Result<LogicalPlan> {
    let plan = plan_subqueries(plan, ctx)?;
    if !has_local_join(&plan) {
        return Ok(plan);
    }

    let fixed_order = ctx.hints.iter().any(|h| h.hint_type == HintType::JoinFixedOrder);
    let left_deep = ctx.hints.iter().any(|h| h.hint_type == HintType::LeftDeep);

    let mut memo = Memo::new(Arc::clone(&ctx.stats), &ctx.config.cost);
    JoinOrderBuilder::new(&mut memo, &ctx.config)
        .with_fixed_order(fixed_order)
        .with_left_deep(left_deep)
        .build(&plan)?;
    for hint in &ctx.hints {
        memo.apply_hint(hint);
    }
    memo.optimize_root()?;
    trace!("{}", memo.cost_tree_string());

    let best = memo.best_plan()?;
    debug!("Planned joins over {:?}", best.tables());
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::{InMemoryCatalog, InMemoryTable};
    use optx_core::config::OptimizerConfig;
    use optx_core::expr::{ColumnRef, DataType, Expr, JoinType};

    fn table(name: &str) -> (LogicalPlan, Expr) {
        let column = ColumnRef::new(name, "id", 0, DataType::Int64);
        let t = InMemoryTable::new("db", name, vec![column.clone()]);
        (LogicalPlan::table(Arc::new(t)), Expr::col(column))
    }

    fn ctx() -> OptContext {
        let mut catalog = InMemoryCatalog::new();
        catalog.set_row_count("db", "a", 10);
        catalog.set_row_count("db", "b", 1000);
        OptContext::new(Arc::new(catalog), OptimizerConfig::default())
    }

    #[test]
    fn test_rule_metadata() {
        let rule = OptimizeJoinsRule;
        assert_eq!(rule.name(), "OptimizeJoins");
        assert_eq!(rule.rule_type(), RuleType::Plan);
    }

    #[test]
    fn test_plan_without_joins_is_untouched() {
        let (a, _) = table("a");
        assert!(OptimizeJoinsRule.apply(&a, &ctx()).unwrap().is_none());
    }

    #[test]
    fn test_join_keeps_both_relations() {
        let (a, a_id) = table("a");
        let (b, b_id) = table("b");
        let plan = LogicalPlan::join(JoinType::Inner, a, b, Some(Expr::eq(a_id, b_id)));
        let out = OptimizeJoinsRule.apply(&plan, &ctx()).unwrap().unwrap();
        let mut tables = out.tables();
        tables.sort();
        assert_eq!(tables, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_join_inside_subquery_is_planned() {
        let (a, a_id) = table("a");
        let (b, b_id) = table("b");
        let inner = LogicalPlan::join(JoinType::Inner, a, b, Some(Expr::eq(a_id, b_id)));
        let plan = LogicalPlan::SubqueryAlias {
            name: "sq".to_string(),
            input: Box::new(inner),
        };
        let out = OptimizeJoinsRule.apply(&plan, &ctx()).unwrap().unwrap();
        let LogicalPlan::SubqueryAlias { input, .. } = out else {
            panic!("subquery alias should stay on top");
        };
        assert!(matches!(input.as_ref(), LogicalPlan::Join { .. }));
    }
}
