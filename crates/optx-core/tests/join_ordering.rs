//! End-to-end join ordering tests.
//!
//! These tests build join trees in query-text order, memoize them, optimize
//! the memo and check the plan that comes back out.
//!
//! ## Schemas
//! - Chain: `x - y - z - w`, each joined on `id`, with shrinking row counts
//! - Star: one fact table joined to N dimensions on separate keys
//!
//! ## What These Tests Verify
//! - Every relation of the query survives into the best plan
//! - Exhaustive enumeration below `max_dp_tables`, greedy ordering above
//! - Fixed-order and left-deep shapes
//! - Join order hints: accepted when they cover every relation, rejected otherwise

use optx_core::catalog::{InMemoryCatalog, InMemoryTable};
use optx_core::config::OptimizerConfig;
use optx_core::expr::{ColumnRef, DataType, Expr, JoinType};
use optx_core::hints::{parse_join_hints, Hint, HintType};
use optx_core::join_order::JoinOrderBuilder;
use optx_core::memo::Memo;
use optx_core::plan::{JoinStrategy, LogicalPlan};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn table(name: &str) -> LogicalPlan {
    LogicalPlan::table(Arc::new(InMemoryTable::new(
        "db",
        name,
        vec![
            ColumnRef::new(name, "id", 0, DataType::Int64).not_null(),
            ColumnRef::new(name, "fk", 1, DataType::Int64),
        ],
    )))
}

fn col(t: &str, c: &str) -> Expr {
    let index = if c == "id" { 0 } else { 1 };
    Expr::col(ColumnRef::new(t, c, index, DataType::Int64))
}

fn join(left: LogicalPlan, right: LogicalPlan, condition: Expr) -> LogicalPlan {
    LogicalPlan::join(JoinType::Inner, left, right, Some(condition))
}

/// Catalog with the given row counts.
fn catalog(rows: &[(&str, u64)]) -> Arc<InMemoryCatalog> {
    let mut c = InMemoryCatalog::new();
    for (name, n) in rows {
        c.set_row_count("db", name, *n);
    }
    Arc::new(c)
}

/// `x JOIN y ON x.id = y.id JOIN z ON y.id = z.id`
fn chain3() -> LogicalPlan {
    let xy = join(table("x"), table("y"), Expr::eq(col("x", "id"), col("y", "id")));
    join(xy, table("z"), Expr::eq(col("y", "id"), col("z", "id")))
}

fn chain_catalog() -> Arc<InMemoryCatalog> {
    catalog(&[("x", 100_000), ("y", 1000), ("z", 10), ("w", 5)])
}

/// Fact table `f` joined to `dims` dimensions `d0..dN` on `f.fk = dI.id`.
fn star(dims: usize) -> (LogicalPlan, Arc<InMemoryCatalog>) {
    let mut rows = vec![("f".to_string(), 1_000_000u64)];
    let mut plan = table("f");
    for i in 0..dims {
        let name = format!("d{i}");
        plan = join(plan, table(&name), Expr::eq(col("f", "fk"), col(&name, "id")));
        rows.push((name, 10 * (i as u64 + 1)));
    }
    let rows: Vec<(&str, u64)> = rows.iter().map(|(n, r)| (n.as_str(), *r)).collect();
    (plan, catalog(&rows))
}

/// Install a test subscriber once; `RUST_LOG=optx_core=trace` shows the search.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Optimize `plan` and return the best plan.
fn optimize(plan: &LogicalPlan, stats: Arc<InMemoryCatalog>, config: &OptimizerConfig, hints: &[Hint]) -> LogicalPlan {
    init_tracing();
    let mut memo = Memo::new(stats, &config.cost);
    let fixed = hints.iter().any(|h| h.hint_type == HintType::JoinFixedOrder);
    let left_deep = hints.iter().any(|h| h.hint_type == HintType::LeftDeep);
    JoinOrderBuilder::new(&mut memo, config)
        .with_fixed_order(fixed)
        .with_left_deep(left_deep)
        .build(plan)
        .unwrap();
    for hint in hints {
        memo.apply_hint(hint);
    }
    memo.optimize_root().unwrap();
    memo.best_plan().unwrap()
}

fn joins(plan: &LogicalPlan) -> Vec<&LogicalPlan> {
    let mut out = Vec::new();
    let mut stack = vec![plan];
    while let Some(node) = stack.pop() {
        if matches!(node, LogicalPlan::Join { .. }) {
            out.push(node);
        }
        stack.extend(node.children());
    }
    out
}

fn sorted(mut tables: Vec<String>) -> Vec<String> {
    tables.sort();
    tables
}

// ===========================================================================
// Enumeration
// ===========================================================================

#[test]
fn test_chain_keeps_every_relation() {
    let config = OptimizerConfig::default();
    let plan = optimize(&chain3(), chain_catalog(), &config, &[]);
    assert_eq!(sorted(plan.tables()), vec!["x", "y", "z"]);
    assert_eq!(joins(&plan).len(), 2);
}

#[test]
fn test_star_above_dp_limit_uses_greedy() {
    let config = OptimizerConfig {
        max_dp_tables: 4,
        ..Default::default()
    };
    let (plan, stats) = star(7);
    let mut memo = Memo::new(stats, &config.cost);
    JoinOrderBuilder::new(&mut memo, &config).build(&plan).unwrap();
    let greedy_groups = memo.num_groups();
    memo.optimize_root().unwrap();
    let best = memo.best_plan().unwrap();
    assert_eq!(best.tables().len(), 8);

    // exhaustive enumeration of the same star memoizes far more subsets
    let config = OptimizerConfig::default();
    let (plan, stats) = star(7);
    let mut memo = Memo::new(stats, &config.cost);
    JoinOrderBuilder::new(&mut memo, &config).build(&plan).unwrap();
    assert!(memo.num_groups() > greedy_groups);
}

#[test]
fn test_dp_limit_is_capped() {
    // a configured limit above the hard cap still terminates quickly on a
    // wide star by falling back to greedy ordering
    let config = OptimizerConfig {
        max_dp_tables: 64,
        ..Default::default()
    };
    let (plan, stats) = star(18);
    let best = optimize(&plan, stats, &config, &[]);
    assert_eq!(best.tables().len(), 19);
}

#[test]
fn test_fixed_order_keeps_written_order() {
    let config = OptimizerConfig::default();
    let hints = parse_join_hints("/*+ JOIN_FIXED_ORDER */");
    let plan = optimize(&chain3(), chain_catalog(), &config, &hints);
    assert_eq!(plan.tables(), vec!["x", "y", "z"]);
}

#[test]
fn test_left_deep_right_inputs_are_relations() {
    let config = OptimizerConfig::default();
    let hints = vec![Hint::new(HintType::LeftDeep, vec![])];
    let (plan, stats) = star(4);
    let best = optimize(&plan, stats, &config, &hints);
    for j in joins(&best) {
        let LogicalPlan::Join { right, .. } = j else {
            unreachable!()
        };
        assert_eq!(right.tables().len(), 1, "bushy join in {}", best.display(0));
    }
}

// ===========================================================================
// Hints
// ===========================================================================

#[test]
fn test_join_order_hint_is_obeyed() {
    let config = OptimizerConfig::default();
    let hints = parse_join_hints("/*+ JOIN_ORDER(z, y, x) */");
    let plan = optimize(&chain3(), chain_catalog(), &config, &hints);
    assert_eq!(plan.tables(), vec!["z", "y", "x"]);
}

#[test]
fn test_partial_join_order_hint_is_rejected() {
    let config = OptimizerConfig::default();
    let stats = chain_catalog();
    let mut memo = Memo::new(stats.clone(), &config.cost);
    JoinOrderBuilder::new(&mut memo, &config).build(&chain3()).unwrap();
    memo.apply_hint(&Hint::new(HintType::JoinOrder, vec!["x".into(), "y".into()]));
    assert!(memo.hints().order.is_none());

    // the plan is the one cost-based search finds without hints
    memo.optimize_root().unwrap();
    let hinted = memo.best_plan().unwrap();
    let unhinted = optimize(&chain3(), stats, &config, &[]);
    assert_eq!(hinted.display(0), unhinted.display(0));
}

#[test]
fn test_hash_join_hint_picks_hash_join() {
    let config = OptimizerConfig::default();
    let hints = parse_join_hints("/*+ HASH_JOIN(x, y) */");
    let plan = join(table("x"), table("y"), Expr::eq(col("x", "id"), col("y", "id")));
    let best = optimize(&plan, chain_catalog(), &config, &hints);
    let LogicalPlan::Join { strategy, .. } = &best else {
        panic!("expected a join at the root, got {}", best.display(0));
    };
    assert_eq!(*strategy, JoinStrategy::Hash);
}

#[test]
fn test_hint_naming_unknown_table_is_dropped() {
    let config = OptimizerConfig::default();
    let mut memo = Memo::new(chain_catalog(), &config.cost);
    JoinOrderBuilder::new(&mut memo, &config).build(&chain3()).unwrap();
    for hint in parse_join_hints("/*+ LOOKUP_JOIN(x, nope) */") {
        memo.apply_hint(&hint);
    }
    assert!(memo.hints().ops.is_empty());
}

// ===========================================================================
// Explain
// ===========================================================================

#[test]
fn test_memo_explain_marks_best() {
    let config = OptimizerConfig::default();
    let mut memo = Memo::new(chain_catalog(), &config.cost);
    JoinOrderBuilder::new(&mut memo, &config).build(&chain3()).unwrap();
    memo.optimize_root().unwrap();
    let listing = memo.to_string();
    assert!(listing.starts_with("memo:\n"));
    assert_eq!(listing.lines().count(), memo.num_groups() + 1);
    let costs = memo.cost_tree_string();
    assert!(costs.contains(" *"));
}
