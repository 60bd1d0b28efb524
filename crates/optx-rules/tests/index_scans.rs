//! End-to-end costed index scan tests.
//!
//! Each test builds a table with its indexes in the in-memory catalog, wraps
//! it in a filter and runs the default rule pipeline.
//!
//! ## What These Tests Verify
//! - The index returning the fewest rows is chosen, deterministically
//! - Filters the scan decides exactly disappear; everything else stays above it
//! - An OR is pushed into the scan only when every branch can be served
//! - Spatial and full-text indexes serve their own predicates and nothing else
//! - Provider failures fall back to uniform statistics
//! - Registry handles are released unless the access keeps them

use optx_core::catalog::{IndexRegistry, InMemoryCatalog, InMemoryIndex, InMemoryTable, StatsProvider};
use optx_core::config::OptimizerConfig;
use optx_core::expr::{
    BinaryOp, BoundingBox, Collation, ColumnRef, DataType, Expr, JoinType, ScalarValue, SpatialOp, UnaryOp,
};
use optx_core::hints::parse_join_hints;
use optx_core::plan::{IndexedAccess, LogicalPlan};
use optx_core::rule::OptContext;
use optx_core::stats::{HistogramBucket, StatQualifier, Statistic};
use optx_rules::optimize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `t(a NOT NULL, b, s)` where `s` is a case-insensitive varchar.
fn base_table() -> InMemoryTable {
    InMemoryTable::new(
        "db",
        "t",
        vec![
            ColumnRef::new("t", "a", 0, DataType::Int64).not_null(),
            ColumnRef::new("t", "b", 1, DataType::Int64),
            ColumnRef::new("t", "s", 2, DataType::Varchar).with_collation(Collation::CaseInsensitive),
        ],
    )
}

fn col(t: &InMemoryTable, name: &str) -> Expr {
    Expr::col(t.column(name).cloned().unwrap())
}

fn cmp(op: BinaryOp, left: Expr, right: i64) -> Expr {
    Expr::binary(op, left, Expr::int(right))
}

fn catalog_with_rows(rows: u64) -> InMemoryCatalog {
    let mut c = InMemoryCatalog::new();
    c.set_row_count("db", "t", rows);
    c
}

fn ctx(catalog: InMemoryCatalog) -> OptContext {
    OptContext::new(Arc::new(catalog), OptimizerConfig::default())
}

/// Install a test subscriber once; `RUST_LOG=optx_rules=trace` shows the costing.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run(table: InMemoryTable, predicate: Expr, ctx: &OptContext) -> LogicalPlan {
    init_tracing();
    let plan = LogicalPlan::filter(predicate, LogicalPlan::table(Arc::new(table)));
    optimize(plan, ctx).unwrap()
}

/// The indexed access of a rewritten plan, and the residual predicate above it.
fn access(plan: &LogicalPlan) -> (&IndexedAccess, Option<&Expr>) {
    match plan {
        LogicalPlan::IndexedAccess(access) => (access, None),
        LogicalPlan::Filter { predicate, input } => match input.as_ref() {
            LogicalPlan::IndexedAccess(access) => (access, Some(predicate)),
            other => panic!("expected an indexed access, got {}", other.display(0)),
        },
        other => panic!("expected an indexed access, got {}", other.display(0)),
    }
}

fn int(v: i64) -> ScalarValue {
    ScalarValue::Int64(v)
}

fn is_unchanged_filter(plan: &LogicalPlan) -> bool {
    matches!(plan, LogicalPlan::Filter { input, .. } if matches!(input.as_ref(), LogicalPlan::Table { .. }))
}

/// `t(a NOT NULL, shape)` with a spatial index on `shape`.
fn spatial_table() -> InMemoryTable {
    InMemoryTable::new(
        "db",
        "t",
        vec![
            ColumnRef::new("t", "a", 0, DataType::Int64).not_null(),
            ColumnRef::new("t", "shape", 1, DataType::Geometry),
        ],
    )
    .with_index(InMemoryIndex::new("db", "t", "geo_idx", &["t.shape"]).spatial())
}

/// `t(a NOT NULL, body)` with a full-text index on `body`.
fn fulltext_table() -> InMemoryTable {
    InMemoryTable::new(
        "db",
        "t",
        vec![
            ColumnRef::new("t", "a", 0, DataType::Int64).not_null(),
            ColumnRef::new("t", "body", 1, DataType::Text),
        ],
    )
    .with_index(InMemoryIndex::new("db", "t", "ft_idx", &["t.body"]).fulltext())
}

fn single_column_stat(index: &str, column: &str, data_type: DataType) -> Statistic {
    Statistic::new(StatQualifier::new("db", "t", index), vec![column.into()], vec![data_type])
        .with_row_count(1000)
        .with_distinct_count(1000)
}

fn intersects(t: &InMemoryTable) -> Expr {
    Expr::Spatial {
        op: SpatialOp::Intersects,
        left: Box::new(col(t, "shape")),
        right: Box::new(Expr::lit(ScalarValue::Geometry(BoundingBox::new(0.0, 0.0, 1.0, 1.0)))),
    }
}

// ===========================================================================
// Index choice
// ===========================================================================

#[test]
fn test_composite_index_serves_equality_and_range() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_ab", &["t.a", "t.b"]));
    let pred = Expr::And(vec![
        Expr::eq(col(&t, "a"), Expr::int(5)),
        cmp(BinaryOp::Gt, col(&t, "b"), 10),
    ]);
    let plan = run(t, pred, &ctx(catalog_with_rows(1000)));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "idx_ab");
    assert!(residual.is_none());
    assert_eq!(access.ranges.len(), 1);
    assert!(access.estimated_rows.unwrap() < 1000.0);
}

#[test]
fn test_or_with_unindexed_branch_is_left_alone() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]));
    let pred = Expr::Or(vec![
        Expr::eq(col(&t, "a"), Expr::int(5)),
        Expr::eq(col(&t, "b"), Expr::int(6)),
    ]);
    let before = LogicalPlan::filter(pred.clone(), LogicalPlan::table(Arc::new(t.clone())));
    let after = run(t, pred, &ctx(catalog_with_rows(1000)));
    assert_eq!(after.display(0), before.display(0));
}

#[test]
fn test_in_list_becomes_point_lookups() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let pred = Expr::in_list(col(&t, "a"), vec![Expr::int(1), Expr::int(2), Expr::int(3)]);
    let plan = run(t, pred, &ctx(catalog_with_rows(1000)));
    let (access, residual) = access(&plan);
    assert!(residual.is_none());
    assert_eq!(access.ranges.len(), 3);
    assert!(access.estimated_rows.unwrap() <= 3.0);
}

#[test]
fn test_histograms_pick_the_selective_index() {
    let t = base_table()
        .with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]))
        .with_index(InMemoryIndex::new("db", "t", "idx_b", &["t.b"]));
    let mut catalog = catalog_with_rows(1000);
    catalog.add_statistic(
        "db",
        "t",
        Statistic::new(StatQualifier::new("db", "t", "idx_a"), vec!["a".into()], vec![DataType::Int64])
            .with_histogram(vec![
                HistogramBucket::new(vec![int(1)], 900, 1),
                HistogramBucket::new(vec![int(2)], 100, 1),
            ])
            .update_counts(),
    );
    catalog.add_statistic(
        "db",
        "t",
        Statistic::new(StatQualifier::new("db", "t", "idx_b"), vec!["b".into()], vec![DataType::Int64])
            .with_histogram(vec![
                HistogramBucket::new(vec![int(2)], 5, 1),
                HistogramBucket::new(vec![int(3)], 995, 1),
            ])
            .update_counts(),
    );

    let a_eq = Expr::eq(col(&t, "a"), Expr::int(1));
    let pred = Expr::And(vec![a_eq.clone(), Expr::eq(col(&t, "b"), Expr::int(2))]);
    let plan = run(t, pred, &ctx(catalog));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "idx_b");
    assert_eq!(access.estimated_rows, Some(5.0));
    assert_eq!(residual, Some(&a_eq));
}

#[test]
fn test_tie_prefers_primary_then_name() {
    let pred = |t: &InMemoryTable| Expr::eq(col(t, "a"), Expr::int(7));

    let t = base_table()
        .with_index(InMemoryIndex::new("db", "t", "idx_z", &["t.a"]))
        .with_index(InMemoryIndex::new("db", "t", "idx_y", &["t.a"]));
    let p = pred(&t);
    let plan = run(t, p, &ctx(catalog_with_rows(1000)));
    assert_eq!(access(&plan).0.index.id(), "idx_y");

    let t = base_table()
        .with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]).unique())
        .with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let p = pred(&t);
    let plan = run(t, p, &ctx(catalog_with_rows(1000)));
    assert_eq!(access(&plan).0.index.id(), "primary");
}

#[test]
fn test_choice_is_deterministic() {
    let build = || {
        base_table()
            .with_index(InMemoryIndex::new("db", "t", "idx_ab", &["t.a", "t.b"]))
            .with_index(InMemoryIndex::new("db", "t", "idx_ba", &["t.b", "t.a"]))
            .with_index(InMemoryIndex::new("db", "t", "idx_b", &["t.b"]))
    };
    let pred = |t: &InMemoryTable| {
        Expr::And(vec![
            cmp(BinaryOp::Lt, col(t, "a"), 3),
            Expr::eq(col(t, "b"), Expr::int(2)),
        ])
    };
    let ctx = ctx(catalog_with_rows(5000));
    let t = build();
    let first = run(t.clone(), pred(&t), &ctx).display(0);
    for _ in 0..5 {
        let t = build();
        assert_eq!(run(t.clone(), pred(&t), &ctx).display(0), first);
    }
}

// ===========================================================================
// Residual filters
// ===========================================================================

#[test]
fn test_imprecise_comparison_stays_above_scan() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_s", &["t.s"]));
    let pred = Expr::eq(col(&t, "s"), Expr::lit(ScalarValue::Utf8("abc".into())));
    let plan = run(t, pred.clone(), &ctx(catalog_with_rows(1000)));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "idx_s");
    assert_eq!(residual, Some(&pred));
}

#[test]
fn test_imprecise_table_keeps_whole_predicate() {
    let t = base_table()
        .with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique())
        .imprecise();
    let pred = Expr::And(vec![
        Expr::eq(col(&t, "a"), Expr::int(5)),
        cmp(BinaryOp::Gt, col(&t, "b"), 1),
    ]);
    let plan = run(t, pred.clone(), &ctx(catalog_with_rows(1000)));
    let (_, residual) = access(&plan);
    assert_eq!(residual, Some(&pred));
}

#[test]
fn test_served_or_with_unserved_conjunct() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]));
    let b_eq = Expr::eq(col(&t, "b"), Expr::int(3));
    let pred = Expr::And(vec![
        Expr::Or(vec![
            Expr::eq(col(&t, "a"), Expr::int(1)),
            Expr::eq(col(&t, "a"), Expr::int(2)),
        ]),
        b_eq.clone(),
    ]);
    let plan = run(t, pred, &ctx(catalog_with_rows(1000)));
    let (access, residual) = access(&plan);
    assert_eq!(access.ranges.len(), 2);
    assert_eq!(residual, Some(&b_eq));
}

#[test]
fn test_contradiction_is_empty_lookup() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]));
    let pred = Expr::And(vec![
        Expr::eq(col(&t, "a"), Expr::int(1)),
        Expr::eq(col(&t, "a"), Expr::int(2)),
    ]);
    let plan = run(t, pred, &ctx(catalog_with_rows(1000)));
    let (access, _) = access(&plan);
    assert!(access.empty_lookup);
    assert_eq!(access.estimated_rows, Some(0.0));
}

#[test]
fn test_range_on_second_column_only_is_not_a_scan() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_ab", &["t.a", "t.b"]));
    let pred = cmp(BinaryOp::Gt, col(&t, "b"), 10);
    let plan = run(t, pred, &ctx(catalog_with_rows(1000)));
    assert!(is_unchanged_filter(&plan));
}

#[test]
fn test_mismatched_literal_types_skip_the_index() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "idx_a", &["t.a"]));
    let pred = Expr::And(vec![
        Expr::eq(col(&t, "a"), Expr::int(1)),
        Expr::binary(BinaryOp::Gt, col(&t, "a"), Expr::lit(ScalarValue::Utf8("x".into()))),
    ]);
    let before = LogicalPlan::filter(pred.clone(), LogicalPlan::table(Arc::new(t.clone())));
    let after = run(t, pred, &ctx(catalog_with_rows(1000)));
    assert_eq!(after.display(0), before.display(0));
}

// ===========================================================================
// Spatial and full-text indexes
// ===========================================================================

#[test]
fn test_spatial_index_with_uniform_statistics() {
    let t = spatial_table();
    let pred = intersects(&t);
    let plan = run(t, pred.clone(), &ctx(catalog_with_rows(1000)));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "geo_idx");
    assert!(!access.empty_lookup);
    assert_eq!(access.ranges.len(), 1);
    assert_eq!(residual, Some(&pred));
}

#[test]
fn test_spatial_index_with_provider_statistics() {
    let t = spatial_table();
    let mut catalog = catalog_with_rows(1000);
    catalog.add_statistic("db", "t", single_column_stat("geo_idx", "shape", DataType::Geometry));
    let pred = intersects(&t);
    let plan = run(t, pred.clone(), &ctx(catalog));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "geo_idx");
    assert_eq!(access.ranges.len(), 1);
    assert_eq!(residual, Some(&pred));
}

#[test]
fn test_spatial_index_ignores_ordinary_predicates() {
    let t = spatial_table();
    let mut catalog = catalog_with_rows(1000);
    catalog.add_statistic("db", "t", single_column_stat("geo_idx", "shape", DataType::Geometry));
    let pred = Expr::unary(UnaryOp::IsNotNull, col(&t, "shape"));
    let plan = run(t, pred, &ctx(catalog));
    assert!(is_unchanged_filter(&plan));
}

#[test]
fn test_fulltext_index_with_provider_statistics() {
    let t = fulltext_table();
    let mut catalog = catalog_with_rows(1000);
    catalog.add_statistic("db", "t", single_column_stat("ft_idx", "body", DataType::Text));
    let pred = Expr::MatchAgainst {
        columns: vec![t.column("body").cloned().unwrap()],
        index: "ft_idx".into(),
        query: "needle".into(),
    };
    let plan = run(t, pred.clone(), &ctx(catalog));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "ft_idx");
    assert_eq!(access.match_against.as_ref(), Some(&pred));
    assert_eq!(residual, Some(&pred));
}

// ===========================================================================
// Statistics fallback, handles and switches
// ===========================================================================

#[test]
fn test_failing_provider_still_plans() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let mut catalog = InMemoryCatalog::new();
    catalog.fail_table("db", "t");
    let pred = Expr::eq(col(&t, "a"), Expr::int(5));
    let plan = run(t, pred, &ctx(catalog));
    let (access, residual) = access(&plan);
    assert_eq!(access.index.id(), "primary");
    assert!(residual.is_none());
}

#[test]
fn test_registry_handles_are_released() {
    let mut catalog = catalog_with_rows(1000);
    catalog.register_index(InMemoryIndex::new("db", "t", "reg_b", &["t.b"]));
    let catalog = Arc::new(catalog);
    let stats: Arc<dyn StatsProvider> = catalog.clone();
    let registry: Arc<dyn IndexRegistry> = catalog.clone();
    let ctx = OptContext::new(stats, OptimizerConfig::default()).with_registry(registry);

    // the registered index wins and stays acquired
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let pred = Expr::eq(col(&t, "b"), Expr::int(5));
    let plan = run(t, pred, &ctx);
    assert_eq!(access(&plan).0.index.id(), "reg_b");
    assert_eq!(catalog.outstanding_handles(), 1);

    // the table's own index wins and the handle goes back
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let pred = Expr::eq(col(&t, "a"), Expr::int(5));
    let plan = run(t, pred, &ctx);
    assert_eq!(access(&plan).0.index.id(), "primary");
    assert_eq!(catalog.outstanding_handles(), 1);
}

#[test]
fn test_no_icp_hint_keeps_filter() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let pred = Expr::eq(col(&t, "a"), Expr::int(5));
    let ctx = ctx(catalog_with_rows(1000)).with_hints(parse_join_hints("/*+ NO_ICP */"));
    let plan = run(t, pred, &ctx);
    assert!(matches!(plan, LogicalPlan::Filter { .. }));
}

#[test]
fn test_config_can_disable_index_scans() {
    let config = OptimizerConfig::from_json(r#"{ "enable_index_scans": false }"#).unwrap();
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let pred = Expr::eq(col(&t, "a"), Expr::int(5));
    let ctx = OptContext::new(Arc::new(catalog_with_rows(1000)), config);
    let plan = run(t, pred, &ctx);
    assert!(matches!(plan, LogicalPlan::Filter { .. }));
}

// ===========================================================================
// Pipeline
// ===========================================================================

#[test]
fn test_index_scan_feeds_join_planning() {
    let t = base_table().with_index(InMemoryIndex::new("db", "t", "primary", &["t.a"]).unique());
    let u = InMemoryTable::new("db", "u", vec![ColumnRef::new("u", "a", 0, DataType::Int64).not_null()]);
    let cond = Expr::eq(col(&t, "b"), Expr::col(u.column("a").cloned().unwrap()));
    let filtered = LogicalPlan::filter(Expr::eq(col(&t, "a"), Expr::int(5)), LogicalPlan::table(Arc::new(t)));
    let plan = LogicalPlan::join(JoinType::Inner, filtered, LogicalPlan::table(Arc::new(u)), Some(cond));

    let mut catalog = catalog_with_rows(1000);
    catalog.set_row_count("db", "u", 1000);
    let out = optimize(plan, &ctx(catalog)).unwrap();

    let mut tables = out.tables();
    tables.sort();
    assert_eq!(tables, vec!["t", "u"]);
    assert!(out.display(0).contains("IndexedAccess: t index=primary"));
}
