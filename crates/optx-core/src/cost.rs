//! # Cost Model
//!
//! This module defines the cost abstraction and the default cost and cardinality
//! models used to rank the alternatives of a memo group.
//!
//! ## Coster and Carder
//!
//! A [`Coster`] maps one relational operator, plus the cardinality and cost of
//! each child group, to the operator's local cost. A [`Carder`] maps the same
//! inputs to an estimated output row count. Both are pure: they never mutate
//! their inputs and only read from the statistics provider.
//!
//! ## Default Formulas
//!
//! Costs combine four per-row constants from [`CostConfig`]: sequential I/O,
//! random I/O, CPU and memory. With `l` and `r` the left and right child
//! cardinalities:
//!
//! ```text
//! nested loop   (l*r - 1)*seq + l*r*cpu        (x degenerate for cross/full outer)
//! hash          l*cpu + r*(seq + mem)
//! merge         l*cpu
//! lookup        l*rand + l*m*cpu - r*seq
//! concat        l*sum(m)*concat*(rand + cpu) - r*seq
//! semi / anti   l*(r/2)*(seq + cpu)
//! ```
//!
//! `m` is the lookup selectivity multiplier: it starts at 1 and grows by a fixed
//! step for a non-unique index, for every filter beyond the key columns and for
//! every nullable key column.
//!
//! ## Biased Costers
//!
//! [`BiasedCoster`] returns a large negative cost for one physical join shape
//! and defers everything else to the default coster. Tests and join hints use
//! it to force a shape without touching the costs of the others.
//!
//! ## Cost Accumulation
//!
//! Costs are additive: the memo adds an operator's local cost to the best costs
//! of its child groups.

use crate::catalog::StatsProvider;
use crate::config::CostConfig;
use crate::error::{OptimizerError, Result};
use crate::expr::{BinaryOp, Expr};
use crate::memo::{JoinBase, Lookup, RelOp, SourceRel};
use crate::plan::LogicalPlan;
use serde::{Deserialize, Serialize};

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total cost. Lower is better. `f64::MAX` represents infinity
    /// (an infeasible or not-yet-costed plan).
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Estimates of one child group, in the operator's child order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildStats {
    pub card: f64,
    pub cost: f64,
}

impl ChildStats {
    pub fn new(card: f64, cost: f64) -> Self {
        Self { card, cost }
    }
}

/// Local cost of a relational operator.
pub trait Coster: Send + Sync {
    fn estimate_cost(&self, op: &RelOp, children: &[ChildStats], stats: &dyn StatsProvider) -> Result<f64>;
}

/// Output cardinality of a relational operator.
pub trait Carder: Send + Sync {
    fn estimate_card(&self, op: &RelOp, children: &[ChildStats], stats: &dyn StatsProvider) -> Result<f64>;
}

fn left_right(children: &[ChildStats]) -> (f64, f64) {
    let l = children.first().map_or(0.0, |c| c.card);
    let r = children.get(1).map_or(0.0, |c| c.card);
    (l, r)
}

fn child(children: &[ChildStats]) -> ChildStats {
    children.first().copied().unwrap_or(ChildStats::new(0.0, 0.0))
}

/// Row count of the table under a scan, or the configured fallback when the
/// provider fails or the source is not a table.
fn source_rows(source: &SourceRel, stats: &dyn StatsProvider, config: &CostConfig) -> f64 {
    let Some(table) = source.plan.base_table() else {
        return config.default_table_rows;
    };
    match stats.row_count(table.database(), table.name()) {
        Ok(rows) => rows as f64,
        Err(_) => config.default_table_rows,
    }
}

fn index_scan_rows(source: &SourceRel, stats: &dyn StatsProvider, config: &CostConfig) -> f64 {
    match &source.plan {
        LogicalPlan::IndexedAccess(access) if access.empty_lookup => 0.0,
        LogicalPlan::IndexedAccess(access) => match access.estimated_rows {
            Some(rows) => rows,
            None => match stats.row_count(access.table.database(), access.table.name()) {
                Ok(rows) => rows as f64,
                Err(_) => config.default_table_rows,
            },
        },
        _ => config.default_table_rows,
    }
}

fn values_rows(source: &SourceRel) -> f64 {
    match &source.plan {
        LogicalPlan::Values { rows } => rows.len() as f64,
        _ => 0.0,
    }
}

/// Selectivity multiplier of one lookup: 1, plus a step for a non-unique
/// index, for each filter beyond the key columns and for each nullable key.
pub fn lookup_multiplier(lookup: &Lookup, filters: usize, config: &CostConfig) -> f64 {
    let step = config.lookup_multiplier_step;
    let mut m = 1.0;
    if !lookup.index.is_unique() {
        m += step;
    }
    m += step * filters.saturating_sub(lookup.key_exprs.len()) as f64;
    m += step * lookup.nullmask.iter().filter(|nullable| **nullable).count() as f64;
    m
}

/// Default cost model.
#[derive(Debug, Clone, Default)]
pub struct DefaultCoster {
    pub config: CostConfig,
}

impl DefaultCoster {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    fn nested_loop(&self, l: f64, r: f64) -> f64 {
        let c = &self.config;
        (l * r - 1.0) * c.seq_io_cost_factor + l * r * c.cpu_cost_factor
    }

    fn partial(&self, l: f64, r: f64) -> f64 {
        let c = &self.config;
        l * (r / 2.0) * (c.seq_io_cost_factor + c.cpu_cost_factor)
    }

    fn merge(&self, base: &JoinBase, l: f64) -> Result<f64> {
        match base.filter.first() {
            Some(Expr::BinaryOp {
                op: BinaryOp::Eq | BinaryOp::NullSafeEq,
                ..
            }) => Ok(l * self.config.cpu_cost_factor),
            Some(other) => Err(OptimizerError::MergeJoinFilter(other.to_string())),
            None => Err(OptimizerError::MergeJoinFilter("no filter".to_string())),
        }
    }
}

impl Coster for DefaultCoster {
    fn estimate_cost(&self, op: &RelOp, children: &[ChildStats], stats: &dyn StatsProvider) -> Result<f64> {
        let c = &self.config;
        let (l, r) = left_right(children);
        let cost = match op {
            RelOp::TableScan(source) | RelOp::TableAlias(source) => match source.plan.base_table() {
                Some(table) => match stats.row_count(table.database(), table.name()) {
                    Ok(rows) => rows as f64 * c.seq_io_cost_factor,
                    Err(_) => c.default_table_rows,
                },
                None => c.default_table_rows,
            },
            RelOp::IndexScan(source) => index_scan_rows(source, stats, c) * c.seq_io_cost_factor,
            RelOp::Values(source) => values_rows(source) * c.cpu_cost_factor,
            RelOp::RecursiveTable(_) => c.recursive_table_rows * c.seq_io_cost_factor,
            RelOp::RecursiveCte(_) | RelOp::SubqueryAlias(_) => c.subquery_rows * c.seq_io_cost_factor,
            RelOp::Max1Row(_) => 1.0,
            RelOp::TableFunc(_) => c.table_function_rows,
            RelOp::EmptyTable(_) => 0.0,
            RelOp::Project { .. } => child(children).card * c.cpu_cost_factor,
            RelOp::Distinct { .. } => {
                child(children).cost * (c.cpu_cost_factor + c.distinct_mem_weight * c.mem_cost_factor)
            }
            RelOp::Filter { filters, .. } => child(children).card * c.cpu_cost_factor * filters.len() as f64,
            RelOp::InnerJoin(_) | RelOp::LeftJoin(_) => self.nested_loop(l, r),
            RelOp::CrossJoin(_) | RelOp::FullOuterJoin(_) => self.nested_loop(l, r) * c.degenerate_penalty,
            RelOp::SemiJoin(_) | RelOp::AntiJoin(_) => self.partial(l, r),
            RelOp::HashJoin(base) => {
                if base.join_type.is_partial() {
                    self.partial(l, r) * 0.5
                } else {
                    l * c.cpu_cost_factor + r * (c.seq_io_cost_factor + c.mem_cost_factor)
                }
            }
            RelOp::MergeJoin(base) => self.merge(base, l)?,
            RelOp::LookupJoin { base, lookup } => {
                let m = lookup_multiplier(lookup, base.filter.len(), c);
                l * c.rand_io_cost_factor + l * m * c.cpu_cost_factor - r * c.seq_io_cost_factor
            }
            RelOp::ConcatJoin { base, concat } => {
                let m: f64 = concat
                    .iter()
                    .map(|lookup| lookup_multiplier(lookup, base.filter.len(), c))
                    .sum();
                l * m * c.concat_cost_factor * (c.rand_io_cost_factor + c.cpu_cost_factor)
                    - r * c.seq_io_cost_factor
            }
        };
        Ok(cost)
    }
}

/// Default cardinality model.
#[derive(Debug, Clone, Default)]
pub struct DefaultCarder {
    pub config: CostConfig,
}

impl DefaultCarder {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }
}

impl Carder for DefaultCarder {
    fn estimate_card(&self, op: &RelOp, children: &[ChildStats], stats: &dyn StatsProvider) -> Result<f64> {
        let c = &self.config;
        let sel = c.optimistic_join_sel;
        let (l, r) = left_right(children);
        let card = match op {
            RelOp::TableScan(source) | RelOp::TableAlias(source) => source_rows(source, stats, c),
            RelOp::IndexScan(source) => index_scan_rows(source, stats, c),
            RelOp::Values(source) => values_rows(source),
            RelOp::RecursiveTable(_) => c.recursive_table_rows,
            RelOp::RecursiveCte(_) | RelOp::SubqueryAlias(_) => c.subquery_rows,
            RelOp::Max1Row(_) => 1.0,
            RelOp::TableFunc(_) => c.table_function_rows,
            RelOp::EmptyTable(_) => 0.0,
            RelOp::Project { .. } | RelOp::Distinct { .. } => child(children).card,
            RelOp::Filter { .. } => child(children).card * c.filter_selectivity,
            RelOp::LookupJoin { base, lookup } => l * sel * lookup_multiplier(lookup, base.filter.len(), c),
            RelOp::ConcatJoin { base, concat } => {
                let m: f64 = concat
                    .iter()
                    .map(|lookup| lookup_multiplier(lookup, base.filter.len(), c))
                    .sum();
                l * sel * m
            }
            RelOp::InnerJoin(base)
            | RelOp::CrossJoin(base)
            | RelOp::LeftJoin(base)
            | RelOp::FullOuterJoin(base)
            | RelOp::SemiJoin(base)
            | RelOp::AntiJoin(base)
            | RelOp::HashJoin(base)
            | RelOp::MergeJoin(base) => {
                if base.join_type.is_partial() {
                    sel * l
                } else if base.join_type.is_left_outer() {
                    l.max(sel * l * r)
                } else {
                    sel * l * r
                }
            }
        };
        Ok(card)
    }
}

/// The physical join shape a [`BiasedCoster`] favors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinBias {
    /// Logical inner joins (nested loop).
    Inner,
    Hash,
    /// Lookup and concat lookup joins.
    Lookup,
    Merge,
    /// Semi and anti joins.
    Partial,
}

/// Coster that makes one join shape irresistibly cheap.
#[derive(Debug, Clone)]
pub struct BiasedCoster {
    pub inner: DefaultCoster,
    pub target: JoinBias,
}

impl BiasedCoster {
    pub fn new(config: CostConfig, target: JoinBias) -> Self {
        Self {
            inner: DefaultCoster::new(config),
            target,
        }
    }

    fn is_target(&self, op: &RelOp) -> bool {
        match self.target {
            JoinBias::Inner => matches!(op, RelOp::InnerJoin(_)),
            JoinBias::Hash => matches!(op, RelOp::HashJoin(_)),
            JoinBias::Lookup => matches!(op, RelOp::LookupJoin { .. } | RelOp::ConcatJoin { .. }),
            JoinBias::Merge => matches!(op, RelOp::MergeJoin(_)),
            JoinBias::Partial => matches!(op, RelOp::SemiJoin(_) | RelOp::AntiJoin(_)),
        }
    }
}

impl Coster for BiasedCoster {
    fn estimate_cost(&self, op: &RelOp, children: &[ChildStats], stats: &dyn StatsProvider) -> Result<f64> {
        if self.is_target(op) {
            return Ok(-self.inner.config.bias_factor);
        }
        self.inner.estimate_cost(op, children, stats)
    }
}
