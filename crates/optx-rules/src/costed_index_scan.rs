//! # Costed Index Scan
//!
//! Replaces a filter over a table with an [`IndexedAccess`] on the index whose
//! statistics predict the fewest rows, plus whatever part of the filter the
//! index cannot decide.
//!
//! ## Pipeline
//!
//! 1. Flatten the predicate into an index filter tree ([`Flattener`]).
//! 2. Gather one statistic per index: the provider's, or a uniform distribution
//!    when the provider has none or fails.
//! 3. Score every index with the [`IndexCoster`] and keep the best.
//! 4. Rebuild the scan ranges from the winner's filters
//!    ([`IndexScanRangeBuilder`]); the leftover becomes the residual filter.
//!
//! A scan that would leave the leading index column unrestricted is not worth
//! an index lookup, and the rule declines. Tables that cannot guarantee exact
//! index matches keep the complete predicate above the scan.
//!
//! ## Index Handles
//!
//! Indexes acquired from the [`IndexRegistry`] are released once the rule
//! finishes with the table, except for the winner, which the new access keeps.

use crate::index_coster::IndexCoster;
use crate::index_filter::Flattener;
use crate::range_builder::IndexScanRangeBuilder;
use optx_core::catalog::{Index, IndexAddressableTable, IndexRegistry};
use optx_core::error::{OptimizerError, Result};
use optx_core::expr::Expr;
use optx_core::hints::has_no_icp;
use optx_core::plan::{IndexedAccess, LogicalPlan};
use optx_core::rule::{OptContext, Rule, RuleType};
use optx_core::stats::{index_fds, uniform_dist_statistic, IndexClass, StatQualifier, Statistic};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Rewrites `Filter(Table)` and `Filter(TableAlias(Table))` into index scans.
pub struct CostedIndexScanRule;

impl Rule for CostedIndexScanRule {
    fn name(&self) -> &str {
        "CostedIndexScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Node
    }

    fn apply(&self, plan: &LogicalPlan, ctx: &OptContext) -> Result<Option<LogicalPlan>> {
        if !ctx.config.enable_index_scans || has_no_icp(&ctx.hints) {
            return Ok(None);
        }
        let LogicalPlan::Filter { predicate, input } = plan else {
            return Ok(None);
        };
        let (table, alias) = match input.as_ref() {
            LogicalPlan::Table { table } => (table, None),
            LogicalPlan::TableAlias { alias, input } => match input.as_ref() {
                LogicalPlan::Table { table } => (table, Some(alias.clone())),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };

        let mut indexes = table.indexes()?;
        let acquired = match &ctx.registry {
            Some(registry) => registry.acquire(table.database(), table.name()),
            None => Vec::new(),
        };
        indexes.extend(acquired.iter().cloned());
        if indexes.is_empty() {
            return Ok(None);
        }

        let result = plan_index_scan(predicate, table, alias, &indexes, ctx);

        if let Some(registry) = &ctx.registry {
            let winner = match &result {
                Ok(Some(LogicalPlan::Filter { input, .. })) => match input.as_ref() {
                    LogicalPlan::IndexedAccess(access) => Some(Arc::clone(&access.index)),
                    _ => None,
                },
                Ok(Some(LogicalPlan::IndexedAccess(access))) => Some(Arc::clone(&access.index)),
                _ => None,
            };
            release_unused(registry.as_ref(), &acquired, winner.as_ref());
        }
        result
    }
}

fn release_unused(registry: &dyn IndexRegistry, acquired: &[Arc<dyn Index>], keep: Option<&Arc<dyn Index>>) {
    for index in acquired {
        if keep.is_some_and(|k| Arc::ptr_eq(k, index)) {
            continue;
        }
        registry.release(index.as_ref());
    }
}

fn plan_index_scan(
    predicate: &Expr,
    table: &Arc<dyn IndexAddressableTable>,
    alias: Option<String>,
    indexes: &[Arc<dyn Index>],
    ctx: &OptContext,
) -> Result<Option<LogicalPlan>> {
    let flat = Flattener::flatten(predicate)?;
    let Some(root) = &flat.root else {
        debug!("No indexable filters on {}", table.name());
        return Ok(None);
    };

    let stats = index_statistics(table, indexes, ctx)?;
    let schema = table.schema();
    let mut coster = IndexCoster::new(schema, &flat.id_to_expr);
    for (index, stat) in indexes.iter().zip(&stats) {
        skip_incomparable(coster.cost(root, stat, index), index.as_ref())?;
    }
    let Some(best) = coster.into_best() else {
        return Ok(None);
    };

    let Some(index) = indexes
        .iter()
        .find(|i| i.id().eq_ignore_ascii_case(&best.stat.qualifier.index))
    else {
        return Err(OptimizerError::UnknownIndex(best.stat.qualifier.to_string()));
    };

    let mut builder = IndexScanRangeBuilder::new(index.as_ref(), &best.filters, &flat.imprecise, &flat.id_to_expr);
    if let Some(leftover) = &flat.leftover {
        builder.push_leftover(leftover.clone());
    }
    let Some(ranges) = skip_incomparable(builder.build(root), index.as_ref())? else {
        return Ok(None);
    };
    let leftover = builder.into_leftover();

    let Some(empty_lookup) = skip_incomparable(ranges.is_empty(), index.as_ref())? else {
        return Ok(None);
    };
    if !empty_lookup {
        if ranges.is_unrestricted() && !index.is_fulltext() {
            debug!("Index {} leaves its first column unrestricted, skipping scan", index.id());
            return Ok(None);
        }
        if !index.can_support(&ranges.ranges) {
            debug!("Index {} cannot serve {} range(s)", index.id(), ranges.len());
            return Ok(None);
        }
        if index.is_spatial() && ranges.len() > 1 {
            return Ok(None);
        }
    }

    let match_against = if index.is_fulltext() {
        let Some(leaf) = root.fulltext_leaf(index.id()) else {
            return Ok(None);
        };
        flat.id_to_expr.get(&leaf.id).cloned()
    } else {
        None
    };

    debug!(
        "Chose index {} on {}: rows={}, filters={}, ranges={}{}",
        index.id(),
        table.name(),
        best.row_count(),
        best.filters.len(),
        ranges.len(),
        if empty_lookup { " (empty)" } else { "" }
    );

    let access = LogicalPlan::IndexedAccess(IndexedAccess {
        table: Arc::clone(table),
        alias,
        index: Arc::clone(index),
        ranges,
        empty_lookup,
        match_against,
        estimated_rows: Some(best.row_count() as f64),
    });

    let residual = if table.precise_match() {
        Expr::join_and(leftover)
    } else {
        Some(predicate.clone())
    };
    Ok(Some(match residual {
        Some(residual) => LogicalPlan::filter(residual, access),
        None => access,
    }))
}

/// Literals of different types on one column cannot be ordered. The index is
/// passed over and the predicate stays in the filter.
fn skip_incomparable<T>(result: Result<T>, index: &dyn Index) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(OptimizerError::IncomparableValues { left, right }) => {
            debug!("Skipping index {}: cannot compare {} with {}", index.id(), left, right);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// One statistic per index, in index order.
///
/// Provider statistics are used when every index has one. Otherwise, or when
/// the provider fails, every index gets a uniform distribution so that real
/// and synthesized estimates never compete.
fn index_statistics(
    table: &Arc<dyn IndexAddressableTable>,
    indexes: &[Arc<dyn Index>],
    ctx: &OptContext,
) -> Result<Vec<Statistic>> {
    let schema = table.schema();
    let provided = match ctx.stats.table_stats(table.database(), table.name()) {
        Ok(stats) => stats,
        Err(e) => {
            debug!("Falling back to uniform statistics for {}: {}", table.name(), e);
            Vec::new()
        }
    };

    let mut by_qualifier: HashMap<StatQualifier, Statistic> = HashMap::new();
    for stat in provided {
        match by_qualifier.get(&stat.qualifier) {
            Some(existing) if existing.columns.len() >= stat.columns.len() => {}
            _ => {
                by_qualifier.insert(stat.qualifier.clone(), stat);
            }
        }
    }

    let mut stats = Vec::with_capacity(indexes.len());
    for index in indexes {
        let qualifier = StatQualifier::new(table.database(), table.name(), index.id());
        let Some(stat) = by_qualifier.get(&qualifier).cloned() else {
            stats.clear();
            break;
        };
        let (fds, col_set) = index_fds(table.name(), schema, index.as_ref())?;
        stats.push(
            stat.with_class(IndexClass::of(index.as_ref()))
                .with_fds(fds)
                .with_col_set(col_set),
        );
    }
    if stats.len() == indexes.len() {
        return Ok(stats);
    }

    let rows = match ctx.stats.row_count(table.database(), table.name()) {
        Ok(rows) => rows,
        Err(e) => {
            debug!("Row count unavailable for {}: {}", table.name(), e);
            ctx.config.cost.default_table_rows as u64
        }
    };
    let avg_row_size = match table.data_length() {
        Some(bytes) if rows > 0 => bytes / rows,
        _ => 0,
    };
    indexes
        .iter()
        .map(|index| {
            uniform_dist_statistic(
                table.database(),
                table.name(),
                schema,
                index.as_ref(),
                rows,
                avg_row_size,
            )
        })
        .collect()
}
