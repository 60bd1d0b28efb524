//! # Optimizer Configuration
//!
//! All numeric knobs of the cost model live in [`CostConfig`], an immutable value
//! handed to the coster and carder at construction. Alternative cost models (such
//! as the hint-biased costers) wrap a coster built from the same config rather than
//! mutating shared constants.
//!
//! [`OptimizerConfig`] adds the search-level knobs. Both structs deserialize from
//! JSON with every field optional, so a deployment only lists what it overrides:
//!
//! ```text
//! { "max_dp_tables": 8, "cost": { "rand_io_cost_factor": 4.0 } }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Per-row cost constants and cardinality fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Cost of evaluating one row in memory.
    pub cpu_cost_factor: f64,
    /// Cost of reading one row sequentially.
    pub seq_io_cost_factor: f64,
    /// Cost of reading one row through a random access (index lookup).
    pub rand_io_cost_factor: f64,
    /// Cost of materializing one row in memory (hash tables, distinct sets).
    pub mem_cost_factor: f64,
    /// Discount applied to each concatenated lookup of a concat join.
    pub concat_cost_factor: f64,
    /// Multiplier discouraging unconstrained cross products and full outer joins.
    pub degenerate_penalty: f64,
    /// Selectivity assumed for join filters.
    pub optimistic_join_sel: f64,
    /// Magnitude of the negative cost returned by biased costers.
    pub bias_factor: f64,
    /// Fraction of rows surviving a filter.
    pub filter_selectivity: f64,
    /// Weight of the memory term when costing a distinct.
    pub distinct_mem_weight: f64,
    /// Added to the lookup selectivity multiplier per imprecision source.
    pub lookup_multiplier_step: f64,
    /// Cardinality used when the stats provider cannot report a row count.
    pub default_table_rows: f64,
    /// Cardinality and cost of a recursive table reference.
    pub recursive_table_rows: f64,
    /// Cardinality and cost of subquery aliases and recursive CTEs.
    pub subquery_rows: f64,
    /// Cardinality and cost of a table function.
    pub table_function_rows: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            cpu_cost_factor: 0.01,
            seq_io_cost_factor: 1.0,
            rand_io_cost_factor: 2.0,
            mem_cost_factor: 2.0,
            concat_cost_factor: 0.75,
            degenerate_penalty: 2.0,
            optimistic_join_sel: 0.10,
            bias_factor: 1e5,
            filter_selectivity: 0.75,
            distinct_mem_weight: 0.75,
            lookup_multiplier_step: 0.1,
            default_table_rows: 1000.0,
            recursive_table_rows: 100.0,
            subquery_rows: 1000.0,
            table_function_rows: 10.0,
        }
    }
}

/// Knobs for one optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub cost: CostConfig,
    /// Largest number of base relations enumerated exhaustively. Join trees with
    /// more relations are ordered greedily.
    pub max_dp_tables: usize,
    /// Never produce merge joins.
    pub disable_merge_join: bool,
    /// Produce lookup and concat lookup joins.
    pub enable_lookup_joins: bool,
    /// Replace filtered table scans with costed index scans.
    pub enable_index_scans: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cost: CostConfig::default(),
            max_dp_tables: 10,
            disable_merge_join: false,
            enable_lookup_joins: true,
            enable_index_scans: true,
        }
    }
}

impl OptimizerConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
