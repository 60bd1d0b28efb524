//! # Optimizer Errors
//!
//! Errors that abort optimization of a single query. Conditions that merely mean
//! "nothing to do" (no applicable index, an OR that cannot be pushed down, a join
//! hint naming an unknown table) are not errors: they return `Ok(None)` or leave
//! the input plan unchanged.
//!
//! Statistics provider failures are recoverable: callers fall back to uniform
//! statistics and only log the failure.

use thiserror::Error;

/// Error raised while optimizing a query.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The query contains an expression the optimizer cannot interpret, e.g. the
    /// right side of an `IN` predicate that is not a tuple of values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The statistics provider failed. Reported by providers; the optimizer
    /// recovers by synthesizing uniform statistics.
    #[error("statistics unavailable for {table}: {reason}")]
    Stats { table: String, reason: String },

    /// An index references a column missing from the table schema.
    #[error("column not found on table {table} during stats building: {column}")]
    ColumnNotFound { table: String, column: String },

    /// The winning statistic refers to an index that was not a costing candidate.
    #[error("tried building index scan with unknown statistic index: {0}")]
    UnknownIndex(String),

    /// A plan was requested from a memo group that has not been optimized.
    #[error("expected expression group plans to be fixed: group {0}")]
    GroupNotOptimized(u32),

    /// A memo group id does not exist.
    #[error("unknown memo group: {0}")]
    UnknownGroup(u32),

    /// Merge joins need an equality filter whose sides are comparable.
    #[error("merge join expects an equality filter, found: {0}")]
    MergeJoinFilter(String),

    /// Two scalar values of incompatible types were compared.
    #[error("cannot compare {left} with {right}")]
    IncomparableValues { left: String, right: String },

    /// Configuration failed to parse.
    #[error("invalid optimizer config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
