//! # optx-core: Cost-Based Optimizer Core
//!
//! This crate implements the data structures and search machinery of a
//! cost-based query optimizer: statistics, cost and cardinality models, the
//! memo of alternative join plans and the builder that fills it. The rewrite
//! rules that drive them live in `optx-rules`.
//!
//! ## Module Overview
//!
//! - **`memo`**: The Memo table -- groups of equivalent relational expressions
//!   forming a DAG, plus bottom-up best-plan selection.
//! - **`join_order`**: Enumerates join orders and physical join variants into the memo.
//! - **`hints`**: Join hint parsing and the matchers that steer best-plan selection.
//! - **`cost`**: Cost and cardinality models, including the biased costers used by hints.
//! - **`stats`**: Histograms, functional dependencies and the histogram arithmetic
//!   of index costing.
//! - **`range`**: Index scan ranges and the per-index range builder.
//! - **`plan`**: The logical plan tree rules consume and produce.
//! - **`expr`**: Scalar expressions, values and column references.
//! - **`fds`**: Integer bitsets and functional dependency sets.
//! - **`catalog`**: Traits for statistics, tables and indexes, with in-memory implementations.
//! - **`rule`**: The Rule trait, RuleRegistry and optimization context.
//! - **`config`**: Cost constants and search knobs.
//! - **`error`**: The optimizer's error type.

pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod fds;
pub mod hints;
pub mod join_order;
pub mod memo;
pub mod plan;
pub mod range;
pub mod rule;
pub mod stats;
