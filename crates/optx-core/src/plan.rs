//! # Logical Plan Tree
//!
//! [`LogicalPlan`] is the tree the optimizer reads and writes. Rewrites never
//! mutate an input node: each rule consumes a plan and returns a new one, reusing
//! untouched subtrees.
//!
//! ## Relations
//!
//! Leaf nodes (tables, aliases, index accesses, values, subquery aliases and the
//! other source relations) are the base relations of join ordering. Each has a
//! lowercased [`LogicalPlan::name`] that join hints and filter column qualifiers
//! refer to.
//!
//! ## Join Strategies
//!
//! A logical join starts as [`JoinStrategy::NestedLoop`]. Join planning replaces
//! the tree with the cheapest shape found in the memo, annotating each join with
//! the physical algorithm that won.

use crate::catalog::{Index, IndexAddressableTable};
use crate::error::Result;
use crate::expr::{Expr, JoinType};
use crate::range::RangeCollection;
use std::fmt::Write;
use std::sync::Arc;

/// Physical algorithm chosen for a join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    NestedLoop,
    Hash,
    Merge,
    /// Probe `index` on the right side once per left row, keyed by `keys`.
    Lookup { index: String, keys: Vec<Expr> },
    /// One lookup per disjunct of an OR filter, results concatenated.
    ConcatLookup { indexes: Vec<String> },
}

impl std::fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinStrategy::NestedLoop => write!(f, "nested-loop"),
            JoinStrategy::Hash => write!(f, "hash"),
            JoinStrategy::Merge => write!(f, "merge"),
            JoinStrategy::Lookup { index, .. } => write!(f, "lookup[{index}]"),
            JoinStrategy::ConcatLookup { indexes } => write!(f, "concat[{}]", indexes.join(",")),
        }
    }
}

/// A table read through one of its indexes.
#[derive(Debug, Clone)]
pub struct IndexedAccess {
    pub table: Arc<dyn IndexAddressableTable>,
    pub alias: Option<String>,
    pub index: Arc<dyn Index>,
    pub ranges: RangeCollection,
    /// The ranges are contradictory; the access returns no rows.
    pub empty_lookup: bool,
    /// Full-text predicate the index evaluates.
    pub match_against: Option<Expr>,
    /// Rows the index coster expects the access to return.
    pub estimated_rows: Option<f64>,
}

/// Logical query plan.
#[derive(Debug, Clone)]
pub enum LogicalPlan {
    Table {
        table: Arc<dyn IndexAddressableTable>,
    },
    TableAlias {
        alias: String,
        input: Box<LogicalPlan>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    IndexedAccess(IndexedAccess),
    Join {
        join_type: JoinType,
        strategy: JoinStrategy,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        condition: Option<Expr>,
    },
    Project {
        exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Values {
        rows: Vec<Vec<Expr>>,
    },
    EmptyTable,
    SubqueryAlias {
        name: String,
        input: Box<LogicalPlan>,
    },
    Max1Row {
        input: Box<LogicalPlan>,
    },
    TableFunction {
        name: String,
    },
    RecursiveTable {
        name: String,
    },
    RecursiveCte {
        name: String,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    pub fn table(table: Arc<dyn IndexAddressableTable>) -> Self {
        LogicalPlan::Table { table }
    }

    pub fn alias(alias: &str, input: LogicalPlan) -> Self {
        LogicalPlan::TableAlias {
            alias: alias.to_string(),
            input: Box::new(input),
        }
    }

    pub fn filter(predicate: Expr, input: LogicalPlan) -> Self {
        LogicalPlan::Filter {
            predicate,
            input: Box::new(input),
        }
    }

    /// Unplanned join of `left` and `right`.
    pub fn join(join_type: JoinType, left: LogicalPlan, right: LogicalPlan, condition: Option<Expr>) -> Self {
        LogicalPlan::Join {
            join_type,
            strategy: JoinStrategy::NestedLoop,
            left: Box::new(left),
            right: Box::new(right),
            condition,
        }
    }

    pub fn project(exprs: Vec<Expr>, input: LogicalPlan) -> Self {
        LogicalPlan::Project {
            exprs,
            input: Box::new(input),
        }
    }

    /// Lowercased name the relation is referenced by. Empty for operators
    /// that are not relations.
    pub fn name(&self) -> String {
        match self {
            LogicalPlan::Table { table } => table.name().to_lowercase(),
            LogicalPlan::TableAlias { alias, .. } => alias.to_lowercase(),
            LogicalPlan::IndexedAccess(access) => match &access.alias {
                Some(alias) => alias.to_lowercase(),
                None => access.table.name().to_lowercase(),
            },
            LogicalPlan::SubqueryAlias { name, .. }
            | LogicalPlan::TableFunction { name }
            | LogicalPlan::RecursiveTable { name }
            | LogicalPlan::RecursiveCte { name, .. } => name.to_lowercase(),
            LogicalPlan::Max1Row { input } => input.name(),
            LogicalPlan::Values { .. } => "values".to_string(),
            LogicalPlan::EmptyTable => "emptytable".to_string(),
            LogicalPlan::Filter { .. }
            | LogicalPlan::Join { .. }
            | LogicalPlan::Project { .. }
            | LogicalPlan::Distinct { .. } => String::new(),
        }
    }

    /// True for nodes that are base relations of join ordering.
    pub fn is_relation(&self) -> bool {
        !matches!(
            self,
            LogicalPlan::Filter { .. }
                | LogicalPlan::Join { .. }
                | LogicalPlan::Project { .. }
                | LogicalPlan::Distinct { .. }
        )
    }

    /// The table under a table scan or an alias of one.
    pub fn base_table(&self) -> Option<&Arc<dyn IndexAddressableTable>> {
        match self {
            LogicalPlan::Table { table } => Some(table),
            LogicalPlan::TableAlias { input, .. } => match input.as_ref() {
                LogicalPlan::Table { table } => Some(table),
                _ => None,
            },
            _ => None,
        }
    }

    /// Names of the relations under this node, in plan order.
    pub fn tables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables(&self, out: &mut Vec<String>) {
        if self.is_relation() {
            out.push(self.name());
            return;
        }
        for child in self.children() {
            child.collect_tables(out);
        }
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::TableAlias { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::SubqueryAlias { input, .. }
            | LogicalPlan::Max1Row { input }
            | LogicalPlan::RecursiveCte { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            LogicalPlan::Table { .. }
            | LogicalPlan::IndexedAccess(_)
            | LogicalPlan::Values { .. }
            | LogicalPlan::EmptyTable
            | LogicalPlan::TableFunction { .. }
            | LogicalPlan::RecursiveTable { .. } => vec![],
        }
    }

    /// Rebuild this node with each child passed through `f`.
    pub fn map_children(self, f: &mut dyn FnMut(LogicalPlan) -> Result<LogicalPlan>) -> Result<LogicalPlan> {
        let mut apply = |input: Box<LogicalPlan>| -> Result<Box<LogicalPlan>> { Ok(Box::new(f(*input)?)) };
        Ok(match self {
            LogicalPlan::TableAlias { alias, input } => LogicalPlan::TableAlias {
                alias,
                input: apply(input)?,
            },
            LogicalPlan::Filter { predicate, input } => LogicalPlan::Filter {
                predicate,
                input: apply(input)?,
            },
            LogicalPlan::Project { exprs, input } => LogicalPlan::Project {
                exprs,
                input: apply(input)?,
            },
            LogicalPlan::Distinct { input } => LogicalPlan::Distinct { input: apply(input)? },
            LogicalPlan::SubqueryAlias { name, input } => LogicalPlan::SubqueryAlias {
                name,
                input: apply(input)?,
            },
            LogicalPlan::Max1Row { input } => LogicalPlan::Max1Row { input: apply(input)? },
            LogicalPlan::RecursiveCte { name, input } => LogicalPlan::RecursiveCte {
                name,
                input: apply(input)?,
            },
            LogicalPlan::Join {
                join_type,
                strategy,
                left,
                right,
                condition,
            } => {
                let left = apply(left)?;
                let right = apply(right)?;
                LogicalPlan::Join {
                    join_type,
                    strategy,
                    left,
                    right,
                    condition,
                }
            }
            leaf => leaf,
        })
    }

    /// Apply `f` bottom-up: children first, then the rebuilt node itself.
    pub fn transform_up(self, f: &mut dyn FnMut(LogicalPlan) -> Result<LogicalPlan>) -> Result<LogicalPlan> {
        let node = self.map_children(&mut |child| child.transform_up(&mut *f))?;
        f(node)
    }

    /// Indented, one node per line.
    pub fn display(&self, indent: usize) -> String {
        let mut out = String::new();
        self.write_indented(&mut out, indent);
        out
    }

    fn write_indented(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let line = match self {
            LogicalPlan::Table { table } => format!("Table: {}", table.name()),
            LogicalPlan::TableAlias { alias, .. } => format!("TableAlias: {alias}"),
            LogicalPlan::Filter { predicate, .. } => format!("Filter: {predicate}"),
            LogicalPlan::IndexedAccess(access) => {
                let mut s = format!(
                    "IndexedAccess: {} index={} ranges={}",
                    self.name(),
                    access.index.id(),
                    access.ranges
                );
                if access.empty_lookup {
                    s.push_str(" empty");
                }
                if let Some(m) = &access.match_against {
                    let _ = write!(s, " match={m}");
                }
                s
            }
            LogicalPlan::Join {
                join_type,
                strategy,
                condition,
                ..
            } => match condition {
                Some(c) => format!("Join: {join_type} {strategy} on {c}"),
                None => format!("Join: {join_type} {strategy}"),
            },
            LogicalPlan::Project { exprs, .. } => {
                let items: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                format!("Project: {}", items.join(", "))
            }
            LogicalPlan::Distinct { .. } => "Distinct".to_string(),
            LogicalPlan::Values { rows } => format!("Values: {} rows", rows.len()),
            LogicalPlan::EmptyTable => "EmptyTable".to_string(),
            LogicalPlan::SubqueryAlias { name, .. } => format!("SubqueryAlias: {name}"),
            LogicalPlan::Max1Row { .. } => "Max1Row".to_string(),
            LogicalPlan::TableFunction { name } => format!("TableFunction: {name}"),
            LogicalPlan::RecursiveTable { name } => format!("RecursiveTable: {name}"),
            LogicalPlan::RecursiveCte { name, .. } => format!("RecursiveCte: {name}"),
        };
        let _ = writeln!(out, "{pad}{line}");
        for child in self.children() {
            child.write_indented(out, indent + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryTable;
    use crate::expr::{ColumnRef, DataType};

    fn table(name: &str) -> LogicalPlan {
        LogicalPlan::table(Arc::new(InMemoryTable::new(
            "db",
            name,
            vec![ColumnRef::new(name, "id", 0, DataType::Int64)],
        )))
    }

    #[test]
    fn test_tables_in_plan_order() {
        let plan = LogicalPlan::join(
            JoinType::Inner,
            LogicalPlan::alias("X", table("orders")),
            LogicalPlan::filter(Expr::int(1), table("Customer")),
            None,
        );
        assert_eq!(plan.tables(), vec!["x".to_string(), "customer".to_string()]);
        assert_eq!(plan.name(), "");
    }

    #[test]
    fn test_transform_up_visits_children_first() {
        let plan = LogicalPlan::project(vec![], LogicalPlan::filter(Expr::int(1), table("t")));
        let mut seen = Vec::new();
        let out = plan
            .transform_up(&mut |node| {
                seen.push(node.display(0).lines().next().unwrap_or_default().to_string());
                Ok(node)
            })
            .unwrap();
        assert_eq!(seen, vec!["Table: t", "Filter: 1", "Project: "]);
        assert!(out.display(0).contains("    Table: t"));
    }

    #[test]
    fn test_base_table_through_alias() {
        assert!(LogicalPlan::alias("a", table("t")).base_table().is_some());
        assert!(LogicalPlan::alias("a", LogicalPlan::EmptyTable).base_table().is_none());
    }
}
