//! # Index Scan Range Builder
//!
//! Turns the winning candidate of the [`IndexCoster`](crate::index_coster::IndexCoster)
//! back into concrete scan ranges, and collects everything the scan does not
//! decide into a leftover list that becomes the residual filter.
//!
//! Nodes whose ids are in the scan's `include` set (or sit below an included
//! And) contribute ranges:
//!
//! - an And intersects the ranges of its OR children with the ranges of its
//!   leaves, which are built together in one [`IndexBuilder`];
//! - an Or unions the ranges of its branches.
//!
//! Nodes outside the scan are emitted verbatim as leftover. Imprecise
//! comparisons, spatial and full-text predicates produce ranges that only
//! over-approximate them, so they are kept as leftover as well. Inside an OR
//! such a predicate cannot be split out of its disjunction, so the whole OR is
//! kept instead.

use crate::index_filter::{FilterId, IndexAnd, IndexFilter, IndexLeaf, IndexOr, LeafOp};
use optx_core::catalog::Index;
use optx_core::error::{OptimizerError, Result};
use optx_core::expr::{Expr, ScalarValue};
use optx_core::fds::FastIntSet;
use optx_core::range::{remove_overlapping_ranges, IndexBuilder, Range, RangeCollection, RangeColumnExpr};
use std::collections::HashMap;

/// Builds the ranges of one index scan.
pub struct IndexScanRangeBuilder<'a> {
    index: &'a dyn Index,
    columns: Vec<String>,
    include: &'a FastIntSet,
    imprecise: &'a FastIntSet,
    id_to_expr: &'a HashMap<FilterId, Expr>,
    leftover: Vec<Expr>,
    /// Depth of enclosing ORs being built.
    disjunction_depth: usize,
}

impl<'a> IndexScanRangeBuilder<'a> {
    pub fn new(
        index: &'a dyn Index,
        include: &'a FastIntSet,
        imprecise: &'a FastIntSet,
        id_to_expr: &'a HashMap<FilterId, Expr>,
    ) -> Self {
        Self {
            index,
            columns: index_column_names(index),
            include,
            imprecise,
            id_to_expr,
            leftover: Vec::new(),
            disjunction_depth: 0,
        }
    }

    /// Add an expression that was never part of the filter tree.
    pub fn push_leftover(&mut self, expr: Expr) {
        self.leftover.push(expr);
    }

    pub fn leftover(&self) -> &[Expr] {
        &self.leftover
    }

    pub fn into_leftover(self) -> Vec<Expr> {
        self.leftover
    }

    /// Ranges of the scan rooted at `root`, pairwise disjoint and sorted.
    pub fn build(&mut self, root: &IndexFilter) -> Result<RangeCollection> {
        let in_scan = self.include.contains(root.id());
        let ranges = match root {
            IndexFilter::And(and) => self.build_and(and, in_scan)?,
            IndexFilter::Or(or) => match self.build_or(or, in_scan)? {
                Some(r) => r,
                None => self.unrestricted(),
            },
            IndexFilter::Leaf(leaf) => self.build_leaf(leaf, in_scan)?,
        };
        remove_overlapping_ranges(ranges.ranges)
    }

    fn build_and(&mut self, and: &IndexAnd, in_scan: bool) -> Result<RangeCollection> {
        // An And is never leftover as a whole; its children decide.
        let in_scan = in_scan || self.include.contains(and.id);

        let mut ret: Option<RangeCollection> = None;
        for or in &and.or_children {
            if let Some(ranges) = self.build_or(or, in_scan)? {
                ret = Some(match ret {
                    None => ranges,
                    Some(prev) => prev.intersect(&ranges)?,
                });
            }
        }

        let mut builder = IndexBuilder::new(self.columns.clone());
        for leaf in and.leaves() {
            match leaf.op {
                LeafOp::SpatialEq | LeafOp::FulltextEq => {
                    if let Some(ranges) = self.build_special_leaf(leaf, in_scan)? {
                        ret = Some(match ret {
                            None => ranges,
                            Some(prev) => prev.intersect(&ranges)?,
                        });
                    }
                }
                _ => self.build_default_leaf(&mut builder, leaf, in_scan)?,
            }
        }

        let part = builder.build()?;
        match ret {
            None => Ok(part),
            Some(ranges) => ranges.intersect(&part),
        }
    }

    fn build_or(&mut self, or: &IndexOr, in_scan: bool) -> Result<Option<RangeCollection>> {
        if self.mark_leftover(or.id, in_scan) {
            return Ok(None);
        }
        if self.disjunction_depth == 0 && self.has_inexact(or) {
            self.push_expr(or.id);
        }

        self.disjunction_depth += 1;
        let mut ranges = Vec::new();
        for child in &or.children {
            let built = match child {
                IndexFilter::And(and) => Some(self.build_and(and, true)?),
                IndexFilter::Leaf(leaf) => Some(self.build_leaf(leaf, true)?),
                IndexFilter::Or(nested) => self.build_or(nested, true)?,
            };
            if let Some(r) = built {
                ranges.extend(r.ranges);
            }
        }
        self.disjunction_depth -= 1;

        Ok(Some(remove_overlapping_ranges(ranges)?))
    }

    fn build_leaf(&mut self, leaf: &IndexLeaf, in_scan: bool) -> Result<RangeCollection> {
        match leaf.op {
            LeafOp::SpatialEq | LeafOp::FulltextEq => match self.build_special_leaf(leaf, in_scan)? {
                Some(r) => Ok(r),
                None => Ok(self.unrestricted()),
            },
            _ => {
                let mut builder = IndexBuilder::new(self.columns.clone());
                self.build_default_leaf(&mut builder, leaf, in_scan)?;
                builder.build()
            }
        }
    }

    /// Spatial leaves scan the literal's bounding box; full-text leaves scan
    /// the whole index and are evaluated by the index itself. Both stay in the
    /// leftover list.
    fn build_special_leaf(&mut self, leaf: &IndexLeaf, in_scan: bool) -> Result<Option<RangeCollection>> {
        if self.mark_leftover(leaf.id, in_scan) {
            return Ok(None);
        }
        if self.disjunction_depth == 0 {
            self.push_expr(leaf.id);
        }

        if leaf.op == LeafOp::FulltextEq {
            return Ok(Some(self.unrestricted()));
        }
        let Some(ScalarValue::Geometry(bbox)) = &leaf.value else {
            return Err(OptimizerError::InvalidInput(format!(
                "spatial predicate on {} needs a geometry literal",
                leaf.column
            )));
        };
        let mut range = Range::all(self.columns.len().max(1));
        range.columns[0] = RangeColumnExpr::point(ScalarValue::Geometry(*bbox));
        Ok(Some(RangeCollection::single(range)))
    }

    fn build_default_leaf(&mut self, builder: &mut IndexBuilder, leaf: &IndexLeaf, in_scan: bool) -> Result<()> {
        if self.mark_leftover(leaf.id, in_scan) {
            return Ok(());
        }
        let negation = matches!(leaf.op, LeafOp::NotEq | LeafOp::NotInSet);
        if negation && !self.index.supports_negation() {
            // Scan stays unrestricted on this column; the filter stays above it.
            if self.disjunction_depth == 0 {
                self.push_expr(leaf.id);
            }
            return Ok(());
        }
        self.mark_imprecise(leaf.id);

        let column = leaf.column_key();
        match (leaf.op, &leaf.value) {
            (LeafOp::Eq, Some(v)) => builder.equals(&column, std::slice::from_ref(v)),
            (LeafOp::NullSafeEq, Some(ScalarValue::Null)) => builder.is_null(&column),
            (LeafOp::NullSafeEq, Some(v)) => builder.equals(&column, std::slice::from_ref(v)),
            (LeafOp::NotEq, Some(v)) => builder.not_equals(&column, v),
            (LeafOp::InSet, _) => builder.equals(&column, &leaf.set_values),
            (LeafOp::NotInSet, _) => {
                for v in &leaf.set_values {
                    builder.not_equals(&column, v)?;
                }
                Ok(())
            }
            (LeafOp::Gt, Some(v)) => builder.greater_than(&column, v),
            (LeafOp::Gte, Some(v)) => builder.greater_or_equal(&column, v),
            (LeafOp::Lt, Some(v)) => builder.less_than(&column, v),
            (LeafOp::Lte, Some(v)) => builder.less_or_equal(&column, v),
            (LeafOp::IsNull, _) => builder.is_null(&column),
            (LeafOp::IsNotNull, _) => builder.is_not_null(&column),
            _ => Ok(()),
        }
    }

    /// Emit `id` as leftover when it is outside the scan. True when emitted.
    fn mark_leftover(&mut self, id: FilterId, in_scan: bool) -> bool {
        if !in_scan && !self.include.contains(id) {
            self.push_expr(id);
            return true;
        }
        false
    }

    fn mark_imprecise(&mut self, id: FilterId) {
        if self.disjunction_depth == 0 && self.imprecise.contains(id) {
            self.push_expr(id);
        }
    }

    /// Whether any predicate under `or` is only over-approximated by its ranges.
    fn has_inexact(&self, or: &IndexOr) -> bool {
        or.children.iter().any(|c| self.filter_inexact(c))
    }

    fn filter_inexact(&self, filter: &IndexFilter) -> bool {
        match filter {
            IndexFilter::Leaf(l) => self.leaf_inexact(l),
            IndexFilter::And(a) => {
                a.leaves().into_iter().any(|l| self.leaf_inexact(l)) || a.or_children.iter().any(|o| self.has_inexact(o))
            }
            IndexFilter::Or(o) => self.has_inexact(o),
        }
    }

    fn leaf_inexact(&self, leaf: &IndexLeaf) -> bool {
        match leaf.op {
            LeafOp::SpatialEq | LeafOp::FulltextEq => true,
            LeafOp::NotEq | LeafOp::NotInSet if !self.index.supports_negation() => true,
            _ => self.imprecise.contains(leaf.id),
        }
    }

    fn push_expr(&mut self, id: FilterId) {
        if let Some(expr) = self.id_to_expr.get(&id) {
            self.leftover.push(expr.clone());
        }
    }

    fn unrestricted(&self) -> RangeCollection {
        RangeCollection::single(Range::all(self.columns.len().max(1)))
    }
}

/// Bare, lowercased column names of an index, without table qualifiers.
pub fn index_column_names(index: &dyn Index) -> Vec<String> {
    index
        .expressions()
        .iter()
        .map(|e| {
            let lower = e.to_lowercase();
            match lower.rsplit_once('.') {
                Some((_, name)) => name.to_string(),
                None => lower,
            }
        })
        .collect()
}
