//! # Index Coster
//!
//! Scores every candidate index of a table against one flattened filter and
//! keeps the best. For each index the coster narrows the index's [`Statistic`]
//! by the filters the index can serve and records which filter ids it folded.
//!
//! ## Narrowing
//!
//! Conjunctions are walked in index column order:
//!
//! - Equalities bind columns to constants. Once the leading columns form an
//!   unbroken run of constants, the statistic is truncated to that prefix key.
//! - The first range, IS NULL or IS NOT NULL leaf on the leading column narrows
//!   the leading column's bounds. Range leaves on later columns are folded into
//!   the scan but do not narrow the estimate.
//! - OR children are costed branch by branch and unioned; an OR whose branches
//!   do not all apply is not folded. Folded ORs are intersected with the result.
//!
//! ## Best Selection
//!
//! Candidates compete on a fixed ladder: fewer rows, a proven single row,
//! strict keys, bound constants, filters folded, unfiltered index columns,
//! equality filters, primary key and finally index name. Candidates are offered
//! in a fixed order and the ladder is total, so the winner is deterministic.

use crate::index_filter::{FilterId, IndexAnd, IndexFilter, IndexLeaf, IndexOr, LeafOp};
use optx_core::catalog::Index;
use optx_core::error::Result;
use optx_core::expr::{BinaryOp, ColumnRef, Expr, ScalarValue, UnaryOp};
use optx_core::fds::{ColSet, FastIntSet, FuncDepSet};
use optx_core::stats::{column_id, IndexClass, Statistic};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Index id that marks a primary key.
pub const PRIMARY_KEY_INDEX: &str = "primary";

/// An index and the statistic left after applying the filters it can serve.
#[derive(Debug, Clone)]
pub struct IndexCandidate {
    pub index: Arc<dyn Index>,
    pub stat: Statistic,
    /// Filter ids the scan folds.
    pub filters: FastIntSet,
    /// Number of leading index columns bound by equalities.
    pub prefix: usize,
}

impl IndexCandidate {
    pub fn row_count(&self) -> u64 {
        self.stat.row_count
    }
}

/// Scores candidate indexes against one flattened filter.
pub struct IndexCoster<'a> {
    schema: &'a [ColumnRef],
    id_to_expr: &'a HashMap<FilterId, Expr>,
    best: Option<IndexCandidate>,
}

impl<'a> IndexCoster<'a> {
    /// `schema` is the table schema the index columns resolve against;
    /// `id_to_expr` comes from the same flattening as the filters costed.
    pub fn new(schema: &'a [ColumnRef], id_to_expr: &'a HashMap<FilterId, Expr>) -> Self {
        Self {
            schema,
            id_to_expr,
            best: None,
        }
    }

    pub fn best(&self) -> Option<&IndexCandidate> {
        self.best.as_ref()
    }

    pub fn into_best(self) -> Option<IndexCandidate> {
        self.best
    }

    /// Cost `index`, described by `stat`, against `root` and keep it if it
    /// beats the current best.
    pub fn cost(&mut self, root: &IndexFilter, stat: &Statistic, index: &Arc<dyn Index>) -> Result<()> {
        let view = StatView::new(stat, self.schema);
        let (narrowed, filters, prefix) = match root {
            IndexFilter::And(and) => cost_and(and, &view, index.as_ref())?,
            IndexFilter::Or(or) => match cost_or(or, &view, index.as_ref())? {
                Some(s) => (s, single(or.id), 0),
                None => (stat.clone(), FastIntSet::new(), 0),
            },
            IndexFilter::Leaf(leaf) => match cost_leaf(leaf, &view, index.as_ref())? {
                Some((s, prefix)) => (s, single(leaf.id), prefix),
                None => (stat.clone(), FastIntSet::new(), 0),
            },
        };

        trace!(
            "  Costed index {}: rows={}, filters={}, prefix={}",
            index.id(),
            narrowed.row_count,
            filters,
            prefix
        );

        if filters.is_empty() {
            return Ok(());
        }
        let candidate = IndexCandidate {
            index: Arc::clone(index),
            stat: narrowed,
            filters,
            prefix,
        };
        let replace = match &self.best {
            None => true,
            Some(best) => self.compare(&candidate, best) == Ordering::Less,
        };
        if replace {
            trace!(
                "  New best index {} (rows={}, filters={})",
                candidate.index.id(),
                candidate.row_count(),
                candidate.filters
            );
            self.best = Some(candidate);
        }
        Ok(())
    }

    /// Order two candidates; `Less` means `cand` is preferred.
    fn compare(&self, cand: &IndexCandidate, best: &IndexCandidate) -> Ordering {
        let rows = cand.row_count().cmp(&best.row_count());
        if rows != Ordering::Equal {
            return rows;
        }

        let (cf, bf) = (&cand.stat.fds, &best.stat.fds);
        match (cf.has_max1row(), bf.has_max1row()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        match (cf.strict_key(), bf.strict_key()) {
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(c), Some(b)) if c.len() != b.len() => return c.len().cmp(&b.len()),
            _ => {}
        }

        let (c_const, b_const) = (cf.constants().len(), bf.constants().len());
        let (c_lax, b_lax) = (cf.lax_key().is_some(), bf.lax_key().is_some());
        match c_const.cmp(&b_const) {
            // More constants, unless it trades the best's lax key for none.
            Ordering::Greater => return if b_lax && !c_lax { Ordering::Greater } else { Ordering::Less },
            Ordering::Less => return if c_lax && !b_lax { Ordering::Less } else { Ordering::Greater },
            Ordering::Equal => {}
        }

        let filters = best.filters.len().cmp(&cand.filters.len());
        if filters != Ordering::Equal {
            return filters;
        }

        let unfiltered = |c: &IndexCandidate| c.stat.columns.len() as i64 - c.filters.len() as i64;
        let extra = unfiltered(cand).cmp(&unfiltered(best));
        if extra != Ordering::Equal {
            return extra;
        }

        let (c_eq, c_null) = self.const_and_null_filters(&cand.filters);
        let (b_eq, b_null) = self.const_and_null_filters(&best.filters);
        let eq = b_eq.cmp(&c_eq).then(b_null.cmp(&c_null));
        if eq != Ordering::Equal {
            return eq;
        }

        let (c_index, b_index) = (&cand.stat.qualifier.index, &best.stat.qualifier.index);
        match (c_index == PRIMARY_KEY_INDEX, b_index == PRIMARY_KEY_INDEX) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        c_index.cmp(b_index)
    }

    /// Count equality and IS NULL comparisons among `filters`.
    fn const_and_null_filters(&self, filters: &FastIntSet) -> (usize, usize) {
        let mut eq = 0;
        let mut null = 0;
        for id in filters.iter() {
            match self.id_to_expr.get(&id) {
                Some(Expr::BinaryOp { op: BinaryOp::Eq, .. }) => eq += 1,
                Some(Expr::BinaryOp {
                    op: BinaryOp::NullSafeEq,
                    ..
                }) => {
                    eq += 1;
                    null += 1;
                }
                Some(Expr::UnaryOp {
                    op: UnaryOp::IsNull,
                    ..
                }) => null += 1,
                _ => {}
            }
        }
        (eq, null)
    }
}

fn single(id: FilterId) -> FastIntSet {
    std::iter::once(id).collect()
}

/// A statistic plus the lookups costing needs on it.
struct StatView<'s> {
    stat: &'s Statistic,
    ordinals: HashMap<String, usize>,
    /// Column id of each index column, when it resolves against the schema.
    column_ids: Vec<Option<u32>>,
}

impl<'s> StatView<'s> {
    fn new(stat: &'s Statistic, schema: &[ColumnRef]) -> Self {
        let ordinals = stat
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_lowercase(), i))
            .collect();
        let column_ids = stat
            .columns
            .iter()
            .map(|name| {
                schema
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(column_id)
            })
            .collect();
        Self {
            stat,
            ordinals,
            column_ids,
        }
    }

    fn ordinal(&self, leaf: &IndexLeaf) -> Option<usize> {
        self.ordinals.get(&leaf.column_key()).copied()
    }
}

/// Unique indexes store unprefixed TEXT and BLOB columns as content hashes,
/// which only support equality and null checks.
fn content_hashed(index: &dyn Index, stat: &Statistic, ordinal: usize) -> bool {
    if !index.is_unique() {
        return false;
    }
    if !stat.types.get(ordinal).is_some_and(|t| t.is_text_blob()) {
        return false;
    }
    index.prefix_lengths().get(ordinal).copied().unwrap_or(0) == 0
}

/// Whether `index` can serve `leaf` at all.
fn leaf_applies(leaf: &IndexLeaf, view: &StatView<'_>, index: &dyn Index) -> Option<usize> {
    let ord = view.ordinal(leaf)?;
    if content_hashed(index, view.stat, ord)
        && !matches!(
            leaf.op,
            LeafOp::Eq | LeafOp::NotEq | LeafOp::NullSafeEq | LeafOp::IsNull | LeafOp::IsNotNull
        )
    {
        return None;
    }
    let ok = match (leaf.op, view.stat.class) {
        (LeafOp::SpatialEq, IndexClass::Spatial) => {
            ord == 0 && matches!(leaf.value, Some(ScalarValue::Geometry(_)))
        }
        (LeafOp::FulltextEq, IndexClass::Fulltext) => leaf
            .fulltext_index
            .as_deref()
            .is_some_and(|i| i.eq_ignore_ascii_case(&view.stat.qualifier.index)),
        (LeafOp::SpatialEq | LeafOp::FulltextEq, _) => false,
        (_, IndexClass::Default) => true,
        (_, IndexClass::Spatial | IndexClass::Fulltext) => false,
    };
    ok.then_some(ord)
}

fn cost_leaf(leaf: &IndexLeaf, view: &StatView<'_>, index: &dyn Index) -> Result<Option<(Statistic, usize)>> {
    if leaf_applies(leaf, view, index).is_none() {
        return Ok(None);
    }
    if matches!(leaf.op, LeafOp::SpatialEq | LeafOp::FulltextEq) {
        return Ok(Some((view.stat.clone(), 0)));
    }
    let mut conj = ConjCollector::new(view, view.stat.clone());
    conj.add(leaf)?;
    Ok(Some(conj.finish()))
}

fn cost_or(or: &IndexOr, view: &StatView<'_>, index: &dyn Index) -> Result<Option<Statistic>> {
    let mut acc: Option<Statistic> = None;
    for child in &or.children {
        let branch = match child {
            IndexFilter::And(and) => {
                let (s, ids, _) = cost_and(and, view, index)?;
                if ids != single(and.id) {
                    return Ok(None);
                }
                s
            }
            IndexFilter::Leaf(leaf) => match cost_leaf(leaf, view, index)? {
                Some((s, _)) => s,
                None => return Ok(None),
            },
            IndexFilter::Or(nested) => match cost_or(nested, view, index)? {
                Some(s) => s,
                None => return Ok(None),
            },
        };
        acc = Some(match acc {
            None => branch,
            Some(a) => a.union(&branch)?,
        });
    }
    Ok(acc.map(|mut s| {
        if s.row_count > view.stat.row_count {
            s.row_count = view.stat.row_count;
            s.distinct_count = s.distinct_count.min(view.stat.distinct_count);
            s.null_count = s.null_count.min(view.stat.null_count);
        }
        s
    }))
}

fn cost_and(and: &IndexAnd, view: &StatView<'_>, index: &dyn Index) -> Result<(Statistic, FastIntSet, usize)> {
    let mut current = view.stat.clone();
    let mut exact = FastIntSet::new();
    for or in &and.or_children {
        if let Some(branch) = cost_or(or, view, index)? {
            current = current.intersect(&branch)?;
            exact.add(or.id);
        }
    }

    let mut conj = ConjCollector::new(view, current);
    for column in &view.stat.columns {
        for leaf in and.column_leaves(column) {
            if leaf_applies(leaf, view, index).is_some() {
                conj.add(leaf)?;
            }
        }
    }

    let filters = if exact.len() + conj.applied.len() == and.child_count() {
        single(and.id)
    } else {
        exact.union(&conj.applied)
    };
    let (stat, prefix) = conj.finish();
    Ok((stat, filters, prefix))
}

/// Stacks the leaves of one conjunction onto a statistic.
struct ConjCollector<'v, 's> {
    view: &'v StatView<'s>,
    stat: Statistic,
    /// Ordinals bound to constants.
    constant: FastIntSet,
    eq_vals: Vec<Option<ScalarValue>>,
    null_safe: FastIntSet,
    /// First ordinal not covered by the run of leading constants.
    missing_prefix: usize,
    applied: FastIntSet,
    is_false: bool,
}

impl<'v, 's> ConjCollector<'v, 's> {
    fn new(view: &'v StatView<'s>, stat: Statistic) -> Self {
        Self {
            view,
            stat,
            constant: FastIntSet::new(),
            eq_vals: vec![None; view.stat.columns.len()],
            null_safe: FastIntSet::new(),
            missing_prefix: 0,
            applied: FastIntSet::new(),
            is_false: false,
        }
    }

    fn add(&mut self, leaf: &IndexLeaf) -> Result<()> {
        self.applied.add(leaf.id);
        let Some(ord) = self.view.ordinal(leaf) else {
            return Ok(());
        };
        match (leaf.op, &leaf.value) {
            (LeafOp::Eq, Some(v)) => self.add_eq(ord, v, false),
            (LeafOp::NullSafeEq, Some(v)) => self.add_eq(ord, v, true),
            // Estimated from the first member only; the scan still covers every member.
            (LeafOp::InSet, _) => match leaf.set_values.first() {
                Some(v) => self.add_eq(ord, v, false),
                None => {
                    self.is_false = true;
                    Ok(())
                }
            },
            _ => self.add_ineq(ord, leaf),
        }
    }

    fn add_eq(&mut self, ord: usize, value: &ScalarValue, null_safe: bool) -> Result<()> {
        let bit = ord as u32;
        if self.constant.contains(bit) {
            if self.eq_vals[ord].as_ref() != Some(value) {
                self.is_false = true;
            }
            return Ok(());
        }
        self.constant.add(bit);
        self.eq_vals[ord] = Some(value.clone());
        if null_safe {
            self.null_safe.add(bit);
        }

        if ord == self.missing_prefix {
            while self.constant.contains(self.missing_prefix as u32) {
                self.missing_prefix += 1;
            }
            let key: Vec<ScalarValue> = self.eq_vals[..self.missing_prefix].iter().flatten().cloned().collect();
            self.stat = self.view.stat.prefix_key(&key)?.intersect(&self.stat)?;
        }
        self.bind_constants();
        Ok(())
    }

    /// Record the bound columns in the statistic's dependencies.
    fn bind_constants(&mut self) {
        let mut constants = ColSet::new();
        let mut not_null = ColSet::new();
        for ord in self.constant.iter() {
            let Some(Some(id)) = self.view.column_ids.get(ord as usize) else {
                continue;
            };
            constants.add(*id);
            if !self.null_safe.contains(ord) {
                not_null.add(*id);
            }
        }
        self.stat.fds = FuncDepSet::new_filter(&self.view.stat.fds, &not_null, &constants);
    }

    fn add_ineq(&mut self, ord: usize, leaf: &IndexLeaf) -> Result<()> {
        if ord > 0 || self.constant.contains(0) {
            return Ok(());
        }
        let narrowed = match (leaf.op, &leaf.value) {
            (LeafOp::NotEq, Some(v)) => self.stat.prefix_not_eq(v)?,
            (LeafOp::Gt, Some(v)) => self.stat.prefix_gt(v)?,
            (LeafOp::Gte, Some(v)) => self.stat.prefix_gte(v)?,
            (LeafOp::Lt, Some(v)) => self.stat.prefix_lt(v)?,
            (LeafOp::Lte, Some(v)) => self.stat.prefix_lte(v)?,
            (LeafOp::NotInSet, _) => {
                let mut s = self.stat.clone();
                for v in &leaf.set_values {
                    s = s.prefix_not_eq(v)?;
                }
                s
            }
            (LeafOp::IsNull, _) => self.stat.prefix_is_null()?,
            (LeafOp::IsNotNull, _) => self.stat.prefix_is_not_null()?,
            _ => return Ok(()),
        };
        self.stat = narrowed;
        Ok(())
    }

    fn finish(self) -> (Statistic, usize) {
        let mut stat = self.stat;
        if self.is_false {
            stat.row_count = 0;
            stat.distinct_count = 0;
            stat.null_count = 0;
            if stat.histogram.is_some() {
                stat.histogram = Some(Vec::new());
            }
        }
        (stat, self.missing_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_filter::Flattener;
    use optx_core::catalog::InMemoryIndex;
    use optx_core::expr::DataType;
    use optx_core::stats::uniform_dist_statistic;

    fn schema() -> Vec<ColumnRef> {
        vec![
            ColumnRef::new("t", "a", 0, DataType::Int64).not_null(),
            ColumnRef::new("t", "b", 1, DataType::Int64),
            ColumnRef::new("t", "c", 2, DataType::Int64),
            ColumnRef::new("t", "body", 3, DataType::Text),
        ]
    }

    fn col(name: &str) -> Expr {
        let schema = schema();
        let c = schema.iter().find(|c| c.name == name).unwrap();
        Expr::col(c.clone())
    }

    fn cmp(op: BinaryOp, name: &str, v: i64) -> Expr {
        Expr::binary(op, col(name), Expr::int(v))
    }

    fn candidate(index: InMemoryIndex, rows: u64) -> (Arc<dyn Index>, Statistic) {
        let index: Arc<dyn Index> = Arc::new(index);
        let stat = uniform_dist_statistic("db", "t", &schema(), index.as_ref(), rows, 10).unwrap();
        (index, stat)
    }

    fn best_index(filter: &Expr, indexes: Vec<InMemoryIndex>) -> Option<(String, IndexCandidate)> {
        let flat = Flattener::flatten(filter).unwrap();
        let root = flat.root.as_ref()?;
        let schema = schema();
        let mut coster = IndexCoster::new(&schema, &flat.id_to_expr);
        for idx in indexes {
            let (index, stat) = candidate(idx, 1000);
            coster.cost(root, &stat, &index).unwrap();
        }
        coster.into_best().map(|b| (b.index.id().to_string(), b))
    }

    #[test]
    fn test_equality_prefix_narrows() {
        let filter = Expr::And(vec![cmp(BinaryOp::Eq, "a", 5), cmp(BinaryOp::Gt, "b", 10)]);
        let (id, best) = best_index(&filter, vec![InMemoryIndex::new("db", "t", "ab", &["a", "b"])]).unwrap();
        assert_eq!(id, "ab");
        assert!(best.row_count() < 1000);
        assert_eq!(best.filters, single(1));
        assert_eq!(best.prefix, 1);
    }

    #[test]
    fn test_partial_and_reports_applied_leaves() {
        let filter = Expr::And(vec![cmp(BinaryOp::Eq, "a", 5), cmp(BinaryOp::Eq, "c", 1)]);
        let (_, best) = best_index(&filter, vec![InMemoryIndex::new("db", "t", "ab", &["a", "b"])]).unwrap();
        assert_eq!(best.filters, single(2));
    }

    #[test]
    fn test_or_needs_every_branch() {
        let filter = Expr::Or(vec![cmp(BinaryOp::Eq, "a", 5), cmp(BinaryOp::Eq, "b", 6)]);
        assert!(best_index(&filter, vec![InMemoryIndex::new("db", "t", "a_idx", &["a"])]).is_none());

        let (_, best) = best_index(&filter, vec![InMemoryIndex::new("db", "t", "ab", &["a", "b"])]).unwrap();
        assert_eq!(best.filters, single(1));
    }

    #[test]
    fn test_unique_key_wins_ties() {
        let filter = cmp(BinaryOp::Eq, "a", 5);
        let (id, best) = best_index(
            &filter,
            vec![
                InMemoryIndex::new("db", "t", "a_plain", &["a"]),
                InMemoryIndex::new("db", "t", "a_unique", &["a"]).unique(),
            ],
        )
        .unwrap();
        assert_eq!(id, "a_unique");
        assert!(best.stat.fds.has_max1row());
    }

    #[test]
    fn test_primary_then_name_breaks_ties() {
        let filter = cmp(BinaryOp::Gt, "a", 5);
        let (id, _) = best_index(
            &filter,
            vec![
                InMemoryIndex::new("db", "t", "a_one", &["a"]),
                InMemoryIndex::new("db", "t", "primary", &["a"]),
            ],
        )
        .unwrap();
        assert_eq!(id, "primary");

        let (id, _) = best_index(
            &filter,
            vec![
                InMemoryIndex::new("db", "t", "z_idx", &["a"]),
                InMemoryIndex::new("db", "t", "m_idx", &["a"]),
            ],
        )
        .unwrap();
        assert_eq!(id, "m_idx");
    }

    #[test]
    fn test_content_hashed_column_rejects_ranges() {
        let body = schema()[3].clone();
        let utf8 = |s: &str| Expr::lit(ScalarValue::Utf8(s.into()));
        let range = Expr::binary(BinaryOp::Gt, Expr::col(body.clone()), utf8("m"));
        let hashed = || InMemoryIndex::new("db", "t", "body_u", &["body"]).unique();
        assert!(best_index(&range, vec![hashed()]).is_none());

        let eq = Expr::eq(Expr::col(body), utf8("hello"));
        assert!(best_index(&eq, vec![hashed()]).is_some());

        let prefixed = InMemoryIndex::new("db", "t", "body_p", &["body"])
            .unique()
            .with_prefix_lengths(vec![16]);
        assert!(best_index(&range, vec![prefixed]).is_some());
    }

    #[test]
    fn test_contradictory_equalities_estimate_no_rows() {
        let filter = Expr::And(vec![cmp(BinaryOp::Eq, "a", 1), cmp(BinaryOp::Eq, "a", 2)]);
        let (_, best) = best_index(&filter, vec![InMemoryIndex::new("db", "t", "a_idx", &["a"])]).unwrap();
        assert_eq!(best.row_count(), 0);
    }

    #[test]
    fn test_leading_equality_never_raises_rows() {
        let index = || vec![InMemoryIndex::new("db", "t", "ab", &["a", "b"])];
        let range = cmp(BinaryOp::Lt, "b", 3);
        let (_, without) = best_index(&range, index()).unwrap();
        let with_eq = Expr::And(vec![range, cmp(BinaryOp::Eq, "a", 1)]);
        let (_, with) = best_index(&with_eq, index()).unwrap();
        assert!(with.row_count() <= without.row_count());
    }
}
