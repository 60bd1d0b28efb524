//! # Index Scan Ranges
//!
//! A [`Range`] is a box in index key space: one [`RangeColumnExpr`] per index
//! column, AND-ed together. A [`RangeCollection`] is a union of ranges. Bounds are
//! [`RangeCut`]s, points *between* values, so that open and closed intervals share
//! one comparison:
//!
//! ```text
//! BelowNull < NULL < AboveNull < Below(v) < v < Above(v) < AboveAll
//! ```
//!
//! `a = 5` is `[Below(5), Above(5)]`, `a > 5` is `[Above(5), AboveAll]` and
//! `a IS NULL` is `[BelowNull, AboveNull]`.
//!
//! [`IndexBuilder`] accumulates per-column constraints for one conjunction and
//! expands them into ranges.

use crate::error::Result;
use crate::expr::ScalarValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A position between values of a column's domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeCut {
    BelowNull,
    AboveNull,
    Below(ScalarValue),
    Above(ScalarValue),
    AboveAll,
}

impl RangeCut {
    fn rank(&self) -> u8 {
        match self {
            RangeCut::BelowNull => 0,
            RangeCut::AboveNull => 1,
            RangeCut::Below(_) | RangeCut::Above(_) => 2,
            RangeCut::AboveAll => 3,
        }
    }

    pub fn compare(&self, other: &RangeCut) -> Result<Ordering> {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return Ok(by_rank);
        }
        let (a, a_above, b, b_above) = match (self, other) {
            (RangeCut::Below(a), RangeCut::Below(b)) => (a, false, b, false),
            (RangeCut::Below(a), RangeCut::Above(b)) => (a, false, b, true),
            (RangeCut::Above(a), RangeCut::Below(b)) => (a, true, b, false),
            (RangeCut::Above(a), RangeCut::Above(b)) => (a, true, b, true),
            _ => return Ok(Ordering::Equal),
        };
        Ok(a.compare(b)?.then(a_above.cmp(&b_above)))
    }

    fn max(a: &RangeCut, b: &RangeCut) -> Result<RangeCut> {
        Ok(if a.compare(b)? == Ordering::Less { b.clone() } else { a.clone() })
    }

    fn min(a: &RangeCut, b: &RangeCut) -> Result<RangeCut> {
        Ok(if a.compare(b)? == Ordering::Greater { b.clone() } else { a.clone() })
    }
}

/// Interval of one index column between two cuts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeColumnExpr {
    pub lower: RangeCut,
    pub upper: RangeCut,
}

impl RangeColumnExpr {
    pub fn new(lower: RangeCut, upper: RangeCut) -> Self {
        Self { lower, upper }
    }

    pub fn closed(lower: ScalarValue, upper: ScalarValue) -> Self {
        Self::new(RangeCut::Below(lower), RangeCut::Above(upper))
    }

    pub fn point(value: ScalarValue) -> Self {
        Self::closed(value.clone(), value)
    }

    pub fn less_than(upper: ScalarValue) -> Self {
        Self::new(RangeCut::AboveNull, RangeCut::Below(upper))
    }

    pub fn less_or_equal(upper: ScalarValue) -> Self {
        Self::new(RangeCut::AboveNull, RangeCut::Above(upper))
    }

    pub fn greater_than(lower: ScalarValue) -> Self {
        Self::new(RangeCut::Above(lower), RangeCut::AboveAll)
    }

    pub fn greater_or_equal(lower: ScalarValue) -> Self {
        Self::new(RangeCut::Below(lower), RangeCut::AboveAll)
    }

    pub fn null() -> Self {
        Self::new(RangeCut::BelowNull, RangeCut::AboveNull)
    }

    pub fn not_null() -> Self {
        Self::new(RangeCut::AboveNull, RangeCut::AboveAll)
    }

    pub fn all() -> Self {
        Self::new(RangeCut::BelowNull, RangeCut::AboveAll)
    }

    pub fn empty() -> Self {
        Self::new(RangeCut::AboveAll, RangeCut::AboveAll)
    }

    pub fn is_all(&self) -> bool {
        self.lower == RangeCut::BelowNull && self.upper == RangeCut::AboveAll
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lower.compare(&self.upper)? != Ordering::Less)
    }

    /// Intersection, or `None` when the intervals are disjoint.
    pub fn try_intersect(&self, other: &RangeColumnExpr) -> Result<Option<RangeColumnExpr>> {
        let r = RangeColumnExpr::new(
            RangeCut::max(&self.lower, &other.lower)?,
            RangeCut::min(&self.upper, &other.upper)?,
        );
        Ok(if r.is_empty()? { None } else { Some(r) })
    }

    /// Whether the union of the intervals is a single interval.
    pub fn is_connected(&self, other: &RangeColumnExpr) -> Result<bool> {
        Ok(self.lower.compare(&other.upper)? != Ordering::Greater
            && other.lower.compare(&self.upper)? != Ordering::Greater)
    }

    pub fn is_subset_of(&self, other: &RangeColumnExpr) -> Result<bool> {
        Ok(other.lower.compare(&self.lower)? != Ordering::Greater
            && self.upper.compare(&other.upper)? != Ordering::Greater)
    }

    /// Parts of `self` outside `other`: at most one piece on each side.
    pub fn subtract(&self, other: &RangeColumnExpr) -> Result<Vec<RangeColumnExpr>> {
        let mut pieces = Vec::with_capacity(2);
        let left = RangeColumnExpr::new(self.lower.clone(), RangeCut::min(&self.upper, &other.lower)?);
        if !left.is_empty()? {
            pieces.push(left);
        }
        let right = RangeColumnExpr::new(RangeCut::max(&self.lower, &other.upper)?, self.upper.clone());
        if !right.is_empty()? {
            pieces.push(right);
        }
        Ok(pieces)
    }
}

impl fmt::Display for RangeColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            RangeCut::BelowNull => write!(f, "[NULL, ")?,
            RangeCut::AboveNull => write!(f, "(NULL, ")?,
            RangeCut::Below(v) => write!(f, "[{v}, ")?,
            RangeCut::Above(v) => write!(f, "({v}, ")?,
            RangeCut::AboveAll => write!(f, "(∞, ")?,
        }
        match &self.upper {
            RangeCut::BelowNull => write!(f, "NULL)"),
            RangeCut::AboveNull => write!(f, "NULL]"),
            RangeCut::Below(v) => write!(f, "{v})"),
            RangeCut::Above(v) => write!(f, "{v}]"),
            RangeCut::AboveAll => write!(f, "∞)"),
        }
    }
}

/// One box in index key space, one interval per index column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub columns: Vec<RangeColumnExpr>,
}

impl Range {
    pub fn new(columns: Vec<RangeColumnExpr>) -> Self {
        Self { columns }
    }

    pub fn all(width: usize) -> Self {
        Self::new(vec![RangeColumnExpr::all(); width])
    }

    pub fn is_empty(&self) -> Result<bool> {
        for c in &self.columns {
            if c.is_empty()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn try_intersect(&self, other: &Range) -> Result<Option<Range>> {
        if self.columns.len() != other.columns.len() {
            return Ok(None);
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for (a, b) in self.columns.iter().zip(&other.columns) {
            match a.try_intersect(b)? {
                Some(c) => columns.push(c),
                None => return Ok(None),
            }
        }
        Ok(Some(Range::new(columns)))
    }

    pub fn is_subset_of(&self, other: &Range) -> Result<bool> {
        if self.columns.len() != other.columns.len() {
            return Ok(false);
        }
        for (a, b) in self.columns.iter().zip(&other.columns) {
            if !a.is_subset_of(b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Parts of `self` outside `other`, as disjoint ranges.
    pub fn subtract(&self, other: &Range) -> Result<Vec<Range>> {
        let Some(overlap) = self.try_intersect(other)? else {
            return Ok(vec![self.clone()]);
        };
        let mut pieces = Vec::new();
        for i in 0..self.columns.len() {
            for piece in self.columns[i].subtract(&other.columns[i])? {
                let mut columns = Vec::with_capacity(self.columns.len());
                columns.extend_from_slice(&overlap.columns[..i]);
                columns.push(piece);
                columns.extend_from_slice(&self.columns[i + 1..]);
                pieces.push(Range::new(columns));
            }
        }
        Ok(pieces)
    }

    /// Merge with `other` when both differ in at most one column and that
    /// column's intervals touch.
    fn try_merge(&self, other: &Range) -> Result<Option<Range>> {
        if self.columns.len() != other.columns.len() {
            return Ok(None);
        }
        let differing: Vec<usize> = (0..self.columns.len())
            .filter(|&i| self.columns[i] != other.columns[i])
            .collect();
        match differing.as_slice() {
            [] => Ok(Some(self.clone())),
            [i] => {
                let (a, b) = (&self.columns[*i], &other.columns[*i]);
                if !a.is_connected(b)? {
                    return Ok(None);
                }
                let mut merged = self.clone();
                merged.columns[*i] = RangeColumnExpr::new(
                    RangeCut::min(&a.lower, &b.lower)?,
                    RangeCut::max(&a.upper, &b.upper)?,
                );
                Ok(Some(merged))
            }
            _ => Ok(None),
        }
    }

    fn compare(&self, other: &Range) -> Result<Ordering> {
        for (a, b) in self.columns.iter().zip(&other.columns) {
            let ord = a.lower.compare(&b.lower)?.then(a.upper.compare(&b.upper)?);
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(self.columns.len().cmp(&other.columns.len()))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        write!(f, "{{{}}}", cols.join(", "))
    }
}

/// Union of ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeCollection {
    pub ranges: Vec<Range>,
}

impl RangeCollection {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    pub fn single(range: Range) -> Self {
        Self::new(vec![range])
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True when no key can fall in any range.
    pub fn is_empty(&self) -> Result<bool> {
        for r in &self.ranges {
            if !r.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True for a single range with no restriction on the leading column.
    pub fn is_unrestricted(&self) -> bool {
        match self.ranges.as_slice() {
            [only] => only.columns.first().map_or(true, RangeColumnExpr::is_all),
            _ => false,
        }
    }

    pub fn intersect(&self, other: &RangeCollection) -> Result<RangeCollection> {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.try_intersect(b)? {
                    out.push(r);
                }
            }
        }
        remove_overlapping_ranges(out)
    }

    pub fn union(&self, other: &RangeCollection) -> Result<RangeCollection> {
        let mut all = self.ranges.clone();
        all.extend(other.ranges.iter().cloned());
        remove_overlapping_ranges(all)
    }
}

impl fmt::Display for RangeCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "[{}]", ranges.join(", "))
    }
}

/// Rewrite ranges into an equivalent set of pairwise disjoint ranges, merging
/// neighbours where possible and sorting by lower bound.
pub fn remove_overlapping_ranges(ranges: Vec<Range>) -> Result<RangeCollection> {
    let mut disjoint: Vec<Range> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if range.is_empty()? {
            continue;
        }
        let mut pieces = vec![range];
        for existing in &disjoint {
            let mut next = Vec::with_capacity(pieces.len());
            for p in &pieces {
                next.extend(p.subtract(existing)?);
            }
            pieces = next;
        }
        disjoint.extend(pieces);
    }

    let mut merged = true;
    while merged {
        merged = false;
        'outer: for i in 0..disjoint.len() {
            for j in (i + 1)..disjoint.len() {
                if let Some(m) = disjoint[i].try_merge(&disjoint[j])? {
                    disjoint[i] = m;
                    disjoint.remove(j);
                    merged = true;
                    break 'outer;
                }
            }
        }
    }

    sort_ranges(&mut disjoint)?;
    Ok(RangeCollection::new(disjoint))
}

fn sort_ranges(ranges: &mut [Range]) -> Result<()> {
    // Insertion sort so comparison errors propagate.
    for i in 1..ranges.len() {
        let mut j = i;
        while j > 0 && ranges[j].compare(&ranges[j - 1])? == Ordering::Less {
            ranges.swap(j, j - 1);
            j -= 1;
        }
    }
    Ok(())
}

/// Accumulates the constraints of one conjunction over an index's columns.
///
/// Each column holds a set of disjoint intervals, initially unrestricted.
/// Every added predicate intersects that set; an empty set makes the whole
/// conjunction unsatisfiable.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    columns: Vec<String>,
    constraints: Vec<Vec<RangeColumnExpr>>,
    contradiction: bool,
}

impl IndexBuilder {
    /// `columns` are the index column names in key order.
    pub fn new(columns: Vec<String>) -> Self {
        let width = columns.len();
        Self {
            columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
            constraints: vec![vec![RangeColumnExpr::all()]; width],
            contradiction: false,
        }
    }

    fn ordinal(&self, column: &str) -> Option<usize> {
        let column = column.to_lowercase();
        self.columns.iter().position(|c| *c == column)
    }

    fn restrict(&mut self, column: &str, allowed: Vec<RangeColumnExpr>) -> Result<()> {
        let Some(ord) = self.ordinal(column) else {
            return Ok(());
        };
        let mut next = Vec::new();
        for current in &self.constraints[ord] {
            for a in &allowed {
                if let Some(r) = current.try_intersect(a)? {
                    next.push(r);
                }
            }
        }
        if next.is_empty() {
            self.contradiction = true;
        }
        self.constraints[ord] = next;
        Ok(())
    }

    /// `column` equals one of `values`.
    pub fn equals(&mut self, column: &str, values: &[ScalarValue]) -> Result<()> {
        let points = values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| RangeColumnExpr::point(v.clone()))
            .collect();
        self.restrict(column, points)
    }

    pub fn not_equals(&mut self, column: &str, value: &ScalarValue) -> Result<()> {
        if value.is_null() {
            return self.restrict(column, vec![]);
        }
        self.restrict(
            column,
            vec![
                RangeColumnExpr::less_than(value.clone()),
                RangeColumnExpr::greater_than(value.clone()),
            ],
        )
    }

    pub fn greater_than(&mut self, column: &str, value: &ScalarValue) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::greater_than(value.clone())])
    }

    pub fn greater_or_equal(&mut self, column: &str, value: &ScalarValue) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::greater_or_equal(value.clone())])
    }

    pub fn less_than(&mut self, column: &str, value: &ScalarValue) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::less_than(value.clone())])
    }

    pub fn less_or_equal(&mut self, column: &str, value: &ScalarValue) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::less_or_equal(value.clone())])
    }

    pub fn is_null(&mut self, column: &str) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::null()])
    }

    pub fn is_not_null(&mut self, column: &str) -> Result<()> {
        self.restrict(column, vec![RangeColumnExpr::not_null()])
    }

    /// Expand the per-column interval sets into ranges (their cross product).
    /// An unsatisfiable conjunction yields an empty collection.
    pub fn build(&self) -> Result<RangeCollection> {
        if self.contradiction {
            return Ok(RangeCollection::default());
        }
        let mut ranges = vec![Range::new(Vec::with_capacity(self.columns.len()))];
        for intervals in &self.constraints {
            let mut next = Vec::with_capacity(ranges.len() * intervals.len());
            for r in &ranges {
                for i in intervals {
                    let mut r = r.clone();
                    r.columns.push(i.clone());
                    next.push(r);
                }
            }
            ranges = next;
        }
        remove_overlapping_ranges(ranges)
    }
}
