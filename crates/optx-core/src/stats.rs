//! # Statistics for Cost-Based Optimization
//!
//! A [`Statistic`] summarizes one index of one table: row, distinct and null
//! counts, the index columns and their types, an optional histogram over the
//! index key and the functional dependencies the index implies. Index costing
//! narrows a statistic predicate by predicate and compares the results, so
//! every operation here returns a new value and leaves its input untouched.
//!
//! ## Histogram Mode
//!
//! When the statistics provider supplies a histogram, narrowing operations
//! select buckets by comparing their upper bounds against the predicate
//! literal and re-derive the counts from the surviving buckets.
//!
//! ## Estimate Mode
//!
//! Synthesized statistics carry no histogram. Narrowing falls back to
//! fixed selectivities under a uniform distribution assumption:
//!
//! - **Equality prefix** of `k` columns: `rows * 0.1^k`, floored at
//!   `rows / NDV`; a full-key equality is exactly `rows / NDV`.
//! - **Range**: fixed 1/3 heuristic, applied to non-null rows.
//! - **IS NULL / IS NOT NULL**: the null count and its complement.

use crate::catalog::Index;
use crate::error::{OptimizerError, Result};
use crate::expr::{ColumnRef, DataType, ScalarValue};
use crate::fds::{ColSet, FuncDepSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Distinct-count ratio assumed for non-unique indexes without statistics.
pub const DUMMY_NOT_UNIQUE_DISTINCT: f64 = 0.90;

/// Null-count ratio (relative to distinct count) assumed without statistics.
pub const DUMMY_NOT_UNIQUE_NULL: f64 = 0.03;

/// Selectivity of each bound equality column in estimate mode.
pub const EQUALITY_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range predicate in estimate mode.
pub const RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Identity of a statistic: the database, table and index it describes.
/// All parts are lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatQualifier {
    pub database: String,
    pub table: String,
    pub index: String,
}

impl StatQualifier {
    pub fn new(database: &str, table: &str, index: &str) -> Self {
        Self {
            database: database.to_lowercase(),
            table: table.to_lowercase(),
            index: index.to_lowercase(),
        }
    }
}

impl fmt::Display for StatQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.table, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexClass {
    #[default]
    Default,
    Spatial,
    Fulltext,
}

impl IndexClass {
    /// The class implied by the index itself, whatever a statistic claims.
    pub fn of(index: &dyn Index) -> Self {
        if index.is_spatial() {
            IndexClass::Spatial
        } else if index.is_fulltext() {
            IndexClass::Fulltext
        } else {
            IndexClass::Default
        }
    }
}

/// A single histogram bucket. Buckets are ordered by `upper_bound`, a key
/// prefix over the statistic's columns. `NULL` bounds sort first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub upper_bound: Vec<ScalarValue>,
    pub row_count: u64,
    pub distinct_count: u64,
    pub null_count: u64,
    /// Rows equal to the upper bound.
    pub bound_count: u64,
}

impl HistogramBucket {
    pub fn new(upper_bound: Vec<ScalarValue>, row_count: u64, distinct_count: u64) -> Self {
        Self {
            upper_bound,
            row_count,
            distinct_count,
            null_count: 0,
            bound_count: 1.min(row_count),
        }
    }

    pub fn with_null_count(mut self, null_count: u64) -> Self {
        self.null_count = null_count;
        self
    }

    pub fn with_bound_count(mut self, bound_count: u64) -> Self {
        self.bound_count = bound_count;
        self
    }

    fn lead_is_null(&self) -> bool {
        self.upper_bound.first().map_or(true, ScalarValue::is_null)
    }
}

pub type Histogram = Vec<HistogramBucket>;

/// Immutable statistical summary of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub row_count: u64,
    pub distinct_count: u64,
    pub null_count: u64,
    pub avg_row_size: u64,
    pub qualifier: StatQualifier,
    /// Index column names, without table prefix, in index order.
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
    /// `None` for synthesized statistics.
    pub histogram: Option<Histogram>,
    pub fds: FuncDepSet,
    /// Ids of the index columns.
    pub col_set: ColSet,
    pub class: IndexClass,
}

impl Statistic {
    pub fn new(qualifier: StatQualifier, columns: Vec<String>, types: Vec<DataType>) -> Self {
        Self {
            row_count: 0,
            distinct_count: 0,
            null_count: 0,
            avg_row_size: 0,
            qualifier,
            columns,
            types,
            histogram: None,
            fds: FuncDepSet::default(),
            col_set: ColSet::new(),
            class: IndexClass::Default,
        }
    }

    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_distinct_count(mut self, distinct_count: u64) -> Self {
        self.distinct_count = distinct_count;
        self
    }

    pub fn with_null_count(mut self, null_count: u64) -> Self {
        self.null_count = null_count;
        self
    }

    pub fn with_avg_row_size(mut self, avg_row_size: u64) -> Self {
        self.avg_row_size = avg_row_size;
        self
    }

    pub fn with_class(mut self, class: IndexClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_fds(mut self, fds: FuncDepSet) -> Self {
        self.fds = fds;
        self
    }

    pub fn with_col_set(mut self, col_set: ColSet) -> Self {
        self.col_set = col_set;
        self
    }

    pub fn with_histogram(mut self, histogram: Histogram) -> Self {
        self.histogram = Some(histogram);
        self
    }

    /// Re-derive counts from the histogram. No-op in estimate mode.
    pub fn update_counts(mut self) -> Self {
        if let Some(buckets) = &self.histogram {
            self.row_count = buckets.iter().map(|b| b.row_count).sum();
            self.distinct_count = buckets.iter().map(|b| b.distinct_count).sum();
            self.null_count = buckets.iter().map(|b| b.null_count).sum();
        }
        self
    }

    /// Scale counts down to `rows` estimated rows.
    fn scaled(mut self, rows: f64) -> Self {
        let before = self.row_count as f64;
        let rows = rows.max(0.0).ceil().min(before);
        let ratio = if before > 0.0 { rows / before } else { 0.0 };
        self.row_count = rows as u64;
        self.distinct_count = self.distinct_count.min(self.row_count);
        self.null_count = ((self.null_count as f64) * ratio).round() as u64;
        self
    }

    /// Narrow to rows whose leading columns equal `key`.
    pub fn prefix_key(&self, key: &[ScalarValue]) -> Result<Statistic> {
        let Some(buckets) = &self.histogram else {
            let rows = self.row_count as f64;
            let per_value = rows / (self.distinct_count.max(1) as f64);
            let est = if key.len() >= self.columns.len() {
                per_value
            } else {
                (rows * EQUALITY_SELECTIVITY.powi(key.len() as i32)).max(per_value)
            };
            return Ok(self.clone().scaled(est));
        };

        let mut low = buckets.len();
        for (i, b) in buckets.iter().enumerate() {
            if compare_keys(&b.upper_bound, key)? != Ordering::Less {
                low = i;
                break;
            }
        }
        let mut high = low;
        while high < buckets.len() && compare_keys(&buckets[high].upper_bound, key)? == Ordering::Equal {
            high += 1;
        }
        Ok(self.clone().with_histogram(buckets[low..high].to_vec()).update_counts())
    }

    pub fn prefix_gt(&self, value: &ScalarValue) -> Result<Statistic> {
        self.prefix_range(value, |ord| ord == Ordering::Greater, false)
    }

    pub fn prefix_gte(&self, value: &ScalarValue) -> Result<Statistic> {
        self.prefix_range(value, |ord| ord != Ordering::Less, false)
    }

    pub fn prefix_lt(&self, value: &ScalarValue) -> Result<Statistic> {
        self.prefix_range(value, |ord| ord != Ordering::Less, true)
    }

    pub fn prefix_lte(&self, value: &ScalarValue) -> Result<Statistic> {
        self.prefix_range(value, |ord| ord == Ordering::Greater, true)
    }

    /// Split the histogram at the first bucket whose leading bound satisfies
    /// `split`, keep the buckets below (`below`) or from it on, then drop nulls.
    fn prefix_range(
        &self,
        value: &ScalarValue,
        split: impl Fn(Ordering) -> bool,
        below: bool,
    ) -> Result<Statistic> {
        let Some(buckets) = &self.histogram else {
            let non_null = self.row_count.saturating_sub(self.null_count) as f64;
            let mut ret = self.clone().scaled(non_null * RANGE_SELECTIVITY);
            ret.null_count = 0;
            return Ok(ret);
        };
        let mut idx = buckets.len();
        for (i, b) in buckets.iter().enumerate() {
            let lead = b.upper_bound.first().unwrap_or(&ScalarValue::Null);
            if split(lead.compare(value)?) {
                idx = i;
                break;
            }
        }
        let kept = if below {
            buckets[..idx].to_vec()
        } else {
            buckets[idx..].to_vec()
        };
        self.clone().with_histogram(kept).prefix_is_not_null()
    }

    pub fn prefix_is_null(&self) -> Result<Statistic> {
        let Some(buckets) = &self.histogram else {
            let nulls = self.null_count as f64;
            return Ok(self.clone().scaled(nulls));
        };
        let idx = first_non_null(buckets);
        Ok(self.clone().with_histogram(buckets[..idx].to_vec()).update_counts())
    }

    pub fn prefix_is_not_null(&self) -> Result<Statistic> {
        let Some(buckets) = &self.histogram else {
            let non_null = self.row_count.saturating_sub(self.null_count) as f64;
            let mut ret = self.clone().scaled(non_null);
            ret.null_count = 0;
            return Ok(ret);
        };
        let idx = first_non_null(buckets);
        Ok(self.clone().with_histogram(buckets[idx..].to_vec()).update_counts())
    }

    /// Narrow to non-null rows whose leading column differs from `value`.
    pub fn prefix_not_eq(&self, value: &ScalarValue) -> Result<Statistic> {
        let Some(buckets) = &self.histogram else {
            let non_null = self.row_count.saturating_sub(self.null_count) as f64;
            let keep = 1.0 - 1.0 / (self.distinct_count.max(1) as f64);
            let mut ret = self.clone().scaled(non_null * keep);
            ret.null_count = 0;
            return Ok(ret);
        };
        let mut kept = Vec::with_capacity(buckets.len());
        for b in buckets {
            let lead = b.upper_bound.first().unwrap_or(&ScalarValue::Null);
            let mut b = b.clone();
            if lead.compare(value)? == Ordering::Equal {
                b.row_count = b.row_count.saturating_sub(b.bound_count);
                b.distinct_count = b.distinct_count.saturating_sub(1);
                b.bound_count = 0;
            }
            kept.push(b);
        }
        self.clone().with_histogram(kept).prefix_is_not_null()
    }

    /// Rows matching either statistic. Branches are assumed disjoint in
    /// estimate mode; histograms are merged bucket by bucket.
    pub fn union(&self, other: &Statistic) -> Result<Statistic> {
        match (&self.histogram, &other.histogram) {
            (Some(a), Some(b)) => {
                let merged = merge_buckets(a, b, true)?;
                Ok(self.clone().with_histogram(merged).update_counts())
            }
            _ => {
                let mut ret = self.clone();
                ret.row_count = self.row_count.saturating_add(other.row_count);
                ret.distinct_count = self.distinct_count.saturating_add(other.distinct_count);
                ret.null_count = self.null_count.saturating_add(other.null_count);
                ret.histogram = None;
                ret.fds = FuncDepSet::new_filter(
                    &self.fds,
                    &self.fds.not_null().intersection(other.fds.not_null()),
                    &self.fds.constants().intersection(other.fds.constants()),
                );
                Ok(ret)
            }
        }
    }

    /// Rows matching both statistics.
    pub fn intersect(&self, other: &Statistic) -> Result<Statistic> {
        let fds = FuncDepSet::new_filter(&self.fds, other.fds.not_null(), other.fds.constants());
        match (&self.histogram, &other.histogram) {
            (Some(a), Some(b)) => {
                let merged = merge_buckets(a, b, false)?;
                Ok(self.clone().with_histogram(merged).update_counts().with_fds(fds))
            }
            _ => {
                let smaller = if other.row_count < self.row_count { other } else { self };
                let mut ret = smaller.clone().with_fds(fds);
                ret.histogram = None;
                Ok(ret)
            }
        }
    }
}

fn first_non_null(buckets: &[HistogramBucket]) -> usize {
    buckets
        .iter()
        .position(|b| !b.lead_is_null())
        .unwrap_or(buckets.len())
}

/// Compare a bucket bound against a key over the key's length.
fn compare_keys(bound: &[ScalarValue], key: &[ScalarValue]) -> Result<Ordering> {
    for (i, k) in key.iter().enumerate() {
        let b = bound.get(i).unwrap_or(&ScalarValue::Null);
        match b.compare(k)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(Ordering::Equal)
}

/// Merge two sorted bucket lists. `union` keeps buckets from either side,
/// otherwise only bounds present in both survive.
fn merge_buckets(a: &[HistogramBucket], b: &[HistogramBucket], union: bool) -> Result<Histogram> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().max(b.len()));
    while i < a.len() && j < b.len() {
        match compare_keys(&a[i].upper_bound, &b[j].upper_bound)? {
            Ordering::Less => {
                if union {
                    out.push(a[i].clone());
                }
                i += 1;
            }
            Ordering::Greater => {
                if union {
                    out.push(b[j].clone());
                }
                j += 1;
            }
            Ordering::Equal => {
                let keep = if (a[i].row_count >= b[j].row_count) == union { &a[i] } else { &b[j] };
                out.push(keep.clone());
                i += 1;
                j += 1;
            }
        }
    }
    if union {
        out.extend_from_slice(&a[i..]);
        out.extend_from_slice(&b[j..]);
    }
    Ok(out)
}

/// Resolve an index's columns against its table schema. Index expressions are
/// `table.column` strings; the table prefix is optional.
pub fn index_columns<'a>(
    table: &str,
    schema: &'a [ColumnRef],
    index: &dyn Index,
) -> Result<Vec<&'a ColumnRef>> {
    let prefix = format!("{}.", table.to_lowercase());
    index
        .expressions()
        .iter()
        .map(|e| {
            let lower = e.to_lowercase();
            let name = lower.strip_prefix(&prefix).unwrap_or(&lower);
            schema
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| OptimizerError::ColumnNotFound {
                    table: table.to_string(),
                    column: name.to_string(),
                })
        })
        .collect()
}

/// Column id of a table column in functional dependencies and column sets.
pub fn column_id(column: &ColumnRef) -> u32 {
    column.index + 1
}

/// Functional dependencies implied by an index, plus the index's column set.
pub fn index_fds(table: &str, schema: &[ColumnRef], index: &dyn Index) -> Result<(FuncDepSet, ColSet)> {
    let idx_cols: ColSet = index_columns(table, schema, index)?
        .into_iter()
        .map(column_id)
        .collect();

    let all: ColSet = schema.iter().map(column_id).collect();
    let not_null: ColSet = schema
        .iter()
        .filter(|c| !c.nullable)
        .map(column_id)
        .collect();

    let strict = idx_cols.is_subset_of(&not_null);
    let (strict_keys, lax_keys) = match (index.is_unique(), strict) {
        (false, _) => (vec![], vec![]),
        (true, true) => (vec![idx_cols.clone()], vec![]),
        (true, false) => (vec![], vec![idx_cols.clone()]),
    };
    Ok((
        FuncDepSet::new_tablescan(all, strict_keys, lax_keys, not_null),
        idx_cols,
    ))
}

/// Synthesize a statistic for an index assuming a uniform distribution.
pub fn uniform_dist_statistic(
    database: &str,
    table: &str,
    schema: &[ColumnRef],
    index: &dyn Index,
    row_count: u64,
    avg_row_size: u64,
) -> Result<Statistic> {
    let mut distinct_count = row_count;
    if !index.is_unique() {
        distinct_count = (distinct_count as f64 * DUMMY_NOT_UNIQUE_DISTINCT) as u64;
    }
    let null_count = (distinct_count as f64 * DUMMY_NOT_UNIQUE_NULL) as u64;

    let cols = index_columns(table, schema, index)?;
    let names = cols.iter().map(|c| c.name.to_lowercase()).collect();
    let types = cols.iter().map(|c| c.data_type).collect();

    let class = IndexClass::of(index);
    let (fds, col_set) = index_fds(table, schema, index)?;
    Ok(Statistic::new(StatQualifier::new(database, table, index.id()), names, types)
        .with_row_count(row_count)
        .with_distinct_count(distinct_count)
        .with_null_count(null_count)
        .with_avg_row_size(avg_row_size)
        .with_class(class)
        .with_fds(fds)
        .with_col_set(col_set))
}
