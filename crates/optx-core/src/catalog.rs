//! # Catalog Interface
//!
//! The catalog provides the optimizer with metadata about the database schema:
//! tables, their indexes and the statistics gathered for those indexes. Index
//! costing cannot do anything useful without it.
//!
//! ## Trait Design
//!
//! The traits are intentionally minimal and used as trait objects so that
//! different storage backends can provide metadata:
//!
//! - [`StatsProvider`]: per-index statistics and table row counts. Must be safe
//!   for concurrent readers; the optimizer never writes through it.
//! - [`IndexAddressableTable`]: a table that exposes its schema and indexes.
//! - [`Index`]: one index. Optional capabilities (negation, ordering, range
//!   support) have permissive defaults.
//! - [`IndexRegistry`]: reference-counted index handles from an external index
//!   driver. Every acquired handle must be released.
//!
//! For testing and development, [`InMemoryCatalog`] implements the provider and
//! registry over plain maps, keyed by `database.table`.

use crate::error::{OptimizerError, Result};
use crate::expr::ColumnRef;
use crate::range::Range;
use crate::stats::Statistic;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Read access to gathered statistics.
pub trait StatsProvider: Send + Sync {
    /// All statistics for a table, one per index. An empty list means nothing
    /// was gathered and is not an error.
    fn table_stats(&self, database: &str, table: &str) -> Result<Vec<Statistic>>;

    fn row_count(&self, database: &str, table: &str) -> Result<u64>;
}

/// An index over one table.
pub trait Index: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn database(&self) -> &str;

    fn table(&self) -> &str;

    /// Indexed column expressions, as `table.column`, in key order.
    fn expressions(&self) -> &[String];

    fn is_unique(&self) -> bool;

    fn is_spatial(&self) -> bool {
        false
    }

    fn is_fulltext(&self) -> bool {
        false
    }

    /// Per-column prefix lengths. Empty when the full values are indexed.
    fn prefix_lengths(&self) -> &[u16] {
        &[]
    }

    /// Whether the index can serve a scan over `ranges`.
    fn can_support(&self, _ranges: &[Range]) -> bool {
        true
    }

    /// Whether `col != value` can be served as two ranges.
    fn supports_negation(&self) -> bool {
        true
    }

    /// Whether the index returns rows in key order.
    fn is_ordered(&self) -> bool {
        true
    }
}

/// A table whose rows can be read through indexes.
pub trait IndexAddressableTable: Send + Sync + fmt::Debug {
    fn database(&self) -> &str;

    fn name(&self) -> &str;

    fn schema(&self) -> &[ColumnRef];

    fn indexes(&self) -> Result<Vec<Arc<dyn Index>>>;

    /// Whether an index lookup returns exactly the matching rows. When false,
    /// lookups only narrow candidates and every filter must be re-applied.
    fn precise_match(&self) -> bool {
        true
    }

    /// Total size of the table's rows in bytes, when known.
    fn data_length(&self) -> Option<u64> {
        None
    }
}

/// Registry of driver-managed index handles.
pub trait IndexRegistry: Send + Sync {
    /// Acquire handles for every registered index of a table.
    fn acquire(&self, database: &str, table: &str) -> Vec<Arc<dyn Index>>;

    /// Return a handle obtained from [`IndexRegistry::acquire`].
    fn release(&self, index: &dyn Index);
}

/// Key used by the in-memory catalog: `database.table`, lowercased.
pub fn table_key(database: &str, table: &str) -> String {
    format!("{}.{}", database.to_lowercase(), table.to_lowercase())
}

/// In-memory index for testing and development.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    pub id: String,
    pub database: String,
    pub table: String,
    pub expressions: Vec<String>,
    pub unique: bool,
    pub spatial: bool,
    pub fulltext: bool,
    pub prefix_lengths: Vec<u16>,
    pub negation: bool,
    pub ordered: bool,
    /// Largest number of ranges the index accepts in one scan.
    pub max_ranges: Option<usize>,
}

impl InMemoryIndex {
    pub fn new(database: &str, table: &str, id: &str, expressions: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            database: database.to_string(),
            table: table.to_string(),
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
            unique: false,
            spatial: false,
            fulltext: false,
            prefix_lengths: Vec::new(),
            negation: true,
            ordered: true,
            max_ranges: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn spatial(mut self) -> Self {
        self.spatial = true;
        self.ordered = false;
        self
    }

    pub fn fulltext(mut self) -> Self {
        self.fulltext = true;
        self.ordered = false;
        self
    }

    pub fn with_prefix_lengths(mut self, lengths: Vec<u16>) -> Self {
        self.prefix_lengths = lengths;
        self
    }

    pub fn without_negation(mut self) -> Self {
        self.negation = false;
        self
    }

    pub fn with_max_ranges(mut self, max: usize) -> Self {
        self.max_ranges = Some(max);
        self
    }
}

impl Index for InMemoryIndex {
    fn id(&self) -> &str {
        &self.id
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn expressions(&self) -> &[String] {
        &self.expressions
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn is_spatial(&self) -> bool {
        self.spatial
    }

    fn is_fulltext(&self) -> bool {
        self.fulltext
    }

    fn prefix_lengths(&self) -> &[u16] {
        &self.prefix_lengths
    }

    fn can_support(&self, ranges: &[Range]) -> bool {
        self.max_ranges.map_or(true, |max| ranges.len() <= max)
    }

    fn supports_negation(&self) -> bool {
        self.negation
    }

    fn is_ordered(&self) -> bool {
        self.ordered
    }
}

/// In-memory table for testing and development.
#[derive(Debug, Clone)]
pub struct InMemoryTable {
    pub database: String,
    pub name: String,
    pub columns: Vec<ColumnRef>,
    pub indexes: Vec<Arc<dyn Index>>,
    pub precise_match: bool,
    pub data_length: Option<u64>,
}

impl InMemoryTable {
    pub fn new(database: &str, name: &str, columns: Vec<ColumnRef>) -> Self {
        Self {
            database: database.to_string(),
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            precise_match: true,
            data_length: None,
        }
    }

    pub fn with_index(mut self, index: InMemoryIndex) -> Self {
        self.indexes.push(Arc::new(index));
        self
    }

    pub fn imprecise(mut self) -> Self {
        self.precise_match = false;
        self
    }

    pub fn with_data_length(mut self, bytes: u64) -> Self {
        self.data_length = Some(bytes);
        self
    }

    /// Column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnRef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl IndexAddressableTable for InMemoryTable {
    fn database(&self) -> &str {
        &self.database
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &[ColumnRef] {
        &self.columns
    }

    fn indexes(&self) -> Result<Vec<Arc<dyn Index>>> {
        Ok(self.indexes.clone())
    }

    fn precise_match(&self) -> bool {
        self.precise_match
    }

    fn data_length(&self) -> Option<u64> {
        self.data_length
    }
}

/// In-memory statistics provider and index registry.
///
/// Tables listed in `failing` report a provider error from both
/// [`StatsProvider`] methods, which exercises the uniform-statistics fallback.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    /// Statistics keyed by "database.table".
    pub table_stats: HashMap<String, Vec<Statistic>>,
    /// Row counts keyed by "database.table".
    pub row_counts: HashMap<String, u64>,
    pub failing: HashSet<String>,
    /// Driver-managed indexes keyed by "database.table".
    pub registered: HashMap<String, Vec<Arc<dyn Index>>>,
    outstanding: Mutex<HashMap<String, usize>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_row_count(&mut self, database: &str, table: &str, rows: u64) {
        self.row_counts.insert(table_key(database, table), rows);
    }

    pub fn add_statistic(&mut self, database: &str, table: &str, stat: Statistic) {
        self.table_stats
            .entry(table_key(database, table))
            .or_default()
            .push(stat);
    }

    pub fn fail_table(&mut self, database: &str, table: &str) {
        self.failing.insert(table_key(database, table));
    }

    pub fn register_index(&mut self, index: InMemoryIndex) {
        let key = table_key(&index.database, &index.table);
        self.registered.entry(key).or_default().push(Arc::new(index));
    }

    /// Number of acquired handles not yet released.
    pub fn outstanding_handles(&self) -> usize {
        self.outstanding
            .lock()
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.failing.contains(key) {
            return Err(OptimizerError::Stats {
                table: key.to_string(),
                reason: "provider unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl StatsProvider for InMemoryCatalog {
    fn table_stats(&self, database: &str, table: &str) -> Result<Vec<Statistic>> {
        let key = table_key(database, table);
        self.check(&key)?;
        Ok(self.table_stats.get(&key).cloned().unwrap_or_default())
    }

    fn row_count(&self, database: &str, table: &str) -> Result<u64> {
        let key = table_key(database, table);
        self.check(&key)?;
        Ok(self.row_counts.get(&key).copied().unwrap_or(0))
    }
}

impl IndexRegistry for InMemoryCatalog {
    fn acquire(&self, database: &str, table: &str) -> Vec<Arc<dyn Index>> {
        let handles = self
            .registered
            .get(&table_key(database, table))
            .cloned()
            .unwrap_or_default();
        if let Ok(mut outstanding) = self.outstanding.lock() {
            for h in &handles {
                *outstanding.entry(h.id().to_lowercase()).or_default() += 1;
            }
        }
        handles
    }

    fn release(&self, index: &dyn Index) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            if let Some(n) = outstanding.get_mut(&index.id().to_lowercase()) {
                *n = n.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DataType;
    use crate::stats::StatQualifier;

    #[test]
    fn test_failing_table_reports_stats_error() {
        let mut catalog = InMemoryCatalog::new();
        catalog.set_row_count("db", "t", 10);
        catalog.fail_table("db", "T");
        assert!(matches!(
            catalog.row_count("db", "t"),
            Err(OptimizerError::Stats { .. })
        ));
        assert!(catalog.table_stats("db", "t").is_err());
    }

    #[test]
    fn test_missing_stats_are_empty() {
        let mut catalog = InMemoryCatalog::new();
        assert!(catalog.table_stats("db", "t").unwrap().is_empty());
        assert_eq!(catalog.row_count("db", "t").unwrap(), 0);

        let stat = Statistic::new(StatQualifier::new("db", "t", "primary"), vec!["a".into()], vec![DataType::Int64]);
        catalog.add_statistic("DB", "T", stat);
        assert_eq!(catalog.table_stats("db", "t").unwrap().len(), 1);
    }

    #[test]
    fn test_registry_tracks_handles() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register_index(InMemoryIndex::new("db", "t", "ext_idx", &["t.a"]));
        let handles = catalog.acquire("db", "t");
        assert_eq!(handles.len(), 1);
        assert_eq!(catalog.outstanding_handles(), 1);
        catalog.release(handles[0].as_ref());
        assert_eq!(catalog.outstanding_handles(), 0);
    }

    #[test]
    fn test_table_column_lookup() {
        let table = InMemoryTable::new(
            "db",
            "t",
            vec![ColumnRef::new("t", "A", 0, DataType::Int64)],
        );
        assert!(table.column("a").is_some());
        assert!(table.precise_match());
        assert!(!table.imprecise().precise_match);
    }
}
