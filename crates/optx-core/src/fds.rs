//! # Column Sets and Functional Dependencies
//!
//! [`FastIntSet`] is a small ordered bitset over non-negative integers. The
//! optimizer uses it for two unrelated id spaces:
//!
//! - column ids (table column ordinals), where it is called [`ColSet`], and
//! - predicate ids assigned while flattening a filter for index costing.
//!
//! [`FuncDepSet`] records what a relation's columns determine: which column sets
//! are unique keys, which columns are bound to constants and which are known to
//! be non-null. Index costing uses it to prove that a scan returns at most one
//! row and to prefer unique keys when row estimates tie.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered bitset of small non-negative integers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FastIntSet {
    words: Vec<u64>,
}

/// Set of column ids.
pub type ColSet = FastIntSet;

impl FastIntSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, i: u32) {
        let (w, b) = Self::slot(i);
        if self.words.len() <= w {
            self.words.resize(w + 1, 0);
        }
        self.words[w] |= 1 << b;
    }

    pub fn remove(&mut self, i: u32) {
        let (w, b) = Self::slot(i);
        if let Some(word) = self.words.get_mut(w) {
            *word &= !(1 << b);
        }
        self.trim();
    }

    pub fn contains(&self, i: u32) -> bool {
        let (w, b) = Self::slot(i);
        self.words.get(w).is_some_and(|word| word & (1 << b) != 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn union(&self, other: &FastIntSet) -> FastIntSet {
        let n = self.words.len().max(other.words.len());
        let words = (0..n)
            .map(|i| self.word(i) | other.word(i))
            .collect();
        FastIntSet { words }
    }

    pub fn intersection(&self, other: &FastIntSet) -> FastIntSet {
        let n = self.words.len().min(other.words.len());
        let mut set = FastIntSet {
            words: (0..n).map(|i| self.word(i) & other.word(i)).collect(),
        };
        set.trim();
        set
    }

    pub fn difference(&self, other: &FastIntSet) -> FastIntSet {
        let mut set = FastIntSet {
            words: (0..self.words.len())
                .map(|i| self.word(i) & !other.word(i))
                .collect(),
        };
        set.trim();
        set
    }

    pub fn is_subset_of(&self, other: &FastIntSet) -> bool {
        (0..self.words.len()).all(|i| self.word(i) & !other.word(i) == 0)
    }

    pub fn intersects(&self, other: &FastIntSet) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Smallest element, if any.
    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    /// Elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            (0..64u32)
                .filter(move |b| word & (1u64 << b) != 0)
                .map(move |b| w as u32 * 64 + b)
        })
    }

    fn word(&self, i: usize) -> u64 {
        self.words.get(i).copied().unwrap_or(0)
    }

    fn slot(i: u32) -> (usize, u32) {
        ((i / 64) as usize, i % 64)
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl FromIterator<u32> for FastIntSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut set = FastIntSet::new();
        for i in iter {
            set.add(i);
        }
        set
    }
}

impl fmt::Display for FastIntSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.iter().map(|i| i.to_string()).collect();
        write!(f, "({})", items.join(","))
    }
}

/// Functional dependencies of a relation.
///
/// A *strict* key uniquely identifies a row. A *lax* key is unique only among
/// rows where every key column is non-null (a unique index over a nullable
/// column). Constant columns are dropped from keys when keys are reported, so
/// a strict key whose columns are all constant proves the relation has at most
/// one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncDepSet {
    all: ColSet,
    not_null: ColSet,
    constants: ColSet,
    strict_keys: Vec<ColSet>,
    lax_keys: Vec<ColSet>,
}

impl FuncDepSet {
    /// Dependencies of a base table or index scan.
    pub fn new_tablescan(
        all: ColSet,
        strict_keys: Vec<ColSet>,
        lax_keys: Vec<ColSet>,
        not_null: ColSet,
    ) -> Self {
        let mut fds = Self {
            all,
            not_null,
            constants: ColSet::new(),
            strict_keys: Vec::new(),
            lax_keys: Vec::new(),
        };
        for key in strict_keys {
            fds.add_strict_key(key);
        }
        for key in lax_keys {
            fds.add_lax_key(key);
        }
        fds
    }

    /// Dependencies after a filter binds `constants` and proves `not_null`.
    ///
    /// Lax keys whose columns all become non-null are promoted to strict keys.
    pub fn new_filter(parent: &FuncDepSet, not_null: &ColSet, constants: &ColSet) -> Self {
        let mut fds = Self {
            all: parent.all.clone(),
            not_null: parent.not_null.union(not_null).union(constants),
            constants: parent.constants.union(constants),
            strict_keys: Vec::new(),
            lax_keys: Vec::new(),
        };
        for key in &parent.strict_keys {
            fds.add_strict_key(key.clone());
        }
        for key in &parent.lax_keys {
            if key.is_subset_of(&fds.not_null) {
                fds.add_strict_key(key.clone());
            } else {
                fds.add_lax_key(key.clone());
            }
        }
        fds
    }

    fn add_strict_key(&mut self, key: ColSet) {
        if !self.strict_keys.contains(&key) {
            self.strict_keys.push(key);
            self.strict_keys.sort_by_key(|k| k.len());
        }
    }

    fn add_lax_key(&mut self, key: ColSet) {
        if !self.lax_keys.contains(&key) {
            self.lax_keys.push(key);
            self.lax_keys.sort_by_key(|k| k.len());
        }
    }

    pub fn all(&self) -> &ColSet {
        &self.all
    }

    pub fn not_null(&self) -> &ColSet {
        &self.not_null
    }

    pub fn constants(&self) -> &ColSet {
        &self.constants
    }

    /// Shortest strict key, with constant columns removed.
    pub fn strict_key(&self) -> Option<ColSet> {
        self.strict_keys
            .iter()
            .map(|k| k.difference(&self.constants))
            .min_by_key(|k| k.len())
    }

    /// Shortest lax key, with constant columns removed.
    pub fn lax_key(&self) -> Option<ColSet> {
        self.lax_keys
            .iter()
            .map(|k| k.difference(&self.constants))
            .min_by_key(|k| k.len())
    }

    /// True when a strict key is fully bound to constants.
    pub fn has_max1row(&self) -> bool {
        self.strict_key().is_some_and(|k| k.is_empty())
    }
}

impl fmt::Display for FuncDepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key(")?;
        if let Some(k) = self.strict_key() {
            write!(f, "{k}")?;
        } else if let Some(k) = self.lax_key() {
            write!(f, "lax{k}")?;
        }
        write!(f, "); constant{}; notnull{}", self.constants, self.not_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_int_set_ops() {
        let a: FastIntSet = [1, 3, 70].into_iter().collect();
        let b: FastIntSet = [3, 4].into_iter().collect();
        assert_eq!(a.len(), 3);
        assert!(a.contains(70));
        assert_eq!(a.union(&b).iter().collect::<Vec<_>>(), vec![1, 3, 4, 70]);
        assert_eq!(a.intersection(&b).iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(a.difference(&b).to_string(), "(1,70)");
        assert!(!b.is_subset_of(&a));
        assert_eq!(a.first(), Some(1));
    }

    #[test]
    fn test_remove_trims_to_empty() {
        let mut s: FastIntSet = [100].into_iter().collect();
        s.remove(100);
        assert!(s.is_empty());
        assert_eq!(s, FastIntSet::new());
    }

    #[test]
    fn test_max1row_from_constant_strict_key() {
        let key: ColSet = [0].into_iter().collect();
        let all: ColSet = [0, 1].into_iter().collect();
        let scan = FuncDepSet::new_tablescan(all, vec![key.clone()], vec![], key.clone());
        assert!(!scan.has_max1row());

        let filtered = FuncDepSet::new_filter(&scan, &ColSet::new(), &key);
        assert!(filtered.has_max1row());
        assert_eq!(filtered.strict_key(), Some(ColSet::new()));
    }

    #[test]
    fn test_lax_key_promoted_when_not_null() {
        let key: ColSet = [2].into_iter().collect();
        let scan = FuncDepSet::new_tablescan(key.clone(), vec![], vec![key.clone()], ColSet::new());
        assert!(scan.strict_key().is_none());
        assert!(scan.lax_key().is_some());

        let filtered = FuncDepSet::new_filter(&scan, &key, &ColSet::new());
        assert_eq!(filtered.strict_key(), Some(key));
    }
}
