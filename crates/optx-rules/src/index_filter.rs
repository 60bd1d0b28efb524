//! # Index Filter Trees
//!
//! Costing an index against a filter needs a view of the predicate that lines
//! up with index columns. [`Flattener::flatten`] walks the filter once and
//! produces an [`IndexFilter`] tree:
//!
//! - **And** nodes bucket their leaf children by column name, so the coster can
//!   walk index columns in key order, and keep OR children on the side.
//! - **Or** nodes hold And or Leaf children. Nested ORs are merged into one node.
//! - **Leaf** nodes are single comparisons of a column against a constant.
//!
//! Every node gets an id, assigned in walk order starting at 1. The id maps back
//! to the original sub-expression through `id_to_expr`; sets of ids
//! ([`FastIntSet`]) record which parts of the filter an index scan absorbs.
//!
//! ## Validity
//!
//! An AND child that is not an index-costable comparison is left out of the
//! tree and returned as leftover; its siblings are unaffected. An OR is all or
//! nothing: if any branch cannot be represented the whole OR becomes leftover.

use optx_core::error::{OptimizerError, Result};
use optx_core::expr::{BinaryOp, ColumnRef, Expr, ScalarValue, UnaryOp};
use optx_core::fds::FastIntSet;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Id of a node in an [`IndexFilter`] tree.
pub type FilterId = u32;

/// Comparison carried by a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafOp {
    Eq,
    NullSafeEq,
    InSet,
    NotInSet,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
    SpatialEq,
    FulltextEq,
}

impl LeafOp {
    /// The operator that keeps the comparison's meaning when its sides swap.
    pub fn swap(self) -> LeafOp {
        match self {
            LeafOp::Gt => LeafOp::Lt,
            LeafOp::Gte => LeafOp::Lte,
            LeafOp::Lt => LeafOp::Gt,
            LeafOp::Lte => LeafOp::Gte,
            other => other,
        }
    }
}

impl fmt::Display for LeafOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeafOp::Eq => "=",
            LeafOp::NullSafeEq => "<=>",
            LeafOp::InSet => "IN",
            LeafOp::NotInSet => "NOT IN",
            LeafOp::NotEq => "!=",
            LeafOp::Gt => ">",
            LeafOp::Gte => ">=",
            LeafOp::Lt => "<",
            LeafOp::Lte => "<=",
            LeafOp::IsNull => "IS NULL",
            LeafOp::IsNotNull => "IS NOT NULL",
            LeafOp::SpatialEq => "SPATIAL",
            LeafOp::FulltextEq => "MATCH",
        };
        write!(f, "{s}")
    }
}

/// A single column comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLeaf {
    pub id: FilterId,
    pub op: LeafOp,
    pub column: ColumnRef,
    /// Constant operand; `None` for null checks and full-text matches.
    pub value: Option<ScalarValue>,
    /// Operands of `IN` and `NOT IN`.
    pub set_values: Vec<ScalarValue>,
    /// Index a full-text match was resolved against.
    pub fulltext_index: Option<String>,
}

impl IndexLeaf {
    /// Lowercased column name, the key leaves are bucketed by.
    pub fn column_key(&self) -> String {
        self.column.name.to_lowercase()
    }

    fn matches_fulltext(&self, index: &str) -> bool {
        self.op == LeafOp::FulltextEq
            && self
                .fulltext_index
                .as_deref()
                .is_some_and(|i| i.eq_ignore_ascii_case(index))
    }
}

/// Conjunction node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexAnd {
    pub id: FilterId,
    leaves: BTreeMap<String, Vec<IndexLeaf>>,
    pub or_children: Vec<IndexOr>,
}

impl IndexAnd {
    pub fn new(id: FilterId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn add_leaf(&mut self, leaf: IndexLeaf) {
        self.leaves.entry(leaf.column_key()).or_default().push(leaf);
    }

    /// Leaves on `column` (lowercased), in filter order.
    pub fn column_leaves(&self, column: &str) -> &[IndexLeaf] {
        self.leaves
            .get(&column.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All leaves, ordered by id.
    pub fn leaves(&self) -> Vec<&IndexLeaf> {
        let mut leaves: Vec<&IndexLeaf> = self.leaves.values().flatten().collect();
        leaves.sort_by_key(|l| l.id);
        leaves
    }

    pub fn child_count(&self) -> usize {
        self.leaves.values().map(Vec::len).sum::<usize>() + self.or_children.len()
    }
}

/// Disjunction node. Children are And or Leaf nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOr {
    pub id: FilterId,
    pub children: Vec<IndexFilter>,
}

impl IndexOr {
    pub fn new(id: FilterId) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }
}

/// A node of the flattened filter.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexFilter {
    And(IndexAnd),
    Or(IndexOr),
    Leaf(IndexLeaf),
}

impl IndexFilter {
    pub fn id(&self) -> FilterId {
        match self {
            IndexFilter::And(a) => a.id,
            IndexFilter::Or(o) => o.id,
            IndexFilter::Leaf(l) => l.id,
        }
    }

    /// First full-text leaf resolved against `index`.
    pub fn fulltext_leaf(&self, index: &str) -> Option<&IndexLeaf> {
        match self {
            IndexFilter::Leaf(l) => l.matches_fulltext(index).then_some(l),
            IndexFilter::And(a) => a
                .leaves()
                .into_iter()
                .find(|l| l.matches_fulltext(index))
                .or_else(|| a.or_children.iter().find_map(|o| o.fulltext_leaf(index))),
            IndexFilter::Or(o) => o.fulltext_leaf(index),
        }
    }

    fn format(&self, f: &mut fmt::Formatter<'_>, nesting: usize) -> fmt::Result {
        match self {
            IndexFilter::And(a) => format_and(f, a, nesting),
            IndexFilter::Or(o) => format_or(f, o, nesting),
            IndexFilter::Leaf(l) => write!(f, "{}{l}", "  ".repeat(nesting)),
        }
    }
}

impl IndexOr {
    fn fulltext_leaf(&self, index: &str) -> Option<&IndexLeaf> {
        self.children.iter().find_map(|c| c.fulltext_leaf(index))
    }
}

fn format_and(f: &mut fmt::Formatter<'_>, and: &IndexAnd, nesting: usize) -> fmt::Result {
    write!(f, "{}({}: and", "  ".repeat(nesting), and.id)?;
    for leaf in and.leaves() {
        write!(f, "\n{}{leaf}", "  ".repeat(nesting + 1))?;
    }
    for or in &and.or_children {
        writeln!(f)?;
        format_or(f, or, nesting + 1)?;
    }
    write!(f, ")")
}

fn format_or(f: &mut fmt::Formatter<'_>, or: &IndexOr, nesting: usize) -> fmt::Result {
    write!(f, "{}({}: or", "  ".repeat(nesting), or.id)?;
    for c in &or.children {
        writeln!(f)?;
        c.format(f, nesting + 1)?;
    }
    write!(f, ")")
}

impl fmt::Display for IndexLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            LeafOp::IsNull | LeafOp::IsNotNull => write!(f, "({}: {} {})", self.id, self.column, self.op),
            LeafOp::InSet | LeafOp::NotInSet => {
                let values: Vec<String> = self.set_values.iter().map(|v| v.to_string()).collect();
                write!(f, "({}: {} {} ({}))", self.id, self.column, self.op, values.join(", "))
            }
            LeafOp::FulltextEq => write!(
                f,
                "({}: {} {} {})",
                self.id,
                self.column,
                self.op,
                self.fulltext_index.as_deref().unwrap_or("")
            ),
            _ => match &self.value {
                Some(v) => write!(f, "({}: {} {} {v})", self.id, self.column, self.op),
                None => write!(f, "({}: {} {})", self.id, self.column, self.op),
            },
        }
    }
}

impl fmt::Display for IndexFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format(f, 0)
    }
}

/// Result of flattening a filter.
#[derive(Debug, Clone, Default)]
pub struct FlattenedFilter {
    /// `None` when nothing in the filter can be costed against an index.
    pub root: Option<IndexFilter>,
    /// Parts of the filter left out of the tree.
    pub leftover: Option<Expr>,
    /// Ids of comparisons whose index ranges over-approximate them.
    pub imprecise: FastIntSet,
    pub id_to_expr: HashMap<FilterId, Expr>,
}

/// Builds [`IndexFilter`] trees.
#[derive(Debug)]
pub struct Flattener {
    next_id: FilterId,
    id_to_expr: HashMap<FilterId, Expr>,
    imprecise: FastIntSet,
}

impl Flattener {
    /// Flatten `expr`. Fails only on malformed input, such as an `IN` whose
    /// right side is a constant that is not a list.
    pub fn flatten(expr: &Expr) -> Result<FlattenedFilter> {
        let mut f = Flattener {
            next_id: 1,
            id_to_expr: HashMap::new(),
            imprecise: FastIntSet::new(),
        };

        let (root, leftover) = match expr {
            Expr::And(children) => {
                let mut and = IndexAnd::new(f.assign(expr));
                let invalid = f.flatten_and(children, &mut and)?;
                let root = (and.child_count() > 0).then_some(IndexFilter::And(and));
                (root, Expr::join_and(invalid))
            }
            Expr::Or(children) => {
                let mut or = IndexOr::new(f.assign(expr));
                if f.flatten_or(children, &mut or)? {
                    (Some(IndexFilter::Or(or)), None)
                } else {
                    (None, Some(expr.clone()))
                }
            }
            leaf => match f.leaf(leaf)? {
                Some(l) => (Some(IndexFilter::Leaf(l)), None),
                None => (None, Some(leaf.clone())),
            },
        };

        Ok(FlattenedFilter {
            root,
            leftover,
            imprecise: f.imprecise,
            id_to_expr: f.id_to_expr,
        })
    }

    fn assign(&mut self, expr: &Expr) -> FilterId {
        let id = self.next_id;
        self.next_id += 1;
        self.id_to_expr.insert(id, expr.clone());
        id
    }

    /// Add `children` to `and`, returning the ones that cannot be represented.
    fn flatten_and(&mut self, children: &[Expr], and: &mut IndexAnd) -> Result<Vec<Expr>> {
        let mut invalid = Vec::new();
        for child in children {
            match child {
                Expr::And(nested) => invalid.extend(self.flatten_and(nested, and)?),
                Expr::Or(branches) => {
                    let mut or = IndexOr::new(self.assign(child));
                    if self.flatten_or(branches, &mut or)? {
                        and.or_children.push(or);
                    } else {
                        invalid.push(child.clone());
                    }
                }
                leaf => match self.leaf(leaf)? {
                    Some(l) => and.add_leaf(l),
                    None => invalid.push(leaf.clone()),
                },
            }
        }
        Ok(invalid)
    }

    /// Add `branches` to `or`. False when any branch cannot be represented.
    fn flatten_or(&mut self, branches: &[Expr], or: &mut IndexOr) -> Result<bool> {
        for branch in branches {
            match branch {
                Expr::Or(nested) => {
                    if !self.flatten_or(nested, or)? {
                        return Ok(false);
                    }
                }
                Expr::And(children) => {
                    let mut and = IndexAnd::new(self.assign(branch));
                    if !self.flatten_and(children, &mut and)?.is_empty() {
                        return Ok(false);
                    }
                    or.children.push(IndexFilter::And(and));
                }
                leaf => match self.leaf(leaf)? {
                    Some(l) => or.children.push(IndexFilter::Leaf(l)),
                    None => return Ok(false),
                },
            }
        }
        Ok(true)
    }

    fn leaf(&mut self, expr: &Expr) -> Result<Option<IndexLeaf>> {
        let id = self.assign(expr);
        let leaf = new_leaf(id, expr)?;
        if leaf.is_some() && !expr.is_precise_comparison() {
            self.imprecise.add(id);
        }
        Ok(leaf)
    }
}

fn new_leaf(id: FilterId, expr: &Expr) -> Result<Option<IndexLeaf>> {
    let (op, left, right): (LeafOp, &Expr, Option<&Expr>) = match expr {
        Expr::BinaryOp { op, left, right } => {
            let op = match op {
                BinaryOp::Eq => LeafOp::Eq,
                BinaryOp::NullSafeEq => LeafOp::NullSafeEq,
                BinaryOp::NotEq => LeafOp::NotEq,
                BinaryOp::Gt => LeafOp::Gt,
                BinaryOp::GtEq => LeafOp::Gte,
                BinaryOp::Lt => LeafOp::Lt,
                BinaryOp::LtEq => LeafOp::Lte,
                _ => return Ok(None),
            };
            (op, left, Some(right))
        }
        Expr::UnaryOp { op: UnaryOp::IsNull, operand } => (LeafOp::IsNull, operand, None),
        Expr::UnaryOp { op: UnaryOp::IsNotNull, operand } => (LeafOp::IsNotNull, operand, None),
        Expr::UnaryOp { op: UnaryOp::Not, operand } => match operand.as_ref() {
            Expr::UnaryOp { op: UnaryOp::IsNull, operand } => (LeafOp::IsNotNull, operand, None),
            Expr::UnaryOp { op: UnaryOp::IsNotNull, operand } => (LeafOp::IsNull, operand, None),
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => (LeafOp::NotEq, left, Some(right)),
            Expr::InList {
                expr,
                list,
                negated,
            } => return set_leaf(id, expr, list, !negated),
            _ => return Ok(None),
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => return set_leaf(id, expr, list, *negated),
        Expr::Spatial { left, right, .. } => (LeafOp::SpatialEq, left, Some(right)),
        Expr::MatchAgainst { columns, index, .. } => {
            return Ok(columns.first().map(|column| IndexLeaf {
                id,
                op: LeafOp::FulltextEq,
                column: column.clone(),
                value: None,
                set_values: Vec::new(),
                fulltext_index: Some(index.clone()),
            }));
        }
        _ => return Ok(None),
    };

    let (op, column, operand) = match (left, right) {
        (Expr::Column(c), right) => (op, c, right),
        (left, Some(Expr::Column(c))) => (op.swap(), c, Some(left)),
        _ => return Ok(None),
    };

    let value = match operand {
        None => None,
        Some(e) => match constant(e) {
            Some(v) => Some(v),
            None => return Ok(None),
        },
    };

    Ok(Some(IndexLeaf {
        id,
        op,
        column: column.clone(),
        value,
        set_values: Vec::new(),
        fulltext_index: None,
    }))
}

fn set_leaf(id: FilterId, expr: &Expr, list: &Expr, negated: bool) -> Result<Option<IndexLeaf>> {
    let Expr::Column(column) = expr else {
        return Ok(None);
    };
    let items = match list {
        Expr::Tuple(items) => items,
        other if other.is_evaluable() => {
            return Err(OptimizerError::InvalidInput(format!(
                "right side of IN must be a list of values, found {other}"
            )))
        }
        _ => return Ok(None),
    };

    let mut set_values = Vec::with_capacity(items.len());
    for item in items {
        match constant(item) {
            Some(v) => set_values.push(v),
            None => return Ok(None),
        }
    }

    Ok(Some(IndexLeaf {
        id,
        op: if negated { LeafOp::NotInSet } else { LeafOp::InSet },
        column: column.clone(),
        value: None,
        set_values,
        fulltext_index: None,
    }))
}

fn constant(expr: &Expr) -> Option<ScalarValue> {
    if !expr.is_evaluable() {
        return None;
    }
    expr.eval_const().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{Collation, DataType};

    fn col(name: &str) -> Expr {
        Expr::col(ColumnRef::new("t", name, 0, DataType::Int64))
    }

    fn int_cmp(op: BinaryOp, name: &str, v: i64) -> Expr {
        Expr::binary(op, col(name), Expr::int(v))
    }

    #[test]
    fn test_and_buckets_leaves_by_column() {
        let filter = Expr::And(vec![
            int_cmp(BinaryOp::Eq, "a", 1),
            int_cmp(BinaryOp::Gt, "b", 2),
            int_cmp(BinaryOp::Lt, "a", 9),
        ]);
        let flat = Flattener::flatten(&filter).unwrap();
        let Some(IndexFilter::And(and)) = &flat.root else {
            panic!("expected and root");
        };
        assert_eq!(and.id, 1);
        assert_eq!(and.child_count(), 3);
        assert_eq!(and.column_leaves("A").len(), 2);
        assert_eq!(and.column_leaves("b")[0].op, LeafOp::Gt);
        assert!(flat.leftover.is_none());
        assert_eq!(flat.id_to_expr.len(), 4);
    }

    #[test]
    fn test_literal_on_left_swaps_operator() {
        let filter = Expr::binary(BinaryOp::Lt, Expr::int(3), col("a"));
        let flat = Flattener::flatten(&filter).unwrap();
        let Some(IndexFilter::Leaf(leaf)) = flat.root else {
            panic!("expected leaf root");
        };
        assert_eq!(leaf.op, LeafOp::Gt);
        assert_eq!(leaf.value, Some(ScalarValue::Int64(3)));
    }

    #[test]
    fn test_invalid_and_child_becomes_leftover() {
        let opaque = Expr::Function {
            name: "rand".into(),
            args: vec![],
        };
        let cross_column = Expr::eq(col("a"), col("b"));
        let filter = Expr::And(vec![int_cmp(BinaryOp::Eq, "a", 1), opaque.clone(), cross_column.clone()]);
        let flat = Flattener::flatten(&filter).unwrap();
        let Some(IndexFilter::And(and)) = &flat.root else {
            panic!("expected and root");
        };
        assert_eq!(and.child_count(), 1);
        assert_eq!(flat.leftover, Some(Expr::And(vec![opaque, cross_column])));
    }

    #[test]
    fn test_or_is_all_or_nothing() {
        let bad = Expr::Or(vec![
            int_cmp(BinaryOp::Eq, "a", 1),
            Expr::eq(col("a"), col("b")),
        ]);
        let flat = Flattener::flatten(&bad).unwrap();
        assert!(flat.root.is_none());
        assert_eq!(flat.leftover, Some(bad.clone()));

        let filter = Expr::And(vec![int_cmp(BinaryOp::Eq, "c", 1), bad.clone()]);
        let flat = Flattener::flatten(&filter).unwrap();
        let Some(IndexFilter::And(and)) = &flat.root else {
            panic!("expected and root");
        };
        assert!(and.or_children.is_empty());
        assert_eq!(flat.leftover, Some(bad));
    }

    #[test]
    fn test_nested_or_merges_and_or_keeps_ands() {
        let filter = Expr::Or(vec![
            int_cmp(BinaryOp::Eq, "a", 1),
            Expr::Or(vec![int_cmp(BinaryOp::Eq, "a", 2), int_cmp(BinaryOp::Eq, "a", 3)]),
            Expr::And(vec![int_cmp(BinaryOp::Eq, "a", 4), int_cmp(BinaryOp::Eq, "b", 5)]),
        ]);
        let flat = Flattener::flatten(&filter).unwrap();
        let Some(IndexFilter::Or(or)) = &flat.root else {
            panic!("expected or root");
        };
        assert_eq!(or.children.len(), 4);
        assert!(matches!(or.children[3], IndexFilter::And(_)));
    }

    #[test]
    fn test_negations_and_sets() {
        let not_null = Expr::unary(UnaryOp::Not, Expr::unary(UnaryOp::IsNull, col("a")));
        let not_in = Expr::unary(UnaryOp::Not, Expr::in_list(col("b"), vec![Expr::int(1), Expr::int(2)]));
        let not_eq = Expr::unary(UnaryOp::Not, int_cmp(BinaryOp::Eq, "c", 7));
        let flat = Flattener::flatten(&Expr::And(vec![not_null, not_in, not_eq])).unwrap();
        let Some(IndexFilter::And(and)) = &flat.root else {
            panic!("expected and root");
        };
        let ops: Vec<LeafOp> = and.leaves().iter().map(|l| l.op).collect();
        assert_eq!(ops, vec![LeafOp::IsNotNull, LeafOp::NotInSet, LeafOp::NotEq]);
        assert_eq!(and.column_leaves("b")[0].set_values.len(), 2);
    }

    #[test]
    fn test_in_with_scalar_right_side_is_invalid_input() {
        let filter = Expr::InList {
            expr: Box::new(col("a")),
            list: Box::new(Expr::int(1)),
            negated: false,
        };
        let err = Flattener::flatten(&filter).unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidInput(_)));
    }

    #[test]
    fn test_case_insensitive_comparison_is_imprecise() {
        let name = ColumnRef::new("t", "name", 1, DataType::Varchar).with_collation(Collation::CaseInsensitive);
        let filter = Expr::And(vec![
            Expr::eq(Expr::col(name), Expr::lit(ScalarValue::Utf8("Bob".into()))),
            int_cmp(BinaryOp::Eq, "a", 1),
        ]);
        let flat = Flattener::flatten(&filter).unwrap();
        assert!(flat.imprecise.contains(2));
        assert!(!flat.imprecise.contains(3));
    }

    #[test]
    fn test_format() {
        let filter = Expr::And(vec![
            int_cmp(BinaryOp::Eq, "a", 1),
            Expr::Or(vec![int_cmp(BinaryOp::Eq, "b", 2), Expr::unary(UnaryOp::IsNull, col("b"))]),
        ]);
        let flat = Flattener::flatten(&filter).unwrap();
        let expected = "(1: and\n  (2: t.a = 1)\n  (3: or\n    (4: t.b = 2)\n    (5: t.b IS NULL)))";
        assert_eq!(flat.root.unwrap().to_string(), expected);
    }
}
