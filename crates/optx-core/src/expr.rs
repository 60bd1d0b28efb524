//! # Scalar Expressions
//!
//! This module defines the scalar side of the plan representation: column
//! references, literal values and the predicate trees that appear in filters and
//! join conditions. The optimizer never evaluates rows; it only needs to
//!
//! - find the columns a predicate touches (for index prefix matching and join
//!   edge construction),
//! - fold constant right-hand sides of comparisons into [`ScalarValue`]s, and
//! - compare scalar values to bound histogram buckets and scan ranges.
//!
//! ## Precision
//!
//! A comparison is *precise* when an index range built from it matches exactly
//! the rows the predicate accepts. Case-insensitive string collations and
//! comparisons that coerce the literal to another type are imprecise: the range
//! is a superset, so the predicate must stay above the scan.

use crate::error::{OptimizerError, Result};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub name: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Column storage types, as far as costing cares about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    /// Bounded-length string.
    Varchar,
    /// Unbounded text; indexed by content hash unless a prefix length is set.
    Text,
    /// Unbounded binary; indexed by content hash unless a prefix length is set.
    Blob,
    Date,
    Geometry,
}

impl DataType {
    pub fn is_text_blob(&self) -> bool {
        matches!(self, DataType::Text | DataType::Blob)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Varchar | DataType::Text | DataType::Blob)
    }
}

/// String comparison semantics of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Collation {
    #[default]
    Binary,
    CaseInsensitive,
}

/// Reference to a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    /// Ordinal of the column in its table schema.
    pub index: u32,
    pub data_type: DataType,
    pub nullable: bool,
    pub collation: Collation,
}

impl ColumnRef {
    /// A nullable, binary-collated column of `table`.
    pub fn new(table: &str, name: &str, index: u32, data_type: DataType) -> Self {
        Self {
            table: Some(table.to_string()),
            name: name.to_string(),
            index,
            data_type,
            nullable: true,
            collation: Collation::Binary,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    /// Lowercased `table.column` form used to match index expressions.
    pub fn qualified_name(&self) -> String {
        match &self.table {
            Some(t) => format!("{}.{}", t.to_lowercase(), self.name.to_lowercase()),
            None => self.name.to_lowercase(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Axis-aligned bounding box of a geometry literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: OrderedFloat<f64>,
    pub min_y: OrderedFloat<f64>,
    pub max_x: OrderedFloat<f64>,
    pub max_y: OrderedFloat<f64>,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: OrderedFloat(min_x),
            min_y: OrderedFloat(min_y),
            max_x: OrderedFloat(max_x),
            max_y: OrderedFloat(max_y),
        }
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that floating-point values can be used as
/// hash map keys and in Eq/Hash comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value. Sorts before every other value.
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Date as days since Unix epoch (1970-01-01).
    Date(i32),
    /// Geometry, represented by its bounding box.
    Geometry(BoundingBox),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Geometry(a), Self::Geometry(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Geometry(v) => v.hash(state),
        }
    }
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Total order used by histograms and ranges. NULL sorts first; integers
    /// and floats compare numerically; any other type mismatch is an error.
    pub fn compare(&self, other: &ScalarValue) -> Result<Ordering> {
        use ScalarValue::*;
        let ord = match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.cmp(b),
            (Int64(a), Float64(b)) => OrderedFloat(*a as f64).cmp(b),
            (Float64(a), Int64(b)) => a.cmp(&OrderedFloat(*b as f64)),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Geometry(a), Geometry(b)) => a.cmp(b),
            _ => {
                return Err(OptimizerError::IncomparableValues {
                    left: self.to_string(),
                    right: other.to_string(),
                })
            }
        };
        Ok(ord)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE({v})"),
            ScalarValue::Geometry(b) => write!(
                f,
                "BBOX({} {}, {} {})",
                b.min_x.0, b.min_y.0, b.max_x.0, b.max_y.0
            ),
        }
    }
}

/// Scalar expressions used in filters and join conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `IS NULL`).
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Conjunction (AND) of multiple predicates, stored as a flat list.
    And(Vec<Expr>),
    /// Disjunction (OR) of multiple predicates.
    Or(Vec<Expr>),
    /// `expr [NOT] IN list`. `list` is expected to be a [`Expr::Tuple`].
    InList {
        expr: Box<Expr>,
        list: Box<Expr>,
        negated: bool,
    },
    Tuple(Vec<Expr>),
    /// Spatial predicate such as `ST_INTERSECTS(geom, literal)`.
    Spatial {
        op: SpatialOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `MATCH (columns) AGAINST (query)` resolved against a full-text index.
    MatchAgainst {
        columns: Vec<ColumnRef>,
        index: String,
        query: String,
    },
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality comparison (`=`).
    Eq,
    /// Null-safe equality (`<=>`): NULL <=> NULL is true.
    NullSafeEq,
    /// Inequality comparison (`<>` or `!=`).
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        !matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NullSafeEq => "<=>",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialOp {
    Intersects,
    Within,
    Equals,
}

impl Expr {
    pub fn col(column: ColumnRef) -> Expr {
        Expr::Column(column)
    }

    pub fn lit(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn int(value: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(value))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn in_list(expr: Expr, values: Vec<Expr>) -> Expr {
        Expr::InList {
            expr: Box::new(expr),
            list: Box::new(Expr::Tuple(values)),
            negated: false,
        }
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } | Expr::Spatial { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                list.collect_columns(out);
            }
            Expr::Function { args: exprs, .. }
            | Expr::And(exprs)
            | Expr::Or(exprs)
            | Expr::Tuple(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
            Expr::MatchAgainst { columns, .. } => out.extend(columns.iter()),
        }
    }

    /// Lowercased names of the tables this expression references.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .columns()
            .iter()
            .filter_map(|c| c.table.as_ref().map(|t| t.to_lowercase()))
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// Check if this expression references columns from a given table.
    pub fn references_table(&self, table: &str) -> bool {
        self.columns()
            .iter()
            .any(|c| c.table.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(table)))
    }

    /// Flatten AND-chains: (A AND (B AND C)) -> [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Combine predicates into a single conjunction. Returns `None` for an
    /// empty list and the predicate itself for a single element.
    pub fn join_and(exprs: Vec<Expr>) -> Option<Expr> {
        let mut flat = Vec::with_capacity(exprs.len());
        for e in exprs {
            match e {
                Expr::And(children) => flat.extend(children),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Expr::And(flat)),
        }
    }

    /// True when the expression can be folded without reading a row.
    pub fn is_evaluable(&self) -> bool {
        !matches!(self, Expr::MatchAgainst { .. }) && self.columns().is_empty()
    }

    /// Fold a constant expression into a value.
    pub fn eval_const(&self) -> Result<ScalarValue> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => match operand.eval_const()? {
                ScalarValue::Int64(v) => Ok(ScalarValue::Int64(-v)),
                ScalarValue::Float64(v) => Ok(ScalarValue::Float64(-v)),
                ScalarValue::Null => Ok(ScalarValue::Null),
                other => Err(OptimizerError::InvalidInput(format!(
                    "cannot negate {other}"
                ))),
            },
            Expr::BinaryOp { op, left, right } if !op.is_comparison() => {
                let l = left.eval_const()?;
                let r = right.eval_const()?;
                eval_arithmetic(*op, &l, &r)
            }
            other => Err(OptimizerError::InvalidInput(format!(
                "expression is not a constant: {other}"
            ))),
        }
    }

    /// Whether an index range built from this comparison matches exactly the
    /// rows the comparison accepts.
    pub fn is_precise_comparison(&self) -> bool {
        let (column, values): (&ColumnRef, Vec<&Expr>) = match self {
            Expr::BinaryOp { op, left, right } if op.is_comparison() => {
                match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), other) | (other, Expr::Column(c)) => (c, vec![other]),
                    _ => return true,
                }
            }
            Expr::InList { expr, list, .. } => match (expr.as_ref(), list.as_ref()) {
                (Expr::Column(c), Expr::Tuple(items)) => (c, items.iter().collect()),
                _ => return true,
            },
            Expr::Spatial { .. } | Expr::MatchAgainst { .. } => return false,
            _ => return true,
        };
        if column.data_type.is_string() && column.collation == Collation::CaseInsensitive {
            return false;
        }
        values.into_iter().all(|v| match v.eval_const() {
            Ok(value) => literal_fits(column.data_type, &value),
            Err(_) => false,
        })
    }

    /// Equi-join column pairs of a join condition: `A.x = B.y AND A.z = B.w`
    /// yields `[(A.x, B.y), (A.z, B.w)]`.
    pub fn equi_join_columns(&self) -> Vec<(&ColumnRef, &ColumnRef)> {
        self.conjuncts()
            .into_iter()
            .filter_map(|c| match c {
                Expr::BinaryOp {
                    op: BinaryOp::Eq | BinaryOp::NullSafeEq,
                    left,
                    right,
                } => match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(l), Expr::Column(r)) if l.table != r.table => Some((l, r)),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

/// Whether a literal is stored in a column of `data_type` without coercion.
fn literal_fits(data_type: DataType, value: &ScalarValue) -> bool {
    match (data_type, value) {
        (_, ScalarValue::Null) => true,
        (DataType::Boolean, ScalarValue::Bool(_)) => true,
        (DataType::Int64, ScalarValue::Int64(_)) => true,
        (DataType::Float64, ScalarValue::Float64(_) | ScalarValue::Int64(_)) => true,
        (DataType::Varchar | DataType::Text | DataType::Blob, ScalarValue::Utf8(_)) => true,
        (DataType::Date, ScalarValue::Date(_)) => true,
        (DataType::Geometry, ScalarValue::Geometry(_)) => true,
        _ => false,
    }
}

fn eval_arithmetic(op: BinaryOp, l: &ScalarValue, r: &ScalarValue) -> Result<ScalarValue> {
    use ScalarValue::*;
    let value = match (l, r) {
        (Null, _) | (_, Null) => Null,
        (Int64(a), Int64(b)) => match op {
            BinaryOp::Add => Int64(a.wrapping_add(*b)),
            BinaryOp::Sub => Int64(a.wrapping_sub(*b)),
            BinaryOp::Mul => Int64(a.wrapping_mul(*b)),
            _ if *b == 0 => Null,
            _ => Float64(OrderedFloat(*a as f64 / *b as f64)),
        },
        (Int64(_) | Float64(_), Int64(_) | Float64(_)) => {
            let a = as_f64(l);
            let b = as_f64(r);
            match op {
                BinaryOp::Add => Float64(OrderedFloat(a + b)),
                BinaryOp::Sub => Float64(OrderedFloat(a - b)),
                BinaryOp::Mul => Float64(OrderedFloat(a * b)),
                _ if b == 0.0 => Null,
                _ => Float64(OrderedFloat(a / b)),
            }
        }
        _ => {
            return Err(OptimizerError::InvalidInput(format!(
                "cannot apply {} to {l} and {r}",
                op.symbol()
            )))
        }
    };
    Ok(value)
}

fn as_f64(v: &ScalarValue) -> f64 {
    match v {
        ScalarValue::Int64(i) => *i as f64,
        ScalarValue::Float64(f) => f.0,
        _ => 0.0,
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT ({operand})"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::And(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs, " AND ")?;
                write!(f, ")")
            }
            Expr::Or(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs, " OR ")?;
                write!(f, ")")
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{expr}{not} IN {list}")
            }
            Expr::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items, ", ")?;
                write!(f, ")")
            }
            Expr::Spatial { op, left, right } => {
                let name = match op {
                    SpatialOp::Intersects => "ST_INTERSECTS",
                    SpatialOp::Within => "ST_WITHIN",
                    SpatialOp::Equals => "ST_EQUALS",
                };
                write!(f, "{name}({left}, {right})")
            }
            Expr::MatchAgainst { columns, query, .. } => {
                let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                write!(f, "MATCH ({}) AGAINST ('{query}')", cols.join(", "))
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

/// SQL join types.
///
/// Only Inner and Cross joins are commutative; Left, Semi and Anti joins have
/// fixed left/right semantics and cannot be swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows that have at least one match on the right (no right columns).
    Semi,
    /// Left rows that have no match on the right.
    Anti,
    Cross,
}

impl JoinType {
    /// Semi and anti joins emit at most the left side's rows.
    pub fn is_partial(&self) -> bool {
        matches!(self, JoinType::Semi | JoinType::Anti)
    }

    pub fn is_commutative(&self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cross)
    }

    pub fn is_left_outer(&self) -> bool {
        matches!(self, JoinType::Left)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
            JoinType::Semi => "semi",
            JoinType::Anti => "anti",
            JoinType::Cross => "cross",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: DataType) -> Expr {
        Expr::Column(ColumnRef::new("t", name, 0, ty))
    }

    #[test]
    fn test_join_and_flattens() {
        let a = Expr::eq(col("a", DataType::Int64), Expr::int(1));
        let b = Expr::eq(col("b", DataType::Int64), Expr::int(2));
        let c = Expr::eq(col("c", DataType::Int64), Expr::int(3));
        let joined = Expr::join_and(vec![Expr::And(vec![a.clone(), b.clone()]), c.clone()]);
        assert_eq!(joined, Some(Expr::And(vec![a.clone(), b, c])));
        assert_eq!(Expr::join_and(vec![a.clone()]), Some(a));
        assert_eq!(Expr::join_and(vec![]), None);
    }

    #[test]
    fn test_compare_numeric_mix_and_null() {
        let one = ScalarValue::Int64(1);
        let half = ScalarValue::Float64(OrderedFloat(0.5));
        assert_eq!(one.compare(&half).unwrap(), Ordering::Greater);
        assert_eq!(ScalarValue::Null.compare(&one).unwrap(), Ordering::Less);
        assert!(one.compare(&ScalarValue::Utf8("x".into())).is_err());
    }

    #[test]
    fn test_eval_const_folds_negation() {
        let e = Expr::unary(UnaryOp::Neg, Expr::int(4));
        assert_eq!(e.eval_const().unwrap(), ScalarValue::Int64(-4));
        assert!(col("a", DataType::Int64).eval_const().is_err());
    }

    #[test]
    fn test_precise_comparison() {
        let int_eq = Expr::eq(col("a", DataType::Int64), Expr::int(1));
        assert!(int_eq.is_precise_comparison());

        let coerced = Expr::eq(col("a", DataType::Int64), Expr::lit(ScalarValue::Utf8("1".into())));
        assert!(!coerced.is_precise_comparison());

        let ci = Expr::eq(
            Expr::Column(
                ColumnRef::new("t", "s", 0, DataType::Varchar)
                    .with_collation(Collation::CaseInsensitive),
            ),
            Expr::lit(ScalarValue::Utf8("abc".into())),
        );
        assert!(!ci.is_precise_comparison());
    }

    #[test]
    fn test_equi_join_columns() {
        let cond = Expr::And(vec![
            Expr::eq(
                Expr::Column(ColumnRef::new("x", "a", 0, DataType::Int64)),
                Expr::Column(ColumnRef::new("y", "b", 0, DataType::Int64)),
            ),
            Expr::binary(BinaryOp::Gt, col("c", DataType::Int64), Expr::int(3)),
        ]);
        let pairs = cond.equi_join_columns();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.name, "a");
        assert_eq!(pairs[0].1.name, "b");
    }
}
