//! # Join Hints
//!
//! Queries can steer join planning with an optimizer comment:
//!
//! ```text
//! /*+ JOIN_ORDER(a,b,c) LOOKUP_JOIN(a,b) */
//! ```
//!
//! [`parse_join_hints`] turns the comment into typed [`Hint`]s, dropping hints
//! with the wrong number of arguments. The memo converts the join hints into a
//! [`JoinHints`] matcher once its groups are built, and consults it whenever a
//! group's best plan is updated.
//!
//! ## Order Hints
//!
//! A [`JoinOrderHint`] maps every memo group to the set of hint positions of
//! the relations below it. A join obeys the order when its left side's set
//! sorts before its right side's (as bitsets read as integers) and the union of
//! both is a contiguous run of hint positions. A hint that leaves any group
//! without a position (for example one naming only two of three joined tables)
//! is invalid and discarded.
//!
//! ## Operator Hints
//!
//! A [`JoinOpHint`] names two relations and a physical join kind. A join matches
//! when each side contains one of the two relations, in either orientation, and
//! the join is of the hinted kind.

use crate::fds::FastIntSet;
use crate::memo::{GroupId, Memo, RelOp};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintType {
    Unknown,
    JoinOrder,
    JoinFixedOrder,
    MergeJoin,
    LookupJoin,
    HashJoin,
    InnerJoin,
    SemiJoin,
    AntiJoin,
    /// Disable index condition pushdown (costed index scans).
    NoIcp,
    /// Only enumerate left-deep join trees.
    LeftDeep,
}

impl HintType {
    fn parse(name: &str) -> Self {
        match name {
            "join_order" => HintType::JoinOrder,
            "join_fixed_order" => HintType::JoinFixedOrder,
            "merge_join" => HintType::MergeJoin,
            "lookup_join" => HintType::LookupJoin,
            "hash_join" => HintType::HashJoin,
            "inner_join" => HintType::InnerJoin,
            "semi_join" => HintType::SemiJoin,
            "anti_join" => HintType::AntiJoin,
            "no_icp" => HintType::NoIcp,
            "left_deep" => HintType::LeftDeep,
            _ => HintType::Unknown,
        }
    }

    /// True for hints naming two relations and a join kind.
    pub fn is_join_op(&self) -> bool {
        matches!(
            self,
            HintType::MergeJoin
                | HintType::LookupJoin
                | HintType::HashJoin
                | HintType::InnerJoin
                | HintType::SemiJoin
                | HintType::AntiJoin
        )
    }
}

impl fmt::Display for HintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HintType::Unknown => "",
            HintType::JoinOrder => "JOIN_ORDER",
            HintType::JoinFixedOrder => "JOIN_FIXED_ORDER",
            HintType::MergeJoin => "MERGE_JOIN",
            HintType::LookupJoin => "LOOKUP_JOIN",
            HintType::HashJoin => "HASH_JOIN",
            HintType::InnerJoin => "INNER_JOIN",
            HintType::SemiJoin => "SEMI_JOIN",
            HintType::AntiJoin => "ANTI_JOIN",
            HintType::NoIcp => "NO_ICP",
            HintType::LeftDeep => "LEFT_DEEP",
        };
        write!(f, "{s}")
    }
}

/// One parsed optimizer hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub hint_type: HintType,
    pub args: Vec<String>,
}

impl Hint {
    pub fn new(hint_type: HintType, args: Vec<String>) -> Self {
        Self { hint_type, args }
    }

    /// Whether the hint has the number of arguments its type takes. Unknown
    /// hints are passed through.
    pub fn is_valid(&self) -> bool {
        match self.hint_type {
            HintType::JoinOrder => !self.args.is_empty(),
            HintType::JoinFixedOrder | HintType::NoIcp | HintType::LeftDeep => self.args.is_empty(),
            t if t.is_join_op() => self.args.len() == 2,
            _ => true,
        }
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.hint_type)
        } else {
            write!(f, "{}({})", self.hint_type, self.args.join(","))
        }
    }
}

fn hint_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*[a-z_]+(\([^(]+\))?\s*").ok())
        .as_ref()
}

/// Parse an optimizer comment such as `/*+ JOIN_ORDER(a,b) HASH_JOIN(a,b) */`.
///
/// Matching is case-insensitive and whitespace inside argument lists is
/// ignored. Hints with the wrong arity are dropped.
pub fn parse_join_hints(comment: &str) -> Vec<Hint> {
    let body = comment.trim();
    let body = body.strip_prefix("/*+").unwrap_or(body);
    let body = body.strip_suffix("*/").unwrap_or(body);
    let body = body.trim().to_lowercase();

    let mut hints = Vec::new();
    let Some(re) = hint_regex() else {
        return hints;
    };
    for m in re.find_iter(&body) {
        let text = m.as_str().trim();
        let split = text.find(|c| c == '(' || c == ' ').unwrap_or(text.len());
        let (name, rest) = text.split_at(split);

        let mut args = Vec::new();
        let mut arg = String::new();
        for c in rest.chars() {
            match c {
                ',' | ')' => args.push(std::mem::take(&mut arg)),
                '(' | ' ' => {}
                other => arg.push(other),
            }
        }

        let hint = Hint::new(HintType::parse(name), args);
        if hint.is_valid() {
            hints.push(hint);
        }
    }
    hints
}

/// Positions of hinted relations, as a bitset compared like an integer.
type VertexSet = u64;

fn is_compact(s1: VertexSet, s2: VertexSet) -> bool {
    let union = s1 | s2;
    if union == 0 {
        return false;
    }
    let shifted = union >> union.trailing_zeros();
    shifted & shifted.wrapping_add(1) == 0
}

/// A `JOIN_ORDER` hint resolved against the groups of a memo.
#[derive(Debug, Clone, Default)]
pub struct JoinOrderHint {
    groups: HashMap<GroupId, VertexSet>,
}

impl JoinOrderHint {
    /// Resolve `tables` against the memo's relations and record, for every
    /// group reachable from the root, which hint positions it covers.
    pub fn build(memo: &Memo, tables: &[String]) -> Self {
        let mut order: HashMap<u32, u32> = HashMap::new();
        for (pos, name) in tables.iter().enumerate().take(64) {
            if let Some(rel) = memo.relation_id(name) {
                order.entry(rel).or_insert(pos as u32);
            }
        }

        let mut hint = JoinOrderHint::default();
        let Some(root) = memo.root() else {
            return hint;
        };
        let mut stack = vec![root];
        while let Some(gid) = stack.pop() {
            if hint.groups.contains_key(&gid) {
                continue;
            }
            let group = memo.group(gid);
            let set = group
                .tables
                .iter()
                .filter_map(|rel| order.get(&rel))
                .fold(0u64, |acc, pos| acc | (1u64 << pos));
            hint.groups.insert(gid, set);
            for &eid in &group.exprs {
                stack.extend(memo.expr(eid).op.children());
            }
        }
        hint
    }

    /// False when some group contains none of the hinted relations.
    pub fn is_valid(&self) -> bool {
        !self.groups.is_empty() && self.groups.values().all(|v| *v != 0)
    }

    pub fn obeys_order(&self, op: &RelOp, memo: &Memo) -> bool {
        match op {
            RelOp::Project { child, .. } | RelOp::Distinct { child } | RelOp::Filter { child, .. } => {
                let group = memo.group(*child);
                match group.best {
                    Some(best) => self.obeys_order(&memo.expr(best).op, memo),
                    None => false,
                }
            }
            op => match op.join_base() {
                Some(base) => {
                    if !memo.group(base.left).hint_ok || !memo.group(base.right).hint_ok {
                        return false;
                    }
                    let l = self.groups.get(&base.left).copied().unwrap_or(0);
                    let r = self.groups.get(&base.right).copied().unwrap_or(0);
                    l < r && is_compact(l, r)
                }
                None => true,
            },
        }
    }
}

/// A join operator hint such as `HASH_JOIN(a,b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOpHint {
    pub op: HintType,
    pub left: FastIntSet,
    pub right: FastIntSet,
}

impl JoinOpHint {
    /// Resolve the hint's relation names. `None` when either is unknown.
    pub fn build(memo: &Memo, op: HintType, left: &str, right: &str) -> Option<Self> {
        let l = memo.relation_id(left)?;
        let r = memo.relation_id(right)?;
        Some(Self {
            op,
            left: [l].into_iter().collect(),
            right: [r].into_iter().collect(),
        })
    }

    /// Whether each side of a join holds one of the hinted relations. Non-join
    /// operators always match.
    pub fn deps_match(&self, op: &RelOp, memo: &Memo) -> bool {
        let Some(base) = op.join_base() else {
            return true;
        };
        let l = &memo.group(base.left).tables;
        let r = &memo.group(base.right).tables;
        (self.left.intersects(l) && self.right.intersects(r)) || (self.left.intersects(r) && self.right.intersects(l))
    }

    /// Whether a join implements the hinted operator. Non-join operators
    /// always match.
    pub fn type_matches(&self, op: &RelOp) -> bool {
        let Some(base) = op.join_base() else {
            return true;
        };
        match self.op {
            HintType::LookupJoin => matches!(op, RelOp::LookupJoin { .. }),
            HintType::MergeJoin => matches!(op, RelOp::MergeJoin(_)),
            HintType::HashJoin => matches!(op, RelOp::HashJoin(_)),
            HintType::InnerJoin => !op.is_physical_join(),
            HintType::SemiJoin => base.join_type == crate::expr::JoinType::Semi,
            HintType::AntiJoin => base.join_type == crate::expr::JoinType::Anti,
            _ => false,
        }
    }
}

/// The join hints in effect for one memo.
#[derive(Debug, Clone, Default)]
pub struct JoinHints {
    pub ops: Vec<JoinOpHint>,
    pub order: Option<JoinOrderHint>,
    /// Keep the join tree exactly as written.
    pub fixed_order: bool,
    pub left_deep: bool,
    pub no_icp: bool,
}

impl JoinHints {
    /// True when no hint constrains best-plan selection.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.order.is_none()
    }

    /// Whether an expression satisfies every hint: the order hint, and at least
    /// one operator hint when any are present.
    pub fn satisfied_by(&self, op: &RelOp, memo: &Memo) -> bool {
        if let Some(order) = &self.order {
            if !order.obeys_order(op, memo) {
                return false;
            }
        }
        if self.ops.is_empty() {
            return true;
        }
        self.ops
            .iter()
            .any(|hint| hint.deps_match(op, memo) && hint.type_matches(op))
    }
}

/// True when the parsed hints disable costed index scans.
pub fn has_no_icp(hints: &[Hint]) -> bool {
    hints.iter().any(|h| h.hint_type == HintType::NoIcp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_hints() {
        let hints = parse_join_hints("/*+ JOIN_ORDER(a, b,c) LOOKUP_JOIN(a,b) NO_ICP */");
        assert_eq!(hints.len(), 3);
        assert_eq!(hints[0].hint_type, HintType::JoinOrder);
        assert_eq!(hints[0].args, vec!["a", "b", "c"]);
        assert_eq!(hints[1].to_string(), "LOOKUP_JOIN(a,b)");
        assert_eq!(hints[2].hint_type, HintType::NoIcp);
        assert!(has_no_icp(&hints));
    }

    #[test]
    fn test_parse_drops_bad_arity() {
        let hints = parse_join_hints("/*+ HASH_JOIN(a) JOIN_FIXED_ORDER(a) JOIN_ORDER() LEFT_DEEP */");
        assert_eq!(hints, vec![Hint::new(HintType::LeftDeep, vec![])]);
    }

    #[test]
    fn test_unknown_hints_pass_through() {
        let hints = parse_join_hints("/*+ bogus_hint */");
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].hint_type, HintType::Unknown);
    }

    #[test]
    fn test_compact_vertex_sets() {
        // positions 0,1 and 2 are contiguous; 0 and 2 are not
        assert!(is_compact(0b001, 0b010));
        assert!(is_compact(0b011, 0b100));
        assert!(!is_compact(0b001, 0b100));
        assert!(!is_compact(0, 0));
    }
}
