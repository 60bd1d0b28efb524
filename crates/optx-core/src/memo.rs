//! # Memo
//!
//! The memo compactly represents the search space of join plans. It holds
//! *groups*: each [`ExprGroup`] is an equivalence class of relational
//! expressions ([`RelExpr`]) that produce the same rows, such as the two
//! orientations of an inner join or its hash, merge and lookup variants. An
//! expression refers to its inputs by group id, so the expressions form a DAG
//! over groups rather than a tree.
//!
//! ## Relations
//!
//! Every source expression (table scan, alias, index scan, values, subquery
//! alias and the other leaves) opens its own group and is assigned a
//! *relation id*. A group's `tables` set lists the relation ids below it. Join
//! groups are keyed by that set, so two join expressions over the same
//! relations always land in the same group.
//!
//! ## Optimization
//!
//! [`Memo::optimize_root`] walks the groups bottom-up. A source group's only
//! expression is its best plan. For any other group, each expression is costed
//! as the sum of its child groups' best costs plus its own cost from the
//! [`Coster`], and the cheapest becomes the group's best. Once a group is done
//! its best is never revisited.
//!
//! ## Hints
//!
//! When join hints are present, an expression satisfying them replaces a best
//! that does not, regardless of cost. Among hinted expressions the cheaper wins,
//! and unhinted expressions only compete while the group has no hinted best.

use crate::catalog::{Index, StatsProvider};
use crate::config::CostConfig;
use crate::cost::{Carder, ChildStats, Cost, Coster, DefaultCarder, DefaultCoster};
use crate::error::{OptimizerError, Result};
use crate::expr::{Expr, JoinType, ScalarValue};
use crate::fds::FastIntSet;
use crate::hints::{Hint, HintType, JoinHints, JoinOpHint, JoinOrderHint};
use crate::plan::{JoinStrategy, LogicalPlan};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

pub type GroupId = u32;
pub type ExprId = u32;

/// A leaf relation and the plan it stands for.
#[derive(Debug, Clone)]
pub struct SourceRel {
    pub plan: LogicalPlan,
    /// Lowercased name join hints refer to.
    pub name: String,
}

impl SourceRel {
    pub fn new(plan: LogicalPlan) -> Self {
        let name = plan.name();
        Self { plan, name }
    }
}

/// Fields shared by every join expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinBase {
    pub join_type: JoinType,
    pub left: GroupId,
    pub right: GroupId,
    /// Join conjuncts. Merge joins keep their key equality first.
    pub filter: Vec<Expr>,
}

/// One index probe of a lookup join.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub index: Arc<dyn Index>,
    /// Values for the leading index columns, evaluated per left row.
    pub key_exprs: Vec<Expr>,
    /// Per key column, whether it can hold NULL.
    pub nullmask: Vec<bool>,
}

/// Relational operator of a memo expression.
#[derive(Debug, Clone)]
pub enum RelOp {
    TableScan(SourceRel),
    TableAlias(SourceRel),
    IndexScan(SourceRel),
    Values(SourceRel),
    RecursiveTable(SourceRel),
    RecursiveCte(SourceRel),
    SubqueryAlias(SourceRel),
    Max1Row(SourceRel),
    TableFunc(SourceRel),
    EmptyTable(SourceRel),
    Project { exprs: Vec<Expr>, child: GroupId },
    Distinct { child: GroupId },
    Filter { filters: Vec<Expr>, child: GroupId },
    InnerJoin(JoinBase),
    CrossJoin(JoinBase),
    LeftJoin(JoinBase),
    FullOuterJoin(JoinBase),
    SemiJoin(JoinBase),
    AntiJoin(JoinBase),
    HashJoin(JoinBase),
    MergeJoin(JoinBase),
    LookupJoin { base: JoinBase, lookup: Lookup },
    ConcatJoin { base: JoinBase, concat: Vec<Lookup> },
}

impl RelOp {
    /// The source operator for a relation plan, or `None` when `plan` is not
    /// a relation.
    pub fn source(plan: LogicalPlan) -> Option<RelOp> {
        let is_table_alias = matches!(
            &plan,
            LogicalPlan::TableAlias { input, .. }
                if matches!(input.as_ref(), LogicalPlan::Table { .. })
        );
        let op = match &plan {
            LogicalPlan::Table { .. } => RelOp::TableScan(SourceRel::new(plan)),
            LogicalPlan::TableAlias { .. } if is_table_alias => RelOp::TableAlias(SourceRel::new(plan)),
            LogicalPlan::TableAlias { .. } => RelOp::SubqueryAlias(SourceRel::new(plan)),
            LogicalPlan::IndexedAccess(_) => RelOp::IndexScan(SourceRel::new(plan)),
            LogicalPlan::Values { .. } => RelOp::Values(SourceRel::new(plan)),
            LogicalPlan::EmptyTable => RelOp::EmptyTable(SourceRel::new(plan)),
            LogicalPlan::SubqueryAlias { .. } => RelOp::SubqueryAlias(SourceRel::new(plan)),
            LogicalPlan::Max1Row { .. } => RelOp::Max1Row(SourceRel::new(plan)),
            LogicalPlan::TableFunction { .. } => RelOp::TableFunc(SourceRel::new(plan)),
            LogicalPlan::RecursiveTable { .. } => RelOp::RecursiveTable(SourceRel::new(plan)),
            LogicalPlan::RecursiveCte { .. } => RelOp::RecursiveCte(SourceRel::new(plan)),
            LogicalPlan::Filter { .. }
            | LogicalPlan::Join { .. }
            | LogicalPlan::Project { .. }
            | LogicalPlan::Distinct { .. } => return None,
        };
        Some(op)
    }

    /// The logical (nested loop) join for `join_type`. Right joins are
    /// expressed as left joins with the inputs swapped.
    pub fn logical_join(join_type: JoinType, left: GroupId, right: GroupId, filter: Vec<Expr>) -> RelOp {
        let base = |join_type, left, right, filter| JoinBase {
            join_type,
            left,
            right,
            filter,
        };
        match join_type {
            JoinType::Inner if filter.is_empty() => RelOp::CrossJoin(base(JoinType::Cross, left, right, filter)),
            JoinType::Inner => RelOp::InnerJoin(base(join_type, left, right, filter)),
            JoinType::Cross => RelOp::CrossJoin(base(join_type, left, right, filter)),
            JoinType::Left => RelOp::LeftJoin(base(join_type, left, right, filter)),
            JoinType::Right => RelOp::LeftJoin(base(JoinType::Left, right, left, filter)),
            JoinType::Full => RelOp::FullOuterJoin(base(join_type, left, right, filter)),
            JoinType::Semi => RelOp::SemiJoin(base(join_type, left, right, filter)),
            JoinType::Anti => RelOp::AntiJoin(base(join_type, left, right, filter)),
        }
    }

    pub fn source_rel(&self) -> Option<&SourceRel> {
        match self {
            RelOp::TableScan(s)
            | RelOp::TableAlias(s)
            | RelOp::IndexScan(s)
            | RelOp::Values(s)
            | RelOp::RecursiveTable(s)
            | RelOp::RecursiveCte(s)
            | RelOp::SubqueryAlias(s)
            | RelOp::Max1Row(s)
            | RelOp::TableFunc(s)
            | RelOp::EmptyTable(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_source(&self) -> bool {
        self.source_rel().is_some()
    }

    pub fn join_base(&self) -> Option<&JoinBase> {
        match self {
            RelOp::InnerJoin(b)
            | RelOp::CrossJoin(b)
            | RelOp::LeftJoin(b)
            | RelOp::FullOuterJoin(b)
            | RelOp::SemiJoin(b)
            | RelOp::AntiJoin(b)
            | RelOp::HashJoin(b)
            | RelOp::MergeJoin(b) => Some(b),
            RelOp::LookupJoin { base, .. } | RelOp::ConcatJoin { base, .. } => Some(base),
            _ => None,
        }
    }

    /// True for joins that name an algorithm rather than a nested loop.
    pub fn is_physical_join(&self) -> bool {
        matches!(
            self,
            RelOp::HashJoin(_) | RelOp::MergeJoin(_) | RelOp::LookupJoin { .. } | RelOp::ConcatJoin { .. }
        )
    }

    pub fn children(&self) -> Vec<GroupId> {
        match self {
            RelOp::Project { child, .. } | RelOp::Distinct { child } | RelOp::Filter { child, .. } => vec![*child],
            op => match op.join_base() {
                Some(b) => vec![b.left, b.right],
                None => vec![],
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelOp::TableScan(_) => "tablescan",
            RelOp::TableAlias(_) => "tablealias",
            RelOp::IndexScan(_) => "indexscan",
            RelOp::Values(_) => "values",
            RelOp::RecursiveTable(_) => "recursivetable",
            RelOp::RecursiveCte(_) => "recursivecte",
            RelOp::SubqueryAlias(_) => "subqueryalias",
            RelOp::Max1Row(_) => "max1row",
            RelOp::TableFunc(_) => "tablefunc",
            RelOp::EmptyTable(_) => "emptytable",
            RelOp::Project { .. } => "project",
            RelOp::Distinct { .. } => "distinct",
            RelOp::Filter { .. } => "filter",
            RelOp::InnerJoin(_) => "innerjoin",
            RelOp::CrossJoin(_) => "crossjoin",
            RelOp::LeftJoin(_) => "leftjoin",
            RelOp::FullOuterJoin(_) => "fullouterjoin",
            RelOp::SemiJoin(_) => "semijoin",
            RelOp::AntiJoin(_) => "antijoin",
            RelOp::HashJoin(_) => "hashjoin",
            RelOp::MergeJoin(_) => "mergejoin",
            RelOp::LookupJoin { .. } => "lookupjoin",
            RelOp::ConcatJoin { .. } => "concatjoin",
        }
    }

    fn strategy(&self) -> JoinStrategy {
        match self {
            RelOp::HashJoin(_) => JoinStrategy::Hash,
            RelOp::MergeJoin(_) => JoinStrategy::Merge,
            RelOp::LookupJoin { lookup, .. } => JoinStrategy::Lookup {
                index: lookup.index.id().to_string(),
                keys: lookup.key_exprs.clone(),
            },
            RelOp::ConcatJoin { concat, .. } => JoinStrategy::ConcatLookup {
                indexes: concat.iter().map(|l| l.index.id().to_string()).collect(),
            },
            _ => JoinStrategy::NestedLoop,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = self.source_rel() {
            return write!(f, "({}: {})", self.name(), source.name);
        }
        match self {
            RelOp::Project { child, .. } | RelOp::Distinct { child } | RelOp::Filter { child, .. } => {
                write!(f, "({} {})", self.name(), child)
            }
            RelOp::LookupJoin { base, lookup } => {
                write!(f, "({} {} {} {})", self.name(), base.left, base.right, lookup.index.id())
            }
            op => match op.join_base() {
                Some(b) => write!(f, "({} {} {})", op.name(), b.left, b.right),
                None => write!(f, "({})", op.name()),
            },
        }
    }
}

/// One expression in the memo.
#[derive(Debug, Clone)]
pub struct RelExpr {
    pub id: ExprId,
    pub group: GroupId,
    pub op: RelOp,
    /// Local cost, set when the expression is costed.
    pub cost: Option<f64>,
}

/// An equivalence class of expressions.
#[derive(Debug, Clone)]
pub struct ExprGroup {
    pub id: GroupId,
    pub exprs: Vec<ExprId>,
    pub best: Option<ExprId>,
    /// Total cost of the best expression.
    pub cost: Cost,
    /// Estimated output rows, derived once from the first expression.
    pub card: Option<f64>,
    pub done: bool,
    /// The best expression satisfies the join hints.
    pub hint_ok: bool,
    /// Relation ids below this group.
    pub tables: FastIntSet,
}

impl ExprGroup {
    fn new(id: GroupId, tables: FastIntSet) -> Self {
        Self {
            id,
            exprs: Vec::new(),
            best: None,
            cost: Cost::infinite(),
            card: None,
            done: false,
            hint_ok: false,
            tables,
        }
    }

    fn update_best(&mut self, expr: ExprId, cost: f64) -> bool {
        if self.best.is_none() || cost < self.cost.total {
            self.best = Some(expr);
            self.cost = Cost::new(cost);
            return true;
        }
        false
    }
}

/// The memo table.
pub struct Memo {
    groups: Vec<ExprGroup>,
    exprs: Vec<RelExpr>,
    /// Join groups keyed by the relations they cover.
    join_groups: HashMap<FastIntSet, GroupId>,
    /// Relation id to (name, source group).
    relations: Vec<(String, GroupId)>,
    root: Option<GroupId>,
    hints: JoinHints,
    coster: Arc<dyn Coster>,
    carder: Arc<dyn Carder>,
    stats: Arc<dyn StatsProvider>,
}

impl Memo {
    pub fn new(stats: Arc<dyn StatsProvider>, config: &CostConfig) -> Self {
        Self {
            groups: Vec::new(),
            exprs: Vec::new(),
            join_groups: HashMap::new(),
            relations: Vec::new(),
            root: None,
            hints: JoinHints::default(),
            coster: Arc::new(DefaultCoster::new(config.clone())),
            carder: Arc::new(DefaultCarder::new(config.clone())),
            stats,
        }
    }

    pub fn with_coster(mut self, coster: Arc<dyn Coster>) -> Self {
        self.coster = coster;
        self
    }

    pub fn with_carder(mut self, carder: Arc<dyn Carder>) -> Self {
        self.carder = carder;
        self
    }

    pub fn group(&self, id: GroupId) -> &ExprGroup {
        &self.groups[id as usize]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut ExprGroup {
        &mut self.groups[id as usize]
    }

    pub fn try_group(&self, id: GroupId) -> Result<&ExprGroup> {
        self.groups.get(id as usize).ok_or(OptimizerError::UnknownGroup(id))
    }

    pub fn expr(&self, id: ExprId) -> &RelExpr {
        &self.exprs[id as usize]
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    pub fn root(&self) -> Option<GroupId> {
        self.root
    }

    pub fn set_root(&mut self, root: GroupId) {
        self.root = Some(root);
    }

    pub fn hints(&self) -> &JoinHints {
        &self.hints
    }

    pub fn stats(&self) -> &dyn StatsProvider {
        self.stats.as_ref()
    }

    /// Relation id of the first relation named `name`, case-insensitively.
    pub fn relation_id(&self, name: &str) -> Option<u32> {
        self.relations
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|i| i as u32)
    }

    /// Name of a relation, as join hints and column qualifiers spell it.
    pub fn relation_name(&self, relation: u32) -> Option<&str> {
        self.relations.get(relation as usize).map(|(n, _)| n.as_str())
    }

    /// Source group of a relation.
    pub fn relation_group(&self, relation: u32) -> Option<GroupId> {
        self.relations.get(relation as usize).map(|(_, g)| *g)
    }

    fn children_tables(&self, op: &RelOp) -> FastIntSet {
        op.children()
            .iter()
            .fold(FastIntSet::new(), |acc, g| acc.union(&self.group(*g).tables))
    }

    /// Add an expression in a new group. Source expressions are assigned the
    /// next relation id.
    pub fn add_expr(&mut self, op: RelOp) -> (GroupId, ExprId) {
        let gid = self.groups.len() as GroupId;
        let tables = match op.source_rel() {
            Some(source) => {
                let rel = self.relations.len() as u32;
                self.relations.push((source.name.clone(), gid));
                [rel].into_iter().collect()
            }
            None => self.children_tables(&op),
        };
        self.groups.push(ExprGroup::new(gid, tables));
        let eid = self.add_expr_to_group(gid, op);
        (gid, eid)
    }

    /// Add an alternative expression to an existing group.
    pub fn add_expr_to_group(&mut self, group: GroupId, op: RelOp) -> ExprId {
        let eid = self.exprs.len() as ExprId;
        trace!("  Added expr {} {} to group {}", eid, op, group);
        self.exprs.push(RelExpr {
            id: eid,
            group,
            op,
            cost: None,
        });
        self.groups[group as usize].exprs.push(eid);
        eid
    }

    /// Add a join expression to the group covering its relations, creating
    /// the group on first use.
    pub fn memoize_join(&mut self, op: RelOp) -> GroupId {
        let tables = self.children_tables(&op);
        if let Some(&gid) = self.join_groups.get(&tables) {
            self.add_expr_to_group(gid, op);
            return gid;
        }
        let (gid, _) = self.add_expr(op);
        self.join_groups.insert(tables, gid);
        gid
    }

    /// Group covering exactly `tables`, if one was memoized by a join.
    pub fn join_group(&self, tables: &FastIntSet) -> Option<GroupId> {
        self.join_groups.get(tables).copied()
    }

    /// Apply one parsed hint. Must run after the join groups are built.
    pub fn apply_hint(&mut self, hint: &Hint) {
        match hint.hint_type {
            HintType::JoinOrder => self.set_join_order(&hint.args),
            HintType::JoinFixedOrder => self.hints.fixed_order = true,
            HintType::LeftDeep => self.hints.left_deep = true,
            HintType::NoIcp => self.hints.no_icp = true,
            t if t.is_join_op() => {
                if let [left, right] = hint.args.as_slice() {
                    self.set_join_op(t, left, right);
                }
            }
            _ => {}
        }
    }

    pub fn set_join_order(&mut self, tables: &[String]) {
        let hint = JoinOrderHint::build(self, tables);
        if hint.is_valid() {
            debug!("Accepted join order hint: {:?}", tables);
            self.hints.order = Some(hint);
        } else {
            debug!("Rejected join order hint: {:?}", tables);
        }
    }

    pub fn set_join_op(&mut self, op: HintType, left: &str, right: &str) {
        match JoinOpHint::build(self, op, left, right) {
            Some(hint) => {
                debug!("Accepted join hint {}({},{})", op, left, right);
                self.hints.ops.push(hint);
            }
            None => debug!("Dropped join hint {}({},{}): unknown table", op, left, right),
        }
    }

    /// Estimated rows of a group, derived from its first expression.
    pub fn derive_card(&mut self, group: GroupId) -> Result<f64> {
        if let Some(card) = self.try_group(group)?.card {
            return Ok(card);
        }
        let Some(&first) = self.group(group).exprs.first() else {
            return Err(OptimizerError::InvalidInput(format!("memo group {group} is empty")));
        };
        let op = self.exprs[first as usize].op.clone();
        let card = self.estimate_card(&op)?;
        self.group_mut(group).card = Some(card);
        Ok(card)
    }

    /// Cardinality of an expression that need not be in the memo yet.
    pub fn estimate_card(&mut self, op: &RelOp) -> Result<f64> {
        let mut kids = Vec::new();
        for child in op.children() {
            kids.push(ChildStats::new(self.derive_card(child)?, 0.0));
        }
        self.carder.estimate_card(op, &kids, self.stats.as_ref())
    }

    /// Find the cheapest plan for every group reachable from the root.
    pub fn optimize_root(&mut self) -> Result<()> {
        let root = self
            .root
            .ok_or_else(|| OptimizerError::InvalidInput("memo has no root group".to_string()))?;
        debug!(
            "Starting memo optimization: root_group={}, groups={}, exprs={}",
            root,
            self.num_groups(),
            self.num_exprs()
        );
        self.optimize_group(root)?;
        debug!("Memo optimization complete: cost={:.2}", self.group(root).cost.total);
        Ok(())
    }

    fn optimize_group(&mut self, gid: GroupId) -> Result<()> {
        if self.try_group(gid)?.done {
            return Ok(());
        }
        self.derive_card(gid)?;

        let exprs = self.group(gid).exprs.clone();
        let first = exprs[0];
        if self.exprs[first as usize].op.is_source() {
            let cost = self
                .coster
                .estimate_cost(&self.exprs[first as usize].op, &[], self.stats.as_ref())?;
            self.exprs[first as usize].cost = Some(cost);
            let group = self.group_mut(gid);
            group.best = Some(first);
            group.cost = Cost::new(cost);
            group.hint_ok = true;
            group.done = true;
            trace!("  Source group {} best={} cost={:.2}", gid, first, cost);
            return Ok(());
        }

        for eid in exprs {
            let children = self.exprs[eid as usize].op.children();
            let mut kids = Vec::with_capacity(children.len());
            let mut total = 0.0;
            for child in children {
                self.optimize_group(child)?;
                let group = self.group(child);
                total += group.cost.total;
                kids.push(ChildStats::new(group.card.unwrap_or(0.0), group.cost.total));
            }
            let rel_cost = self
                .coster
                .estimate_cost(&self.exprs[eid as usize].op, &kids, self.stats.as_ref())?;
            self.exprs[eid as usize].cost = Some(rel_cost);
            total += rel_cost;
            trace!(
                "  Costed expr {} {}: rel_cost={:.2}, total={:.2}",
                eid,
                self.exprs[eid as usize].op,
                rel_cost,
                total
            );
            self.update_best(gid, eid, total);
        }

        self.group_mut(gid).done = true;
        Ok(())
    }

    fn update_best(&mut self, gid: GroupId, eid: ExprId, cost: f64) {
        if self.hints.is_empty() {
            if self.group_mut(gid).update_best(eid, cost) {
                trace!("  New best for group {}: expr {} cost={:.2}", gid, eid, cost);
            }
            return;
        }

        let satisfied = self.hints.satisfied_by(&self.exprs[eid as usize].op, self);
        let group = self.group_mut(gid);
        if satisfied {
            if !group.hint_ok {
                group.best = Some(eid);
                group.cost = Cost::new(cost);
                group.hint_ok = true;
                trace!("  Hinted best for group {}: expr {} cost={:.2}", gid, eid, cost);
                return;
            }
            if group.update_best(eid, cost) {
                trace!("  New hinted best for group {}: expr {} cost={:.2}", gid, eid, cost);
            }
        } else if (group.best.is_none() || !group.hint_ok) && group.update_best(eid, cost) {
            trace!("  New best for group {} (no hints satisfied): expr {} cost={:.2}", gid, eid, cost);
        }
    }

    /// Materialize the best plan of the root group.
    pub fn best_plan(&self) -> Result<LogicalPlan> {
        let root = self
            .root
            .ok_or_else(|| OptimizerError::InvalidInput("memo has no root group".to_string()))?;
        self.build_best(root)
    }

    fn build_best(&self, gid: GroupId) -> Result<LogicalPlan> {
        let group = self.try_group(gid)?;
        let (true, Some(best)) = (group.done, group.best) else {
            return Err(OptimizerError::GroupNotOptimized(gid));
        };
        let op = &self.expr(best).op;
        if let Some(source) = op.source_rel() {
            return Ok(source.plan.clone());
        }
        let plan = match op {
            RelOp::Project { exprs, child } => LogicalPlan::Project {
                exprs: exprs.clone(),
                input: Box::new(self.build_best(*child)?),
            },
            RelOp::Distinct { child } => LogicalPlan::Distinct {
                input: Box::new(self.build_best(*child)?),
            },
            RelOp::Filter { filters, child } => LogicalPlan::Filter {
                predicate: Expr::join_and(filters.clone()).unwrap_or(Expr::Literal(ScalarValue::Bool(true))),
                input: Box::new(self.build_best(*child)?),
            },
            op => {
                let Some(base) = op.join_base() else {
                    return Err(OptimizerError::InvalidInput(format!("cannot build plan for {op}")));
                };
                LogicalPlan::Join {
                    join_type: base.join_type,
                    strategy: op.strategy(),
                    left: Box::new(self.build_best(base.left)?),
                    right: Box::new(self.build_best(base.right)?),
                    condition: Expr::join_and(base.filter.clone()),
                }
            }
        };
        Ok(plan)
    }

    /// Groups with their expressions' costs, cheapest first, best marked.
    pub fn cost_tree_string(&self) -> String {
        let mut out = String::from("costed memo:\n");
        for (i, group) in self.groups.iter().enumerate() {
            let branch = if i + 1 == self.groups.len() { "└──" } else { "├──" };
            let card = group.card.map_or("?".to_string(), |c| format!("{c:.1}"));
            out.push_str(&format!("{branch} G{}: card={card}\n", group.id));

            let mut exprs: Vec<&RelExpr> = group.exprs.iter().map(|e| self.expr(*e)).collect();
            exprs.sort_by(|a, b| {
                let ca = a.cost.unwrap_or(f64::MAX);
                let cb = b.cost.unwrap_or(f64::MAX);
                ca.total_cmp(&cb)
            });
            for e in exprs {
                let cost = e.cost.map_or("?".to_string(), |c| format!("{c:.2}"));
                let mark = if group.best == Some(e.id) { " *" } else { "" };
                out.push_str(&format!("|   {} cost={cost}{mark}\n", e.op));
            }
        }
        out
    }
}

impl fmt::Display for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "memo:")?;
        for (i, group) in self.groups.iter().enumerate() {
            let branch = if i + 1 == self.groups.len() { "└──" } else { "├──" };
            let exprs: Vec<String> = group.exprs.iter().map(|e| self.expr(*e).op.to_string()).collect();
            writeln!(f, "{branch} G{}: {}", group.id, exprs.join(" "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("groups", &self.groups.len())
            .field("exprs", &self.exprs.len())
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, InMemoryTable};
    use crate::cost::{BiasedCoster, JoinBias};
    use crate::expr::{ColumnRef, DataType};
    use crate::hints::parse_join_hints;

    fn scan(name: &str) -> RelOp {
        let table = InMemoryTable::new("db", name, vec![ColumnRef::new(name, "id", 0, DataType::Int64)]);
        RelOp::source(LogicalPlan::table(Arc::new(table))).unwrap()
    }

    fn equi(l: &str, r: &str) -> Expr {
        Expr::eq(
            Expr::col(ColumnRef::new(l, "id", 0, DataType::Int64)),
            Expr::col(ColumnRef::new(r, "id", 0, DataType::Int64)),
        )
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        let mut c = InMemoryCatalog::new();
        c.set_row_count("db", "x", 100);
        c.set_row_count("db", "y", 10);
        Arc::new(c)
    }

    /// Memo with `x JOIN y` as inner and hash joins in both orientations.
    fn two_table_memo(memo: &mut Memo) -> GroupId {
        let (x, _) = memo.add_expr(scan("x"));
        let (y, _) = memo.add_expr(scan("y"));
        let f = vec![equi("x", "y")];
        let g = memo.memoize_join(RelOp::logical_join(JoinType::Inner, x, y, f.clone()));
        memo.memoize_join(RelOp::logical_join(JoinType::Inner, y, x, f.clone()));
        memo.memoize_join(RelOp::HashJoin(JoinBase { join_type: JoinType::Inner, left: x, right: y, filter: f.clone() }));
        memo.memoize_join(RelOp::HashJoin(JoinBase { join_type: JoinType::Inner, left: y, right: x, filter: f }));
        memo.set_root(g);
        g
    }

    #[test]
    fn test_join_groups_keyed_by_relations() {
        let mut memo = Memo::new(catalog(), &CostConfig::default());
        let g = two_table_memo(&mut memo);
        assert_eq!(memo.num_groups(), 3);
        assert_eq!(memo.group(g).exprs.len(), 4);
        assert_eq!(memo.relation_id("Y"), Some(1));
        assert!(memo.to_string().contains("(innerjoin 0 1) (innerjoin 1 0) (hashjoin 0 1) (hashjoin 1 0)"));
    }

    #[test]
    fn test_optimize_picks_cheapest() {
        let mut memo = Memo::new(catalog(), &CostConfig::default());
        let g = two_table_memo(&mut memo);
        memo.optimize_root().unwrap();
        let best = memo.group(g).best.unwrap();
        // hash join building the small side: 100*0.01 + 10*3 = 31
        match &memo.expr(best).op {
            RelOp::HashJoin(base) => assert_eq!(base.left, 0),
            other => panic!("unexpected best {other}"),
        }
        assert!((memo.group(g).cost.total - (100.0 + 10.0 + 31.0)).abs() < 1e-9);
        assert!(memo.cost_tree_string().contains("(hashjoin 0 1) cost=31.00 *"));

        let plan = memo.best_plan().unwrap();
        assert!(matches!(plan, LogicalPlan::Join { strategy: JoinStrategy::Hash, .. }));
    }

    #[test]
    fn test_biased_coster_forces_shape() {
        let config = CostConfig::default();
        let mut memo = Memo::new(catalog(), &config)
            .with_coster(Arc::new(BiasedCoster::new(config.clone(), JoinBias::Inner)));
        let g = two_table_memo(&mut memo);
        memo.optimize_root().unwrap();
        let best = memo.group(g).best.unwrap();
        assert!(matches!(memo.expr(best).op, RelOp::InnerJoin(_)));
    }

    #[test]
    fn test_hinted_plan_beats_cheaper_plan() {
        let mut memo = Memo::new(catalog(), &CostConfig::default());
        let g = two_table_memo(&mut memo);
        for hint in parse_join_hints("/*+ JOIN_ORDER(y, x) INNER_JOIN(x, y) */") {
            memo.apply_hint(&hint);
        }
        assert!(memo.hints().order.is_some());
        memo.optimize_root().unwrap();
        let best = memo.group(g).best.unwrap();
        match &memo.expr(best).op {
            RelOp::InnerJoin(base) => assert_eq!(base.left, 1),
            other => panic!("unexpected best {other}"),
        }
        assert!(memo.group(g).hint_ok);
    }

    #[test]
    fn test_best_plan_requires_optimization() {
        let mut memo = Memo::new(catalog(), &CostConfig::default());
        two_table_memo(&mut memo);
        assert!(matches!(memo.best_plan(), Err(OptimizerError::GroupNotOptimized(_))));
    }
}
