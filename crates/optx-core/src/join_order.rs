//! # Join Order Builder
//!
//! Populates a [`Memo`] with the alternative shapes of a plan's joins.
//!
//! ## Join Graphs
//!
//! A maximal tree of inner and cross joins is flattened into a *join graph*:
//! its non-join inputs become vertices and the conjuncts of its join
//! conditions become edges over the vertices they reference. Conjuncts that
//! reference a single vertex are pushed into a filter group over that vertex;
//! conjuncts that reference none stay in a filter above the whole graph.
//!
//! Outer, semi and anti joins are barriers. Their inputs are built as separate
//! graphs and the join itself keeps its written sides.
//!
//! ## Enumeration
//!
//! Graphs with at most `max_dp_tables` vertices are enumerated exhaustively,
//! by subset size. A subset is built from every split into two subsets joined
//! by at least one edge; a subset without any connected split is built from
//! cross products instead. Larger graphs are ordered greedily: the connected
//! pair with the lowest estimated cardinality is joined first, and when nothing
//! is connected the two smallest inputs are cross joined.
//!
//! ## Physical Alternatives
//!
//! Every join added to the memo comes with the physical variants its filter
//! allows: a hash join for equalities between the sides, a merge join when
//! both sides are tables indexed on the key columns, a lookup join into an
//! indexed right table, and a concat lookup join for an OR of such equalities.

use crate::catalog::{Index, IndexAddressableTable};
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::expr::{BinaryOp, ColumnRef, Expr, JoinType};
use crate::fds::FastIntSet;
use crate::memo::{GroupId, JoinBase, Lookup, Memo, RelOp};
use crate::plan::LogicalPlan;
use std::sync::Arc;
use tracing::{debug, trace};

/// Hard cap on exhaustive enumeration, whatever the configuration says.
const MAX_DP_RELATIONS: usize = 16;

/// A join conjunct and the graph vertices it references.
#[derive(Debug, Clone)]
struct Edge {
    expr: Expr,
    vertices: FastIntSet,
}

/// One operand of a greedy join step.
#[derive(Debug, Clone)]
struct Component {
    vertices: FastIntSet,
    group: GroupId,
}

/// Builds join groups into a memo and sets its root.
pub struct JoinOrderBuilder<'a> {
    memo: &'a mut Memo,
    config: &'a OptimizerConfig,
    fixed_order: bool,
    left_deep: bool,
}

impl<'a> JoinOrderBuilder<'a> {
    pub fn new(memo: &'a mut Memo, config: &'a OptimizerConfig) -> Self {
        Self {
            memo,
            config,
            fixed_order: false,
            left_deep: false,
        }
    }

    /// Keep every join as written; only physical variants are added.
    pub fn with_fixed_order(mut self, fixed: bool) -> Self {
        self.fixed_order = fixed;
        self
    }

    /// Only consider plans whose right join inputs are single relations.
    pub fn with_left_deep(mut self, left_deep: bool) -> Self {
        self.left_deep = left_deep;
        self
    }

    /// Memoize `plan` and return its root group.
    pub fn build(mut self, plan: &LogicalPlan) -> Result<GroupId> {
        let root = self.build_group(plan)?;
        self.memo.set_root(root);
        debug!(
            "Built join memo: root_group={}, groups={}, exprs={}",
            root,
            self.memo.num_groups(),
            self.memo.num_exprs()
        );
        Ok(root)
    }

    fn build_group(&mut self, plan: &LogicalPlan) -> Result<GroupId> {
        match plan {
            LogicalPlan::Project { exprs, input } => {
                let child = self.build_group(input)?;
                Ok(self.memo.add_expr(RelOp::Project { exprs: exprs.clone(), child }).0)
            }
            LogicalPlan::Distinct { input } => {
                let child = self.build_group(input)?;
                Ok(self.memo.add_expr(RelOp::Distinct { child }).0)
            }
            LogicalPlan::Filter { predicate, input } => {
                let child = self.build_group(input)?;
                let filters = predicate.conjuncts().into_iter().cloned().collect();
                Ok(self.memo.add_expr(RelOp::Filter { filters, child }).0)
            }
            LogicalPlan::Join {
                join_type: JoinType::Inner | JoinType::Cross,
                ..
            } if !self.fixed_order => self.build_join_graph(plan),
            LogicalPlan::Join {
                join_type,
                left,
                right,
                condition,
                ..
            } => {
                let l = self.build_group(left)?;
                let r = self.build_group(right)?;
                let filter = conjuncts(condition.as_ref());
                self.add_join(*join_type, l, r, filter, false)
            }
            source => {
                let Some(op) = RelOp::source(source.clone()) else {
                    return Err(OptimizerError::InvalidInput(format!(
                        "cannot memoize plan node: {}",
                        source.display(0).trim_end()
                    )));
                };
                Ok(self.memo.add_expr(op).0)
            }
        }
    }

    /// Flatten an inner join tree into vertices and edges, then enumerate it.
    fn build_join_graph(&mut self, plan: &LogicalPlan) -> Result<GroupId> {
        let mut vertices = Vec::new();
        let mut predicates = Vec::new();
        self.collect_graph(plan, &mut vertices, &mut predicates)?;

        let mut edges = Vec::new();
        let mut top = Vec::new();
        let mut pushed: Vec<Vec<Expr>> = vec![Vec::new(); vertices.len()];
        for expr in predicates {
            let refs = self.vertices_of(&expr, &vertices);
            match refs.len() {
                0 => top.push(expr),
                1 => {
                    if let Some(v) = refs.first() {
                        pushed[v as usize].push(expr);
                    }
                }
                _ => edges.push(Edge { expr, vertices: refs }),
            }
        }
        for (v, filters) in pushed.into_iter().enumerate() {
            if !filters.is_empty() {
                trace!("  Pushed {} filter(s) onto join vertex {}", filters.len(), v);
                vertices[v] = self.memo.add_expr(RelOp::Filter { filters, child: vertices[v] }).0;
            }
        }

        let limit = self.config.max_dp_tables.min(MAX_DP_RELATIONS);
        let root = if vertices.len() <= limit {
            debug!("Enumerating join graph: relations={}, edges={}, strategy=dp", vertices.len(), edges.len());
            self.enumerate_dp(&vertices, &edges)?
        } else {
            debug!(
                "Enumerating join graph: relations={}, edges={}, strategy=greedy (limit {})",
                vertices.len(),
                edges.len(),
                limit
            );
            self.enumerate_greedy(&vertices, &edges)?
        };

        if top.is_empty() {
            return Ok(root);
        }
        Ok(self.memo.add_expr(RelOp::Filter { filters: top, child: root }).0)
    }

    fn collect_graph(&mut self, plan: &LogicalPlan, vertices: &mut Vec<GroupId>, predicates: &mut Vec<Expr>) -> Result<()> {
        match plan {
            LogicalPlan::Join {
                join_type: JoinType::Inner | JoinType::Cross,
                left,
                right,
                condition,
                ..
            } => {
                self.collect_graph(left, vertices, predicates)?;
                self.collect_graph(right, vertices, predicates)?;
                predicates.extend(conjuncts(condition.as_ref()));
            }
            other => vertices.push(self.build_group(other)?),
        }
        Ok(())
    }

    /// Indices of the vertices whose relations `expr` references.
    fn vertices_of(&self, expr: &Expr, vertices: &[GroupId]) -> FastIntSet {
        let mut out = FastIntSet::new();
        for name in expr.referenced_tables() {
            let Some(rel) = self.memo.relation_id(&name) else {
                continue;
            };
            if let Some(v) = vertices.iter().position(|g| self.memo.group(*g).tables.contains(rel)) {
                out.add(v as u32);
            }
        }
        out
    }

    fn enumerate_dp(&mut self, vertices: &[GroupId], edges: &[Edge]) -> Result<GroupId> {
        let n = vertices.len();
        let full: u64 = (1u64 << n) - 1;
        let mut best: Vec<Option<GroupId>> = vec![None; 1usize << n];
        for (i, g) in vertices.iter().enumerate() {
            best[1usize << i] = Some(*g);
        }

        for size in 2..=n as u32 {
            for set in 1..=full {
                if set.count_ones() != size {
                    continue;
                }
                let mut connected = false;
                for cross in [false, true] {
                    if cross && connected {
                        break;
                    }
                    let mut left = (set - 1) & set;
                    while left > 0 {
                        let right = set ^ left;
                        left = (left - 1) & set;
                        let right_ok = !self.left_deep || right.count_ones() == 1;
                        let (Some(l), Some(r)) = (best[(set ^ right) as usize], best[right as usize]) else {
                            continue;
                        };
                        if !right_ok {
                            continue;
                        }
                        let filter = join_filter(edges, set ^ right, right);
                        if filter.is_empty() != cross {
                            continue;
                        }
                        connected |= !cross;
                        best[set as usize] = Some(self.add_join(JoinType::Inner, l, r, filter, false)?);
                    }
                }
            }
        }

        best[full as usize].ok_or_else(|| OptimizerError::InvalidInput("join graph enumeration produced no plan".to_string()))
    }

    fn enumerate_greedy(&mut self, vertices: &[GroupId], edges: &[Edge]) -> Result<GroupId> {
        let mut comps: Vec<Component> = vertices
            .iter()
            .enumerate()
            .map(|(i, g)| Component {
                vertices: [i as u32].into_iter().collect(),
                group: *g,
            })
            .collect();

        while comps.len() > 1 {
            let mut pick: Option<(usize, usize, f64, Vec<Expr>)> = None;
            for i in 0..comps.len() {
                for j in 0..comps.len() {
                    if i == j || (self.left_deep && comps[j].vertices.len() != 1) {
                        continue;
                    }
                    let filter = edge_filter(edges, &comps[i].vertices, &comps[j].vertices);
                    if filter.is_empty() {
                        continue;
                    }
                    let op = RelOp::logical_join(JoinType::Inner, comps[i].group, comps[j].group, filter.clone());
                    let card = self.memo.estimate_card(&op)?;
                    if pick.as_ref().map_or(true, |(_, _, best, _)| card < *best) {
                        pick = Some((i, j, card, filter));
                    }
                }
            }

            let (i, j, filter) = match pick {
                Some((i, j, card, filter)) => {
                    trace!("  Greedy join of components {} and {}: card={:.1}", i, j, card);
                    (i, j, filter)
                }
                None => {
                    let (i, j) = self.smallest_pair(&comps)?;
                    trace!("  Greedy cross join of components {} and {}", i, j);
                    (i, j, Vec::new())
                }
            };

            let group = self.add_join(JoinType::Inner, comps[i].group, comps[j].group, filter, !self.left_deep)?;
            let vertices = comps[i].vertices.union(&comps[j].vertices);
            let (hi, lo) = if i > j { (i, j) } else { (j, i) };
            comps.remove(hi);
            comps[lo] = Component { vertices, group };
        }

        comps
            .pop()
            .map(|c| c.group)
            .ok_or_else(|| OptimizerError::InvalidInput("empty join graph".to_string()))
    }

    /// The two components with the lowest cardinality, smaller first. In a
    /// left deep search the right one is a single relation.
    fn smallest_pair(&mut self, comps: &[Component]) -> Result<(usize, usize)> {
        let mut cards = Vec::with_capacity(comps.len());
        for c in comps {
            cards.push(self.memo.derive_card(c.group)?);
        }
        let mut order: Vec<usize> = (0..comps.len()).collect();
        order.sort_by(|a, b| cards[*a].total_cmp(&cards[*b]).then(a.cmp(b)));
        if self.left_deep {
            let right = order
                .iter()
                .copied()
                .find(|i| comps[*i].vertices.len() == 1)
                .unwrap_or(order[1]);
            let left = order.iter().copied().find(|i| *i != right).unwrap_or(order[0]);
            return Ok((left, right));
        }
        Ok((order[0], order[1]))
    }

    /// Memoize a join with its physical variants, and the mirrored join when
    /// `commute` is set and the join type allows it.
    fn add_join(&mut self, join_type: JoinType, left: GroupId, right: GroupId, filter: Vec<Expr>, commute: bool) -> Result<GroupId> {
        let (join_type, left, right) = match join_type {
            JoinType::Right => (JoinType::Left, right, left),
            jt => (jt, left, right),
        };
        let group = self.memo.memoize_join(RelOp::logical_join(join_type, left, right, filter.clone()));
        self.add_physical(group, join_type, left, right, &filter)?;
        if commute && join_type.is_commutative() {
            self.memo.memoize_join(RelOp::logical_join(join_type, right, left, filter.clone()));
            self.add_physical(group, join_type, right, left, &filter)?;
        }
        Ok(group)
    }

    fn add_physical(&mut self, group: GroupId, join_type: JoinType, left: GroupId, right: GroupId, filter: &[Expr]) -> Result<()> {
        if join_type == JoinType::Full || filter.is_empty() {
            return Ok(());
        }
        let left_names = self.names(left);
        let right_names = self.names(right);
        let base = |filter: Vec<Expr>| JoinBase {
            join_type,
            left,
            right,
            filter,
        };

        let equi: Vec<(usize, &ColumnRef, &ColumnRef)> = filter
            .iter()
            .enumerate()
            .filter_map(|(i, e)| equi_pair(e, &left_names, &right_names).map(|(l, r)| (i, l, r)))
            .collect();

        if !equi.is_empty() {
            self.memo.add_expr_to_group(group, RelOp::HashJoin(base(filter.to_vec())));
        }

        if !self.config.disable_merge_join && matches!(join_type, JoinType::Inner | JoinType::Left) {
            if let (Some(lt), Some(rt)) = (self.base_table(left), self.base_table(right)) {
                let lt_indexes = lt.indexes()?;
                let rt_indexes = rt.indexes()?;
                let merge_key = equi.iter().find(|(_, l, r)| {
                    lt_indexes.iter().any(|ix| leads_with(ix.as_ref(), &l.name))
                        && rt_indexes.iter().any(|ix| leads_with(ix.as_ref(), &r.name))
                });
                if let Some((pos, _, _)) = merge_key {
                    let mut reordered = vec![filter[*pos].clone()];
                    reordered.extend(filter.iter().enumerate().filter(|(i, _)| i != pos).map(|(_, e)| e.clone()));
                    self.memo.add_expr_to_group(group, RelOp::MergeJoin(base(reordered)));
                }
            }
        }

        if !self.config.enable_lookup_joins {
            return Ok(());
        }
        let Some(table) = self.base_table(right) else {
            return Ok(());
        };
        let indexes = table.indexes()?;

        if let Some(lookup) = best_lookup(&indexes, filter, &left_names, &right_names) {
            trace!("  Lookup join into {} via {}", right, lookup.index.id());
            self.memo.add_expr_to_group(group, RelOp::LookupJoin {
                base: base(filter.to_vec()),
                lookup,
            });
        }

        if join_type == JoinType::Inner {
            if let [Expr::Or(disjuncts)] = filter {
                if let Some(concat) = concat_lookups(&indexes, disjuncts, &left_names, &right_names) {
                    self.memo.add_expr_to_group(group, RelOp::ConcatJoin {
                        base: base(filter.to_vec()),
                        concat,
                    });
                }
            }
        }
        Ok(())
    }

    /// Relation names below a group.
    fn names(&self, group: GroupId) -> Vec<String> {
        self.memo
            .group(group)
            .tables
            .iter()
            .filter_map(|rel| self.memo.relation_name(rel).map(str::to_string))
            .collect()
    }

    /// The table a group reads, looking through one filter.
    fn base_table(&self, group: GroupId) -> Option<Arc<dyn IndexAddressableTable>> {
        let first = *self.memo.group(group).exprs.first()?;
        match &self.memo.expr(first).op {
            RelOp::Filter { child, .. } => self.base_table(*child),
            op => op.source_rel().and_then(|s| s.plan.base_table().cloned()),
        }
    }
}

fn conjuncts(condition: Option<&Expr>) -> Vec<Expr> {
    condition.map_or_else(Vec::new, |c| c.conjuncts().into_iter().cloned().collect())
}

fn mask_contains(mask: u64, vertices: &FastIntSet) -> bool {
    vertices.iter().all(|v| v < 64 && mask & (1u64 << v) != 0)
}

/// Edges joining the vertex masks `left` and `right`.
fn join_filter(edges: &[Edge], left: u64, right: u64) -> Vec<Expr> {
    edges
        .iter()
        .filter(|e| mask_contains(left | right, &e.vertices) && !mask_contains(left, &e.vertices) && !mask_contains(right, &e.vertices))
        .map(|e| e.expr.clone())
        .collect()
}

fn edge_filter(edges: &[Edge], left: &FastIntSet, right: &FastIntSet) -> Vec<Expr> {
    let both = left.union(right);
    edges
        .iter()
        .filter(|e| e.vertices.is_subset_of(&both) && !e.vertices.is_subset_of(left) && !e.vertices.is_subset_of(right))
        .map(|e| e.expr.clone())
        .collect()
}

fn owned_by(column: &ColumnRef, names: &[String]) -> bool {
    column
        .table
        .as_deref()
        .is_some_and(|t| names.iter().any(|n| n.eq_ignore_ascii_case(t)))
}

/// `(left column, right column)` of an equality across the join.
fn equi_pair<'e>(expr: &'e Expr, left: &[String], right: &[String]) -> Option<(&'e ColumnRef, &'e ColumnRef)> {
    let Expr::BinaryOp {
        op: BinaryOp::Eq | BinaryOp::NullSafeEq,
        left: a,
        right: b,
    } = expr
    else {
        return None;
    };
    match (a.as_ref(), b.as_ref()) {
        (Expr::Column(a), Expr::Column(b)) if owned_by(a, left) && owned_by(b, right) => Some((a, b)),
        (Expr::Column(a), Expr::Column(b)) if owned_by(b, left) && owned_by(a, right) => Some((b, a)),
        _ => None,
    }
}

/// For `right.col = <expr over left>`, the right column and the key.
fn lookup_key<'e>(expr: &'e Expr, left: &[String], right: &[String]) -> Option<(&'e ColumnRef, &'e Expr)> {
    let Expr::BinaryOp {
        op: BinaryOp::Eq | BinaryOp::NullSafeEq,
        left: a,
        right: b,
    } = expr
    else {
        return None;
    };
    let over_left = |e: &Expr| e.referenced_tables().iter().all(|t| left.iter().any(|n| n.eq_ignore_ascii_case(t)));
    match (a.as_ref(), b.as_ref()) {
        (Expr::Column(c), key) if owned_by(c, right) && over_left(key) => Some((c, key)),
        (key, Expr::Column(c)) if owned_by(c, right) && over_left(key) => Some((c, key)),
        _ => None,
    }
}

fn column_name(expression: &str) -> &str {
    expression.rsplit('.').next().unwrap_or(expression)
}

fn leads_with(index: &dyn Index, column: &str) -> bool {
    index
        .expressions()
        .first()
        .is_some_and(|e| column_name(e).eq_ignore_ascii_case(column))
}

/// The index whose longest leading column prefix is bound by equalities.
fn best_lookup(indexes: &[Arc<dyn Index>], filter: &[Expr], left: &[String], right: &[String]) -> Option<Lookup> {
    let keys: Vec<(&ColumnRef, &Expr)> = filter.iter().filter_map(|e| lookup_key(e, left, right)).collect();
    let mut best: Option<Lookup> = None;
    for index in indexes.iter().filter(|ix| !ix.is_spatial() && !ix.is_fulltext()) {
        let mut key_exprs = Vec::new();
        let mut nullmask = Vec::new();
        for expression in index.expressions() {
            let Some((column, key)) = keys
                .iter()
                .find(|(c, _)| c.name.eq_ignore_ascii_case(column_name(expression)))
            else {
                break;
            };
            key_exprs.push((*key).clone());
            nullmask.push(column.nullable);
        }
        if key_exprs.is_empty() || best.as_ref().is_some_and(|b| b.key_exprs.len() >= key_exprs.len()) {
            continue;
        }
        best = Some(Lookup {
            index: index.clone(),
            key_exprs,
            nullmask,
        });
    }
    best
}

/// One lookup per disjunct, or `None` when some disjunct has no index.
fn concat_lookups(indexes: &[Arc<dyn Index>], disjuncts: &[Expr], left: &[String], right: &[String]) -> Option<Vec<Lookup>> {
    disjuncts
        .iter()
        .map(|d| {
            let (column, key) = lookup_key(d, left, right)?;
            let index = indexes
                .iter()
                .find(|ix| !ix.is_spatial() && !ix.is_fulltext() && leads_with(ix.as_ref(), &column.name))?;
            Some(Lookup {
                index: index.clone(),
                key_exprs: vec![key.clone()],
                nullmask: vec![column.nullable],
            })
        })
        .collect()
}
