//! Join order and ORDER BY solver
//!
//! A beam search over join orders. Generation N holds the best few paths
//! that visit N tables; each path in a generation is extended by every
//! candidate loop whose prerequisites it already covers. Paths that reach
//! the same set of tables with the same "ordered or not" outcome compete
//! directly, and only the cheapest survives.
//!
//! While extending paths the solver works out how many leading ORDER BY
//! terms the loops deliver in order, charging a sort for the rest.

use crate::config::PlannerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{Expr, OrderingTerm, SrcList, ROWID_COLUMN};
use crate::schema::DEFAULT_COLLATION;
use crate::util::{est_log, log_est, log_est_add, LogEst};

use super::where_clause::{DistinctKind, WhereFlags};
use super::where_expr::{find_term, ClauseChain, OperatorMask};
use super::where_loop::{WhereLoop, WsFlags};
use super::where_mask::{Bitmask, MaskSet, BMS};

/// A partial join order
#[derive(Debug, Clone, Default)]
struct WherePath {
    /// Tables visited so far
    mask_loop: Bitmask,
    /// Levels that must run in reverse, by level number
    rev_loop: Bitmask,
    n_row: LogEst,
    cost: LogEst,
    /// Cost without the sorting penalty
    unsorted: LogEst,
    /// Leading ORDER BY terms delivered in order; -1 while unknown
    is_ordered: i8,
    /// Positions in the candidate list, outermost first
    loops: Vec<usize>,
}

/// The solver's answer
#[derive(Debug, Clone, Default)]
pub struct Solution {
    /// Chosen loop per level, outermost first, as positions in the
    /// candidate list
    pub loops: Vec<usize>,
    /// Estimated rows produced by the whole join
    pub n_row_out: LogEst,
    /// Leading ORDER BY terms the loops deliver in order
    pub n_ob_sat: i8,
    /// Levels to run in reverse, by level number
    pub rev_mask: Bitmask,
    /// ORDER BY holds within each run of the innermost loop
    pub ordered_inner_loop: bool,
    /// GROUP BY order also satisfies ORDER BY
    pub sorted: bool,
    pub distinct: DistinctKind,
}

/// Collating sequence of an expression, defaulting to BINARY
/// (sqlite3ExprNNCollSeq). A comparison takes an explicit COLLATE from
/// either operand and nothing else.
pub(super) fn nn_collation(e: &Expr) -> &str {
    let coll = match e {
        Expr::Binary { op, left, right } if op.is_comparison() => {
            if left.has_explicit_collation() {
                left.collation()
            } else if right.has_explicit_collation() {
                right.collation()
            } else {
                None
            }
        }
        _ => e.collation(),
    };
    coll.unwrap_or(DEFAULT_COLLATION)
}

/// Sorting cost for `n_row` rows of which the first `n_sorted` ORDER BY
/// terms are already in order: about 3*N*log(N), scaled by the share of
/// terms still out of order
pub fn sorting_cost(n_row: LogEst, n_order_by: usize, n_sorted: usize, limit: Option<LogEst>) -> LogEst {
    let unsorted = n_order_by.saturating_sub(n_sorted) as u64;
    let scale = log_est(unsorted * 100 / n_order_by.max(1) as u64) - 66;
    let mut cost = n_row + scale + 16;
    let n_out = match limit {
        Some(l) if l < n_row => l,
        _ => n_row,
    };
    cost += est_log(n_out);
    cost
}

/// Everything the solver reads
pub struct PathSolver<'a> {
    pub config: &'a PlannerConfig,
    pub src: &'a SrcList,
    pub mask_set: &'a MaskSet,
    pub chain: &'a ClauseChain<'a>,
    pub loops: &'a [WhereLoop],
    pub order_by: Option<&'a [OrderingTerm]>,
    pub result_set: Option<&'a [Expr]>,
    pub wctrl: WhereFlags,
    /// Number of join levels to plan
    pub n_level: usize,
    /// Row limit credited when USE_LIMIT is set
    pub limit: Option<LogEst>,
    /// Times the statement is expected to run
    pub query_loop: LogEst,
    pub distinct: DistinctKind,
}

impl<'a> PathSolver<'a> {
    /// Find the cheapest join order. With `n_row_est` zero the ORDER BY is
    /// ignored; the caller uses that first run to estimate the output size
    /// and then solves again with the estimate.
    pub fn solve(&self, n_row_est: LogEst) -> Result<Solution> {
        let n_loop = self.n_level;
        let mx_choice = self.config.beam_width(n_loop);
        let n_order_by = match self.order_by {
            Some(ob) if n_row_est != 0 => ob.len(),
            _ => 0,
        };
        let limit = if self.wctrl.contains(WhereFlags::USE_LIMIT) {
            self.limit
        } else {
            None
        };
        let mut sort_costs: Vec<LogEst> = vec![0; n_order_by];

        // Paying back an automatic index needs more than 28 rows
        let mut from = vec![WherePath {
            n_row: self.query_loop.min(48),
            is_ordered: if n_order_by == 0 {
                0
            } else if n_loop > 0 {
                -1
            } else {
                n_order_by as i8
            },
            ..WherePath::default()
        }];

        for i_loop in 0..n_loop {
            let mut to: Vec<WherePath> = Vec::with_capacity(mx_choice);
            let mut mx_i = 0;
            let mut mx_cost: LogEst = 0;
            let mut mx_unsorted: LogEst = 0;
            for p_from in &from {
                for (li, lp) in self.loops.iter().enumerate() {
                    if lp.prereq & !p_from.mask_loop != 0 || lp.mask_self & p_from.mask_loop != 0 {
                        continue;
                    }
                    if lp.flags.contains(WsFlags::AUTO_INDEX) && p_from.n_row < 3 {
                        continue;
                    }

                    let mut unsorted = log_est_add(lp.setup, lp.run + p_from.n_row);
                    unsorted = log_est_add(unsorted, p_from.unsorted);
                    let n_out = p_from.n_row + lp.n_out;
                    let mask_new = p_from.mask_loop | lp.mask_self;
                    let mut rev_mask: Bitmask = 0;
                    let mut is_ordered = p_from.is_ordered;
                    if is_ordered < 0 {
                        if let Some(ob) = self.order_by {
                            is_ordered = self.satisfies_order_by(ob, &p_from.loops, self.wctrl, lp, &mut rev_mask);
                        }
                    } else {
                        rev_mask = p_from.rev_loop;
                    }
                    let cost = if is_ordered >= 0 && (is_ordered as usize) < n_order_by {
                        let k = is_ordered as usize;
                        if sort_costs[k] == 0 {
                            sort_costs[k] = sorting_cost(n_row_est, n_order_by, k, limit);
                        }
                        // A small extra penalty keeps ties on the sorted side
                        log_est_add(unsorted, sort_costs[k]) + 5
                    } else {
                        let c = unsorted;
                        unsorted -= 2;
                        c
                    };

                    // Compete with a path over the same tables and the same
                    // ordering outcome, if there is one
                    let same = to
                        .iter()
                        .position(|p| p.mask_loop == mask_new && (p.is_ordered < 0) == (is_ordered < 0));
                    let slot = match same {
                        None => {
                            if to.len() >= mx_choice
                                && (cost > mx_cost || (cost == mx_cost && unsorted >= mx_unsorted))
                            {
                                continue;
                            }
                            if to.len() < mx_choice {
                                to.push(WherePath::default());
                                to.len() - 1
                            } else {
                                mx_i
                            }
                        }
                        Some(j) => {
                            let p = &to[j];
                            if p.cost < cost
                                || (p.cost == cost
                                    && (p.n_row < n_out || (p.n_row == n_out && p.unsorted <= unsorted)))
                            {
                                continue;
                            }
                            j
                        }
                    };

                    let mut loops = Vec::with_capacity(i_loop + 1);
                    loops.extend_from_slice(&p_from.loops);
                    loops.push(li);
                    to[slot] = WherePath {
                        mask_loop: mask_new,
                        rev_loop: rev_mask,
                        n_row: n_out,
                        cost,
                        unsorted,
                        is_ordered,
                        loops,
                    };
                    if self.config.trace {
                        tracing::trace!(
                            level = i_loop,
                            mask = mask_new,
                            cost,
                            n_row = n_out,
                            ordered = is_ordered,
                            "where.solver.path"
                        );
                    }
                    if to.len() >= mx_choice {
                        mx_i = 0;
                        mx_cost = to[0].cost;
                        mx_unsorted = to[0].unsorted;
                        for (j, p) in to.iter().enumerate().skip(1) {
                            if p.cost > mx_cost || (p.cost == mx_cost && p.unsorted > mx_unsorted) {
                                mx_cost = p.cost;
                                mx_unsorted = p.unsorted;
                                mx_i = j;
                            }
                        }
                    }
                }
            }
            tracing::debug!(level = i_loop, n_path = to.len(), "where.solver.generation");
            from = to;
        }

        let best = from
            .iter()
            .reduce(|best, p| if best.cost > p.cost { p } else { best })
            .ok_or_else(|| Error::with_message(ErrorCode::Error, "no query solution"))?;

        let mut sol = Solution {
            loops: best.loops.clone(),
            n_row_out: best.n_row,
            distinct: self.distinct,
            ..Solution::default()
        };

        if self.wctrl.contains(WhereFlags::WANT_DISTINCT)
            && !self.wctrl.contains(WhereFlags::DISTINCTBY)
            && sol.distinct == DistinctKind::Noop
            && n_row_est != 0
            && n_loop > 0
        {
            if let Some(rs) = self.result_set {
                let terms: Vec<OrderingTerm> = rs.iter().cloned().map(OrderingTerm::asc).collect();
                let mut unused = 0;
                let last = &self.loops[best.loops[n_loop - 1]];
                let n = self.satisfies_order_by(
                    &terms,
                    &best.loops[..n_loop - 1],
                    WhereFlags::DISTINCTBY,
                    last,
                    &mut unused,
                );
                if n as usize == terms.len() {
                    sol.distinct = DistinctKind::Ordered;
                }
            }
        }

        if let Some(ob) = self.order_by {
            if self.wctrl.contains(WhereFlags::DISTINCTBY) {
                if best.is_ordered as usize == ob.len() && best.is_ordered >= 0 {
                    sol.distinct = DistinctKind::Ordered;
                }
            } else {
                sol.n_ob_sat = best.is_ordered;
                sol.rev_mask = best.rev_loop;
                if sol.n_ob_sat <= 0 {
                    sol.n_ob_sat = 0;
                    if n_loop > 0 {
                        let last = &self.loops[best.loops[n_loop - 1]];
                        if !last.flags.contains(WsFlags::ONEROW)
                            && !last.flags.contains(WsFlags::IPK | WsFlags::COLUMN_IN)
                        {
                            let mut m = 0;
                            let n = self.satisfies_order_by(
                                ob,
                                &best.loops[..n_loop - 1],
                                WhereFlags::ORDERBY_LIMIT,
                                last,
                                &mut m,
                            );
                            if n as usize == ob.len() {
                                sol.ordered_inner_loop = true;
                                sol.rev_mask = m;
                            }
                        }
                    }
                }
            }
            if self.wctrl.contains(WhereFlags::SORTBYGROUP)
                && sol.n_ob_sat as usize == ob.len()
                && n_loop > 0
            {
                let mut rev_mask = 0;
                let last = &self.loops[best.loops[n_loop - 1]];
                let n = self.satisfies_order_by(
                    ob,
                    &best.loops[..n_loop - 1],
                    WhereFlags::empty(),
                    last,
                    &mut rev_mask,
                );
                if n as usize == ob.len() {
                    sol.sorted = true;
                    sol.rev_mask = rev_mask;
                }
            }
        }

        tracing::debug!(
            n_row_est,
            cost = best.cost,
            n_row_out = sol.n_row_out,
            n_ob_sat = sol.n_ob_sat,
            "where.solver.done"
        );
        Ok(sol)
    }

    /// How many leading terms of `order_by` the loops `path` followed by
    /// `last` deliver in order. Returns the count when the prefix is
    /// settled, or -1 if later loops might still satisfy more terms.
    /// Levels that must run backwards are added to `rev_mask`.
    pub(super) fn satisfies_order_by(
        &self,
        order_by: &[OrderingTerm],
        path: &[usize],
        wctrl: WhereFlags,
        last: &WhereLoop,
        rev_mask: &mut Bitmask,
    ) -> i8 {
        let n_loop = path.len();
        if n_loop > 0 && !self.config.order_by_idx_join {
            return 0;
        }
        let n_order_by = order_by.len();
        if n_order_by > BMS - 1 {
            return 0;
        }
        let ob_done: Bitmask = (1 << n_order_by) - 1;
        let mut ob_sat: Bitmask = 0;
        let mut is_order_distinct = true;
        let mut order_distinct_mask: Bitmask = 0;
        let mut ready: Bitmask = 0;
        let mut eq_op_mask = OperatorMask::EQ | OperatorMask::IS | OperatorMask::ISNULL;
        if wctrl.contains(WhereFlags::ORDERBY_LIMIT) {
            eq_op_mask |= OperatorMask::IN;
        }

        let mut prev: Option<&WhereLoop> = None;
        let mut i_loop = 0;
        while is_order_distinct && ob_sat < ob_done && i_loop <= n_loop {
            if let Some(p) = prev {
                ready |= p.mask_self;
            }
            let lp: &WhereLoop = if i_loop < n_loop {
                let lp = &self.loops[path[i_loop]];
                if wctrl.contains(WhereFlags::ORDERBY_LIMIT) {
                    prev = Some(lp);
                    i_loop += 1;
                    continue;
                }
                lp
            } else {
                last
            };
            prev = Some(lp);

            if lp.flags.contains(WsFlags::VIRTUALTABLE) {
                if lp.vtab().map_or(false, |v| v.is_ordered != 0) {
                    ob_sat = ob_done;
                }
                break;
            } else if wctrl.contains(WhereFlags::DISTINCTBY) {
                if let Some(b) = lp.btree() {
                    b.n_distinct_col.set(0);
                }
            }
            let item = &self.src.items[lp.tab];
            let cur = item.cursor;
            let table = &item.table;

            // ORDER BY terms pinned by an equality against outer loops or
            // constants come out in order trivially
            for (i, t) in order_by.iter().enumerate() {
                if ob_sat & (1 << i) != 0 {
                    continue;
                }
                let Expr::Column(c) = t.expr.skip_collate_and_likely() else {
                    continue;
                };
                if c.cursor != cur {
                    continue;
                }
                let Some(r) = find_term(self.chain, cur, c.column, !ready, eq_op_mask, None) else {
                    continue;
                };
                let Some(term) = self.chain.term(r) else {
                    continue;
                };
                if term.op == OperatorMask::IN && !lp.uses_term(r) {
                    continue;
                }
                if term.op.intersects(OperatorMask::EQ | OperatorMask::IS)
                    && c.column >= 0
                    && !nn_collation(&t.expr).eq_ignore_ascii_case(nn_collation(&term.expr))
                {
                    continue;
                }
                ob_sat |= 1 << i;
            }

            if !lp.flags.contains(WsFlags::ONEROW) {
                let index = if lp.flags.contains(WsFlags::IPK) {
                    None
                } else {
                    match lp.index() {
                        Some(ix) if !ix.is_unordered() => Some(ix.as_ref()),
                        _ => return 0,
                    }
                };
                let (n_key_col, n_column) = match index {
                    Some(ix) => {
                        is_order_distinct = ix.is_unique() && !lp.flags.contains(WsFlags::SKIPSCAN);
                        (ix.n_key_col(), ix.n_column())
                    }
                    None => (0, 1),
                };
                let n_eq = lp.n_eq();

                let mut rev = false;
                let mut rev_set = false;
                let mut distinct_columns = false;
                for j in 0..n_column {
                    let mut once = true;
                    if j < n_eq && j >= lp.n_skip as usize {
                        let Some(term) = lp.terms.get(j).copied().flatten().and_then(|r| self.chain.term(r)) else {
                            break;
                        };
                        let e_op = term.op;
                        if e_op.intersects(eq_op_mask) {
                            if e_op.intersects(OperatorMask::ISNULL | OperatorMask::IS) {
                                is_order_distinct = false;
                            }
                            continue;
                        } else if e_op.contains(OperatorMask::IN) {
                            // A multi-column IN from one subquery can't order
                            // any of its columns
                            for k in j + 1..n_eq {
                                let same = lp
                                    .terms
                                    .get(k)
                                    .copied()
                                    .flatten()
                                    .and_then(|r| self.chain.term(r))
                                    .map_or(false, |t| t.expr == term.expr);
                                if same {
                                    once = false;
                                    break;
                                }
                            }
                        }
                    }

                    let (column, rev_idx) = match index {
                        Some(ix) => (table.normalize_column(ix.column_at(j)), ix.sort_order_at(j).is_desc()),
                        None => (ROWID_COLUMN, false),
                    };

                    // A nullable unconstrained column breaks distinctness
                    if is_order_distinct && column >= 0 && j >= n_eq && !table.column_not_null(column) {
                        is_order_distinct = false;
                    }

                    let mut matched: Option<usize> = None;
                    let mut i = 0;
                    while once && i < n_order_by {
                        let t = &order_by[i];
                        if ob_sat & (1 << i) != 0 {
                            i += 1;
                            continue;
                        }
                        let ob_expr = t.expr.skip_collate_and_likely();
                        if !wctrl.intersects(WhereFlags::GROUPBY | WhereFlags::DISTINCTBY) {
                            once = false;
                        }
                        if column >= ROWID_COLUMN {
                            match ob_expr {
                                Expr::Column(c) if c.cursor == cur && c.column == column => {}
                                _ => {
                                    i += 1;
                                    continue;
                                }
                            }
                        } else {
                            let pattern = index.and_then(|ix| ix.columns.get(j)).and_then(|c| c.expr.as_ref());
                            if !pattern.map_or(false, |p| ob_expr.matches_pattern(p, cur)) {
                                i += 1;
                                continue;
                            }
                        }
                        if column != ROWID_COLUMN {
                            let coll = index.map_or(DEFAULT_COLLATION, |ix| ix.collation_at(j));
                            if !nn_collation(&t.expr).eq_ignore_ascii_case(coll) {
                                i += 1;
                                continue;
                            }
                        }
                        if wctrl.contains(WhereFlags::DISTINCTBY) {
                            if let Some(b) = lp.btree() {
                                b.n_distinct_col.set(j as u16 + 1);
                            }
                        }
                        matched = Some(i);
                        break;
                    }

                    if let Some(i) = matched {
                        if !wctrl.contains(WhereFlags::GROUPBY) {
                            let desc = order_by[i].order.is_desc();
                            if rev_set {
                                if (rev ^ rev_idx) != desc {
                                    matched = None;
                                }
                            } else {
                                rev = rev_idx ^ desc;
                                if rev {
                                    *rev_mask |= 1 << i_loop;
                                }
                                rev_set = true;
                            }
                        }
                    }
                    match matched {
                        Some(i) => {
                            if column == ROWID_COLUMN {
                                distinct_columns = true;
                            }
                            ob_sat |= 1 << i;
                        }
                        None => {
                            if j == 0 || j < n_key_col {
                                is_order_distinct = false;
                            }
                            break;
                        }
                    }
                }
                if distinct_columns {
                    is_order_distinct = true;
                }
            }

            // Once this loop is order-distinct, any remaining term that only
            // reads order-distinct tables is in order too
            if is_order_distinct {
                order_distinct_mask |= lp.mask_self;
                for (i, t) in order_by.iter().enumerate() {
                    if ob_sat & (1 << i) != 0 {
                        continue;
                    }
                    let m_term = self.mask_set.expr_usage(&t.expr);
                    if m_term == 0 && !t.expr.is_constant() {
                        continue;
                    }
                    if m_term & !order_distinct_mask == 0 {
                        ob_sat |= 1 << i;
                    }
                }
            }
            i_loop += 1;
        }

        if ob_sat == ob_done {
            return n_order_by as i8;
        }
        if !is_order_distinct {
            for i in (1..n_order_by).rev() {
                let m: Bitmask = (1 << i) - 1;
                if ob_sat & m == m {
                    return i as i8;
                }
            }
            return 0;
        }
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::executor::where_expr::{AnalyzeContext, WhereClause};
    use crate::executor::where_loop::LoopBuilder;
    use crate::parser::ast::{BinaryOp, SrcItem};
    use crate::schema::{Column, Index, Table};

    struct Fixture {
        src: SrcList,
        mask_set: MaskSet,
        config: PlannerConfig,
    }

    impl Fixture {
        fn new(tables: Vec<Table>) -> Self {
            let items = tables
                .into_iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut item = SrcItem::new(Arc::new(t), i as i32);
                    item.col_used = (1 << item.table.columns.len()) - 1;
                    item
                })
                .collect();
            let src = SrcList::new(items);
            let mut mask_set = MaskSet::new();
            for item in &src.items {
                mask_set.bit_for(item.cursor);
            }
            Fixture {
                src,
                mask_set,
                config: PlannerConfig::default(),
            }
        }

        fn table(&self, i: usize) -> &Table {
            &self.src.items[i].table
        }

        fn analyze(&self, expr: Option<&Expr>) -> WhereClause {
            let mut wc = WhereClause::new(BinaryOp::And);
            if let Some(e) = expr {
                wc.split(e);
            }
            let ctx = AnalyzeContext {
                mask_set: &self.mask_set,
                src: &self.src,
                config: &self.config,
            };
            wc.analyze_all(&ctx).unwrap();
            wc
        }

        /// Generate candidates and solve the way the planner does
        fn plan(&self, wc: &WhereClause, order_by: Option<&[OrderingTerm]>) -> (Vec<WhereLoop>, Solution) {
            let chain = ClauseChain::new(wc);
            let mut b = LoopBuilder::new(
                &self.config,
                &self.src,
                &self.mask_set,
                &chain,
                order_by,
                WhereFlags::empty(),
            );
            b.add_all(self.src.len()).unwrap();
            let loops = b.into_loops();
            let sol = {
                let solver = self.solver(&chain, &loops, order_by);
                let first = solver.solve(0).unwrap();
                if order_by.is_some() {
                    solver.solve(first.n_row_out + 1).unwrap()
                } else {
                    first
                }
            };
            (loops, sol)
        }

        fn solver<'a>(
            &'a self,
            chain: &'a ClauseChain<'a>,
            loops: &'a [WhereLoop],
            order_by: Option<&'a [OrderingTerm]>,
        ) -> PathSolver<'a> {
            PathSolver {
                config: &self.config,
                src: &self.src,
                mask_set: &self.mask_set,
                chain,
                loops,
                order_by,
                result_set: None,
                wctrl: WhereFlags::empty(),
                n_level: self.src.len(),
                limit: None,
                query_loop: 0,
                distinct: DistinctKind::Noop,
            }
        }
    }

    fn abc(name: &str) -> Table {
        let mut t = Table::new(name);
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "INTEGER"));
        t.add_column(Column::new("c", "TEXT"));
        t
    }

    #[test]
    fn test_join_uses_index_on_inner_table() {
        let t1 = abc("t1");
        let mut t2 = abc("t2");
        t2.add_index(Index::new("t2b", "t2").with_column(1));
        let f = Fixture::new(vec![t1, t2]);
        let e = Expr::eq(Expr::column(1, f.table(1), 1), Expr::column(0, f.table(0), 0));
        let wc = f.analyze(Some(&e));
        let (loops, sol) = f.plan(&wc, None);
        let order: Vec<usize> = sol.loops.iter().map(|&i| loops[i].tab).collect();
        assert_eq!(order, vec![0, 1]);
        let inner = &loops[sol.loops[1]];
        assert_eq!(inner.index().map(|i| i.name.as_str()), Some("t2b"));
        // Every level's prerequisites are bound by the levels before it
        let mut bound = 0;
        for &i in &sol.loops {
            assert_eq!(loops[i].prereq & !bound, 0);
            bound |= loops[i].mask_self;
        }
    }

    #[test]
    fn test_order_by_satisfied_by_index() {
        let mut t = abc("t");
        t.add_index(Index::new("ib", "t").with_column(1));
        let f = Fixture::new(vec![t]);
        let ob = vec![OrderingTerm::asc(Expr::column(0, f.table(0), 1))];
        let wc = f.analyze(None);
        let (loops, sol) = f.plan(&wc, Some(&ob));
        assert_eq!(sol.n_ob_sat, 1);
        assert_eq!(sol.rev_mask, 0);
        assert_eq!(loops[sol.loops[0]].index().map(|i| i.name.as_str()), Some("ib"));
    }

    #[test]
    fn test_descending_order_by_reverses_scan() {
        let mut t = abc("t");
        t.add_index(Index::new("ib", "t").with_column(1));
        let f = Fixture::new(vec![t]);
        let ob = vec![OrderingTerm::desc(Expr::column(0, f.table(0), 1))];
        let wc = f.analyze(None);
        let (_, sol) = f.plan(&wc, Some(&ob));
        assert_eq!(sol.n_ob_sat, 1);
        assert_eq!(sol.rev_mask, 1);
    }

    #[test]
    fn test_skip_scan_on_unique_index_is_not_order_distinct() {
        let mut t = abc("t");
        let stats = crate::schema::parse_stat1("10000 1000 1").unwrap();
        t.add_index(
            Index::new("uab", "t")
                .with_column(0)
                .with_column(1)
                .unique()
                .with_stats(stats),
        );
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let ob = vec![
            OrderingTerm::asc(Expr::column(0, tab, 0)),
            OrderingTerm::asc(Expr::column(0, tab, 2)),
        ];
        let wc = f.analyze(Some(&Expr::eq(Expr::column(0, tab, 1), Expr::int(4))));
        let (loops, sol) = f.plan(&wc, Some(&ob));
        let lp = &loops[sol.loops[0]];
        assert!(lp.flags.contains(WsFlags::SKIPSCAN));
        assert_eq!(sol.n_ob_sat, 1);
    }

    #[test]
    fn test_rowid_order_needs_no_sort() {
        let f = Fixture::new(vec![abc("t")]);
        let ob = vec![OrderingTerm::asc(Expr::rowid(0, f.table(0)))];
        let wc = f.analyze(None);
        let (loops, sol) = f.plan(&wc, Some(&ob));
        assert_eq!(sol.n_ob_sat, 1);
        assert!(loops[sol.loops[0]].flags.contains(WsFlags::IPK));
    }

    #[test]
    fn test_equality_pins_order_by_column() {
        let mut t = abc("t");
        t.add_index(Index::new("iab", "t").with_column(0).with_column(1));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let ob = vec![
            OrderingTerm::asc(Expr::column(0, tab, 0)),
            OrderingTerm::asc(Expr::column(0, tab, 1)),
        ];
        let wc = f.analyze(Some(&Expr::eq(Expr::column(0, tab, 0), Expr::int(1))));
        let (_, sol) = f.plan(&wc, Some(&ob));
        assert_eq!(sol.n_ob_sat, 2);
    }

    #[test]
    fn test_unsatisfiable_prerequisites() {
        let f = Fixture::new(vec![abc("t1"), abc("t2")]);
        let wc = f.analyze(None);
        let chain = ClauseChain::new(&wc);
        let mut a = WhereLoop::new(0, 1);
        a.prereq = 2;
        let mut b = WhereLoop::new(1, 2);
        b.prereq = 1;
        let loops = vec![a, b];
        let err = f.solver(&chain, &loops, None).solve(0).unwrap_err();
        assert_eq!(err.to_string(), "no query solution");
    }

    #[test]
    fn test_auto_index_skipped_for_single_pass() {
        let f = Fixture::new(vec![abc("t")]);
        let wc = f.analyze(None);
        let chain = ClauseChain::new(&wc);
        let mut auto = WhereLoop::new(0, 1);
        auto.flags = WsFlags::AUTO_INDEX;
        auto.run = 10;
        auto.n_out = 10;
        let mut scan = WhereLoop::new(0, 1);
        scan.flags = WsFlags::IPK;
        scan.run = 216;
        scan.n_out = 200;
        let loops = vec![auto, scan];
        let sol = f.solver(&chain, &loops, None).solve(0).unwrap();
        assert_eq!(sol.loops, vec![1]);
        assert_eq!(sol.n_row_out, 200);
    }

    #[test]
    fn test_cheapest_order_wins() {
        let f = Fixture::new(vec![abc("t1"), abc("t2")]);
        let wc = f.analyze(None);
        let chain = ClauseChain::new(&wc);
        let mut big = WhereLoop::new(0, 1);
        big.run = 200;
        big.n_out = 200;
        let mut small = WhereLoop::new(1, 2);
        small.run = 20;
        small.n_out = 20;
        let loops = vec![big, small];
        let sol = f.solver(&chain, &loops, None).solve(0).unwrap();
        assert_eq!(sol.loops, vec![1, 0]);
        assert_eq!(sol.n_row_out, 220);
    }

    #[test]
    fn test_sorting_cost() {
        // Fully unsorted: N + 16 + log(N)
        assert_eq!(sorting_cost(100, 2, 0, None), 100 + 16 + est_log(100));
        // Half sorted costs half as much
        assert_eq!(sorting_cost(100, 2, 1, None), 100 - 10 + 16 + est_log(100));
        // A small limit shrinks the log(N) factor
        assert!(sorting_cost(100, 1, 0, Some(10)) < sorting_cost(100, 1, 0, None));
    }
}
