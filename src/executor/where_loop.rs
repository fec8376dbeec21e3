//! Candidate loop generation
//!
//! For every table in the join this module proposes `WhereLoop`s: full
//! scans, rowid lookups, index scans over every usable prefix of every
//! index (with an optional trailing range and skip-scan), automatic
//! indexes, OR-unions of index scans, and virtual table plans (see
//! `where_vtab`). Each loop carries a setup cost, a per-iteration cost and
//! an output row estimate, all as LogEst values.
//!
//! Loops that are dominated by another loop on the same table with the
//! same sort index are discarded as they arrive, so the list handed to the
//! solver only holds plausible candidates.

use std::cell::Cell;
use std::sync::Arc;

use bitflags::bitflags;

use crate::config::PlannerConfig;
use crate::error::Result;
use crate::parser::ast::{
    BinaryOp, Expr, InList, IndexedBy, Literal, OrderingTerm, SrcItem, SrcList, UnaryOp,
    EXPR_COLUMN, ROWID_COLUMN,
};
use crate::schema::{Affinity, Index, IndexColumn, Table};
use crate::util::{est_log, log_est, log_est_add, LogEst};
use crate::vdbe::comparison_collation;

use super::where_clause::WhereFlags;
use super::where_expr::{
    comparison_affinity, index_affinity_ok, ClauseChain, OperatorMask, TermFlags, TermRef,
    WhereClause, WhereScan, WhereTerm,
};
use super::where_mask::{Bitmask, MaskSet};
use super::where_stat::{
    equal_scan_est, has_usable_samples, in_scan_est, range_scan_est, ProbeRecord, RangeEstimate,
};

/// Extra candidates allowed per table on top of the configured budget
const PLAN_LIMIT_INCR: i32 = 1000;

/// Number of (prereq, cost) pairs an OR-union remembers per disjunct
const N_OR_COST: usize = 3;

// ============================================================================
// Loop flags
// ============================================================================

bitflags! {
    /// How a loop accesses its table (WHERE_* in the engine)
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct WsFlags: u32 {
        /// x=EXPR
        const COLUMN_EQ = 0x0000_0001;
        /// x<EXPR and/or x>EXPR
        const COLUMN_RANGE = 0x0000_0002;
        /// x IN (...)
        const COLUMN_IN = 0x0000_0004;
        /// x IS NULL
        const COLUMN_NULL = 0x0000_0008;
        const CONSTRAINT = 0x0000_000f;
        /// x<EXPR or x<=EXPR
        const TOP_LIMIT = 0x0000_0010;
        /// x>EXPR or x>=EXPR
        const BTM_LIMIT = 0x0000_0020;
        const BOTH_LIMIT = 0x0000_0030;
        /// Use the index only, never the table
        const IDX_ONLY = 0x0000_0040;
        /// The rowid is used for lookups
        const IPK = 0x0000_0100;
        /// An index is used
        const INDEXED = 0x0000_0200;
        const VIRTUALTABLE = 0x0000_0400;
        /// Usable with IN operator
        const IN_ABLE = 0x0000_0800;
        /// Selects no more than one row
        const ONEROW = 0x0000_1000;
        /// OR-union of index scans
        const MULTI_OR = 0x0000_2000;
        /// Uses an ephemeral index
        const AUTO_INDEX = 0x0000_4000;
        const SKIPSCAN = 0x0000_8000;
        /// Would be one-row if the index were declared UNIQUE
        const UNQ_WANTED = 0x0001_0000;
        /// Partial index
        const PARTIALIDX = 0x0002_0000;
        /// IN sub-loop can exit early
        const IN_EARLYOUT = 0x0004_0000;
    }
}

// ============================================================================
// WhereLoop
// ============================================================================

/// Payload of a loop over a b-tree
#[derive(Debug, Clone, Default)]
pub struct BtreeLoop {
    /// Number of equality constraints
    pub n_eq: u16,
    /// Size of the lower bound vector
    pub n_btm: u16,
    /// Size of the upper bound vector
    pub n_top: u16,
    /// Leading index columns that are distinct in a DISTINCT scan
    pub n_distinct_col: Cell<u16>,
    /// Index used; None for rowid loops and automatic indexes
    pub index: Option<Arc<Index>>,
}

/// Payload of a virtual table loop
#[derive(Debug, Clone, Default)]
pub struct VtabLoop {
    /// Plan number chosen by best_index
    pub idx_num: i32,
    /// Plan string chosen by best_index
    pub idx_str: Option<String>,
    /// ORDER BY terms the table promises to deliver in order, or 0
    pub is_ordered: i8,
    /// Terms the table fully handles, by argument position
    pub omit_mask: u16,
}

#[derive(Debug, Clone)]
pub enum LoopKind {
    Btree(BtreeLoop),
    Vtab(VtabLoop),
}

/// One candidate access path for one table
#[derive(Debug, Clone)]
pub struct WhereLoop {
    /// Tables that must be bound before this loop can run
    pub prereq: Bitmask,
    /// This table
    pub mask_self: Bitmask,
    /// Position of the table in the FROM clause
    pub tab: usize,
    /// Sorting index number; 0 means the loop cannot help ORDER BY
    pub sort_idx: u8,
    /// One-time setup cost (building an automatic index)
    pub setup: LogEst,
    /// Cost of running the loop once
    pub run: LogEst,
    /// Rows produced per run
    pub n_out: LogEst,
    pub flags: WsFlags,
    /// Leading index columns skipped by a skip-scan
    pub n_skip: u16,
    /// Terms driving the loop; None marks a skipped column
    pub terms: Vec<Option<TermRef>>,
    pub kind: LoopKind,
}

impl WhereLoop {
    pub fn new(tab: usize, mask_self: Bitmask) -> Self {
        WhereLoop {
            prereq: 0,
            mask_self,
            tab,
            sort_idx: 0,
            setup: 0,
            run: 0,
            n_out: 0,
            flags: WsFlags::empty(),
            n_skip: 0,
            terms: Vec::new(),
            kind: LoopKind::Btree(BtreeLoop::default()),
        }
    }

    pub fn btree(&self) -> Option<&BtreeLoop> {
        match &self.kind {
            LoopKind::Btree(b) => Some(b),
            LoopKind::Vtab(_) => None,
        }
    }

    pub fn vtab(&self) -> Option<&VtabLoop> {
        match &self.kind {
            LoopKind::Vtab(v) => Some(v),
            LoopKind::Btree(_) => None,
        }
    }

    pub(super) fn btree_mut(&mut self) -> &mut BtreeLoop {
        if let LoopKind::Vtab(_) = self.kind {
            self.kind = LoopKind::Btree(BtreeLoop::default());
        }
        match &mut self.kind {
            LoopKind::Btree(b) => b,
            LoopKind::Vtab(_) => unreachable!("loop kind was just set to Btree"),
        }
    }

    pub fn n_eq(&self) -> usize {
        self.btree().map_or(0, |b| b.n_eq as usize)
    }

    pub fn n_btm(&self) -> usize {
        self.btree().map_or(0, |b| b.n_btm as usize)
    }

    pub fn n_top(&self) -> usize {
        self.btree().map_or(0, |b| b.n_top as usize)
    }

    pub fn index(&self) -> Option<&Arc<Index>> {
        self.btree().and_then(|b| b.index.as_ref())
    }

    /// True if `r` is one of the loop's driving terms
    pub fn uses_term(&self, r: TermRef) -> bool {
        self.terms.iter().any(|t| *t == Some(r))
    }

    fn n_real_terms(&self) -> usize {
        self.terms.len() - self.n_skip as usize
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// An index probed by the generator. The rowid is probed as a pseudo-index
/// with a single column.
#[derive(Clone, Copy)]
struct Probe<'p> {
    index: &'p Index,
    shared: Option<&'p Arc<Index>>,
    ipk: bool,
}

impl Probe<'_> {
    fn n_key_col(&self) -> usize {
        self.index.n_key_col()
    }

    fn n_column(&self) -> usize {
        if self.ipk {
            1
        } else {
            self.index.n_column()
        }
    }

    fn row_log_est(&self, i: usize) -> LogEst {
        self.index
            .row_log_est
            .get(i)
            .or_else(|| self.index.row_log_est.last())
            .copied()
            .unwrap_or(0)
    }
}

/// The rowid of `table` as an index
fn rowid_pseudo_index(table: &Table) -> Index {
    Index {
        name: String::new(),
        table: table.name.clone(),
        columns: vec![IndexColumn::new(ROWID_COLUMN)],
        unique: true,
        row_log_est: vec![table.row_log_est, 0],
        sz_idx_row: table.sz_tab_row,
        ..Index::default()
    }
}

/// Index column `i` can never hold NULL
pub fn index_column_not_null(index: &Index, table: &Table, i: usize) -> bool {
    match index.column_at(i) {
        ROWID_COLUMN => true,
        EXPR_COLUMN => false,
        c => table.column_not_null(c),
    }
}

/// The index is UNIQUE and every key column is NOT NULL
pub fn index_uniq_not_null(index: &Index, table: &Table) -> bool {
    index.is_unique() && (0..index.n_key_col()).all(|i| index_column_not_null(index, table, i))
}

/// Columns of `table` that the index does not hold, with bit 63 standing
/// for every column past the 63rd
pub fn columns_not_indexed(index: &Index) -> Bitmask {
    let mut m: Bitmask = 0;
    for c in &index.columns {
        if c.column >= 0 && c.column < 63 {
            m |= 1 << c.column;
        }
    }
    !m
}

/// True if every column of `cursor` read by `expr` is held by the index
pub fn expr_covered_by_index(expr: &Expr, cursor: i32, index: &Index) -> bool {
    let mut covered = true;
    expr.walk(&mut |e| {
        if let Expr::Column(c) = e {
            if c.cursor == cursor && c.column >= 0 && !index.contains_column(c.column) {
                covered = false;
            }
        }
    });
    covered
}

fn small_integer(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(Literal::Integer(k)) => (-1..=1).contains(k),
        Expr::Unary {
            op: UnaryOp::Neg | UnaryOp::Pos,
            expr,
        } => matches!(expr.as_ref(), Expr::Literal(Literal::Integer(k)) if (-1..=1).contains(k)),
        _ => false,
    }
}

/// True if some ORDER BY term refers to a key column of the index, so a
/// scan of the index might deliver rows in the wanted order
pub fn index_might_help_with_order_by(
    order_by: Option<&[OrderingTerm]>,
    index: &Index,
    table: &Table,
    cursor: i32,
) -> bool {
    if index.is_unordered() {
        return false;
    }
    let Some(order_by) = order_by else {
        return false;
    };
    for term in order_by {
        let e = term.expr.skip_collate();
        match e {
            Expr::Column(c) if c.cursor == cursor => {
                let col = table.normalize_column(c.column);
                if col < 0 {
                    return true;
                }
                if (0..index.n_key_col()).any(|j| table.normalize_column(index.column_at(j)) == col)
                {
                    return true;
                }
            }
            _ => {
                for ic in &index.columns {
                    if let Some(pattern) = &ic.expr {
                        if e.matches_pattern(pattern, cursor) {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

/// True if `e1` being true guarantees that `e2` is true. Column references
/// in `e2` with cursor -1 stand for columns of `cursor`.
pub fn expr_implies_expr(e1: &Expr, e2: &Expr, cursor: i32) -> bool {
    if e1.matches_pattern(e2, cursor) {
        return true;
    }
    match e2 {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => expr_implies_expr(e1, left, cursor) || expr_implies_expr(e1, right, cursor),
        Expr::IsNull {
            expr,
            negated: true,
        } => implies_not_null(e1, expr, cursor, false),
        _ => false,
    }
}

/// True if `p` can only be true when `nn` is not NULL
fn implies_not_null(p: &Expr, nn: &Expr, cursor: i32, seen_not: bool) -> bool {
    if p.matches_pattern(nn, cursor) {
        return !matches!(nn, Expr::Literal(Literal::Null));
    }
    match p {
        Expr::In { expr, list, .. } => {
            if seen_not && matches!(list, InList::Subquery(_)) {
                return false;
            }
            implies_not_null(expr, nn, cursor, true)
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            if seen_not {
                return false;
            }
            implies_not_null(low, nn, cursor, true)
                || implies_not_null(high, nn, cursor, true)
                || implies_not_null(expr, nn, cursor, true)
        }
        Expr::Binary { op, left, right } => {
            let seen = match op {
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::BitOr
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::Concat => true,
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::BitAnd => seen_not,
                _ => return false,
            };
            implies_not_null(right, nn, cursor, seen) || implies_not_null(left, nn, cursor, seen)
        }
        Expr::Collate { expr, .. }
        | Expr::Unary {
            op: UnaryOp::Neg | UnaryOp::Pos,
            expr,
        } => implies_not_null(expr, nn, cursor, seen_not),
        Expr::Unary {
            op: UnaryOp::Not | UnaryOp::BitNot,
            expr,
        } => implies_not_null(expr, nn, cursor, true),
        _ => false,
    }
}

/// True if the WHERE clause implies the partial index predicate
pub fn usable_partial_index(cursor: i32, clause: &WhereClause, predicate: &Expr) -> bool {
    if let Expr::Binary {
        op: BinaryOp::And,
        left,
        right,
    } = predicate
    {
        return usable_partial_index(cursor, clause, left)
            && usable_partial_index(cursor, clause, right);
    }
    clause.terms.iter().any(|t| {
        (t.join_cursor.is_none() || t.join_cursor == Some(cursor))
            && expr_implies_expr(&t.expr, predicate, cursor)
    })
}

/// True if `term` could drive an automatic index on `item`
pub fn term_can_drive_index(term: &WhereTerm, item: &SrcItem, not_ready: Bitmask) -> bool {
    if term.left_cursor != item.cursor {
        return false;
    }
    if !term.op.intersects(OperatorMask::EQ | OperatorMask::IS) {
        return false;
    }
    if item.join_type.is_left() && !term.is_from_join() && term.op.contains(OperatorMask::IS) {
        return false;
    }
    if term.prereq_right & not_ready != 0 {
        return false;
    }
    if term.left_column < 0 {
        return false;
    }
    index_affinity_ok(&term.expr, item.table.column_affinity(term.left_column))
}

/// Number of leading fields of a vector inequality that line up with
/// consecutive index columns starting at `n_eq`
fn range_vector_len(cursor: i32, probe: &Probe<'_>, table: &Table, n_eq: usize, term: &WhereTerm) -> u16 {
    let (Some(lhs), Some(rhs)) = (term.lhs(), term.rhs()) else {
        return 1;
    };
    let n_cmp = lhs
        .vector_size()
        .min(probe.n_column().saturating_sub(n_eq));
    let index = probe.index;
    let mut i = 1;
    while i < n_cmp {
        let (Some(l), Some(r)) = (lhs.vector_field(i), rhs.vector_field(i)) else {
            break;
        };
        let Expr::Column(col) = l else {
            break;
        };
        if col.cursor != cursor
            || table.normalize_column(col.column) != table.normalize_column(index.column_at(i + n_eq))
            || index.sort_order_at(i + n_eq) != index.sort_order_at(n_eq)
        {
            break;
        }
        let aff = Affinity::compare(r.affinity(), l.affinity());
        if aff != table.column_affinity(col.column) {
            break;
        }
        let coll = comparison_collation(l, r).unwrap_or(crate::schema::DEFAULT_COLLATION);
        if !coll.eq_ignore_ascii_case(index.collation_at(i + n_eq)) {
            break;
        }
        i += 1;
    }
    i as u16
}

/// X is a proper subset of Y's terms and costs no more
fn cheaper_proper_subset(x: &WhereLoop, y: &WhereLoop) -> bool {
    if x.n_real_terms() >= y.n_real_terms() {
        return false;
    }
    if y.n_skip > x.n_skip {
        return false;
    }
    if x.run >= y.run && (x.run > y.run || x.n_out > y.n_out) {
        return false;
    }
    for t in x.terms.iter().flatten() {
        if !y.uses_term(*t) {
            return false;
        }
    }
    !(x.flags.contains(WsFlags::IDX_ONLY) && !y.flags.contains(WsFlags::IDX_ONLY))
}

// ============================================================================
// OR-union cost sets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrCost {
    prereq: Bitmask,
    run: LogEst,
    n_out: LogEst,
}

/// The few cheapest (prereq, cost) combinations seen for one disjunct
#[derive(Debug, Clone, Default)]
struct OrSet {
    costs: Vec<OrCost>,
}

impl OrSet {
    fn insert(&mut self, prereq: Bitmask, run: LogEst, n_out: LogEst) -> bool {
        let mut slot = None;
        for (i, p) in self.costs.iter().enumerate() {
            if run <= p.run && prereq & p.prereq == prereq {
                slot = Some(i);
                break;
            }
            if p.run <= run && p.prereq & prereq == p.prereq {
                return false;
            }
        }
        let i = match slot {
            Some(i) => i,
            None if self.costs.len() < N_OR_COST => {
                self.costs.push(OrCost {
                    prereq,
                    run,
                    n_out,
                });
                return true;
            }
            None => {
                let mut worst = 0;
                for (i, c) in self.costs.iter().enumerate().skip(1) {
                    if self.costs[worst].run > c.run {
                        worst = i;
                    }
                }
                if self.costs[worst].run <= run {
                    return false;
                }
                worst
            }
        };
        let p = &mut self.costs[i];
        p.prereq = prereq;
        p.run = run;
        if p.n_out > n_out {
            p.n_out = n_out;
        }
        true
    }
}

/// Where an incoming loop belongs in the candidate list
enum Placement {
    Discard,
    Replace(usize),
    Append,
}

// ============================================================================
// LoopBuilder
// ============================================================================

/// Generates the candidate loops for one WHERE clause
pub struct LoopBuilder<'a> {
    pub(super) config: &'a PlannerConfig,
    pub(super) src: &'a SrcList,
    pub(super) mask_set: &'a MaskSet,
    pub(super) chain: &'a ClauseChain<'a>,
    /// ORDER BY the loops might satisfy; absent inside OR sub-plans
    pub(super) order_by: Option<&'a [OrderingTerm]>,
    pub(super) wctrl: WhereFlags,
    pub(super) loops: Vec<WhereLoop>,
    or_set: Option<OrSet>,
    plan_limit: i32,
    done: bool,
    rec: ProbeRecord,
}

impl<'a> LoopBuilder<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        src: &'a SrcList,
        mask_set: &'a MaskSet,
        chain: &'a ClauseChain<'a>,
        order_by: Option<&'a [OrderingTerm]>,
        wctrl: WhereFlags,
    ) -> Self {
        LoopBuilder {
            config,
            src,
            mask_set,
            chain,
            order_by,
            wctrl,
            loops: Vec::new(),
            or_set: None,
            plan_limit: config.search_budget,
            done: false,
            rec: ProbeRecord::new(),
        }
    }

    pub fn loops(&self) -> &[WhereLoop] {
        &self.loops
    }

    pub fn into_loops(self) -> Vec<WhereLoop> {
        self.loops
    }

    /// Add candidate loops for the first `n_tab` tables of the FROM clause
    pub fn add_all(&mut self, n_tab: usize) -> Result<()> {
        let src = self.src;
        let mut m_prereq: Bitmask = 0;
        let mut m_prior: Bitmask = 0;
        let mut prior_join = Default::default();
        for tab in 0..n_tab {
            let item = &src.items[tab];
            let mask_self = self.mask_set.get_mask(item.cursor);
            self.plan_limit = self.plan_limit.saturating_add(PLAN_LIMIT_INCR);
            // The right side of a LEFT or CROSS join must follow everything
            // to its left
            if (item.join_type | prior_join).fixes_order() {
                m_prereq = m_prior;
            }
            prior_join = item.join_type;

            let mut m_unusable: Bitmask = 0;
            if item.table.is_virtual() {
                for p in &src.items[tab + 1..n_tab] {
                    if m_unusable != 0 || p.join_type.fixes_order() {
                        m_unusable |= self.mask_set.get_mask(p.cursor);
                    }
                }
                self.add_virtual(tab, m_prereq, m_unusable)?;
            } else {
                self.add_btree(tab, m_prereq);
            }
            if !self.done && self.chain.clause.has_or {
                self.add_or(tab, m_prereq, m_unusable)?;
            }
            m_prior |= mask_self;
            if self.done {
                tracing::warn!(table = %item.table.name, "abbreviated query algorithm search");
                self.done = false;
            }
        }
        tracing::debug!(n_loop = self.loops.len(), "where.loops.generated");
        Ok(())
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Offer a candidate. Returns false once the search budget is spent.
    pub(super) fn insert(&mut self, template: &WhereLoop) -> bool {
        if self.plan_limit <= 0 {
            if let Some(set) = &mut self.or_set {
                set.costs.clear();
            }
            self.done = true;
            return false;
        }
        self.plan_limit -= 1;

        if let Some(set) = &mut self.or_set {
            if !template.terms.is_empty() {
                set.insert(template.prereq, template.run, template.n_out);
            }
            return true;
        }

        let mut template = template.clone();
        self.adjust_cost(&mut template);

        let slot = match self.find_lesser(0, &template) {
            Placement::Discard => return true,
            Placement::Append => {
                self.loops.push(template);
                self.loops.len() - 1
            }
            Placement::Replace(i) => {
                // Drop any other loop the template also beats
                let mut j = i + 1;
                while j < self.loops.len() {
                    match self.find_lesser(j, &template) {
                        Placement::Replace(k) => {
                            self.loops.remove(k);
                            j = k;
                        }
                        _ => break,
                    }
                }
                tracing::trace!(tab = template.tab, "where.loop.replaced");
                self.loops[i] = template;
                i
            }
        };
        let lp = &mut self.loops[slot];
        if lp.flags.contains(WsFlags::IPK) {
            if let LoopKind::Btree(b) = &mut lp.kind {
                b.index = None;
            }
        }
        tracing::trace!(
            tab = lp.tab,
            flags = ?lp.flags,
            setup = lp.setup,
            run = lp.run,
            n_out = lp.n_out,
            prereq = lp.prereq,
            "where.loop.insert"
        );
        true
    }

    /// Find where `t` belongs among the loops from position `start`
    fn find_lesser(&self, start: usize, t: &WhereLoop) -> Placement {
        for (i, p) in self.loops.iter().enumerate().skip(start) {
            if p.tab != t.tab || p.sort_idx != t.sort_idx {
                continue;
            }
            // A declared index with an equality constraint beats an
            // automatic index, unless it is a skip-scan
            if p.flags.contains(WsFlags::AUTO_INDEX)
                && t.n_skip == 0
                && t.flags.contains(WsFlags::INDEXED)
                && t.flags.contains(WsFlags::COLUMN_EQ)
                && p.prereq & t.prereq == t.prereq
            {
                return Placement::Replace(i);
            }
            if p.prereq & t.prereq == p.prereq
                && p.setup <= t.setup
                && p.run <= t.run
                && p.n_out <= t.n_out
            {
                return Placement::Discard;
            }
            if p.prereq & t.prereq == t.prereq && p.run >= t.run && p.n_out >= t.n_out {
                return Placement::Replace(i);
            }
        }
        Placement::Append
    }

    /// Nudge the template's cost so that a loop using a subset of another
    /// loop's terms never looks cheaper than it
    fn adjust_cost(&self, t: &mut WhereLoop) {
        if !t.flags.contains(WsFlags::INDEXED) {
            return;
        }
        for p in &self.loops {
            if p.tab != t.tab || !p.flags.contains(WsFlags::INDEXED) {
                continue;
            }
            if cheaper_proper_subset(p, t) {
                t.run = p.run;
                t.n_out = p.n_out - 1;
            } else if cheaper_proper_subset(t, p) {
                t.run = p.run;
                t.n_out = p.n_out + 1;
            }
        }
    }

    /// Reduce the output estimate for terms the loop does not use but that
    /// will filter its rows
    fn output_adjust(&self, lp: &mut WhereLoop, n_row: LogEst) {
        let not_allowed = !(lp.prereq | lp.mask_self);
        let mut reduce: LogEst = 0;
        for (i, term) in self.chain.clause.terms.iter().enumerate() {
            if term.is_virtual() {
                break;
            }
            if term.prereq_all & lp.mask_self == 0 || term.prereq_all & not_allowed != 0 {
                continue;
            }
            let this = TermRef::new(i);
            let used = lp.terms.iter().flatten().any(|x| {
                *x == this
                    || (x.depth == 0
                        && self
                            .chain
                            .term(*x)
                            .and_then(|t| t.parent)
                            .map_or(false, |p| p == i))
            });
            if used {
                continue;
            }
            if term.truth_prob <= 0 {
                lp.n_out += term.truth_prob;
            } else {
                lp.n_out -= 1;
                if term.op.intersects(OperatorMask::EQ | OperatorMask::IS) {
                    let k = if term.rhs().map_or(false, small_integer) {
                        10
                    } else {
                        20
                    };
                    reduce = reduce.max(k);
                }
            }
        }
        if lp.n_out > n_row - reduce {
            lp.n_out = n_row - reduce;
        }
    }

    // ========================================================================
    // B-tree tables
    // ========================================================================

    fn add_btree(&mut self, tab: usize, m_prereq: Bitmask) {
        let src = self.src;
        let item = &src.items[tab];
        let table: &Table = &item.table;
        let cursor = item.cursor;
        let mask_self = self.mask_set.get_mask(cursor);

        let pk = rowid_pseudo_index(table);
        let mut probes: Vec<Probe<'_>> = Vec::new();
        match &item.indexed_by {
            Some(IndexedBy::Index(name)) => {
                if let Some(i) = table.find_index(name) {
                    let shared = &table.indexes[i];
                    probes.push(Probe {
                        index: shared,
                        shared: Some(shared),
                        ipk: false,
                    });
                }
            }
            Some(IndexedBy::NotIndexed) => probes.push(Probe {
                index: &pk,
                shared: None,
                ipk: true,
            }),
            None => {
                probes.push(Probe {
                    index: &pk,
                    shared: None,
                    ipk: true,
                });
                probes.extend(table.indexes.iter().map(|shared| Probe {
                    index: shared,
                    shared: Some(shared),
                    ipk: false,
                }));
            }
        }

        let chain = self.chain;
        let r_size = table.row_log_est;
        let r_log_size = est_log(r_size);
        let mut new = WhereLoop::new(tab, mask_self);

        if self.or_set.is_none()
            && !self.wctrl.contains(WhereFlags::OR_SUBCLAUSE)
            && self.config.auto_index
            && item.indexed_by.is_none()
        {
            for (i, term) in chain.clause.terms.iter().enumerate() {
                if self.done {
                    return;
                }
                if term.prereq_right & mask_self != 0 {
                    continue;
                }
                if !term_can_drive_index(term, item, 0) {
                    continue;
                }
                new.terms = vec![Some(TermRef::new(i))];
                new.n_skip = 0;
                new.sort_idx = 0;
                *new.btree_mut() = BtreeLoop {
                    n_eq: 1,
                    ..BtreeLoop::default()
                };
                // Building costs about 7*N*log(N); each lookup yields 20 rows
                new.setup = (r_log_size + r_size + 28).max(0);
                new.n_out = 43;
                new.run = log_est_add(r_log_size, new.n_out);
                new.flags = WsFlags::AUTO_INDEX;
                new.prereq = m_prereq | term.prereq_right;
                self.insert(&new);
            }
        }

        let mut sort_idx: u8 = 1;
        for probe in &probes {
            if self.done {
                break;
            }
            let this_sort = sort_idx;
            sort_idx = sort_idx.saturating_add(1);
            if let Some(pred) = &probe.index.partial {
                if !self.config.partial_index
                    || !usable_partial_index(cursor, chain.clause, pred)
                {
                    continue;
                }
            }
            let r_size = probe.row_log_est(0);
            new.terms.clear();
            new.n_skip = 0;
            new.sort_idx = 0;
            new.setup = 0;
            new.prereq = m_prereq;
            new.n_out = r_size;
            *new.btree_mut() = BtreeLoop {
                index: probe.shared.cloned(),
                ..BtreeLoop::default()
            };
            let b = index_might_help_with_order_by(self.order_by, probe.index, table, cursor);

            if probe.ipk {
                new.flags = WsFlags::IPK;
                new.sort_idx = if b { this_sort } else { 0 };
                // A full table scan costs about 3*N
                new.run = r_size + 16;
                self.output_adjust(&mut new, r_size);
                self.insert(&new);
                new.n_out = r_size;
            } else {
                let index = probe.index;
                let m = if index.is_covering {
                    0
                } else {
                    item.col_used & columns_not_indexed(index)
                };
                new.flags = if m == 0 {
                    WsFlags::IDX_ONLY | WsFlags::INDEXED
                } else {
                    WsFlags::INDEXED
                };
                if b
                    || index.partial.is_some()
                    || (m == 0
                        && !index.is_unordered()
                        && index.sz_idx_row < table.sz_tab_row
                        && !self.wctrl.contains(WhereFlags::ONEPASS_DESIRED)
                        && self.config.cover_idx_scan)
                {
                    new.sort_idx = if b { this_sort } else { 0 };
                    // Visiting the index rows costs between 1.1 and 3.0 per
                    // row depending on the index width
                    new.run = r_size + 1 + scaled_row_cost(index.sz_idx_row, table.sz_tab_row);
                    if m != 0 {
                        let mut n_lookup = r_size + 16;
                        for term in &chain.clause.terms {
                            if !expr_covered_by_index(&term.expr, cursor, index) {
                                break;
                            }
                            if term.truth_prob <= 0 {
                                n_lookup += term.truth_prob;
                            } else {
                                n_lookup -= 1;
                                if term.op.intersects(OperatorMask::EQ | OperatorMask::IS) {
                                    n_lookup -= 19;
                                }
                            }
                        }
                        new.run = log_est_add(new.run, n_lookup);
                    }
                    self.output_adjust(&mut new, r_size);
                    self.insert(&new);
                    new.n_out = r_size;
                }
            }

            self.rec = ProbeRecord::new();
            self.add_btree_index(item, &mut new, probe, 0);
        }
    }

    /// Extend `new` with every usable constraint on the next column of the
    /// index, inserting each extension and recursing to the column after
    fn add_btree_index(&mut self, item: &SrcItem, new: &mut WhereLoop, probe: &Probe<'_>, n_in_mul: LogEst) {
        let table: &Table = &item.table;
        let index = probe.index;
        let cursor = item.cursor;
        let chain = self.chain;

        let mut op_mask = if new.flags.contains(WsFlags::BTM_LIMIT) {
            OperatorMask::LT | OperatorMask::LE
        } else {
            OperatorMask::EQ
                | OperatorMask::IN
                | OperatorMask::RANGE
                | OperatorMask::ISNULL
                | OperatorMask::IS
        };
        if index.is_unordered() {
            op_mask.remove(OperatorMask::RANGE);
        }

        let saved_n_eq = new.n_eq();
        let saved_n_btm = new.n_btm();
        let saved_n_top = new.n_top();
        let saved_n_skip = new.n_skip;
        let saved_n_term = new.terms.len();
        let saved_flags = new.flags;
        let saved_prereq = new.prereq;
        let saved_n_out = new.n_out;
        new.setup = 0;
        let r_size = probe.row_log_est(0);
        let r_log_size = est_log(r_size);
        let col = index.column_at(saved_n_eq);

        let scan = WhereScan::new(chain, cursor, saved_n_eq as i32, op_mask, Some((index, table)));
        for r in scan {
            if self.done {
                break;
            }
            let Some(term) = chain.term(r) else {
                continue;
            };
            let op = term.op;
            let n_rec_valid = self.rec.n_valid;
            if (op == OperatorMask::ISNULL || term.flags.contains(TermFlags::VNULL))
                && index_column_not_null(index, table, saved_n_eq)
            {
                continue;
            }
            if term.prereq_right & new.mask_self != 0 {
                continue;
            }
            // The upper bound of a LIKE range only pairs with its own lower
            // bound
            if term.flags.contains(TermFlags::LIKEOPT) && op == OperatorMask::LT {
                continue;
            }
            // IS and IS NULL from the WHERE clause would also match the
            // NULL row of a LEFT JOIN
            if item.join_type.is_left()
                && !term.is_from_join()
                && op.intersects(OperatorMask::IS | OperatorMask::ISNULL)
            {
                continue;
            }

            new.flags = saved_flags;
            {
                let b = new.btree_mut();
                b.n_eq = saved_n_eq as u16;
                b.n_btm = saved_n_btm as u16;
                b.n_top = saved_n_top as u16;
            }
            new.terms.truncate(saved_n_term);
            new.terms.push(Some(r));
            new.prereq = (saved_prereq | term.prereq_right) & !new.mask_self;

            let mut n_in: LogEst = 0;
            let mut btm: Option<&WhereTerm> = None;
            let mut top: Option<&WhereTerm> = None;

            if op.contains(OperatorMask::IN) {
                if term.is_in_subquery() {
                    // Assume a subquery returns 25 rows, counted once per
                    // row value
                    n_in = 46;
                    let seen = new.terms[..new.terms.len() - 1]
                        .iter()
                        .flatten()
                        .any(|x| chain.term(*x).map_or(false, |t| t.expr == term.expr));
                    if seen {
                        n_in = 0;
                    }
                } else if let Some(n) = term.in_list_len().filter(|n| *n > 0) {
                    n_in = log_est(n as u64);
                }
                if !probe.ipk {
                    let m = probe.row_log_est(saved_n_eq);
                    if in_scan_preferred(index.stats.is_some(), m, n_in, r_log_size) {
                        tracing::trace!(index = %index.name, column = saved_n_eq, "where.in.scan_preferred");
                        continue;
                    }
                }
                new.flags |= WsFlags::COLUMN_IN;
            } else if op.intersects(OperatorMask::EQ | OperatorMask::IS) {
                new.flags |= WsFlags::COLUMN_EQ;
                if col == ROWID_COLUMN
                    || (col >= 0 && n_in_mul == 0 && saved_n_eq + 1 == probe.n_key_col())
                {
                    if col == ROWID_COLUMN
                        || index_uniq_not_null(index, table)
                        || (probe.n_key_col() == 1 && index.is_unique() && op == OperatorMask::EQ)
                    {
                        new.flags |= WsFlags::ONEROW;
                    } else {
                        new.flags |= WsFlags::UNQ_WANTED;
                    }
                }
            } else if op.contains(OperatorMask::ISNULL) {
                new.flags |= WsFlags::COLUMN_NULL;
            } else if op.intersects(OperatorMask::GT | OperatorMask::GE) {
                new.flags |= WsFlags::COLUMN_RANGE | WsFlags::BTM_LIMIT;
                new.btree_mut().n_btm = range_vector_len(cursor, probe, table, saved_n_eq, term);
                btm = Some(term);
                if term.flags.contains(TermFlags::LIKEOPT) {
                    // LIKE ranges are always used in pairs
                    let upper = TermRef {
                        depth: r.depth,
                        idx: r.idx + 1,
                    };
                    top = chain.term(upper);
                    new.terms.push(Some(upper));
                    new.flags |= WsFlags::TOP_LIMIT;
                    new.btree_mut().n_top = 1;
                }
            } else {
                new.flags |= WsFlags::COLUMN_RANGE | WsFlags::TOP_LIMIT;
                new.btree_mut().n_top = range_vector_len(cursor, probe, table, saved_n_eq, term);
                top = Some(term);
                if new.flags.contains(WsFlags::BTM_LIMIT) {
                    btm = new
                        .terms
                        .len()
                        .checked_sub(2)
                        .and_then(|i| new.terms[i])
                        .and_then(|x| chain.term(x));
                }
            }

            if new.flags.contains(WsFlags::COLUMN_RANGE) {
                let est = RangeEstimate {
                    index,
                    table,
                    n_eq: saved_n_eq,
                    n_btm: new.n_btm(),
                    n_top: new.n_top(),
                    lower: btm,
                    upper: top,
                };
                new.n_out = range_scan_est(self.config, &mut self.rec, est, new.n_out);
            } else {
                let n_eq = saved_n_eq + 1;
                new.btree_mut().n_eq = n_eq as u16;
                if term.truth_prob <= 0 && col >= 0 {
                    new.n_out += term.truth_prob;
                    new.n_out -= n_in;
                } else {
                    let mut n_rows = None;
                    if n_in_mul == 0
                        && !probe.ipk
                        && has_usable_samples(self.config, index, saved_n_eq)
                        && !term.is_in_subquery()
                    {
                        n_rows = if op.intersects(OperatorMask::EQ | OperatorMask::ISNULL | OperatorMask::IS) {
                            let null = Expr::null();
                            let rhs = term.rhs().unwrap_or(&null);
                            equal_scan_est(index, table, &mut self.rec, n_eq, rhs)
                        } else {
                            match &term.expr {
                                Expr::In {
                                    list: InList::Values(values),
                                    ..
                                } => in_scan_est(index, table, &mut self.rec, n_eq, values),
                                _ => None,
                            }
                        };
                    }
                    match n_rows.filter(|n| *n > 0) {
                        Some(n) => {
                            new.n_out = log_est(n).min(saved_n_out) - n_in;
                        }
                        None => {
                            new.n_out += probe.row_log_est(n_eq) - probe.row_log_est(n_eq - 1);
                            if op.contains(OperatorMask::ISNULL) {
                                // Assume IS NULL matches twice as many rows
                                // as an equality
                                new.n_out += 10;
                            }
                        }
                    }
                }
            }

            // Cost of visiting the selected index rows, plus the table
            // lookups for a non-covering index
            let cost_idx = new.n_out + 1 + scaled_row_cost(index.sz_idx_row, table.sz_tab_row);
            new.run = log_est_add(r_log_size, cost_idx);
            if !new.flags.intersects(WsFlags::IDX_ONLY | WsFlags::IPK) {
                new.run = log_est_add(new.run, new.n_out + 16);
            }

            let n_out_unadjusted = new.n_out;
            new.run += n_in_mul + n_in;
            new.n_out += n_in_mul + n_in;
            self.output_adjust(new, r_size);
            self.insert(new);

            new.n_out = if new.flags.contains(WsFlags::COLUMN_RANGE) {
                saved_n_out
            } else {
                n_out_unadjusted
            };
            if !new.flags.contains(WsFlags::TOP_LIMIT) && new.n_eq() < probe.n_column() {
                self.add_btree_index(item, new, probe, n_in_mul + n_in);
            }
            new.n_out = saved_n_out;
            self.rec.n_valid = n_rec_valid;
        }

        new.prereq = saved_prereq;
        {
            let b = new.btree_mut();
            b.n_eq = saved_n_eq as u16;
            b.n_btm = saved_n_btm as u16;
            b.n_top = saved_n_top as u16;
        }
        new.n_skip = saved_n_skip;
        new.flags = saved_flags;
        new.n_out = saved_n_out;
        new.terms.truncate(saved_n_term);

        // Skip-scan over an unconstrained leading column with many repeats
        if !self.done
            && !probe.ipk
            && saved_n_eq == saved_n_skip as usize
            && saved_n_eq + 1 < probe.n_key_col()
            && !index.no_skip_scan()
            && self.config.skip_scan
            && probe.row_log_est(saved_n_eq + 1) >= self.config.skip_scan_threshold
        {
            new.btree_mut().n_eq += 1;
            new.n_skip += 1;
            new.terms.push(None);
            new.flags |= WsFlags::SKIPSCAN;
            let mut n_iter = probe.row_log_est(saved_n_eq) - probe.row_log_est(saved_n_eq + 1);
            new.n_out -= n_iter;
            // Skip-scan estimates are uncertain; make it slightly less likely
            n_iter += 5;
            self.add_btree_index(item, new, probe, n_iter + n_in_mul);
            new.n_out = saved_n_out;
            new.btree_mut().n_eq = saved_n_eq as u16;
            new.n_skip = saved_n_skip;
            new.flags = saved_flags;
            new.terms.truncate(saved_n_term);
        }
    }

    // ========================================================================
    // OR-unions
    // ========================================================================

    /// Add a loop for each indexable OR term: the union of the best scans
    /// for its disjuncts
    fn add_or(&mut self, tab: usize, m_prereq: Bitmask, m_unusable: Bitmask) -> Result<()> {
        if !self.config.or_union {
            return Ok(());
        }
        let src = self.src;
        let item = &src.items[tab];
        let mask_self = self.mask_set.get_mask(item.cursor);
        let chain = self.chain;

        for (i, term) in chain.clause.terms.iter().enumerate() {
            if self.done {
                break;
            }
            let Some(or) = term.or_info() else {
                continue;
            };
            if !term.op.contains(OperatorMask::OR) || or.indexable & mask_self == 0 {
                continue;
            }
            tracing::trace!(term = i, "where.or.begin");
            let mut sum: Option<OrSet> = None;
            for or_term in &or.wc.terms {
                let single;
                let clause: &WhereClause = if let Some(and) = or_term.and_info() {
                    and
                } else if or_term.left_cursor == item.cursor {
                    let mut t = or_term.clone();
                    t.parent = None;
                    let mut wc = WhereClause::new(BinaryOp::And);
                    wc.terms.push(t);
                    wc.n_base = 1;
                    single = wc;
                    &single
                } else {
                    continue;
                };
                let sub_chain = ClauseChain::nested(clause, chain);
                let mut sub = LoopBuilder {
                    config: self.config,
                    src: self.src,
                    mask_set: self.mask_set,
                    chain: &sub_chain,
                    order_by: None,
                    wctrl: self.wctrl,
                    loops: Vec::new(),
                    or_set: Some(OrSet::default()),
                    plan_limit: self.plan_limit,
                    done: false,
                    rec: ProbeRecord::new(),
                };
                if item.table.is_virtual() {
                    sub.add_virtual(tab, m_prereq, m_unusable)?;
                } else {
                    sub.add_btree(tab, m_prereq);
                }
                if !sub.done && clause.has_or {
                    sub.add_or(tab, m_prereq, m_unusable)?;
                }
                let cur = sub.or_set.take().unwrap_or_default();
                if cur.costs.is_empty() {
                    sum = Some(OrSet::default());
                    break;
                }
                sum = Some(match sum {
                    None => cur,
                    Some(prev) => {
                        let mut next = OrSet::default();
                        for a in &prev.costs {
                            for b in &cur.costs {
                                next.insert(
                                    a.prereq | b.prereq,
                                    log_est_add(a.run, b.run),
                                    log_est_add(a.n_out, b.n_out),
                                );
                            }
                        }
                        next
                    }
                });
            }

            let mut new = WhereLoop::new(tab, mask_self);
            new.terms = vec![Some(TermRef::new(i))];
            new.flags = WsFlags::MULTI_OR;
            for c in sum.map(|s| s.costs).unwrap_or_default() {
                // The union costs a little more than its dearest branch
                new.run = c.run + 1;
                new.n_out = c.n_out;
                new.prereq = c.prereq;
                if !self.insert(&new) {
                    break;
                }
            }
            tracing::trace!(term = i, "where.or.end");
        }
        Ok(())
    }
}

/// Relative cost of reading an index row instead of a table row, on a
/// 0..15 scale
fn scaled_row_cost(sz_idx_row: LogEst, sz_tab_row: LogEst) -> LogEst {
    if sz_tab_row <= 0 {
        return 15;
    }
    ((15 * sz_idx_row as i32) / sz_tab_row as i32) as LogEst
}

/// Affinity the comparison in `term` applies to its operands
pub fn term_affinity(term: &WhereTerm) -> Affinity {
    comparison_affinity(&term.expr)
}

/// Scanning M rows and testing each against an IN list of K values beats
/// K seeks when M*log(K) < K*log(N), with a margin that favours the index.
/// Only trusted with stat1 data on an index of a non-trivial size.
fn in_scan_preferred(has_stat1: bool, m: LogEst, n_in: LogEst, r_log_size: LogEst) -> bool {
    has_stat1 && r_log_size >= 10 && m + est_log(n_in) + 10 < n_in + r_log_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::JoinFlags;
    use crate::schema::{parse_stat1, Column};
    use crate::executor::where_expr::AnalyzeContext;

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

        fn analyze(&self, expr: &Expr) -> WhereClause {
            let mut wc = WhereClause::new(BinaryOp::And);
            wc.split(expr);
            let ctx = AnalyzeContext {
                mask_set: &self.mask_set,
                src: &self.src,
                config: &self.config,
            };
            wc.analyze_all(&ctx).unwrap();
            wc
        }

        fn build(&self, wc: &WhereClause, order_by: Option<&[OrderingTerm]>) -> Vec<WhereLoop> {
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
            b.into_loops()
        }
    }

    fn abc(name: &str) -> Table {
        let mut t = Table::new(name);
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "INTEGER"));
        t.add_column(Column::new("c", "TEXT"));
        t
    }

    fn has_full_scan(loops: &[WhereLoop], tab: usize) -> bool {
        loops
            .iter()
            .any(|l| l.tab == tab && l.flags == WsFlags::IPK && l.terms.is_empty())
    }

    /// Cost of a full scan over a default-sized table
    const SCAN_RUN: LogEst = 216;

    #[test]
    fn test_equality_and_range_on_index() {
        let mut t = abc("t");
        t.add_index(Index::new("ix", "t").with_column(0).with_column(1));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let e = Expr::conjunction([
            Expr::eq(Expr::column(0, tab, 0), Expr::int(5)),
            Expr::binary(BinaryOp::Gt, Expr::column(0, tab, 1), Expr::int(10)),
            Expr::eq(Expr::column(0, tab, 2), Expr::string("x")),
        ])
        .unwrap();
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);

        let lp = loops
            .iter()
            .find(|l| l.index().map_or(false, |i| i.name == "ix") && l.n_btm() == 1)
            .unwrap();
        assert_eq!(lp.n_eq(), 1);
        assert!(lp.flags.contains(WsFlags::BTM_LIMIT | WsFlags::COLUMN_EQ));
        assert!(!lp.flags.contains(WsFlags::IDX_ONLY));
        assert_eq!(lp.terms.len(), 2);
        // The unused c='x' term reduces the estimate below the plain
        // range estimate
        assert_eq!(lp.n_out, 12);
        assert!(lp.run < SCAN_RUN);
        // The full scan is dominated and dropped
        assert!(!has_full_scan(&loops, 0));
    }

    #[test]
    fn test_rowid_equality_is_one_row() {
        let mut t = abc("t");
        t.set_integer_primary_key(0);
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 0), Expr::int(7)));
        let loops = f.build(&wc, None);
        let lp = loops
            .iter()
            .find(|l| l.flags.contains(WsFlags::IPK) && !l.terms.is_empty())
            .unwrap();
        assert!(lp.flags.contains(WsFlags::ONEROW | WsFlags::COLUMN_EQ));
        assert!(lp.index().is_none());
        assert_eq!(lp.n_eq(), 1);
    }

    #[test]
    fn test_unique_index_equality_is_one_row() {
        let mut t = abc("t");
        t.add_index(Index::new("ua", "t").with_column(0).unique());
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 0), Expr::int(7)));
        let loops = f.build(&wc, None);
        let lp = loops.iter().find(|l| l.index().is_some()).unwrap();
        assert!(lp.flags.contains(WsFlags::ONEROW));
    }

    #[test]
    fn test_prereq_never_includes_self() {
        let t1 = abc("t1");
        let mut t2 = abc("t2");
        t2.add_index(Index::new("t2a", "t2").with_column(0));
        let f = Fixture::new(vec![t1, t2]);
        let e = Expr::eq(Expr::column(1, f.table(1), 0), Expr::column(0, f.table(0), 0));
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        assert!(loops.iter().all(|l| l.prereq & l.mask_self == 0));
        let lp = loops
            .iter()
            .find(|l| l.index().map_or(false, |i| i.name == "t2a"))
            .unwrap();
        assert_eq!(lp.prereq, 1);
    }

    #[test]
    fn test_automatic_index_for_join_on_unindexed_column() {
        let f = Fixture::new(vec![abc("t1"), abc("t2")]);
        let e = Expr::eq(Expr::column(1, f.table(1), 1), Expr::column(0, f.table(0), 1));
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        let auto: Vec<_> = loops
            .iter()
            .filter(|l| l.flags.contains(WsFlags::AUTO_INDEX))
            .collect();
        assert!(!auto.is_empty());
        for lp in auto {
            assert_eq!(lp.n_out, 43);
            assert!(lp.setup > 0);
            assert_ne!(lp.prereq, 0);
        }
    }

    #[test]
    fn test_no_automatic_index_when_disabled() {
        let mut f = Fixture::new(vec![abc("t1"), abc("t2")]);
        f.config.auto_index = false;
        let e = Expr::eq(Expr::column(1, f.table(1), 1), Expr::column(0, f.table(0), 1));
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        assert!(loops.iter().all(|l| !l.flags.contains(WsFlags::AUTO_INDEX)));
    }

    #[test]
    fn test_left_join_right_table_ignores_where_is_null() {
        let t1 = abc("t1");
        let mut t2 = abc("t2");
        t2.add_index(Index::new("t2b", "t2").with_column(1));
        let mut f = Fixture::new(vec![t1, t2]);
        f.src.items[1].join_type = JoinFlags::LEFT | JoinFlags::OUTER;
        let e = Expr::is_null(Expr::column(1, f.table(1), 1));
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        assert!(loops
            .iter()
            .filter(|l| l.tab == 1)
            .all(|l| l.terms.is_empty()));
        // The right table must follow the left one
        assert!(loops.iter().filter(|l| l.tab == 1).all(|l| l.prereq & 1 == 1));
    }

    #[test]
    fn test_skip_scan_with_repetitive_leading_column() {
        let mut t = abc("t");
        let stats = parse_stat1("10000 1000 1").unwrap();
        t.add_index(
            Index::new("ab", "t")
                .with_column(0)
                .with_column(1)
                .with_stats(stats),
        );
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 1), Expr::int(4)));
        let loops = f.build(&wc, None);
        let lp = loops
            .iter()
            .find(|l| l.flags.contains(WsFlags::SKIPSCAN))
            .unwrap();
        assert_eq!(lp.n_skip, 1);
        assert_eq!(lp.n_eq(), 2);
        assert_eq!(lp.terms[0], None);
    }

    #[test]
    fn test_long_in_list_on_analyzed_index_prefers_scan() {
        let m = log_est(100);
        assert!(in_scan_preferred(true, m, log_est(1000), est_log(m)));
        assert!(!in_scan_preferred(false, m, log_est(1000), est_log(m)));
    }

    #[test]
    fn test_in_list_on_tiny_analyzed_index_keeps_seeks() {
        let m = log_est(3);
        assert!(est_log(m) < 10);
        assert!(!in_scan_preferred(true, m, log_est(100), est_log(m)));
    }

    #[test]
    fn test_no_skip_scan_without_statistics() {
        let mut t = abc("t");
        t.add_index(Index::new("ab", "t").with_column(0).with_column(1));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 1), Expr::int(4)));
        let loops = f.build(&wc, None);
        assert!(loops.iter().all(|l| !l.flags.contains(WsFlags::SKIPSCAN)));
    }

    #[test]
    fn test_in_list_on_index() {
        let mut t = abc("t");
        t.add_index(Index::new("ia", "t").with_column(0));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let e = Expr::in_list(
            Expr::column(0, tab, 0),
            vec![Expr::int(1), Expr::int(2), Expr::int(3)],
        );
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        let lp = loops
            .iter()
            .find(|l| l.flags.contains(WsFlags::COLUMN_IN))
            .unwrap();
        assert_eq!(lp.n_eq(), 1);
        assert!(lp.n_out < 199);
    }

    #[test]
    fn test_or_union_loop() {
        let mut t = abc("t");
        t.add_index(Index::new("ia", "t").with_column(0));
        t.add_index(Index::new("ib", "t").with_column(1));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let e = Expr::or(
            Expr::eq(Expr::column(0, tab, 0), Expr::int(1)),
            Expr::eq(Expr::column(0, tab, 1), Expr::int(2)),
        );
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        let lp = loops
            .iter()
            .find(|l| l.flags.contains(WsFlags::MULTI_OR))
            .unwrap();
        assert_eq!(lp.terms.len(), 1);
        assert!(lp.run < SCAN_RUN);
    }

    #[test]
    fn test_budget_exhaustion_truncates_search() {
        let mut t = abc("t");
        t.add_index(Index::new("ia", "t").with_column(0));
        let mut f = Fixture::new(vec![t]);
        f.config.search_budget = 1 - PLAN_LIMIT_INCR;
        let tab = f.table(0);
        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 0), Expr::int(1)));
        let loops = f.build(&wc, None);
        assert_eq!(loops.len(), 1);
    }

    #[test]
    fn test_order_by_gives_sort_index() {
        let mut t = abc("t");
        t.add_index(Index::new("ib", "t").with_column(1));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);
        let ob = vec![OrderingTerm::asc(Expr::column(0, tab, 1))];
        let wc = WhereClause::new(BinaryOp::And);
        let loops = f.build(&wc, Some(&ob));
        let lp = loops
            .iter()
            .find(|l| l.index().map_or(false, |i| i.name == "ib"))
            .unwrap();
        assert_eq!(lp.sort_idx, 2);
        assert!(has_full_scan(&loops, 0));
    }

    #[test]
    fn test_partial_index_requires_implied_predicate() {
        let mut t = abc("t");
        let pred = Expr::binary(BinaryOp::Gt, Expr::column(-1, &t, 1), Expr::int(0));
        t.add_index(Index::new("pa", "t").with_column(0).with_partial(pred.clone()));
        let f = Fixture::new(vec![t]);
        let tab = f.table(0);

        let wc = f.analyze(&Expr::eq(Expr::column(0, tab, 0), Expr::int(1)));
        let loops = f.build(&wc, None);
        assert!(loops.iter().all(|l| l.index().is_none()));

        let e = Expr::and(
            Expr::eq(Expr::column(0, tab, 0), Expr::int(1)),
            Expr::binary(BinaryOp::Gt, Expr::column(0, tab, 1), Expr::int(0)),
        );
        let wc = f.analyze(&e);
        let loops = f.build(&wc, None);
        assert!(loops.iter().any(|l| l.index().map_or(false, |i| i.name == "pa")));
    }

    #[test]
    fn test_expr_implies_not_null() {
        let t = abc("t");
        let nn = Expr::is_not_null(Expr::column(-1, &t, 0));
        let cmp = Expr::binary(BinaryOp::Lt, Expr::column(4, &t, 0), Expr::int(3));
        assert!(expr_implies_expr(&cmp, &nn, 4));
        let is_null = Expr::is_null(Expr::column(4, &t, 0));
        assert!(!expr_implies_expr(&is_null, &nn, 4));
    }

    #[test]
    fn test_or_set_keeps_cheapest() {
        let mut set = OrSet::default();
        assert!(set.insert(0, 50, 20));
        // Same prerequisites and dearer: rejected
        assert!(!set.insert(0, 60, 10));
        // Cheaper: replaces in place and keeps the smaller row count
        assert!(set.insert(0, 40, 30));
        assert_eq!(set.costs.len(), 1);
        assert_eq!(set.costs[0].run, 40);
        assert_eq!(set.costs[0].n_out, 20);
    }

    #[test]
    fn test_cheaper_proper_subset() {
        let mut x = WhereLoop::new(0, 1);
        x.terms = vec![Some(TermRef::new(0))];
        x.run = 30;
        x.n_out = 10;
        let mut y = WhereLoop::new(0, 1);
        y.terms = vec![Some(TermRef::new(0)), Some(TermRef::new(1))];
        y.run = 40;
        y.n_out = 10;
        assert!(cheaper_proper_subset(&x, &y));
        assert!(!cheaper_proper_subset(&y, &x));
        x.flags = WsFlags::IDX_ONLY;
        assert!(!cheaper_proper_subset(&x, &y));
    }
}
