//! WHERE clause planning
//!
//! `begin_plan` is the entry point of the planner. It splits the WHERE
//! clause into terms, generates candidate loops for every table, picks the
//! cheapest join order and emits the code that opens the cursors and enters
//! one nested loop per table. The caller then emits the loop body and calls
//! [`WhereInfo::end`] to close the loops again.
//!
//! ```text
//! begin_plan:   foreach row1 in t1 do
//!                 foreach row2 in t2 do
//! (caller)          ... loop body ...
//! end:            end
//!               end
//! ```

use std::sync::Arc;

use bitflags::bitflags;

use crate::config::PlannerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{Expr, InList, IndexedBy, OrderingTerm, SrcItem, SrcList, ROWID_COLUMN};
use crate::schema::{Index, Table};
use crate::util::LogEst;
use crate::vdbe::ops::SEEK_EQ;
use crate::vdbe::{KeyInfo, Opcode, ProgramBuilder, P4};

use super::where_explain::{explain_one_scan, ScanStatus};
use super::where_expr::{
    find_term, AnalyzeContext, ClauseChain, OperatorMask, TermFlags, WhereClause, WhereTerm,
};
use super::where_loop::{columns_not_indexed, index_column_not_null, index_uniq_not_null, LoopBuilder, WhereLoop, WsFlags};
use super::where_mask::{Bitmask, MaskSet, ALL_BITS, BMS};
use super::where_path::{nn_collation, PathSolver, Solution};

// ============================================================================
// Control flags and outputs
// ============================================================================

bitflags! {
    /// Flags passed to `begin_plan` by the statement compiler
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct WhereFlags: u16 {
        /// ORDER BY is processing for min()
        const ORDERBY_MIN = 0x0001;
        /// ORDER BY is processing for max()
        const ORDERBY_MAX = 0x0002;
        /// Want to do a one-pass UPDATE/DELETE
        const ONEPASS_DESIRED = 0x0004;
        /// One-pass is fine even when several rows match
        const ONEPASS_MULTIROW = 0x0008;
        /// Caller tolerates the same row more than once
        const DUPLICATES_OK = 0x0010;
        /// Planning one disjunct of an OR-union scan
        const OR_SUBCLAUSE = 0x0020;
        /// The ORDER BY is really a GROUP BY
        const GROUPBY = 0x0040;
        /// The ORDER BY is the result set, standing in for DISTINCT
        const DISTINCTBY = 0x0080;
        /// Caller wants DISTINCT rows
        const WANT_DISTINCT = 0x0100;
        /// Rows come out sorted by the GROUP BY
        const SORTBYGROUP = 0x0200;
        /// Cursors are opened and closed by the caller
        const OMIT_OPEN_CLOSE = 0x0400;
        /// ORDER BY plus LIMIT on the innermost loop
        const ORDERBY_LIMIT = 0x0800;
        /// Only plan the first table of the FROM clause
        const ONETABLE_ONLY = 0x1000;
        /// Credit the LIMIT when costing a sort
        const USE_LIMIT = 0x4000;
    }
}

/// How the plan relates to a requested DISTINCT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistinctKind {
    /// DISTINCT still needs a full duplicate check
    #[default]
    Noop,
    /// Rows are unique without any check
    Unique,
    /// Duplicates arrive next to each other
    Ordered,
    /// Duplicates may arrive anywhere
    Unordered,
}

/// One-pass mode for UPDATE and DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnePass {
    #[default]
    Off,
    /// At most one row is visited
    Single,
    /// Several rows, but modifying them does not disturb the scan
    Multi,
}

// ============================================================================
// Levels
// ============================================================================

/// Bookkeeping for one IN operator driving a level
#[derive(Debug, Clone)]
pub struct InLoop {
    /// Cursor over the IN right-hand side
    pub cursor: i32,
    /// Address of the instruction reading the next value
    pub addr_in_top: i32,
    /// Next, Prev or Noop
    pub end_op: Opcode,
    /// First register of the key prefix, for the early-out check
    pub base: i32,
    /// Key columns before this IN, for the early-out check
    pub n_prefix: i32,
}

/// The materialized decision for one table of the join
#[derive(Debug, Clone)]
pub struct WhereLevel {
    /// The winning loop, moved out of the candidate list
    pub lp: WhereLoop,
    /// Position of the table in the FROM clause
    pub from: usize,
    pub tab_cur: i32,
    pub idx_cur: i32,
    /// Register flagging "some row matched" for a LEFT JOIN; 0 otherwise
    pub left_join: i32,
    /// Jump here to leave the loop
    pub addr_brk: i32,
    /// Jump here to move to the next IN value (same as `addr_brk` without IN)
    pub addr_nxt: i32,
    /// Skip-scan re-seek instruction, 0 if none
    pub addr_skip: i32,
    /// Jump here to continue with the next row
    pub addr_cont: i32,
    /// First instruction after the LEFT JOIN match flag is set
    pub addr_first: i32,
    /// First instruction of the loop proper
    pub addr_body: i32,
    /// Instruction counting rows visited
    pub addr_visit: i32,
    /// Top of the LIKE range loop, 0 if none
    pub addr_like_rep: i32,
    /// LIKE counter register times two, low bit set for a descending scan
    pub like_rep_cntr: u32,
    /// Instruction that advances the loop
    pub op: Opcode,
    pub p1: i32,
    pub p2: i32,
    pub p3: i32,
    pub p5: u16,
    pub in_loops: Vec<InLoop>,
    /// Tables not yet bound once this level is running
    pub not_ready: Bitmask,
    /// Index shared by every disjunct of an OR-union scan
    pub cov_idx: Option<Arc<Index>>,
}

impl WhereLevel {
    fn new(lp: WhereLoop, tab_cur: i32) -> Self {
        WhereLevel {
            from: lp.tab,
            lp,
            tab_cur,
            idx_cur: -1,
            left_join: 0,
            addr_brk: 0,
            addr_nxt: 0,
            addr_skip: 0,
            addr_cont: 0,
            addr_first: 0,
            addr_body: 0,
            addr_visit: 0,
            addr_like_rep: 0,
            like_rep_cntr: 0,
            op: Opcode::Noop,
            p1: 0,
            p2: 0,
            p3: 0,
            p5: 0,
            in_loops: Vec::new(),
            not_ready: 0,
            cov_idx: None,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Everything `begin_plan` needs from the statement compiler
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub src: &'a SrcList,
    pub where_expr: Option<&'a Expr>,
    pub order_by: Option<&'a [OrderingTerm]>,
    pub result_set: Option<&'a [Expr]>,
    pub flags: WhereFlags,
    /// LIMIT as a log estimate, used with `WhereFlags::USE_LIMIT`
    pub limit: Option<LogEst>,
    /// Times the statement is expected to run (correlated subqueries)
    pub query_loop: LogEst,
    /// First index cursor for one-pass, or the shared cursor of an
    /// OR-union scan
    pub aux_cursor: i32,
    /// Explain instruction that scans of this plan hang under
    pub explain_parent: i32,
}

impl<'a> PlanRequest<'a> {
    pub fn new(src: &'a SrcList) -> Self {
        PlanRequest {
            src,
            where_expr: None,
            order_by: None,
            result_set: None,
            flags: WhereFlags::empty(),
            limit: None,
            query_loop: 0,
            aux_cursor: 0,
            explain_parent: 0,
        }
    }

    pub fn with_where(mut self, expr: &'a Expr) -> Self {
        self.where_expr = Some(expr);
        self
    }

    pub fn with_order_by(mut self, order_by: &'a [OrderingTerm]) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_result_set(mut self, result_set: &'a [Expr]) -> Self {
        self.result_set = Some(result_set);
        self
    }

    pub fn with_flags(mut self, flags: WhereFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_limit(mut self, limit: LogEst) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Plan handle
// ============================================================================

/// State carried from `begin_plan` to `WhereInfo::end`
#[derive(Debug)]
pub struct WhereInfo {
    pub(super) src: SrcList,
    pub(super) wc: WhereClause,
    pub(super) mask_set: MaskSet,
    pub(super) order_by: Option<Vec<OrderingTerm>>,
    pub(super) wctrl: WhereFlags,
    pub(super) levels: Vec<WhereLevel>,
    pub(super) n_row_out: LogEst,
    pub(super) n_ob_sat: i8,
    pub(super) rev_mask: Bitmask,
    pub(super) distinct: DistinctKind,
    pub(super) one_pass: OnePass,
    pub(super) one_pass_cursors: [i32; 2],
    pub(super) ordered_inner_loop: bool,
    pub(super) sorted: bool,
    pub(super) untested_terms: bool,
    pub(super) break_label: i32,
    pub(super) continue_label: i32,
    pub(super) top_addr: i32,
    pub(super) explain_parent: i32,
    pub(super) scan_status: Vec<ScanStatus>,
}

impl WhereInfo {
    /// Leading ORDER BY terms the loops deliver in order. The caller only
    /// sorts on the remaining terms.
    pub fn n_ob_sat(&self) -> i8 {
        self.n_ob_sat
    }

    /// Estimated number of output rows, as a log estimate
    pub fn output_row_count(&self) -> LogEst {
        self.n_row_out
    }

    pub fn distinct(&self) -> DistinctKind {
        self.distinct
    }

    /// Levels run in reverse, by level number
    pub fn rev_mask(&self) -> Bitmask {
        self.rev_mask
    }

    /// Label that continues with the next row of the innermost loop
    pub fn continue_label(&self) -> i32 {
        self.continue_label
    }

    /// Label that leaves all loops
    pub fn break_label(&self) -> i32 {
        self.break_label
    }

    /// One-pass mode, with the table and index cursors the caller may
    /// modify. A cursor is -1 when not used.
    pub fn one_pass(&self) -> (OnePass, [i32; 2]) {
        (self.one_pass, self.one_pass_cursors)
    }

    /// True when the ORDER BY holds within each run of the innermost loop
    pub fn ordered_inner_loop(&self) -> bool {
        self.ordered_inner_loop
    }

    /// True when GROUP BY output also satisfies the ORDER BY
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Some terms refer to tables outside this plan and were not tested
    pub fn untested_terms(&self) -> bool {
        self.untested_terms
    }

    pub fn levels(&self) -> &[WhereLevel] {
        &self.levels
    }

    /// First instruction after the cursors were opened
    pub fn top_addr(&self) -> i32 {
        self.top_addr
    }

    /// Scan-status records for every level, including OR-union disjuncts
    pub fn scan_status(&self) -> &[ScanStatus] {
        &self.scan_status
    }

    /// The table list as planned, with column usage filled in
    pub fn src(&self) -> &SrcList {
        &self.src
    }

    /// The analyzed WHERE terms, with `TermFlags::CODED` set on those the
    /// loops already test
    pub fn clause(&self) -> &WhereClause {
        &self.wc
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Plan the WHERE clause of a statement and emit the code that enters the
/// nested loops. Everything after this call up to [`WhereInfo::end`] runs
/// once per output row.
pub fn begin_plan(b: &mut ProgramBuilder, config: &PlannerConfig, req: PlanRequest<'_>) -> Result<WhereInfo> {
    let mut wctrl = req.flags;
    if req.src.len() > BMS {
        return Err(Error::with_message(
            ErrorCode::Error,
            format!("at most {} tables in a join", BMS),
        ));
    }
    let mut order_by = match req.order_by {
        Some(ob) if ob.len() >= BMS => {
            tracing::debug!(n_term = ob.len(), "where.order_by.ignored");
            None
        }
        Some(ob) => Some(ob.to_vec()),
        None => None,
    };
    let n_tab_list = if wctrl.intersects(WhereFlags::OR_SUBCLAUSE | WhereFlags::ONETABLE_ONLY) {
        req.src.len().min(1)
    } else {
        req.src.len()
    };

    let mut src = req.src.clone();
    for item in &src.items {
        if let Some(IndexedBy::Index(name)) = &item.indexed_by {
            if item.table.find_index(name).is_none() {
                return Err(Error::with_message(ErrorCode::Error, format!("no such index: {}", name)));
            }
        }
    }
    if let Some(e) = req.where_expr {
        src.note_columns(e);
    }
    for e in req.order_by.into_iter().flatten().map(|t| &t.expr).chain(req.result_set.into_iter().flatten()) {
        src.note_columns(e);
    }
    let or_subclause = wctrl.contains(WhereFlags::OR_SUBCLAUSE);
    for item in &src.items {
        if item.table.is_virtual() {
            b.mark_virtual_cursor(item.cursor);
        }
    }

    let mut mask_set = MaskSet::new();
    for item in &src.items {
        mask_set.bit_for(item.cursor);
    }

    // Split the WHERE clause, ON clauses included, into terms
    let mut wc = WhereClause::new(crate::parser::ast::BinaryOp::And);
    if let Some(e) = req.where_expr {
        wc.split(e);
    }
    if !or_subclause {
        for item in &src.items {
            if let Some(on) = &item.on_clause {
                let join_cursor = item.join_type.is_left().then_some(item.cursor);
                wc.split_join(on, join_cursor);
            }
            wc.add_func_args(item)?;
        }
    }
    let ctx = AnalyzeContext {
        mask_set: &mask_set,
        src: &src,
        config,
    };
    wc.analyze_all(&ctx)?;

    let break_label = b.make_label();
    let mut info = WhereInfo {
        src,
        wc,
        mask_set,
        order_by: None,
        wctrl,
        levels: Vec::new(),
        n_row_out: 0,
        n_ob_sat: 0,
        rev_mask: 0,
        distinct: DistinctKind::Noop,
        one_pass: OnePass::Off,
        one_pass_cursors: [-1, -1],
        ordered_inner_loop: false,
        sorted: false,
        untested_terms: false,
        break_label,
        continue_label: break_label,
        top_addr: 0,
        explain_parent: req.explain_parent,
        scan_status: Vec::new(),
    };

    if n_tab_list == 0 {
        if let Some(ob) = &order_by {
            info.n_ob_sat = ob.len() as i8;
        }
        if wctrl.contains(WhereFlags::WANT_DISTINCT) {
            info.distinct = DistinctKind::Unique;
        }
    }

    // Terms that use no table at all are tested once, up front
    for i in 0..info.wc.n_base {
        let term = &info.wc.terms[i];
        if term.is_virtual() {
            continue;
        }
        if n_tab_list == 0 || is_constant_not_join(term) {
            b.jump_if_false(&term.expr, break_label, true)?;
            info.wc.terms[i].flags |= TermFlags::CODED;
        }
    }

    if wctrl.contains(WhereFlags::WANT_DISTINCT) {
        if let Some(rs) = req.result_set {
            if distinct_redundant(&info.src, &info.wc, rs) {
                wctrl.remove(WhereFlags::WANT_DISTINCT);
                info.distinct = DistinctKind::Unique;
            } else if order_by.is_none() {
                wctrl.insert(WhereFlags::DISTINCTBY);
                order_by = Some(rs.iter().cloned().map(OrderingTerm::asc).collect());
            }
        }
    }
    info.wctrl = wctrl;

    let mut sol = Solution {
        distinct: info.distinct,
        n_ob_sat: info.n_ob_sat,
        ..Solution::default()
    };
    let mut loops: Vec<WhereLoop> = Vec::new();
    if n_tab_list > 0 {
        let shortcut = if n_tab_list == 1 {
            short_cut(&info.src, &info.mask_set, &info.wc, wctrl)
        } else {
            None
        };
        match shortcut {
            Some(lp) => {
                tracing::debug!(table = %info.src.items[0].table.name, flags = ?lp.flags, "where.shortcut");
                loops.push(lp);
                sol.loops = vec![0];
                sol.n_row_out = 1;
                if let Some(ob) = &order_by {
                    sol.n_ob_sat = ob.len() as i8;
                }
                if wctrl.contains(WhereFlags::WANT_DISTINCT) {
                    sol.distinct = DistinctKind::Unique;
                }
            }
            None => {
                let chain = ClauseChain::new(&info.wc);
                let mut builder = LoopBuilder::new(
                    config,
                    &info.src,
                    &info.mask_set,
                    &chain,
                    order_by.as_deref(),
                    wctrl,
                );
                builder.add_all(n_tab_list)?;
                loops = builder.into_loops();
                let solver = PathSolver {
                    config,
                    src: &info.src,
                    mask_set: &info.mask_set,
                    chain: &chain,
                    loops: &loops,
                    order_by: order_by.as_deref(),
                    result_set: req.result_set,
                    wctrl,
                    n_level: n_tab_list,
                    limit: req.limit,
                    query_loop: req.query_loop,
                    distinct: info.distinct,
                };
                sol = solver.solve(0)?;
                if order_by.is_some() {
                    sol = solver.solve(sol.n_row_out + 1)?;
                }
            }
        }
    }
    info.n_row_out = sol.n_row_out;
    info.n_ob_sat = sol.n_ob_sat;
    info.rev_mask = sol.rev_mask;
    info.distinct = sol.distinct;
    info.ordered_inner_loop = sol.ordered_inner_loop;
    info.sorted = sol.sorted;
    if order_by.is_none() && config.reverse_unordered_selects {
        info.rev_mask = ALL_BITS;
    }
    info.order_by = order_by;

    let mut pool: Vec<Option<WhereLoop>> = loops.into_iter().map(Some).collect();
    for &i in &sol.loops {
        let lp = pool
            .get_mut(i)
            .and_then(Option::take)
            .ok_or_else(|| Error::new(ErrorCode::Internal))?;
        let tab_cur = info.src.items[lp.tab].cursor;
        info.levels.push(WhereLevel::new(lp, tab_cur));
    }
    if tracing::enabled!(tracing::Level::DEBUG) {
        let order: Vec<&str> = info
            .levels
            .iter()
            .map(|l| info.src.items[l.from].display_name())
            .collect();
        tracing::debug!(
            order = ?order,
            n_row_out = info.n_row_out,
            n_ob_sat = info.n_ob_sat,
            distinct = ?info.distinct,
            "where.plan.chosen"
        );
    }

    let mut not_ready = ALL_BITS;
    if config.omit_noop_join {
        if let Some(rs) = req.result_set {
            let order_by = info.order_by.clone();
            not_ready &= omit_noop_joins(&mut info, rs, order_by.as_deref());
        }
    }

    if wctrl.contains(WhereFlags::ONEPASS_DESIRED) {
        if let Some(level) = info.levels.first_mut() {
            let ws = level.lp.flags;
            let one_row = ws.contains(WsFlags::ONEROW);
            let table = &info.src.items[level.from].table;
            if one_row
                || (wctrl.contains(WhereFlags::ONEPASS_MULTIROW)
                    && !table.is_virtual()
                    && (!ws.contains(WsFlags::MULTI_OR) || wctrl.contains(WhereFlags::DUPLICATES_OK)))
            {
                info.one_pass = if one_row { OnePass::Single } else { OnePass::Multi };
                level.lp.flags.remove(WsFlags::IDX_ONLY);
                tracing::debug!(mode = ?info.one_pass, "where.onepass");
            }
        }
    }

    open_cursors(b, &mut info, req.aux_cursor);
    info.top_addr = b.current_addr();

    for ii in 0..info.levels.len() {
        if info.levels[ii].lp.flags.contains(WsFlags::AUTO_INDEX) {
            info.construct_auto_index(b, ii, not_ready)?;
        }
        let addr_explain = explain_one_scan(b, &info.src, &info.levels[ii], wctrl, info.explain_parent);
        info.levels[ii].addr_body = b.current_addr();
        not_ready = info.code_one_loop_start(b, config, ii, not_ready)?;
        let level = &info.levels[ii];
        info.continue_label = level.addr_cont;
        if !level.lp.flags.contains(WsFlags::MULTI_OR) && !wctrl.contains(WhereFlags::OR_SUBCLAUSE) {
            let status = ScanStatus::new(&info.src, level, addr_explain);
            info.scan_status.push(status);
        }
    }
    Ok(info)
}

/// Open the table and index cursors the chosen loops read
fn open_cursors(b: &mut ProgramBuilder, info: &mut WhereInfo, aux_cursor: i32) {
    let wctrl = info.wctrl;
    for level in &mut info.levels {
        let item = &info.src.items[level.from];
        let table: &Table = &item.table;
        let lp = &level.lp;
        if lp.flags.contains(WsFlags::VIRTUALTABLE) {
            b.add_op4(Opcode::VOpen, item.cursor, 0, 0, P4::Table(table.name.clone()));
        } else if table.is_virtual() {
            // Opened by whoever planned the virtual table
        } else if !lp.flags.contains(WsFlags::IDX_ONLY)
            && !wctrl.intersects(WhereFlags::OR_SUBCLAUSE | WhereFlags::OMIT_OPEN_CLOSE)
        {
            let op = if info.one_pass != OnePass::Off {
                info.one_pass_cursors[0] = item.cursor;
                Opcode::OpenWrite
            } else {
                Opcode::OpenRead
            };
            b.add_op(op, item.cursor, table.root_page as i32, 0);
            b.comment(table.name.clone());
            if info.one_pass == OnePass::Off && table.columns.len() < BMS {
                // Highest column read, so the cursor can stop decoding early
                let n_col = 64 - item.col_used.leading_zeros() as i64;
                if let Some(open) = b.op_mut(b.current_addr() - 1) {
                    open.p4 = P4::Int64(n_col);
                }
                b.add_op4(Opcode::ColumnsUsed, item.cursor, 0, 0, P4::Int64(item.col_used as i64));
            }
        }
        if lp.flags.contains(WsFlags::INDEXED) {
            let Some(index) = lp.index() else {
                continue;
            };
            let (idx_cur, op) = if info.one_pass != OnePass::Off {
                let pos = table
                    .indexes
                    .iter()
                    .position(|ix| Arc::ptr_eq(ix, index))
                    .unwrap_or(0);
                let cur = aux_cursor + pos as i32;
                info.one_pass_cursors[1] = cur;
                (cur, Opcode::OpenWrite)
            } else if aux_cursor != 0 && wctrl.contains(WhereFlags::OR_SUBCLAUSE) {
                (aux_cursor, Opcode::ReopenIdx)
            } else {
                (b.alloc_cursor(), Opcode::OpenRead)
            };
            level.idx_cur = idx_cur;
            b.add_op4(op, idx_cur, index.root_page as i32, 0, P4::KeyInfo(Arc::new(index_key_info(index))));
            if lp.flags.intersects(WsFlags::CONSTRAINT)
                && !lp.flags.intersects(WsFlags::COLUMN_RANGE | WsFlags::SKIPSCAN)
                && !wctrl.contains(WhereFlags::ORDERBY_MIN)
            {
                b.change_p5(SEEK_EQ);
            }
            b.comment(index.name.clone());
        }
    }
}

/// Key description of an index: its key columns then the rowid
pub(super) fn index_key_info(index: &Index) -> KeyInfo {
    let n = index.n_column();
    let mut key = KeyInfo::new(n);
    for i in 0..index.n_key_col() {
        key.collations[i] = index.collation_at(i).to_string();
        key.sort_orders[i] = index.sort_order_at(i).is_desc();
    }
    key.n_key_field = index.n_key_col() as u16;
    key
}

/// True for a term that reads no column, runs no subquery, calls nothing
/// volatile and did not come from an ON clause
fn is_constant_not_join(term: &WhereTerm) -> bool {
    if term.is_from_join() {
        return false;
    }
    let mut ok = true;
    term.expr.walk(&mut |e| match e {
        Expr::Column(_) | Expr::Subquery(_) | Expr::Exists { .. } => ok = false,
        Expr::In {
            list: InList::Subquery(_),
            ..
        } => ok = false,
        Expr::Function(call) => {
            let name = call.name.to_ascii_lowercase();
            if matches!(
                name.as_str(),
                "random" | "randomblob" | "changes" | "total_changes" | "last_insert_rowid"
            ) {
                ok = false;
            }
        }
        _ => {}
    });
    ok
}

// ============================================================================
// Short-cut planner
// ============================================================================

/// Longest unique key the short-cut planner considers
const SHORTCUT_MAX_KEY: usize = 3;

/// For a single table with a rowid equality, or with a unique index whose
/// every column is pinned by `=`, the answer is obvious and the general
/// search is skipped.
fn short_cut(src: &SrcList, mask_set: &MaskSet, wc: &WhereClause, wctrl: WhereFlags) -> Option<WhereLoop> {
    if wctrl.contains(WhereFlags::OR_SUBCLAUSE) {
        return None;
    }
    let item: &SrcItem = src.items.first()?;
    let table: &Table = &item.table;
    if table.is_virtual() || item.indexed_by.is_some() {
        return None;
    }
    let cursor = item.cursor;
    let chain = ClauseChain::new(wc);
    let mut lp = WhereLoop::new(0, mask_set.get_mask(cursor));

    if let Some(r) = find_term(&chain, cursor, ROWID_COLUMN, 0, OperatorMask::EQ | OperatorMask::IS, None) {
        lp.flags = WsFlags::COLUMN_EQ | WsFlags::IPK | WsFlags::ONEROW;
        lp.terms = vec![Some(r)];
        lp.btree_mut().n_eq = 1;
        // A rowid lookup costs about 10
        lp.run = 33;
    } else {
        for index in &table.indexes {
            if !index.is_unique() || index.partial.is_some() || index.n_key_col() > SHORTCUT_MAX_KEY {
                continue;
            }
            let op = if index_uniq_not_null(index, table) {
                OperatorMask::EQ | OperatorMask::IS
            } else {
                OperatorMask::EQ
            };
            let terms: Option<Vec<_>> = (0..index.n_key_col())
                .map(|j| find_term(&chain, cursor, j as i32, 0, op, Some((index.as_ref(), table))))
                .collect();
            let Some(terms) = terms else {
                continue;
            };
            lp.flags = WsFlags::COLUMN_EQ | WsFlags::ONEROW | WsFlags::INDEXED;
            if index.is_covering || item.col_used & columns_not_indexed(index) == 0 {
                lp.flags |= WsFlags::IDX_ONLY;
            }
            lp.terms = terms.into_iter().map(Some).collect();
            let bt = lp.btree_mut();
            bt.n_eq = index.n_key_col() as u16;
            bt.index = Some(index.clone());
            // A unique index lookup costs about 15
            lp.run = 39;
            break;
        }
    }
    if lp.flags.is_empty() {
        return None;
    }
    lp.n_out = 1;
    Some(lp)
}

// ============================================================================
// DISTINCT and no-op joins
// ============================================================================

/// True if the result set of a single-table query is unique already: it
/// holds the rowid, or every column of some unique index is either in the
/// result set or pinned by `=`.
fn distinct_redundant(src: &SrcList, wc: &WhereClause, distinct: &[Expr]) -> bool {
    if src.len() != 1 {
        return false;
    }
    let item = &src.items[0];
    let base = item.cursor;
    let table: &Table = &item.table;
    let is_base_col = |e: &Expr, column: i32| {
        matches!(e.skip_collate_and_likely().as_column(), Some(c) if c.cursor == base && c.column == column)
    };
    if distinct.iter().any(|e| is_base_col(e, ROWID_COLUMN)) {
        return true;
    }
    let chain = ClauseChain::new(wc);
    table.indexes.iter().filter(|ix| ix.is_unique()).any(|index| {
        (0..index.n_key_col()).all(|i| {
            if find_term(&chain, base, i as i32, ALL_BITS, OperatorMask::EQ, Some((index.as_ref(), table))).is_some() {
                return true;
            }
            let column = index.column_at(i);
            let in_list = distinct.iter().any(|e| {
                is_base_col(e, column) && nn_collation(e).eq_ignore_ascii_case(index.collation_at(i))
            });
            in_list && index_column_not_null(index, table, i)
        })
    })
}

/// Drop LEFT JOIN tables that nothing outside their own ON clause uses and
/// that cannot change the row count. Returns the not-ready mask with the
/// dropped tables cleared.
fn omit_noop_joins(info: &mut WhereInfo, result_set: &[Expr], order_by: Option<&[OrderingTerm]>) -> Bitmask {
    let mut not_ready = ALL_BITS;
    if info.levels.len() < 2 {
        return not_ready;
    }
    let mut tab_used = info.mask_set.list_usage(result_set);
    if let Some(ob) = order_by {
        for t in ob {
            tab_used |= info.mask_set.expr_usage(&t.expr);
        }
    }
    for i in (1..info.levels.len()).rev() {
        let lp = &info.levels[i].lp;
        let item = &info.src.items[lp.tab];
        if !item.join_type.is_left() {
            continue;
        }
        if !info.wctrl.contains(WhereFlags::WANT_DISTINCT) && !lp.flags.contains(WsFlags::ONEROW) {
            continue;
        }
        if tab_used & lp.mask_self != 0 {
            continue;
        }
        let mask_self = lp.mask_self;
        let used_elsewhere = info
            .wc
            .terms
            .iter()
            .any(|t| t.prereq_all & mask_self != 0 && t.join_cursor != Some(item.cursor));
        if used_elsewhere {
            continue;
        }
        tracing::debug!(table = %item.display_name(), "where.noop_join.omitted");
        not_ready &= !mask_self;
        for t in info.wc.terms.iter_mut() {
            if t.prereq_all & mask_self != 0 {
                t.flags |= TermFlags::CODED;
            }
        }
        info.levels.remove(i);
    }
    not_ready
}

// ============================================================================
// Loop close
// ============================================================================

impl WhereInfo {
    /// Emit the end of every loop, innermost first, then point table
    /// column reads in the loop bodies at covering indexes.
    pub fn end(mut self, b: &mut ProgramBuilder) -> Result<()> {
        let n_level = self.levels.len();
        for i in (0..n_level).rev() {
            let level = &self.levels[i];
            let lp = &level.lp;
            if level.op != Opcode::Noop {
                let mut addr_seek = None;
                if self.distinct == DistinctKind::Ordered && i == n_level - 1 && lp.flags.contains(WsFlags::INDEXED) {
                    if let (Some(index), Some(bt)) = (lp.index(), lp.btree()) {
                        let n = bt.n_distinct_col.get() as usize;
                        let skip_ahead = index.stats.is_some()
                            && n > 0
                            && index.row_log_est.get(n).map_or(false, |&est| est >= 36);
                        if skip_ahead {
                            // Jump over the remaining duplicates of the DISTINCT key
                            let r1 = b.alloc_regs(n as i32 + 1);
                            for j in 0..n as i32 {
                                b.add_op(Opcode::Column, level.idx_cur, j, r1 + j);
                            }
                            let op = if level.op == Opcode::Prev {
                                Opcode::SeekLT
                            } else {
                                Opcode::SeekGT
                            };
                            addr_seek = Some(b.add_op4(op, level.idx_cur, 0, r1, P4::Int64(n as i64)));
                            b.add_op(Opcode::Goto, 1, level.p2, 0);
                        }
                    }
                }
                b.resolve_label(level.addr_cont);
                b.add_op(level.op, level.p1, level.p2, level.p3);
                b.change_p5(level.p5);
                if let Some(addr) = addr_seek {
                    b.jump_here(addr);
                }
            } else {
                b.resolve_label(level.addr_cont);
            }
            if lp.flags.contains(WsFlags::IN_ABLE) && !level.in_loops.is_empty() {
                b.resolve_label(level.addr_nxt);
                for in_loop in level.in_loops.iter().rev() {
                    b.jump_here(in_loop.addr_in_top + 1);
                    if in_loop.end_op != Opcode::Noop {
                        if in_loop.n_prefix > 0 {
                            let dest = b.current_addr() + 2;
                            b.add_op4(
                                Opcode::IfNoHope,
                                level.idx_cur,
                                dest,
                                in_loop.base,
                                P4::Int64(in_loop.n_prefix as i64),
                            );
                        }
                        b.add_op(in_loop.end_op, in_loop.cursor, in_loop.addr_in_top, 0);
                    }
                    b.jump_here(in_loop.addr_in_top - 1);
                }
            }
            b.resolve_label(level.addr_brk);
            if level.addr_skip != 0 {
                b.add_op(Opcode::Goto, 0, level.addr_skip, 0);
                if let Some(index) = lp.index() {
                    b.comment(format!("next skip-scan on {}", index.name));
                }
                b.jump_here(level.addr_skip);
                b.jump_here(level.addr_skip - 2);
            }
            if level.addr_like_rep != 0 {
                b.add_op(Opcode::DecrJumpZero, (level.like_rep_cntr >> 1) as i32, level.addr_like_rep, 0);
            }
            if level.left_join != 0 {
                let ws = lp.flags;
                let addr = b.add_op(Opcode::IfPos, level.left_join, 0, 0);
                if !ws.contains(WsFlags::IDX_ONLY) {
                    b.add_op(Opcode::NullRow, level.tab_cur, 0, 0);
                }
                if ws.contains(WsFlags::INDEXED) || (ws.contains(WsFlags::MULTI_OR) && level.cov_idx.is_some()) {
                    b.add_op(Opcode::NullRow, level.idx_cur, 0, 0);
                }
                if level.op == Opcode::Return {
                    b.add_op(Opcode::Gosub, level.p1, level.addr_first, 0);
                } else {
                    b.add_op(Opcode::Goto, 0, level.addr_first, 0);
                }
                b.jump_here(addr);
            }
        }
        b.resolve_label(self.break_label);

        for level in &self.levels {
            let table: &Table = &self.src.items[level.from].table;
            let ws = level.lp.flags;
            if !table.is_virtual() && !self.wctrl.intersects(WhereFlags::OMIT_OPEN_CLOSE | WhereFlags::OR_SUBCLAUSE) {
                if self.one_pass == OnePass::Off && !ws.contains(WsFlags::IDX_ONLY) {
                    b.add_op(Opcode::Close, level.tab_cur, 0, 0);
                }
                if ws.contains(WsFlags::INDEXED)
                    && !ws.intersects(WsFlags::IPK | WsFlags::AUTO_INDEX)
                    && level.idx_cur != self.one_pass_cursors[1]
                {
                    b.add_op(Opcode::Close, level.idx_cur, 0, 0);
                }
            }

            let index = if ws.intersects(WsFlags::INDEXED | WsFlags::IDX_ONLY) {
                level.lp.index().cloned()
            } else if ws.contains(WsFlags::MULTI_OR) {
                level.cov_idx.clone()
            } else {
                None
            };
            if let Some(index) = index {
                if self.one_pass == OnePass::Off {
                    rewrite_to_index(b, level, &index, table);
                }
            }
        }
        tracing::trace!(n_level, "where.end");
        self.levels.clear();
        Ok(())
    }
}

/// Point reads of the table cursor between the top of the level and the
/// end of the program at the index cursor, wherever the index holds the
/// column
fn rewrite_to_index(b: &mut ProgramBuilder, level: &WhereLevel, index: &Index, table: &Table) {
    let tab_cur = level.tab_cur;
    let idx_cur = level.idx_cur;
    for op in b.ops_from_mut(level.addr_body) {
        if op.p1 != tab_cur {
            continue;
        }
        match op.opcode {
            Opcode::Column => {
                let column = table.normalize_column(op.p2);
                if let Some(pos) = index.position_of(column) {
                    op.p2 = pos as i32;
                    op.p1 = idx_cur;
                }
            }
            Opcode::Rowid => {
                op.p1 = idx_cur;
                op.opcode = Opcode::IdxRowid;
            }
            Opcode::IfNullRow => op.p1 = idx_cur,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{BinaryOp, JoinFlags};
    use crate::schema::Column;

    fn abc(name: &str) -> Table {
        let mut t = Table::new(name);
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "INTEGER"));
        t.add_column(Column::new("c", "TEXT"));
        t
    }

    fn one_table(t: Table) -> SrcList {
        SrcList::new(vec![SrcItem::new(Arc::new(t), 0)])
    }

    fn opcodes(b: &ProgramBuilder) -> Vec<Opcode> {
        b.ops().iter().map(|op| op.opcode).collect()
    }

    #[test]
    fn test_full_scan_program_shape() {
        let src = one_table(abc("t"));
        let mut b = ProgramBuilder::with_cursors(1);
        let config = PlannerConfig::default();
        let info = begin_plan(&mut b, &config, PlanRequest::new(&src)).unwrap();
        assert_eq!(info.levels().len(), 1);
        let cont = info.continue_label();
        assert!(cont < 0);
        info.end(&mut b).unwrap();
        let ops = opcodes(&b);
        assert!(ops.contains(&Opcode::OpenRead));
        assert!(ops.contains(&Opcode::Rewind));
        assert!(ops.contains(&Opcode::Next));
        assert!(ops.contains(&Opcode::Close));
        b.finish().unwrap();
    }

    #[test]
    fn test_too_many_tables() {
        let t = Arc::new(abc("t"));
        let items = (0..65).map(|i| SrcItem::new(t.clone(), i)).collect();
        let src = SrcList::new(items);
        let mut b = ProgramBuilder::with_cursors(65);
        let err = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src)).unwrap_err();
        assert_eq!(err.to_string(), "at most 64 tables in a join");
    }

    #[test]
    fn test_unknown_indexed_by() {
        let mut item = SrcItem::new(Arc::new(abc("t")), 0);
        item.indexed_by = Some(IndexedBy::Index("nope".to_string()));
        let src = SrcList::new(vec![item]);
        let mut b = ProgramBuilder::with_cursors(1);
        let err = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src)).unwrap_err();
        assert_eq!(err.to_string(), "no such index: nope");
    }

    #[test]
    fn test_shortcut_on_rowid() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let w = Expr::eq(Expr::rowid(0, &table), Expr::int(7));
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        let lp = &info.levels()[0].lp;
        assert!(lp.flags.contains(WsFlags::IPK | WsFlags::ONEROW));
        assert_eq!(info.output_row_count(), 1);
        info.end(&mut b).unwrap();
        assert!(opcodes(&b).contains(&Opcode::SeekRowid));
    }

    #[test]
    fn test_shortcut_on_unique_index() {
        let mut t = abc("t");
        t.add_index(Index::new("tu", "t").with_column(1).unique());
        let src = one_table(t);
        let table = src.items[0].table.clone();
        let w = Expr::eq(Expr::column(0, &table, 1), Expr::int(3));
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        let lp = &info.levels()[0].lp;
        assert!(lp.flags.contains(WsFlags::ONEROW | WsFlags::INDEXED));
        assert_eq!(lp.index().map(|i| i.name.as_str()), Some("tu"));
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_constant_term_coded_once() {
        let src = one_table(abc("t"));
        let w = Expr::eq(Expr::int(1), Expr::int(2));
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        assert!(info.wc.terms[0].is_coded());
        // The constant test comes before the cursor is opened
        let first_open = b.ops().iter().position(|op| op.opcode == Opcode::OpenRead).unwrap();
        assert!(first_open > 0);
        assert_eq!(b.ops()[first_open - 1].p2, info.break_label());
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_distinct_on_rowid_is_unique() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let rs = vec![Expr::rowid(0, &table)];
        let mut b = ProgramBuilder::with_cursors(1);
        let req = PlanRequest::new(&src)
            .with_result_set(&rs)
            .with_flags(WhereFlags::WANT_DISTINCT);
        let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
        assert_eq!(info.distinct(), DistinctKind::Unique);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_distinct_on_plain_column_needs_check() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let rs = vec![Expr::column(0, &table, 2)];
        let mut b = ProgramBuilder::with_cursors(1);
        let req = PlanRequest::new(&src)
            .with_result_set(&rs)
            .with_flags(WhereFlags::WANT_DISTINCT);
        let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
        assert_eq!(info.distinct(), DistinctKind::Noop);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_noop_left_join_omitted() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let on = Expr::eq(Expr::rowid(1, &t2), Expr::column(0, &t1, 0));
        let mut right = SrcItem::new(t2.clone(), 1);
        right.join_type = JoinFlags::LEFT;
        right.on_clause = Some(on);
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
        let rs = vec![Expr::column(0, &t1, 2)];
        let mut b = ProgramBuilder::with_cursors(2);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_result_set(&rs)).unwrap();
        assert_eq!(info.levels().len(), 1);
        assert_eq!(info.levels()[0].from, 0);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_noop_left_join_omitted_when_wide_order_by_is_ignored() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let on = Expr::eq(Expr::rowid(1, &t2), Expr::column(0, &t1, 0));
        let mut right = SrcItem::new(t2.clone(), 1);
        right.join_type = JoinFlags::LEFT;
        right.on_clause = Some(on);
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
        let rs = vec![Expr::column(0, &t1, 2)];
        let ob: Vec<OrderingTerm> = (0..64).map(|_| OrderingTerm::asc(Expr::column(1, &t2, 1))).collect();
        let mut b = ProgramBuilder::with_cursors(2);
        let req = PlanRequest::new(&src).with_result_set(&rs).with_order_by(&ob);
        let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
        assert_eq!(info.levels().len(), 1);
        assert_eq!(info.levels()[0].from, 0);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_left_join_kept_when_ordered_by() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let on = Expr::eq(Expr::rowid(1, &t2), Expr::column(0, &t1, 0));
        let mut right = SrcItem::new(t2.clone(), 1);
        right.join_type = JoinFlags::LEFT;
        right.on_clause = Some(on);
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
        let rs = vec![Expr::column(0, &t1, 2)];
        let ob = vec![OrderingTerm::asc(Expr::column(1, &t2, 1))];
        let mut b = ProgramBuilder::with_cursors(2);
        let req = PlanRequest::new(&src).with_result_set(&rs).with_order_by(&ob);
        let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
        assert_eq!(info.levels().len(), 2);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_left_join_kept_when_used() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let on = Expr::eq(Expr::rowid(1, &t2), Expr::column(0, &t1, 0));
        let mut right = SrcItem::new(t2.clone(), 1);
        right.join_type = JoinFlags::LEFT;
        right.on_clause = Some(on);
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
        let rs = vec![Expr::column(1, &t2, 2)];
        let mut b = ProgramBuilder::with_cursors(2);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_result_set(&rs)).unwrap();
        assert_eq!(info.levels().len(), 2);
        assert!(info.levels()[1].left_join > 0);
        info.end(&mut b).unwrap();
        let ops = opcodes(&b);
        assert!(ops.contains(&Opcode::IfPos));
        assert!(ops.contains(&Opcode::NullRow));
    }

    #[test]
    fn test_one_pass_single_row() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let w = Expr::eq(Expr::rowid(0, &table), Expr::int(1));
        let mut b = ProgramBuilder::with_cursors(1);
        let req = PlanRequest::new(&src)
            .with_where(&w)
            .with_flags(WhereFlags::ONEPASS_DESIRED);
        let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
        assert_eq!(info.one_pass(), (OnePass::Single, [0, -1]));
        info.end(&mut b).unwrap();
        assert!(opcodes(&b).contains(&Opcode::OpenWrite));
    }

    #[test]
    fn test_reverse_unordered_selects() {
        let src = one_table(abc("t"));
        let config = PlannerConfig {
            reverse_unordered_selects: true,
            ..PlannerConfig::default()
        };
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &config, PlanRequest::new(&src)).unwrap();
        assert_eq!(info.rev_mask(), ALL_BITS);
        assert_eq!(info.levels()[0].op, Opcode::Prev);
        info.end(&mut b).unwrap();
        assert!(opcodes(&b).contains(&Opcode::Last));
    }

    #[test]
    fn test_covering_index_rewrites_column_reads() {
        let mut t = abc("t");
        t.add_index(Index::new("ta", "t").with_column(0).with_column(1));
        let src = one_table(t);
        let table = src.items[0].table.clone();
        let w = Expr::eq(Expr::column(0, &table, 0), Expr::int(5));
        let rs = vec![Expr::column(0, &table, 1)];
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(
            &mut b,
            &PlannerConfig::default(),
            PlanRequest::new(&src).with_where(&w).with_result_set(&rs),
        )
        .unwrap();
        let level = &info.levels()[0];
        assert!(level.lp.flags.contains(WsFlags::IDX_ONLY));
        let idx_cur = level.idx_cur;
        // Loop body reads column b through the table cursor
        let r = b.alloc_reg();
        b.add_op(Opcode::Column, 0, 1, r);
        let body = b.current_addr() - 1;
        info.end(&mut b).unwrap();
        let op = b.op(body).unwrap();
        assert_eq!((op.p1, op.p2), (idx_cur, 1));
    }

    #[test]
    fn test_wide_order_by_is_ignored() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let ob: Vec<OrderingTerm> = (0..64).map(|_| OrderingTerm::asc(Expr::column(0, &table, 0))).collect();
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_order_by(&ob)).unwrap();
        assert_eq!(info.n_ob_sat(), 0);
        assert!(info.order_by.is_none());
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_no_tables() {
        let src = SrcList::new(Vec::new());
        let w = Expr::binary(BinaryOp::Gt, Expr::variable(1), Expr::int(0));
        let mut b = ProgramBuilder::new();
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        assert!(info.levels().is_empty());
        assert!(info.wc.terms[0].is_coded());
        info.end(&mut b).unwrap();
        b.finish().unwrap();
    }
}
