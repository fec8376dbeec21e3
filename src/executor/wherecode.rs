//! Loop code generation
//!
//! `code_one_loop_start` emits the top of one nested loop of a plan: the
//! seek or rewind that positions the cursor, the range checks that end the
//! scan, and the residual WHERE terms that can be tested once this table's
//! row is available. `construct_auto_index` emits the one-time code that
//! fills a transient index before its loop starts.

use std::sync::Arc;

use crate::config::PlannerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{BinaryOp, Expr, InList, Literal, SrcList, UnaryOp, EXPR_COLUMN, ROWID_COLUMN};
use crate::schema::{Affinity, Index, IndexColumn, Table};
use crate::vdbe::ops::{affinity, cmp_flags};
use crate::vdbe::{affinity_p5, KeyInfo, Opcode, ProgramBuilder, P4};

use super::where_clause::{begin_plan, index_key_info, InLoop, OnePass, PlanRequest, WhereFlags, WhereInfo};
use super::where_explain::{explain_one_scan, explain_text, ScanStatus};
use super::where_expr::{find_term, term_collation, ClauseChain, OperatorMask, TermFlags, TermRef};
use super::where_loop::{expr_covered_by_index, term_can_drive_index, WhereLoop, WsFlags};
use super::where_mask::{Bitmask, BMS};

/// Statement counter bumped by each step of a full scan
pub const STMTSTATUS_FULLSCAN_STEP: u16 = 1;
/// Statement counter bumped by each row copied into an automatic index
pub const STMTSTATUS_AUTOINDEX: u16 = 3;
/// IdxInsert hint: the cursor is already positioned
const OPFLAG_USESEEKRESULT: u16 = 0x10;

/// Seek used to start an index scan, by
/// `start_constraints << 2 | start_eq << 1 | rev`
const START_OPS: [Option<Opcode>; 8] = [
    None,
    None,
    Some(Opcode::Rewind),
    Some(Opcode::Last),
    Some(Opcode::SeekGT),
    Some(Opcode::SeekLT),
    Some(Opcode::SeekGE),
    Some(Opcode::SeekLE),
];

/// Comparison that ends an index scan, by `rev << 1 | end_eq`
const END_OPS: [Opcode; 4] = [Opcode::IdxGE, Opcode::IdxGT, Opcode::IdxLE, Opcode::IdxLT];

fn internal(msg: &str) -> Error {
    Error::with_message(ErrorCode::Internal, msg)
}

/// Loops only ever reference terms of their own clause
fn term_slot(r: Option<TermRef>) -> Result<usize> {
    match r {
        Some(TermRef { depth: 0, idx }) => Ok(idx),
        _ => Err(internal("loop term outside its clause")),
    }
}

// ============================================================================
// Affinity strings
// ============================================================================

/// Affinity of each index position, rowid included
fn index_affinities(index: &Index, table: &Table) -> Vec<Affinity> {
    (0..index.n_column())
        .map(|i| match index.column_at(i) {
            EXPR_COLUMN => index
                .columns
                .get(i)
                .and_then(|c| c.expr.as_ref())
                .map_or(Affinity::Blob, Expr::affinity),
            ROWID_COLUMN => Affinity::Integer,
            col => table.column_affinity(col),
        })
        .collect()
}

/// True if converting `expr` to `aff` could never change its value, so
/// the Affinity instruction can skip it
fn needs_no_affinity_change(expr: &Expr, aff: Affinity) -> bool {
    if aff == Affinity::Blob {
        return true;
    }
    let mut e = expr.skip_collate();
    let mut unary = false;
    while let Expr::Unary {
        op: UnaryOp::Neg | UnaryOp::Pos,
        expr: inner,
    } = e
    {
        e = inner.skip_collate();
        unary = true;
    }
    match e {
        Expr::Literal(Literal::Integer(_)) | Expr::Literal(Literal::Float(_)) => aff.is_numeric(),
        Expr::Literal(Literal::String(_)) => !unary && aff == Affinity::Text,
        Expr::Literal(Literal::Blob(_)) => !unary,
        Expr::Column(c) => c.column == ROWID_COLUMN && aff.is_numeric(),
        _ => false,
    }
}

/// Emit an Affinity instruction over `affs`, dropping BLOB entries from
/// both ends
fn apply_affinity(b: &mut ProgramBuilder, mut base: i32, affs: &[Affinity]) {
    let mut s = affs;
    while s.first() == Some(&Affinity::Blob) {
        s = &s[1..];
        base += 1;
    }
    while s.last() == Some(&Affinity::Blob) {
        s = &s[..s.len() - 1];
    }
    if !s.is_empty() {
        let codes: String = s.iter().map(Affinity::code).collect();
        b.add_op4(Opcode::Affinity, base, s.len() as i32, 0, P4::Affinity(codes));
    }
}

/// Clear the affinity of range bound fields that need no conversion
fn update_range_affinity(rhs: &Expr, n: usize, affs: &mut [Affinity]) {
    for (i, aff) in affs.iter_mut().take(n).enumerate() {
        let Some(field) = rhs.vector_field(i) else {
            break;
        };
        if Affinity::compare(field.affinity(), *aff) == Affinity::Blob
            || needs_no_affinity_change(field, *aff)
        {
            *aff = Affinity::Blob;
        }
    }
}

// ============================================================================
// Expression helpers
// ============================================================================

/// Code `expr` into `target`. A vector fills `n` consecutive registers.
fn code_expr_or_vector(b: &mut ProgramBuilder, expr: &Expr, target: i32, n: usize) -> Result<()> {
    if !expr.is_vector() {
        return b.compile_expr_target(expr, target);
    }
    if let Expr::Subquery(sub) = expr.skip_collate() {
        b.add_op4(Opcode::Program, -1, target, n as i32, P4::Subquery(sub.id));
        return Ok(());
    }
    for i in 0..n {
        let field = expr
            .vector_field(i)
            .ok_or_else(|| Error::with_message(ErrorCode::Error, "row value misused"))?;
        b.compile_expr_target(field, target + i as i32)?;
    }
    Ok(())
}

/// Fill an ephemeral table with the right-hand side of an IN and return
/// its cursor. Uncorrelated lists are built once per statement.
fn code_in_rhs(b: &mut ProgramBuilder, in_expr: &Expr) -> Result<i32> {
    let Expr::In { expr: lhs, list, .. } = in_expr else {
        return Err(internal("IN term without IN expression"));
    };
    let n_field = lhs.vector_size();
    let mut key = KeyInfo::new(n_field);
    for (i, coll) in key.collations.iter_mut().enumerate() {
        if let Some(c) = lhs.vector_field(i).and_then(Expr::collation) {
            *coll = c.to_string();
        }
    }
    let reusable = match list {
        InList::Values(values) => values.iter().all(Expr::is_constant),
        InList::Subquery(sub) => sub.correlated.is_empty(),
    };

    let cursor = b.alloc_cursor();
    let once = reusable.then(|| b.add_op(Opcode::Once, 0, 0, 0));
    b.add_op4(
        Opcode::OpenEphemeral,
        cursor,
        n_field as i32,
        0,
        P4::KeyInfo(Arc::new(key)),
    );
    match list {
        InList::Values(values) => {
            let aff = lhs.affinity();
            let value = b.alloc_reg();
            let record = b.alloc_reg();
            for v in values {
                b.compile_expr_target(v, value)?;
                b.add_op4(Opcode::MakeRecord, value, 1, record, P4::Affinity(aff.code().to_string()));
                b.add_op(Opcode::IdxInsert, cursor, record, value);
            }
        }
        InList::Subquery(sub) => {
            b.add_op4(Opcode::Program, cursor, 0, 0, P4::Subquery(sub.id));
        }
    }
    if let Some(once) = once {
        b.jump_here(once);
    }
    Ok(cursor)
}

/// True if the expression reads only columns of `cursor` and nothing that
/// changes between rows of other tables
fn is_table_constant(expr: &Expr, cursor: i32) -> bool {
    let mut ok = true;
    expr.walk(&mut |e| match e {
        Expr::Column(c) if c.cursor != cursor => ok = false,
        Expr::Variable(_) | Expr::Subquery(_) | Expr::Exists { .. } => ok = false,
        Expr::In {
            list: InList::Subquery(_),
            ..
        } => ok = false,
        _ => {}
    });
    ok
}

/// Replace the left operand of a comparison, IN or IS NULL
fn replace_left(expr: &mut Expr, with: &Expr) {
    match expr {
        Expr::Binary { left, .. } => **left = with.clone(),
        Expr::In { expr, .. } | Expr::IsNull { expr, .. } => **expr = with.clone(),
        _ => {}
    }
}

// ============================================================================
// Loop start
// ============================================================================

impl WhereInfo {
    /// Mark a term coded so later checks skip it. A parent whose children
    /// are now all coded is disabled too. Terms that still depend on a
    /// table not yet bound stay live, and so do WHERE terms under a LEFT
    /// JOIN, which must run after the NULL row is built.
    fn disable_term(&mut self, ii: usize, mut idx: usize) {
        let left_join = self.levels[ii].left_join != 0;
        let not_ready = self.levels[ii].not_ready;
        let mut n_loop = 0;
        loop {
            let term = &mut self.wc.terms[idx];
            if term.is_coded()
                || (left_join && !term.is_from_join())
                || term.prereq_all & not_ready != 0
            {
                break;
            }
            if n_loop > 0 && term.flags.contains(TermFlags::LIKE) {
                term.flags |= TermFlags::LIKECOND;
            } else {
                term.flags |= TermFlags::CODED;
            }
            let Some(parent) = term.parent else {
                break;
            };
            let p = &mut self.wc.terms[parent];
            p.n_child = p.n_child.saturating_sub(1);
            if p.n_child != 0 {
                break;
            }
            idx = parent;
            n_loop += 1;
        }
    }

    /// True if loop slots `a` and `b` load from the same IN operator
    fn same_in(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let (ta, tb) = (&self.wc.terms[a], &self.wc.terms[b]);
        ta.vector_index > 0 && tb.vector_index > 0 && ta.parent.is_some() && ta.parent == tb.parent
    }

    /// Load the value of equality slot `slot` into `target`. An IN opens
    /// a loop over its values and records it on the level.
    fn code_equality_term(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        slot: usize,
        rev: bool,
        target: i32,
    ) -> Result<i32> {
        let slots = self.levels[ii].lp.terms.clone();
        let idx = term_slot(slots.get(slot).copied().flatten())?;
        let term = &self.wc.terms[idx];

        if term.op.intersects(OperatorMask::EQ | OperatorMask::IS) {
            let rhs = term.rhs().ok_or_else(|| internal("equality without right operand"))?;
            b.compile_expr_target(rhs, target)?;
        } else if term.op.contains(OperatorMask::ISNULL) {
            b.add_op(Opcode::Null, 0, target, 0);
        } else {
            let in_expr = term.expr.clone();
            // An earlier slot of the same vector IN already loads this one
            for r in slots[..slot].iter().flatten() {
                if r.depth == 0 && self.same_in(r.idx, idx) {
                    self.disable_term(ii, idx);
                    return Ok(target);
                }
            }

            let lp = &self.levels[ii].lp;
            let is_vtab = lp.flags.contains(WsFlags::VIRTUALTABLE);
            let mut rev = rev;
            if !is_vtab && lp.index().map_or(false, |ix| ix.sort_order_at(slot).is_desc()) {
                rev = !rev;
            }

            let cursor = code_in_rhs(b, &in_expr)?;
            b.add_op(if rev { Opcode::Last } else { Opcode::Rewind }, cursor, 0, 0);

            self.levels[ii].lp.flags |= WsFlags::IN_ABLE;
            if self.levels[ii].in_loops.is_empty() {
                self.levels[ii].addr_nxt = b.make_label();
            }
            let mut first = true;
            for (i, r) in slots.iter().enumerate().skip(slot) {
                let Some(r) = r else {
                    continue;
                };
                if r.depth != 0 || !self.same_in(r.idx, idx) {
                    continue;
                }
                let out = target + (i - slot) as i32;
                let field = self.wc.terms[r.idx].vector_index.saturating_sub(1);
                let addr_in_top = b.add_op(Opcode::Column, cursor, field as i32, out);
                b.add_op(Opcode::IsNull, out, 0, 0);
                let mut in_loop = InLoop {
                    cursor,
                    addr_in_top,
                    end_op: Opcode::Noop,
                    base: 0,
                    n_prefix: 0,
                };
                if first {
                    in_loop.end_op = if rev { Opcode::Prev } else { Opcode::Next };
                    if i > 0 && !is_vtab {
                        in_loop.base = target - i as i32;
                        in_loop.n_prefix = i as i32;
                        self.levels[ii].lp.flags |= WsFlags::IN_EARLYOUT;
                    }
                    first = false;
                }
                self.levels[ii].in_loops.push(in_loop);
            }
        }
        self.disable_term(ii, idx);
        Ok(target)
    }

    /// Load every equality constraint of an index loop into consecutive
    /// registers. Returns the first register and the affinity string to
    /// apply to them, with entries that need no conversion set to BLOB.
    fn code_all_equality_terms(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        rev: bool,
        n_extra_reg: usize,
    ) -> Result<(i32, Vec<Affinity>)> {
        let lp = self.levels[ii].lp.clone();
        let index = lp.index().cloned().ok_or_else(|| internal("index loop without index"))?;
        let table = self.src.items[self.levels[ii].from].table.clone();
        let n_eq = lp.n_eq();
        let n_skip = lp.n_skip as usize;
        let idx_cur = self.levels[ii].idx_cur;

        let base = b.alloc_regs((n_eq + n_extra_reg) as i32);
        let mut affs = index_affinities(&index, &table);

        if n_skip > 0 {
            b.add_op(if rev { Opcode::Last } else { Opcode::Rewind }, idx_cur, 0, 0);
            let over = b.add_op(Opcode::Goto, 0, 0, 0);
            let seek = if rev { Opcode::SeekLT } else { Opcode::SeekGT };
            self.levels[ii].addr_skip = b.add_op4(seek, idx_cur, 0, base, P4::Int64(n_skip as i64));
            b.jump_here(over);
            for j in 0..n_skip {
                b.add_op(Opcode::Column, idx_cur, j as i32, base + j as i32);
            }
        }

        for j in n_skip..n_eq {
            let target = base + j as i32;
            let reg = self.code_equality_term(b, ii, j, rev, target)?;
            if reg != target {
                b.add_op(Opcode::SCopy, reg, target, 0);
            }
            let term = &self.wc.terms[term_slot(lp.terms.get(j).copied().flatten())?];
            if term.op.contains(OperatorMask::IN) {
                if term.is_in_subquery() {
                    if let Some(a) = affs.get_mut(j) {
                        *a = Affinity::Blob;
                    }
                }
            } else if !term.op.contains(OperatorMask::ISNULL) {
                if let Some(rhs) = term.rhs() {
                    if !term.flags.contains(TermFlags::IS) && !rhs.never_null() {
                        b.add_op(Opcode::IsNull, target, self.levels[ii].addr_brk, 0);
                    }
                    if let Some(a) = affs.get_mut(j) {
                        if Affinity::compare(rhs.affinity(), *a) == Affinity::Blob
                            || needs_no_affinity_change(rhs, *a)
                        {
                            *a = Affinity::Blob;
                        }
                    }
                }
            }
        }
        Ok((base, affs))
    }

    /// Point the string just loaded for a LIKE range bound at the LIKE
    /// counter, so the second pass uses the upper-case variant
    fn like_string_fixup(&self, b: &mut ProgramBuilder, ii: usize, idx: usize) {
        if !self.wc.terms[idx].flags.contains(TermFlags::LIKEOPT) {
            return;
        }
        let cntr = self.levels[ii].like_rep_cntr;
        let addr = b.current_addr() - 1;
        if let Some(op) = b.op_mut(addr) {
            op.p3 = (cntr >> 1) as i32;
            op.p5 = (cntr & 1) as u16;
        }
    }

    /// Terms implied by a partial index's predicate need no test
    fn apply_partial_index_constraints(&mut self, truth: &Expr, cursor: i32) {
        let mut truth = truth;
        while let Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } = truth
        {
            self.apply_partial_index_constraints(left, cursor);
            truth = right;
        }
        for term in self.wc.terms.iter_mut() {
            if !term.is_coded() && term.expr.matches_pattern(truth, cursor) {
                term.flags |= TermFlags::CODED;
            }
        }
    }

    /// Emit the start of the loop for level `ii` and every WHERE term that
    /// can be tested inside it. Returns the tables still unbound after it.
    pub(super) fn code_one_loop_start(
        &mut self,
        b: &mut ProgramBuilder,
        config: &PlannerConfig,
        ii: usize,
        not_ready: Bitmask,
    ) -> Result<Bitmask> {
        let lp = self.levels[ii].lp.clone();
        let from = self.levels[ii].from;
        let cursor = self.src.items[from].cursor;
        let is_left = self.src.items[from].join_type.is_left();
        let level_not_ready = not_ready & !self.mask_set.get_mask(cursor);
        let rev = (self.rev_mask >> ii) & 1 != 0;
        let ws = lp.flags;
        let omit_table =
            ws.contains(WsFlags::IDX_ONLY) && !self.wctrl.contains(WhereFlags::OR_SUBCLAUSE);

        let addr_brk = b.make_label();
        let addr_cont = b.make_label();
        {
            let level = &mut self.levels[ii];
            level.not_ready = level_not_ready;
            level.addr_brk = addr_brk;
            level.addr_nxt = addr_brk;
            level.addr_cont = addr_cont;
        }

        if from > 0 && is_left {
            let reg = b.alloc_reg();
            b.add_op(Opcode::Integer, 0, reg, 0);
            b.comment("init LEFT JOIN no-match flag");
            self.levels[ii].left_join = reg;
        }

        // An empty outer loop ends the whole statement, unless a LEFT JOIN
        // still owes a NULL row
        let mut j = ii;
        while j > 0 && self.levels[j].left_join == 0 {
            j -= 1;
        }
        let addr_halt = self.levels[j].addr_brk;

        let mut residual_index: Option<Arc<Index>> = None;
        if ws.contains(WsFlags::VIRTUALTABLE) {
            self.code_vtab_loop(b, ii, &lp)?;
        } else if ws.contains(WsFlags::IPK) && ws.intersects(WsFlags::COLUMN_IN | WsFlags::COLUMN_EQ) {
            let reg = b.alloc_reg();
            let rowid = self.code_equality_term(b, ii, 0, rev, reg)?;
            let addr_nxt = self.levels[ii].addr_nxt;
            b.add_op(Opcode::SeekRowid, cursor, addr_nxt, rowid);
            self.levels[ii].op = Opcode::Noop;
            let idx = term_slot(lp.terms.first().copied().flatten())?;
            if self.wc.terms[idx].prereq_all & level_not_ready == 0 {
                self.wc.terms[idx].flags |= TermFlags::CODED;
            }
        } else if ws.contains(WsFlags::IPK) && ws.contains(WsFlags::COLUMN_RANGE) {
            self.code_rowid_range(b, ii, &lp, rev, addr_halt)?;
        } else if ws.contains(WsFlags::INDEXED) {
            residual_index = self.code_index_loop(b, ii, &lp, rev, omit_table)?;
        } else if ws.contains(WsFlags::MULTI_OR) {
            self.code_or_loop(b, config, ii, &lp)?;
        } else {
            let start = if rev { Opcode::Last } else { Opcode::Rewind };
            let addr = b.add_op(start, cursor, addr_halt, 0);
            let level = &mut self.levels[ii];
            level.op = if rev { Opcode::Prev } else { Opcode::Next };
            level.p1 = cursor;
            level.p2 = addr + 1;
            level.p5 = STMTSTATUS_FULLSCAN_STEP;
        }
        self.levels[ii].addr_visit = b.current_addr();

        self.code_residual_terms(b, ii, cursor, residual_index.as_deref())?;
        self.code_transitive_terms(b, ii, cursor, not_ready)?;

        let left_join = self.levels[ii].left_join;
        if left_join != 0 {
            self.levels[ii].addr_first = b.current_addr();
            b.add_op(Opcode::Integer, 1, left_join, 0);
            b.comment("record LEFT JOIN hit");
            for k in 0..self.wc.n_base {
                let term = &self.wc.terms[k];
                if term.is_virtual() || term.is_coded() || term.prereq_all & level_not_ready != 0 {
                    continue;
                }
                b.jump_if_false(&term.expr, addr_cont, true)?;
                self.wc.terms[k].flags |= TermFlags::CODED;
            }
        }

        tracing::trace!(level = ii, cursor, op = ?self.levels[ii].op, "where.loop.start");
        Ok(level_not_ready)
    }

    fn code_vtab_loop(&mut self, b: &mut ProgramBuilder, ii: usize, lp: &WhereLoop) -> Result<()> {
        let vtab = lp.vtab().cloned().ok_or_else(|| internal("virtual loop without plan"))?;
        let cursor = self.levels[ii].tab_cur;
        let addr_cont = self.levels[ii].addr_cont;
        let n_constraint = lp.terms.len();
        let reg = b.alloc_regs(n_constraint as i32 + 2);
        let mut addr_not_found = self.levels[ii].addr_brk;

        for (j, r) in lp.terms.iter().enumerate() {
            if r.is_none() {
                continue;
            }
            let idx = term_slot(*r)?;
            let target = reg + 2 + j as i32;
            if self.wc.terms[idx].op.contains(OperatorMask::IN) {
                self.code_equality_term(b, ii, j, false, target)?;
                addr_not_found = self.levels[ii].addr_nxt;
            } else {
                let rhs = self.wc.terms[idx]
                    .rhs()
                    .ok_or_else(|| internal("constraint without right operand"))?;
                code_expr_or_vector(b, rhs, target, 1)?;
            }
        }
        b.add_op(Opcode::Integer, vtab.idx_num, reg, 0);
        b.add_op(Opcode::Integer, n_constraint as i32, reg + 1, 0);
        let plan = vtab.idx_str.clone().map_or(P4::Unused, P4::Text);
        b.add_op4(Opcode::VFilter, cursor, addr_not_found, reg, plan);
        {
            let p2 = b.current_addr();
            let one_pass = self.one_pass;
            let level = &mut self.levels[ii];
            level.p1 = cursor;
            level.op = if one_pass != OnePass::Off { Opcode::Noop } else { Opcode::VNext };
            level.p2 = p2;
        }

        for (j, r) in lp.terms.iter().enumerate() {
            let Some(r) = r else {
                continue;
            };
            if j < 16 && (vtab.omit_mask >> j) & 1 != 0 {
                self.disable_term(ii, r.idx);
                continue;
            }
            let term = &self.wc.terms[r.idx];
            if !term.op.contains(OperatorMask::IN) {
                continue;
            }
            let Some(lhs) = term.lhs().filter(|l| !l.is_vector()).cloned() else {
                continue;
            };
            // The table may not filter on IN itself; test the value again
            let target = reg + 2 + j as i32;
            let reload = self.levels[ii].in_loops.iter().find_map(|l| {
                b.op(l.addr_in_top)
                    .filter(|op| op.opcode == Opcode::Column && op.p3 == target)
                    .map(|op| (op.p1, op.p2, op.p3))
            });
            if let Some((p1, p2, p3)) = reload {
                b.add_op(Opcode::Column, p1, p2, p3);
            }
            let lhs_reg = b.compile_expr(&lhs)?;
            let p5 = affinity_p5(lhs.affinity());
            b.code_compare(Opcode::Ne, target, addr_cont, lhs_reg, lhs.collation(), p5);
        }
        Ok(())
    }

    fn code_rowid_range(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        lp: &WhereLoop,
        rev: bool,
        addr_halt: i32,
    ) -> Result<()> {
        let cursor = self.levels[ii].tab_cur;
        let addr_brk = self.levels[ii].addr_brk;
        let mut k = 0;
        let mut start = None;
        let mut end = None;
        if lp.flags.contains(WsFlags::BTM_LIMIT) {
            start = Some(term_slot(lp.terms.get(k).copied().flatten())?);
            k += 1;
        }
        if lp.flags.contains(WsFlags::TOP_LIMIT) {
            end = Some(term_slot(lp.terms.get(k).copied().flatten())?);
        }
        if rev {
            std::mem::swap(&mut start, &mut end);
        }

        if let Some(idx) = start {
            let Expr::Binary { op, right, .. } = self.wc.terms[idx].expr.clone() else {
                return Err(internal("range bound is not a comparison"));
            };
            let reg;
            let mut disable = false;
            let seek = if right.is_vector() {
                reg = b.alloc_reg();
                code_expr_or_vector(b, &right, reg, 1)?;
                match op {
                    BinaryOp::Gt | BinaryOp::Ge => Opcode::SeekGE,
                    _ => Opcode::SeekLE,
                }
            } else {
                reg = b.compile_expr(&right)?;
                disable = true;
                match op {
                    BinaryOp::Gt => Opcode::SeekGT,
                    BinaryOp::Le => Opcode::SeekLE,
                    BinaryOp::Lt => Opcode::SeekLT,
                    BinaryOp::Ge => Opcode::SeekGE,
                    _ => return Err(internal("range bound is not an inequality")),
                }
            };
            b.add_op(seek, cursor, addr_brk, reg);
            b.comment("pk");
            if disable {
                self.disable_term(ii, idx);
            }
        } else {
            b.add_op(if rev { Opcode::Last } else { Opcode::Rewind }, cursor, addr_halt, 0);
        }

        let mut test = None;
        if let Some(idx) = end {
            let Expr::Binary { op, right, .. } = self.wc.terms[idx].expr.clone() else {
                return Err(internal("range bound is not a comparison"));
            };
            let mem_end = b.alloc_reg();
            code_expr_or_vector(b, &right, mem_end, 1)?;
            let strict = !right.is_vector() && matches!(op, BinaryOp::Lt | BinaryOp::Gt);
            let test_op = match (strict, rev) {
                (true, true) => Opcode::Le,
                (true, false) => Opcode::Ge,
                (false, true) => Opcode::Lt,
                (false, false) => Opcode::Gt,
            };
            if !right.is_vector() {
                self.disable_term(ii, idx);
            }
            test = Some((test_op, mem_end));
        }

        let start_addr = b.current_addr();
        {
            let level = &mut self.levels[ii];
            level.op = if rev { Opcode::Prev } else { Opcode::Next };
            level.p1 = cursor;
            level.p2 = start_addr;
        }
        if let Some((test_op, mem_end)) = test {
            let rowid = b.alloc_reg();
            b.add_op(Opcode::Rowid, cursor, rowid, 0);
            b.add_op(test_op, mem_end, addr_brk, rowid);
            b.change_p5(affinity::NUMERIC | cmp_flags::JUMPIFNULL);
        }
        Ok(())
    }

    /// Seek an index to the first entry inside the constraints and emit the
    /// comparison that ends the scan. Returns the index when the residual
    /// terms it covers should be tested before the table row is read.
    fn code_index_loop(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        lp: &WhereLoop,
        rev: bool,
        omit_table: bool,
    ) -> Result<Option<Arc<Index>>> {
        let index = lp.index().cloned().ok_or_else(|| internal("index loop without index"))?;
        let table = self.src.items[self.levels[ii].from].table.clone();
        let cursor = self.levels[ii].tab_cur;
        let idx_cur = self.levels[ii].idx_cur;
        let ws = lp.flags;
        let n_eq = lp.n_eq();
        let n_key = index.n_key_col();
        let mut n_btm = if ws.contains(WsFlags::BTM_LIMIT) { lp.n_btm().max(1) } else { 0 };
        let mut n_top = if ws.contains(WsFlags::TOP_LIMIT) { lp.n_top().max(1) } else { 0 };

        let mut n_extra_reg = 0;
        let mut seek_past_null = false;
        let mut stop_at_null = false;
        let mut range_start = None;
        let mut range_end = None;

        // min() over an index: skip the NULLs at the front
        if self.wctrl.contains(WhereFlags::ORDERBY_MIN) && self.n_ob_sat > 0 && n_key > n_eq {
            seek_past_null = true;
            n_extra_reg = 1;
        }

        let mut j = n_eq;
        if ws.contains(WsFlags::BTM_LIMIT) {
            range_start = Some(term_slot(lp.terms.get(j).copied().flatten())?);
            j += 1;
            n_extra_reg = n_extra_reg.max(n_btm);
        }
        if ws.contains(WsFlags::TOP_LIMIT) {
            let idx = term_slot(lp.terms.get(j).copied().flatten())?;
            range_end = Some(idx);
            n_extra_reg = n_extra_reg.max(n_top);
            if self.wc.terms[idx].flags.contains(TermFlags::LIKEOPT) {
                let cntr = b.alloc_reg();
                b.add_op(Opcode::Integer, 1, cntr, 0);
                let desc = index.sort_order_at(n_eq).is_desc();
                let level = &mut self.levels[ii];
                level.addr_like_rep = b.current_addr();
                level.like_rep_cntr = ((cntr as u32) << 1) | u32::from(rev ^ desc);
            }
            if range_start.is_none() {
                let col = index.column_at(n_eq);
                if (col >= 0 && !table.column_not_null(col)) || col == EXPR_COLUMN {
                    seek_past_null = true;
                }
            }
        }

        let desc_at_eq = index.sort_order_at(n_eq).is_desc();
        if (n_eq < n_key && rev != desc_at_eq) || (rev && n_key == n_eq) {
            std::mem::swap(&mut range_start, &mut range_end);
            std::mem::swap(&mut seek_past_null, &mut stop_at_null);
            std::mem::swap(&mut n_btm, &mut n_top);
        }

        let (base, mut start_aff) = self.code_all_equality_terms(b, ii, rev, n_extra_reg)?;
        let mut end_aff: Vec<Affinity> = if n_top > 0 {
            start_aff.get(n_eq..).map(<[Affinity]>::to_vec).unwrap_or_default()
        } else {
            Vec::new()
        };
        let addr_nxt = self.levels[ii].addr_nxt;
        let bound_is_eq = |info: &WhereInfo, idx: Option<usize>| {
            idx.map_or(true, |i| {
                info.wc.terms[i]
                    .op
                    .intersects(OperatorMask::LE | OperatorMask::GE)
            })
        };
        let mut start_eq = bound_is_eq(self, range_start);
        let mut end_eq = bound_is_eq(self, range_end);
        let mut start_constraints = range_start.is_some() || n_eq > 0;
        let mut n_constraint = n_eq;

        let start_reg = base + n_eq as i32;
        if let Some(idx) = range_start {
            let term = &self.wc.terms[idx];
            let vnull = term.flags.contains(TermFlags::VNULL);
            let rhs = term.rhs().cloned().ok_or_else(|| internal("range bound without operand"))?;
            code_expr_or_vector(b, &rhs, start_reg, n_btm)?;
            self.like_string_fixup(b, ii, idx);
            if !vnull && !rhs.never_null() {
                b.add_op(Opcode::IsNull, start_reg, addr_nxt, 0);
            }
            if let Some(tail) = start_aff.get_mut(n_eq..) {
                update_range_affinity(&rhs, n_btm, tail);
            }
            n_constraint += n_btm;
            if rhs.is_vector() {
                start_eq = true;
            } else {
                self.disable_term(ii, idx);
            }
            seek_past_null = false;
        } else if seek_past_null {
            b.add_op(Opcode::Null, 0, start_reg, 0);
            n_constraint += 1;
            start_eq = false;
            start_constraints = true;
        }
        let n_aff = (n_constraint - usize::from(seek_past_null)).min(start_aff.len());
        apply_affinity(b, base, &start_aff[..n_aff]);

        if lp.n_skip > 0 && n_constraint == lp.n_skip as usize {
            // The skip-scan prologue already positioned the cursor
        } else {
            let pick = (usize::from(start_constraints) << 2)
                | (usize::from(start_eq) << 1)
                | usize::from(rev);
            let op = START_OPS[pick].ok_or_else(|| internal("no start operation"))?;
            b.add_op4(op, idx_cur, addr_nxt, base, P4::Int64(n_constraint as i64));
        }

        n_constraint = n_eq;
        if let Some(idx) = range_end {
            let term = &self.wc.terms[idx];
            let vnull = term.flags.contains(TermFlags::VNULL);
            let rhs = term.rhs().cloned().ok_or_else(|| internal("range bound without operand"))?;
            code_expr_or_vector(b, &rhs, start_reg, n_top)?;
            self.like_string_fixup(b, ii, idx);
            if !vnull && !rhs.never_null() {
                b.add_op(Opcode::IsNull, start_reg, addr_nxt, 0);
            }
            update_range_affinity(&rhs, n_top, &mut end_aff);
            let n_aff = n_top.min(end_aff.len());
            apply_affinity(b, start_reg, &end_aff[..n_aff]);
            n_constraint += n_top;
            if rhs.is_vector() {
                end_eq = true;
            } else {
                self.disable_term(ii, idx);
            }
        } else if stop_at_null {
            b.add_op(Opcode::Null, 0, start_reg, 0);
            end_eq = false;
            n_constraint += 1;
        }

        self.levels[ii].p2 = b.current_addr();
        if n_constraint > 0 {
            let op = END_OPS[(usize::from(rev) << 1) | usize::from(end_eq)];
            b.add_op4(op, idx_cur, addr_nxt, base, P4::Int64(n_constraint as i64));
        }
        if self.levels[ii].lp.flags.contains(WsFlags::IN_EARLYOUT) {
            b.add_op(Opcode::SeekHit, idx_cur, 1, 0);
        }
        if !omit_table {
            b.add_op(Opcode::DeferredSeek, idx_cur, 0, cursor);
        }

        if self.levels[ii].left_join == 0 {
            if let Some(pred) = &index.partial {
                self.apply_partial_index_constraints(pred, cursor);
            }
        }

        let level = &mut self.levels[ii];
        level.op = if ws.contains(WsFlags::ONEROW) {
            Opcode::Noop
        } else if rev {
            Opcode::Prev
        } else {
            Opcode::Next
        };
        level.p1 = idx_cur;
        level.p3 = i32::from(ws.contains(WsFlags::UNQ_WANTED));
        if !ws.intersects(WsFlags::CONSTRAINT) {
            level.p5 = STMTSTATUS_FULLSCAN_STEP;
        }
        Ok(if omit_table { None } else { Some(index) })
    }

    /// Run one sub-plan per OR disjunct, each calling the shared loop body
    /// as a subroutine. A RowSet drops rows an earlier disjunct already
    /// produced.
    fn code_or_loop(
        &mut self,
        b: &mut ProgramBuilder,
        config: &PlannerConfig,
        ii: usize,
        lp: &WhereLoop,
    ) -> Result<()> {
        let or_idx = term_slot(lp.terms.first().copied().flatten())?;
        let from = self.levels[ii].from;
        let cursor = self.src.items[from].cursor;
        let addr_brk = self.levels[ii].addr_brk;
        let left_join = self.levels[ii].left_join != 0;

        let cov_cur = b.alloc_cursor();
        let reg_return = b.alloc_reg();
        let loop_body = b.make_label();
        self.levels[ii].op = Opcode::Return;
        self.levels[ii].p1 = reg_return;

        // This table first, then the ones nested inside it
        let mut items = vec![self.src.items[from].clone()];
        items.extend(self.levels[ii + 1..].iter().map(|l| self.src.items[l.from].clone()));
        let or_src = SrcList::new(items);

        let dedupe = !self.wctrl.contains(WhereFlags::DUPLICATES_OK);
        let (reg_rowset, reg_rowid) = if dedupe {
            let rowset = b.alloc_reg();
            b.add_op(Opcode::Null, 0, rowset, 0);
            (rowset, b.alloc_reg())
        } else {
            (0, 0)
        };
        let ret_init = b.add_op(Opcode::Integer, 0, reg_return, 0);

        // Other indexable terms ride along with every disjunct
        let mut shared = Vec::new();
        for (k, t) in self.wc.terms.iter().enumerate() {
            if k == or_idx || t.is_virtual() || t.is_coded() || !t.op.intersects(OperatorMask::ALL) {
                continue;
            }
            if left_join {
                if t.join_cursor != Some(cursor) {
                    continue;
                }
            } else if t.is_from_join() {
                continue;
            }
            shared.push(t.expr.clone());
        }
        let and_expr = Expr::conjunction(shared);

        let or_info = self.wc.terms[or_idx]
            .or_info()
            .ok_or_else(|| internal("OR loop without OR term"))?;
        let disjuncts: Vec<(Expr, bool)> = or_info
            .wc
            .terms
            .iter()
            .map(|t| (t.expr.clone(), t.left_cursor == cursor || t.op.contains(OperatorMask::AND)))
            .collect();
        let n_term = disjuncts.len();

        let multi = explain_text(b, self.explain_parent, "MULTI-INDEX OR");
        let mut untested = false;
        let mut cov: Option<Arc<Index>> = None;
        for (k, (disjunct, usable)) in disjuncts.into_iter().enumerate() {
            if !usable {
                continue;
            }
            let sub_where = match &and_expr {
                Some(shared) => Expr::and(disjunct, shared.clone()),
                None => disjunct,
            };
            let index_addr = explain_text(b, multi, format!("INDEX {}", k + 1));
            let req = PlanRequest {
                where_expr: Some(&sub_where),
                flags: WhereFlags::OR_SUBCLAUSE,
                aux_cursor: cov_cur,
                explain_parent: index_addr,
                ..PlanRequest::new(&or_src)
            };
            let sub = begin_plan(b, config, req)?;
            let sub_level = sub
                .levels
                .first()
                .ok_or_else(|| internal("OR sub-plan without loops"))?;
            let addr_explain =
                explain_one_scan(b, &sub.src, sub_level, WhereFlags::empty(), index_addr);
            self.scan_status
                .push(ScanStatus::new(&sub.src, sub_level, addr_explain));

            let mut skip = None;
            if dedupe {
                let set = if k == n_term - 1 { -1 } else { k as i64 };
                b.add_op(Opcode::Rowid, cursor, reg_rowid, 0);
                skip = Some(b.add_op4(Opcode::RowSetTest, reg_rowset, 0, reg_rowid, P4::Int64(set)));
            }
            b.add_op(Opcode::Gosub, reg_return, loop_body, 0);
            if let Some(addr) = skip {
                b.jump_here(addr);
            }
            untested |= sub.untested_terms;

            let sub_lp = &sub_level.lp;
            cov = match sub_lp.index() {
                Some(ix)
                    if sub_lp.flags.contains(WsFlags::INDEXED)
                        && (k == 0 || cov.as_ref().map_or(false, |c| Arc::ptr_eq(c, ix))) =>
                {
                    Some(Arc::clone(ix))
                }
                _ => None,
            };
            sub.end(b)?;
        }

        if cov.is_some() {
            self.levels[ii].idx_cur = cov_cur;
        }
        self.levels[ii].cov_idx = cov;
        let here = b.current_addr();
        b.change_p1(ret_init, here);
        b.add_op(Opcode::Goto, 0, addr_brk, 0);
        b.resolve_label(loop_body);
        if !untested {
            self.disable_term(ii, or_idx);
        }
        Ok(())
    }

    /// Test every remaining term that needs no table still unbound. Terms
    /// the index covers go first so rows can be rejected before the table
    /// row is read; terms with subqueries go last.
    fn code_residual_terms(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        cursor: i32,
        index: Option<&Index>,
    ) -> Result<()> {
        let not_ready = self.levels[ii].not_ready;
        let left_join = self.levels[ii].left_join;
        let like_cntr = self.levels[ii].like_rep_cntr;
        let addr_cont = self.levels[ii].addr_cont;

        let mut pass = if index.is_some() { 1 } else { 2 };
        while pass > 0 {
            let mut next = 0;
            for k in 0..self.wc.terms.len() {
                let term = &self.wc.terms[k];
                if term.is_virtual() || term.is_coded() {
                    continue;
                }
                if term.prereq_all & not_ready != 0 {
                    self.untested_terms = true;
                    continue;
                }
                if left_join != 0 && !term.is_from_join() {
                    continue;
                }
                if pass == 1 {
                    if let Some(ix) = index {
                        if !expr_covered_by_index(&term.expr, cursor, ix) {
                            next = 2;
                            continue;
                        }
                    }
                }
                if pass < 3 && term.flags.contains(TermFlags::VARSELECT) {
                    if next == 0 {
                        next = 3;
                    }
                    continue;
                }
                let mut skip_like = None;
                if term.flags.contains(TermFlags::LIKECOND) && like_cntr > 0 {
                    let op = if like_cntr & 1 != 0 { Opcode::IfNot } else { Opcode::If };
                    skip_like = Some(b.add_op(op, (like_cntr >> 1) as i32, 0, 0));
                }
                b.jump_if_false(&term.expr, addr_cont, true)?;
                if let Some(addr) = skip_like {
                    b.jump_here(addr);
                }
                self.wc.terms[k].flags |= TermFlags::CODED;
            }
            pass = next;
        }
        Ok(())
    }

    /// `t1.x = t2.y AND t2.y = 5`: once t1 is bound, `t1.x = 5` is cheap to
    /// test directly, before the join moves on
    fn code_transitive_terms(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        cursor: i32,
        not_ready: Bitmask,
    ) -> Result<()> {
        if self.levels[ii].left_join != 0 {
            return Ok(());
        }
        let addr_cont = self.levels[ii].addr_cont;
        for k in 0..self.wc.n_base {
            let term = &self.wc.terms[k];
            if term.is_virtual() || term.is_coded() {
                continue;
            }
            if !term.op.intersects(OperatorMask::EQ | OperatorMask::IS)
                || !term.op.contains(OperatorMask::EQUIV)
                || term.left_cursor != cursor
            {
                continue;
            }
            let Expr::Binary { left, .. } = &term.expr else {
                continue;
            };
            let chain = ClauseChain::new(&self.wc);
            let Some(alt) = find_term(
                &chain,
                cursor,
                term.left_column,
                not_ready,
                OperatorMask::EQ | OperatorMask::IN | OperatorMask::IS,
                None,
            )
            .and_then(|r| chain.term(r)) else {
                continue;
            };
            if alt.is_coded() {
                continue;
            }
            if alt.op.contains(OperatorMask::IN)
                && alt.is_in_subquery()
                && alt.lhs().map_or(false, |l| l.vector_size() > 1)
            {
                continue;
            }
            let mut test = alt.expr.clone();
            replace_left(&mut test, left);
            b.jump_if_false(&test, addr_cont, true)?;
        }
        Ok(())
    }

    // ========================================================================
    // Automatic index
    // ========================================================================

    /// Emit code, run once, that copies the rows of level `ii`'s table into
    /// a transient index keyed on the columns its join constraints use,
    /// then turn the level's loop into a lookup on that index.
    pub(super) fn construct_auto_index(
        &mut self,
        b: &mut ProgramBuilder,
        ii: usize,
        not_ready: Bitmask,
    ) -> Result<()> {
        let from = self.levels[ii].from;
        let item = self.src.items[from].clone();
        let table = Arc::clone(&item.table);
        let tab_cur = self.levels[ii].tab_cur;
        let prereq = self.levels[ii].lp.prereq;
        let high_bit: Bitmask = 1 << (BMS - 1);

        let addr_init = b.add_op(Opcode::Once, 0, 0, 0);

        let mut partial = Vec::new();
        let mut key_terms = Vec::new();
        let mut idx_cols: Bitmask = 0;
        for (k, t) in self.wc.terms.iter().enumerate() {
            if prereq == 0
                && !t.is_virtual()
                && !t.is_from_join()
                && is_table_constant(&t.expr, item.cursor)
            {
                partial.push(t.expr.clone());
            }
            if !term_can_drive_index(t, &item, not_ready) {
                continue;
            }
            let col = t.left_column;
            let bit = if col as usize >= BMS { high_bit } else { 1 << col };
            if key_terms.is_empty() {
                tracing::warn!(
                    table = %table.name,
                    column = %table.column_name(col),
                    "automatic index on {}({})",
                    table.name,
                    table.column_name(col)
                );
            }
            if idx_cols & bit == 0 {
                key_terms.push(k);
                idx_cols |= bit;
            }
        }
        if key_terms.is_empty() {
            return Err(internal("automatic index without key terms"));
        }

        let mut index = Index::new("auto-index", table.name.clone());
        for &k in &key_terms {
            let t = &self.wc.terms[k];
            index = index.with_index_column(
                IndexColumn::new(t.left_column).with_collation(term_collation(&t.expr)),
            );
        }
        // Every other column the statement reads, so the table is never
        // touched inside the loop
        let extra_cols = item.col_used & (!idx_cols | high_bit);
        let n_direct = (BMS - 1).min(table.columns.len());
        for i in 0..n_direct {
            if extra_cols & (1 << i) != 0 {
                index = index.with_column(i as i32);
            }
        }
        if item.col_used & high_bit != 0 {
            for i in (BMS - 1)..table.columns.len() {
                index = index.with_column(i as i32);
            }
        }
        let n_key = index.n_key_col();
        let index = Arc::new(index);

        let idx_cur = b.alloc_cursor();
        b.add_op4(
            Opcode::OpenAutoindex,
            idx_cur,
            n_key as i32 + 1,
            0,
            P4::KeyInfo(Arc::new(index_key_info(&index))),
        );
        b.comment(format!("for {}", table.name));

        let addr_top = b.add_op(Opcode::Rewind, tab_cur, 0, 0);
        let skip_row = match Expr::conjunction(partial) {
            Some(pred) => {
                let label = b.make_label();
                b.jump_if_false(&pred, label, true)?;
                Some(label)
            }
            None => None,
        };
        let record = b.alloc_reg();
        let base = b.alloc_regs(n_key as i32 + 1);
        for i in 0..=n_key {
            let reg = base + i as i32;
            match index.column_at(i) {
                ROWID_COLUMN => b.add_op(Opcode::Rowid, tab_cur, reg, 0),
                col => b.add_op(Opcode::Column, tab_cur, col, reg),
            };
        }
        b.add_op(Opcode::MakeRecord, base, n_key as i32 + 1, record);
        b.add_op(Opcode::IdxInsert, idx_cur, record, 0);
        b.change_p5(OPFLAG_USESEEKRESULT);
        if let Some(label) = skip_row {
            b.resolve_label(label);
        }
        b.add_op(Opcode::Next, tab_cur, addr_top + 1, 0);
        b.change_p5(STMTSTATUS_AUTOINDEX);
        b.jump_here(addr_top);
        b.jump_here(addr_init);

        let level = &mut self.levels[ii];
        level.idx_cur = idx_cur;
        let lp = &mut level.lp;
        lp.terms = key_terms.iter().map(|&k| Some(TermRef::new(k))).collect();
        lp.flags = WsFlags::COLUMN_EQ | WsFlags::IDX_ONLY | WsFlags::INDEXED | WsFlags::AUTO_INDEX;
        if skip_row.is_some() {
            lp.flags |= WsFlags::PARTIALIDX;
        }
        let btree = lp.btree_mut();
        btree.n_eq = key_terms.len() as u16;
        btree.n_btm = 0;
        btree.n_top = 0;
        btree.index = Some(index);
        tracing::debug!(table = %table.name, n_key, "where.autoindex");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{JoinFlags, SrcItem};
    use crate::schema::Column;
    use crate::vdbe::VdbeOp;

    use super::super::where_explain::explain_rows;

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

    fn find_op(ops: &[VdbeOp], opcode: Opcode) -> Option<&VdbeOp> {
        ops.iter().find(|op| op.opcode == opcode)
    }

    #[test]
    fn test_needs_no_affinity_change() {
        assert!(needs_no_affinity_change(&Expr::int(1), Affinity::Integer));
        assert!(needs_no_affinity_change(&Expr::string("x"), Affinity::Text));
        assert!(!needs_no_affinity_change(&Expr::string("1"), Affinity::Integer));
        assert!(needs_no_affinity_change(&Expr::string("1"), Affinity::Blob));
        assert!(!needs_no_affinity_change(&Expr::variable(1), Affinity::Integer));
    }

    #[test]
    fn test_apply_affinity_trims_blob_ends() {
        let mut b = ProgramBuilder::new();
        apply_affinity(
            &mut b,
            10,
            &[Affinity::Blob, Affinity::Integer, Affinity::Text, Affinity::Blob],
        );
        let op = &b.ops()[0];
        assert_eq!(op.opcode, Opcode::Affinity);
        assert_eq!(op.p1, 11);
        assert_eq!(op.p2, 2);
        assert_eq!(op.p4, P4::Affinity("DB".to_string()));

        let mut b = ProgramBuilder::new();
        apply_affinity(&mut b, 1, &[Affinity::Blob, Affinity::Blob]);
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_index_range_with_residual() {
        let mut t = abc("t");
        t.add_index(Index::new("ix", "t").with_column(0).with_column(1));
        let src = one_table(t);
        let table = src.items[0].table.clone();
        let w = Expr::and(
            Expr::and(
                Expr::eq(Expr::column(0, &table, 0), Expr::int(5)),
                Expr::binary(BinaryOp::Gt, Expr::column(0, &table, 1), Expr::int(3)),
            ),
            Expr::eq(Expr::column(0, &table, 2), Expr::string("x")),
        );
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        let level = &info.levels()[0];
        assert_eq!(level.lp.index().map(|i| i.name.as_str()), Some("ix"));
        let idx_cur = level.idx_cur;
        let cont = level.addr_cont;
        assert!(info.wc.terms.iter().all(|t| t.is_virtual() || t.is_coded()));

        let seek = find_op(b.ops(), Opcode::SeekGT).unwrap();
        assert_eq!(seek.p1, idx_cur);
        assert_eq!(seek.p4, P4::Int64(2));
        let end = find_op(b.ops(), Opcode::IdxGT).unwrap();
        assert_eq!(end.p4, P4::Int64(1));
        assert!(find_op(b.ops(), Opcode::DeferredSeek).is_some());
        // c = 'x' is left for the table row
        let residual = b
            .ops()
            .iter()
            .rev()
            .find(|op| op.opcode == Opcode::Ne)
            .unwrap();
        assert_eq!(residual.p2, cont);
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_rowid_in_list_loops_over_values() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let w = Expr::in_list(
            Expr::rowid(0, &table),
            vec![Expr::int(1), Expr::int(2), Expr::int(3)],
        );
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        let level = &info.levels()[0];
        assert!(level.lp.flags.contains(WsFlags::IPK | WsFlags::COLUMN_IN));
        assert_eq!(level.in_loops.len(), 1);
        assert_eq!(level.in_loops[0].end_op, Opcode::Next);
        let ops: Vec<Opcode> = b.ops().iter().map(|op| op.opcode).collect();
        assert!(ops.contains(&Opcode::Once));
        assert!(ops.contains(&Opcode::OpenEphemeral));
        assert_eq!(ops.iter().filter(|o| **o == Opcode::IdxInsert).count(), 3);
        assert!(ops.contains(&Opcode::SeekRowid));
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_rowid_range_tests_upper_bound() {
        let src = one_table(abc("t"));
        let table = src.items[0].table.clone();
        let w = Expr::and(
            Expr::binary(BinaryOp::Gt, Expr::rowid(0, &table), Expr::int(10)),
            Expr::binary(BinaryOp::Le, Expr::rowid(0, &table), Expr::int(20)),
        );
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        assert!(info.levels()[0].lp.flags.contains(WsFlags::IPK | WsFlags::COLUMN_RANGE));
        assert_eq!(find_op(b.ops(), Opcode::SeekGT).map(|op| op.p1), Some(0));
        let test = find_op(b.ops(), Opcode::Gt).unwrap();
        assert_eq!(test.p5, affinity::NUMERIC | cmp_flags::JUMPIFNULL);
        assert_eq!(test.p2, info.levels()[0].addr_brk);
        info.end(&mut b).unwrap();
        b.finish().unwrap();
    }

    #[test]
    fn test_or_terms_run_as_subplans() {
        let mut t = abc("t");
        t.add_index(Index::new("ia", "t").with_column(0));
        t.add_index(Index::new("ib", "t").with_column(1));
        let src = one_table(t);
        let table = src.items[0].table.clone();
        let w = Expr::or(
            Expr::eq(Expr::column(0, &table, 0), Expr::int(1)),
            Expr::eq(Expr::column(0, &table, 1), Expr::int(2)),
        );
        let mut b = ProgramBuilder::with_cursors(1);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        assert!(info.levels()[0].lp.flags.contains(WsFlags::MULTI_OR));
        assert_eq!(info.levels()[0].op, Opcode::Return);
        let ops: Vec<Opcode> = b.ops().iter().map(|op| op.opcode).collect();
        assert_eq!(ops.iter().filter(|o| **o == Opcode::RowSetTest).count(), 2);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Gosub).count(), 2);
        let rows = explain_rows(b.ops());
        assert!(rows.iter().any(|r| r.detail == "MULTI-INDEX OR"));
        assert!(rows.iter().any(|r| r.detail == "INDEX 1"));
        assert!(rows.iter().any(|r| r.detail == "INDEX 2"));
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_auto_index_for_unindexed_join() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), SrcItem::new(t2.clone(), 1)]);
        let w = Expr::eq(Expr::column(0, &t1, 0), Expr::column(1, &t2, 1));
        let mut b = ProgramBuilder::with_cursors(2);
        let info = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src).with_where(&w)).unwrap();
        let auto = info
            .levels()
            .iter()
            .find(|l| l.lp.flags.contains(WsFlags::AUTO_INDEX))
            .unwrap();
        assert!(auto.lp.flags.contains(WsFlags::INDEXED | WsFlags::IDX_ONLY));
        assert_eq!(auto.lp.index().map(|i| i.name.as_str()), Some("auto-index"));
        assert_eq!(auto.lp.n_eq(), 1);
        let open = find_op(b.ops(), Opcode::OpenAutoindex).unwrap();
        assert_eq!(open.p1, auto.idx_cur);
        let fill = b
            .ops()
            .iter()
            .find(|op| op.opcode == Opcode::Next && op.p5 == STMTSTATUS_AUTOINDEX);
        assert!(fill.is_some());
        info.end(&mut b).unwrap();
    }

    #[test]
    fn test_left_join_records_hit() {
        let t1 = Arc::new(abc("t1"));
        let t2 = Arc::new(abc("t2"));
        let mut right = SrcItem::new(t2.clone(), 1);
        right.join_type = JoinFlags::LEFT | JoinFlags::OUTER;
        right.on_clause = Some(Expr::eq(Expr::column(1, &t2, 0), Expr::column(0, &t1, 0)));
        let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
        let rs = vec![Expr::column(1, &t2, 2)];
        let mut config = PlannerConfig::default();
        config.auto_index = false;
        let mut b = ProgramBuilder::with_cursors(2);
        let info = begin_plan(&mut b, &config, PlanRequest::new(&src).with_result_set(&rs)).unwrap();
        let inner = &info.levels()[1];
        assert!(inner.left_join > 0);
        let hit = b
            .ops()
            .iter()
            .find(|op| op.comment.as_deref() == Some("record LEFT JOIN hit"))
            .unwrap();
        assert_eq!((hit.opcode, hit.p1, hit.p2), (Opcode::Integer, 1, inner.left_join));
        info.end(&mut b).unwrap();
        assert!(find_op(b.ops(), Opcode::NullRow).is_some());
    }
}
