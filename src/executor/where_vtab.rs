//! Virtual table candidates
//!
//! A virtual table plans itself: the generator describes the constraints it
//! could pass down and asks `best_index` for a plan several times, once per
//! distinct set of usable tables, so that the solver sees both the plans
//! that need outer tables bound first and a plan that needs none.

use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{Expr, SrcItem};
use crate::schema::{ConstraintOp, IndexConstraint, IndexInfo, IndexOrderBy, IndexScanFlags, VirtualTable};
use crate::util::{log_est, log_est_from_f64};

use super::where_expr::{OperatorMask, TermFlags, TermRef};
use super::where_loop::{LoopBuilder, LoopKind, VtabLoop, WhereLoop, WsFlags};
use super::where_mask::{Bitmask, ALL_BITS};

/// Largest argument position tracked in the omit mask
const MAX_OMIT: usize = 16;

/// Constraint operator for a term, or None if the term cannot be offered
fn constraint_op(op: OperatorMask, aux: Option<ConstraintOp>, vector_rhs: bool) -> Option<ConstraintOp> {
    let op = op & OperatorMask::ALL;
    Some(if op == OperatorMask::IN || op == OperatorMask::EQ {
        ConstraintOp::Eq
    } else if op == OperatorMask::AUX {
        aux?
    } else if op == OperatorMask::ISNULL {
        ConstraintOp::IsNull
    } else if op == OperatorMask::IS {
        ConstraintOp::Is
    } else if op == OperatorMask::LT {
        if vector_rhs {
            ConstraintOp::Le
        } else {
            ConstraintOp::Lt
        }
    } else if op == OperatorMask::LE {
        ConstraintOp::Le
    } else if op == OperatorMask::GT {
        if vector_rhs {
            ConstraintOp::Ge
        } else {
            ConstraintOp::Gt
        }
    } else if op == OperatorMask::GE {
        ConstraintOp::Ge
    } else {
        return None;
    })
}

/// The constraints and ordering offered to one virtual table
struct Request {
    info: IndexInfo,
    /// Constraints the table must never omit (vector inequalities, which
    /// are offered as the weaker LE/GE)
    no_omit: u16,
}

impl<'a> LoopBuilder<'a> {
    /// Build the best_index request for `item` from the terms of the
    /// innermost clause
    fn index_request(&self, item: &SrcItem, m_unusable: Bitmask) -> Request {
        let mask_self = self.mask_set.get_mask(item.cursor);
        let mut constraints = Vec::new();
        let mut no_omit: u16 = 0;
        for (i, term) in self.chain.clause.terms.iter().enumerate() {
            if term.left_cursor != item.cursor
                || term.prereq_right & m_unusable != 0
                || term.prereq_right & mask_self != 0
                || (term.op & !OperatorMask::EQUIV).is_empty()
                || term.flags.contains(TermFlags::VNULL)
            {
                continue;
            }
            // WHERE-clause IS terms on the right table of a LEFT JOIN would
            // also match its NULL row
            if item.join_type.is_left()
                && !term.is_from_join()
                && term.op.intersects(OperatorMask::IS | OperatorMask::ISNULL)
            {
                continue;
            }
            let vector_rhs = term.op.intersects(OperatorMask::RANGE)
                && term.rhs().map_or(false, Expr::is_vector);
            let Some(op) = constraint_op(term.op, term.aux_op, vector_rhs) else {
                continue;
            };
            if vector_rhs && constraints.len() < MAX_OMIT {
                no_omit |= 1 << constraints.len();
            }
            constraints.push(IndexConstraint {
                column: term.left_column,
                op,
                usable: false,
                term_offset: i,
            });
        }

        let mut order_by = Vec::new();
        if let Some(terms) = self.order_by {
            let all_ours = terms
                .iter()
                .all(|t| matches!(&t.expr, Expr::Column(c) if c.cursor == item.cursor));
            if all_ours {
                for t in terms {
                    if let Expr::Column(c) = &t.expr {
                        order_by.push(IndexOrderBy {
                            column: c.column,
                            desc: t.order.is_desc(),
                        });
                    }
                }
            }
        }

        Request {
            info: IndexInfo::new(constraints, order_by),
            no_omit,
        }
    }

    /// Add virtual table candidates for table `tab`. Tables in
    /// `m_unusable` are never offered as prerequisites.
    pub(super) fn add_virtual(&mut self, tab: usize, m_prereq: Bitmask, m_unusable: Bitmask) -> Result<()> {
        let src = self.src;
        let item = &src.items[tab];
        let Some(vtab) = item.table.vtab.clone() else {
            return Ok(());
        };
        let mask_self = self.mask_set.get_mask(item.cursor);
        let mut req = self.index_request(item, m_unusable);
        let mut new = WhereLoop::new(tab, mask_self);
        new.flags = WsFlags::VIRTUALTABLE;
        new.kind = LoopKind::Vtab(VtabLoop::default());

        let mut pass = VtabPass {
            item,
            vtab: &vtab,
            req: &mut req,
            new: &mut new,
            m_prereq,
        };

        // First with every constraint usable
        let mut uses_in = pass.run(self, ALL_BITS, OperatorMask::empty())?;
        let m_best = pass.new.prereq & !m_prereq;
        if m_best == 0 && !uses_in {
            // Every further call would return the same plan
            return Ok(());
        }

        let mut seen_zero = false;
        let mut seen_zero_no_in = false;
        let mut m_best_no_in: Bitmask = 0;
        if uses_in {
            pass.run(self, ALL_BITS, OperatorMask::IN)?;
            m_best_no_in = pass.new.prereq & !m_prereq;
            if m_best_no_in == 0 {
                seen_zero = true;
                seen_zero_no_in = true;
            }
        }

        // Once for each distinct set of outer tables a constraint needs
        let mut m_prev: Bitmask = 0;
        loop {
            let mut m_next = ALL_BITS;
            for c in &pass.req.info.constraints {
                let m_this = self.chain.clause.terms[c.term_offset].prereq_right & !m_prereq;
                if m_this > m_prev && m_this < m_next {
                    m_next = m_this;
                }
            }
            m_prev = m_next;
            if m_next == ALL_BITS {
                break;
            }
            if m_next == m_best || m_next == m_best_no_in {
                continue;
            }
            uses_in = pass.run(self, m_next | m_prereq, OperatorMask::empty())?;
            if pass.new.prereq == m_prereq {
                seen_zero = true;
                if !uses_in {
                    seen_zero_no_in = true;
                }
            }
        }

        // Make sure a plan exists that needs no outer table at all
        if !seen_zero {
            uses_in = pass.run(self, m_prereq, OperatorMask::empty())?;
            if !uses_in {
                seen_zero_no_in = true;
            }
        }
        if !seen_zero_no_in {
            pass.run(self, m_prereq, OperatorMask::IN)?;
        }
        Ok(())
    }
}

/// State shared by the best_index calls for one table
struct VtabPass<'p> {
    item: &'p SrcItem,
    vtab: &'p Arc<dyn VirtualTable>,
    req: &'p mut Request,
    new: &'p mut WhereLoop,
    m_prereq: Bitmask,
}

impl VtabPass<'_> {
    /// Ask for a plan with the constraints whose right-hand side only
    /// needs tables in `m_usable` and whose operator is not in
    /// `m_exclude`. Returns true if the plan uses an IN constraint.
    fn run(&mut self, builder: &mut LoopBuilder<'_>, m_usable: Bitmask, m_exclude: OperatorMask) -> Result<bool> {
        let clause = builder.chain.clause;
        let table_name = &self.item.table.name;
        self.new.prereq = self.m_prereq;

        let constraints = std::mem::take(&mut self.req.info.constraints);
        let order_by = std::mem::take(&mut self.req.info.order_by);
        let mut info = IndexInfo::new(constraints, order_by);
        for c in &mut info.constraints {
            let term = &clause.terms[c.term_offset];
            c.usable = term.prereq_right & m_usable == term.prereq_right && !term.op.intersects(m_exclude);
        }
        info.col_used = self.item.col_used;

        let outcome = self.vtab.best_index(&mut info);
        let n = info.constraints.len();
        match outcome {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                tracing::trace!(table = %table_name, usable = m_usable, "where.vtab.plan_rejected");
                self.req.info = info;
                return Ok(false);
            }
            Err(e) => {
                self.req.info = info;
                return Err(e);
            }
        }

        let malfunction = || Error::with_message(ErrorCode::Error, format!("{}.xBestIndex malfunction", table_name));
        let mut slots: Vec<Option<TermRef>> = vec![None; n];
        let mut omit_mask: u16 = 0;
        let mut max_slot: Option<usize> = None;
        let mut uses_in = false;
        for (i, c) in info.constraints.iter().enumerate() {
            let usage = info.usage.get(i).copied().unwrap_or_default();
            if usage.argv_index <= 0 {
                continue;
            }
            let slot = (usage.argv_index - 1) as usize;
            if slot >= n || c.term_offset >= clause.terms.len() || slots[slot].is_some() || !c.usable {
                self.req.info = info;
                return Err(malfunction());
            }
            let term = &clause.terms[c.term_offset];
            self.new.prereq |= term.prereq_right;
            slots[slot] = Some(TermRef::new(c.term_offset));
            max_slot = max_slot.max(Some(slot));
            if slot < MAX_OMIT && usage.omit {
                omit_mask |= 1 << slot;
            }
            if term.op.contains(OperatorMask::IN) {
                // Values from an IN list arrive in list order, one lookup
                // each, so neither ordering nor uniqueness survives
                info.order_by_consumed = false;
                info.idx_flags.remove(IndexScanFlags::UNIQUE);
                uses_in = true;
            }
        }
        omit_mask &= !self.req.no_omit;

        let n_term = max_slot.map_or(0, |m| m + 1);
        slots.truncate(n_term);
        if slots.iter().any(Option::is_none) {
            self.req.info = info;
            return Err(malfunction());
        }

        self.new.terms = slots;
        self.new.setup = 0;
        self.new.run = log_est_from_f64(info.estimated_cost);
        self.new.n_out = log_est(info.estimated_rows.max(0) as u64);
        self.new.flags.set(WsFlags::ONEROW, info.idx_flags.contains(IndexScanFlags::UNIQUE));
        self.new.kind = LoopKind::Vtab(VtabLoop {
            idx_num: info.idx_num,
            idx_str: info.idx_str.clone(),
            is_ordered: if info.order_by_consumed {
                info.order_by.len() as i8
            } else {
                0
            },
            omit_mask,
        });
        tracing::debug!(
            table = %table_name,
            idx_num = info.idx_num,
            cost = info.estimated_cost,
            rows = info.estimated_rows,
            prereq = self.new.prereq,
            "where.vtab.best_index"
        );
        self.req.info = info;
        builder.insert(&*self.new);
        Ok(uses_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::PlannerConfig;
    use crate::executor::where_clause::WhereFlags;
    use crate::executor::where_expr::{AnalyzeContext, ClauseChain, WhereClause};
    use crate::executor::where_mask::MaskSet;
    use crate::parser::ast::{BinaryOp, OrderingTerm, SrcList};
    use crate::schema::{Column, Table};

    /// Uses an equality on column 0 when one is usable
    #[derive(Debug, Default)]
    struct KeyedVtab {
        calls: AtomicUsize,
    }

    impl VirtualTable for KeyedVtab {
        fn module_name(&self) -> &str {
            "keyed"
        }

        fn best_index(&self, info: &mut IndexInfo) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = info
                .constraints
                .iter()
                .position(|c| c.usable && c.column == 0 && c.op == ConstraintOp::Eq);
            match key {
                Some(i) => {
                    info.usage[i].argv_index = 1;
                    info.usage[i].omit = true;
                    info.idx_num = 1;
                    info.estimated_cost = 10.0;
                    info.estimated_rows = 1;
                    info.idx_flags = IndexScanFlags::UNIQUE;
                }
                None => {
                    info.estimated_cost = 1_000_000.0;
                    info.estimated_rows = 1_000_000;
                }
            }
            if !info.order_by.is_empty() {
                info.order_by_consumed = true;
            }
            Ok(())
        }
    }

    /// Hands back an argument position past the end of the list
    #[derive(Debug)]
    struct BrokenVtab;

    impl VirtualTable for BrokenVtab {
        fn module_name(&self) -> &str {
            "broken"
        }

        fn best_index(&self, info: &mut IndexInfo) -> Result<()> {
            if let Some(u) = info.usage.first_mut() {
                u.argv_index = 5;
            }
            Ok(())
        }
    }

    /// Rejects every plan that does not use a constraint
    #[derive(Debug)]
    struct PickyVtab;

    impl VirtualTable for PickyVtab {
        fn module_name(&self) -> &str {
            "picky"
        }

        fn best_index(&self, info: &mut IndexInfo) -> Result<()> {
            match info.constraints.iter().position(|c| c.usable) {
                Some(i) => {
                    info.usage[i].argv_index = 1;
                    info.estimated_cost = 5.0;
                    Ok(())
                }
                None => Err(Error::new(ErrorCode::Constraint)),
            }
        }
    }

    fn vtab_table(name: &str, vtab: Arc<dyn VirtualTable>) -> Table {
        let mut t = Table::new(name).with_vtab(vtab);
        t.add_column(Column::new("k", "INTEGER"));
        t.add_column(Column::new("v", "TEXT"));
        t
    }

    fn plain_table(name: &str) -> Table {
        let mut t = Table::new(name);
        t.add_column(Column::new("x", "INTEGER"));
        t
    }

    struct Setup {
        src: SrcList,
        mask_set: MaskSet,
        config: PlannerConfig,
    }

    impl Setup {
        fn new(tables: Vec<Table>) -> Self {
            let items = tables
                .into_iter()
                .enumerate()
                .map(|(i, t)| crate::parser::ast::SrcItem::new(Arc::new(t), i as i32))
                .collect();
            let src = SrcList::new(items);
            let mut mask_set = MaskSet::new();
            for item in &src.items {
                mask_set.bit_for(item.cursor);
            }
            Setup {
                src,
                mask_set,
                config: PlannerConfig::default(),
            }
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

        fn build(&self, wc: &WhereClause, order_by: Option<&[OrderingTerm]>) -> Result<Vec<WhereLoop>> {
            let chain = ClauseChain::new(wc);
            let mut b = LoopBuilder::new(
                &self.config,
                &self.src,
                &self.mask_set,
                &chain,
                order_by,
                WhereFlags::empty(),
            );
            b.add_all(self.src.len())?;
            Ok(b.into_loops())
        }
    }

    #[test]
    fn test_constant_key_plan() {
        let vt = Arc::new(KeyedVtab::default());
        let s = Setup::new(vec![vtab_table("vt", vt.clone())]);
        let t = &s.src.items[0].table;
        let wc = s.analyze(Some(&Expr::eq(Expr::column(0, t, 0), Expr::int(3))));
        let loops = s.build(&wc, None).unwrap();
        assert_eq!(loops.len(), 1);
        let lp = &loops[0];
        assert!(lp.flags.contains(WsFlags::VIRTUALTABLE | WsFlags::ONEROW));
        assert_eq!(lp.terms, vec![Some(TermRef::new(0))]);
        let v = lp.vtab().unwrap();
        assert_eq!(v.idx_num, 1);
        assert_eq!(v.omit_mask, 1);
        // The plan needs no other table, so one call is enough
        assert_eq!(vt.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_key_offers_both_plans() {
        let vt = Arc::new(KeyedVtab::default());
        let s = Setup::new(vec![plain_table("t1"), vtab_table("vt", vt.clone())]);
        let t1 = &s.src.items[0].table;
        let t = &s.src.items[1].table;
        let wc = s.analyze(Some(&Expr::eq(Expr::column(1, t, 0), Expr::column(0, t1, 0))));
        let loops = s.build(&wc, None).unwrap();
        let vt_loops: Vec<_> = loops.iter().filter(|l| l.tab == 1).collect();
        assert!(vt_loops.iter().any(|l| l.prereq == 1 && l.terms.len() == 1));
        assert!(vt_loops.iter().any(|l| l.prereq == 0 && l.terms.is_empty()));
        assert!(vt.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_order_by_consumed() {
        let vt = Arc::new(KeyedVtab::default());
        let s = Setup::new(vec![vtab_table("vt", vt)]);
        let t = &s.src.items[0].table;
        let ob = vec![OrderingTerm::asc(Expr::column(0, t, 1))];
        let wc = s.analyze(None);
        let loops = s.build(&wc, Some(&ob)).unwrap();
        assert_eq!(loops[0].vtab().unwrap().is_ordered, 1);
    }

    #[test]
    fn test_malfunction_is_reported() {
        let s = Setup::new(vec![vtab_table("vt", Arc::new(BrokenVtab))]);
        let t = &s.src.items[0].table;
        let wc = s.analyze(Some(&Expr::eq(Expr::column(0, t, 0), Expr::int(3))));
        let err = s.build(&wc, None).unwrap_err();
        assert_eq!(err.to_string(), "vt.xBestIndex malfunction");
    }

    #[test]
    fn test_rejected_plans_are_skipped() {
        let s = Setup::new(vec![plain_table("t1"), vtab_table("vt", Arc::new(PickyVtab))]);
        let t1 = &s.src.items[0].table;
        let t = &s.src.items[1].table;
        let wc = s.analyze(Some(&Expr::eq(Expr::column(1, t, 0), Expr::column(0, t1, 0))));
        let loops = s.build(&wc, None).unwrap();
        let vt_loops: Vec<_> = loops.iter().filter(|l| l.tab == 1).collect();
        assert_eq!(vt_loops.len(), 1);
        assert_eq!(vt_loops[0].prereq, 1);
    }

    #[test]
    fn test_vector_range_is_never_omitted() {
        assert_eq!(
            constraint_op(OperatorMask::LT, None, true),
            Some(ConstraintOp::Le)
        );
        assert_eq!(
            constraint_op(OperatorMask::GT, None, false),
            Some(ConstraintOp::Gt)
        );
        assert_eq!(
            constraint_op(OperatorMask::IN, None, false),
            Some(ConstraintOp::Eq)
        );
        assert_eq!(constraint_op(OperatorMask::AUX, None, false), None);
    }
}
