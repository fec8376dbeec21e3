//! WHERE clause decomposition and term analysis
//!
//! Splits a predicate into terms, classifies each term's operator, works
//! out which table and column it constrains, and derives the virtual terms
//! the loop generator can use: commuted comparisons, BETWEEN bounds, LIKE
//! prefix ranges, vector components, OR-to-IN rewrites, combined
//! disjuncts, `x>NULL` for IS NOT NULL, and auxiliary virtual-table
//! operators. Corresponds to whereexpr.c.
//!
//! Terms live in a `WhereClause` arena and are referred to by index. A
//! derived term records its parent's index; the parent counts its children
//! so that code generation can disable a source term once every derived
//! term has been consumed.

use bitflags::bitflags;

use crate::config::PlannerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{
    BinaryOp, ColumnRef, Expr, FunctionCall, InList, LikeOp, Literal, SrcItem, SrcList,
    EXPR_COLUMN,
};
use crate::schema::{Affinity, ConstraintOp, DEFAULT_COLLATION};
use crate::types::Value;
use crate::util::{log_est_from_f64, LogEst};
use crate::vdbe::comparison_collation;

use super::where_mask::{Bitmask, MaskSet, ALL_BITS};

/// Longest chain of equivalent columns a scan follows
const MAX_EQUIV: usize = 11;

// ============================================================================
// Operator and term flags
// ============================================================================

bitflags! {
    /// Bitmask describing a comparison operator used in WHERE terms.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct OperatorMask: u16 {
        const IN = 0x0001;
        const EQ = 0x0002;
        const LT = 0x0004;
        const LE = 0x0008;
        const GT = 0x0010;
        const GE = 0x0020;
        /// Operator only a virtual table can use (MATCH, LIKE, !=, ...)
        const AUX = 0x0040;
        const IS = 0x0080;
        const ISNULL = 0x0100;
        /// Two or more OR-connected terms
        const OR = 0x0200;
        /// Two or more AND-connected terms
        const AND = 0x0400;
        /// Equality between two columns with compatible affinity/collation
        const EQUIV = 0x0800;
        /// This term does not restrict the search space
        const NOOP = 0x1000;

        const ALL = 0x1fff;
        /// Operators that constrain a single column
        const SINGLE = 0x01ff;
        /// Operators usable for equality lookups
        const EQ_LIKE = Self::EQ.bits() | Self::IN.bits() | Self::IS.bits() | Self::ISNULL.bits();
        /// Range operators
        const RANGE = Self::LT.bits() | Self::LE.bits() | Self::GT.bits() | Self::GE.bits();
    }
}

bitflags! {
    /// Flags describing properties of a WHERE term
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct TermFlags: u16 {
        /// Derived term; never coded as a residual test
        const VIRTUAL = 0x0002;
        /// This term is already tested by the generated code
        const CODED = 0x0004;
        /// Has a child derived from it
        const COPIED = 0x0008;
        /// Holds an OR sub-clause
        const ORINFO = 0x0010;
        /// Holds an AND sub-clause
        const ANDINFO = 0x0020;
        /// Used during OR-to-IN analysis
        const OR_OK = 0x0040;
        /// Manufactured `x>NULL` term
        const VNULL = 0x0080;
        /// Range bound derived from LIKE
        const LIKEOPT = 0x0100;
        /// Re-test the LIKE only on the second (blob) pass
        const LIKECOND = 0x0200;
        /// Case-insensitive LIKE that has derived range terms
        const LIKE = 0x0400;
        /// Term was an IS operator
        const IS = 0x0800;
        /// Contains a correlated subquery
        const VARSELECT = 0x1000;
    }
}

/// Map a comparison expression to its operator class
pub fn operator_mask(expr: &Expr) -> Option<OperatorMask> {
    match expr {
        Expr::Binary { op, .. } => match op {
            BinaryOp::Eq => Some(OperatorMask::EQ),
            BinaryOp::Lt => Some(OperatorMask::LT),
            BinaryOp::Le => Some(OperatorMask::LE),
            BinaryOp::Gt => Some(OperatorMask::GT),
            BinaryOp::Ge => Some(OperatorMask::GE),
            BinaryOp::Is => Some(OperatorMask::IS),
            _ => None,
        },
        Expr::In { negated: false, .. } => Some(OperatorMask::IN),
        Expr::IsNull { negated: false, .. } => Some(OperatorMask::ISNULL),
        _ => None,
    }
}

/// Return true if the expression operator is allowed for indexable WHERE terms.
pub fn allowed_expr_op(expr: &Expr) -> bool {
    operator_mask(expr).is_some()
}

/// Commute a comparison operator by swapping its operands. The collating
/// sequence of the comparison is preserved by pinning the old left side's
/// collation with an explicit COLLATE when needed.
pub fn commute_comparison(expr: &mut Expr) -> bool {
    let (op, left, right) = match expr {
        Expr::Binary { op, left, right } if op.is_comparison() => (op, left, right),
        _ => return false,
    };
    let l_explicit = left.has_explicit_collation();
    let r_explicit = right.has_explicit_collation();
    if l_explicit && r_explicit {
        if let Expr::Collate { expr: inner, .. } = right.as_mut() {
            let inner = std::mem::replace(inner.as_mut(), Expr::null());
            **right = inner;
        }
    } else if !l_explicit && !r_explicit && (left.collation().is_some() || right.collation().is_some()) {
        let collation = left.collation().unwrap_or(DEFAULT_COLLATION).to_string();
        let inner = std::mem::replace(left.as_mut(), Expr::null());
        **left = Expr::Collate {
            expr: Box::new(inner),
            collation,
        };
    }
    std::mem::swap(left, right);
    *op = op.commuted();
    true
}

// ============================================================================
// Terms and clauses
// ============================================================================

/// Sub-clause owned by an OR-group or AND-group term
#[derive(Debug, Clone, Default)]
pub enum SubClause {
    #[default]
    None,
    Or(Box<OrInfo>),
    And(Box<WhereClause>),
}

/// Analysis of an OR-group term
#[derive(Debug, Clone)]
pub struct OrInfo {
    /// The disjuncts
    pub wc: WhereClause,
    /// Tables every disjunct can use an index on
    pub indexable: Bitmask,
}

/// A single term in a WHERE clause
#[derive(Debug, Clone)]
pub struct WhereTerm {
    /// The expression, with any top-level COLLATE and likelihood()
    /// wrappers removed
    pub expr: Expr,
    /// Operator class; empty when the term cannot drive an index
    pub op: OperatorMask,
    pub flags: TermFlags,
    /// Probability of truth: negative values come from likelihood()
    /// hints, 1 means "use the heuristics"
    pub truth_prob: LogEst,
    /// Term this one was derived from
    pub parent: Option<usize>,
    /// Number of derived terms not yet disabled
    pub n_child: u8,
    /// Cursor of the constrained column, or -1
    pub left_cursor: i32,
    /// Constrained column; ROWID_COLUMN or EXPR_COLUMN for the special cases
    pub left_column: i32,
    /// For vector IN terms, 1-based field of the left-hand vector
    pub vector_index: usize,
    /// Constraint code of an AUX term
    pub aux_op: Option<ConstraintOp>,
    /// Right-hand table of the LEFT JOIN whose ON clause holds this term
    pub join_cursor: Option<i32>,
    /// Tables used by the right-hand side
    pub prereq_right: Bitmask,
    /// Tables used anywhere in the term
    pub prereq_all: Bitmask,
    pub sub: SubClause,
}

impl WhereTerm {
    fn new(expr: Expr, flags: TermFlags, truth_prob: LogEst) -> Self {
        WhereTerm {
            expr,
            op: OperatorMask::empty(),
            flags,
            truth_prob,
            parent: None,
            n_child: 0,
            left_cursor: -1,
            left_column: 0,
            vector_index: 0,
            aux_op: None,
            join_cursor: None,
            prereq_right: 0,
            prereq_all: 0,
            sub: SubClause::None,
        }
    }

    /// Left operand of the comparison, narrowed to the vector field for
    /// vector IN terms
    pub fn lhs(&self) -> Option<&Expr> {
        let left = match &self.expr {
            Expr::Binary { left, .. } => left.as_ref(),
            Expr::In { expr, .. } | Expr::IsNull { expr, .. } => expr.as_ref(),
            _ => return None,
        };
        if self.vector_index > 0 {
            left.skip_collate().vector_field(self.vector_index - 1)
        } else {
            Some(left)
        }
    }

    /// Right operand of a binary comparison
    pub fn rhs(&self) -> Option<&Expr> {
        match &self.expr {
            Expr::Binary { right, .. } => Some(right),
            _ => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(TermFlags::VIRTUAL)
    }

    pub fn is_coded(&self) -> bool {
        self.flags.contains(TermFlags::CODED)
    }

    /// Term comes from the ON clause of a LEFT JOIN
    pub fn is_from_join(&self) -> bool {
        self.join_cursor.is_some()
    }

    pub fn or_info(&self) -> Option<&OrInfo> {
        match &self.sub {
            SubClause::Or(info) => Some(info),
            _ => None,
        }
    }

    pub fn and_info(&self) -> Option<&WhereClause> {
        match &self.sub {
            SubClause::And(wc) => Some(wc),
            _ => None,
        }
    }

    /// True if the term is an IN whose right-hand side is a subquery
    pub fn is_in_subquery(&self) -> bool {
        matches!(
            self.expr,
            Expr::In {
                list: InList::Subquery(_),
                ..
            }
        )
    }

    /// Number of values on the right of an IN list, if known
    pub fn in_list_len(&self) -> Option<usize> {
        match &self.expr {
            Expr::In {
                list: InList::Values(values),
                ..
            } => Some(values.len()),
            _ => None,
        }
    }
}

/// Affinity to use when comparing the term's operands (comparisonAffinity)
pub fn comparison_affinity(expr: &Expr) -> Affinity {
    match expr {
        Expr::Binary { left, right, .. } => Affinity::compare(left.affinity(), right.affinity()),
        Expr::In {
            expr,
            list: InList::Subquery(sub),
            ..
        } => Affinity::compare(expr.affinity(), sub.affinity),
        Expr::In { expr, .. } | Expr::IsNull { expr, .. } => expr.affinity(),
        _ => Affinity::Blob,
    }
}

/// True if an index column with affinity `idx_affinity` can be used for
/// the comparison in `expr` (sqlite3IndexAffinityOk)
pub fn index_affinity_ok(expr: &Expr, idx_affinity: Affinity) -> bool {
    match comparison_affinity(expr) {
        Affinity::Blob => true,
        Affinity::Text => idx_affinity == Affinity::Text,
        _ => idx_affinity.is_numeric(),
    }
}

/// Collating sequence a term's comparison uses
pub fn term_collation(expr: &Expr) -> &str {
    let coll = match expr {
        Expr::Binary { left, right, .. } => comparison_collation(left, right),
        Expr::In { expr, .. } => expr.collation(),
        _ => None,
    };
    coll.unwrap_or(DEFAULT_COLLATION)
}

/// An ordered collection of terms joined by AND or OR
#[derive(Debug, Clone)]
pub struct WhereClause {
    /// BinaryOp::And or BinaryOp::Or
    pub op: BinaryOp,
    pub terms: Vec<WhereTerm>,
    /// Number of terms present before analysis added derived ones
    pub n_base: usize,
    /// Contains an indexable OR-group
    pub has_or: bool,
}

/// Everything term analysis needs to know about the statement
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeContext<'a> {
    pub mask_set: &'a MaskSet,
    pub src: &'a SrcList,
    pub config: &'a PlannerConfig,
}

impl<'a> AnalyzeContext<'a> {
    pub fn item_for_cursor(&self, cursor: i32) -> Option<&'a SrcItem> {
        self.src.items.iter().find(|i| i.cursor == cursor)
    }

    fn is_virtual_column(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Column(col) => self
                .item_for_cursor(col.cursor)
                .map_or(false, |i| i.table.is_virtual()),
            _ => false,
        }
    }
}

impl WhereClause {
    pub fn new(op: BinaryOp) -> Self {
        WhereClause {
            op,
            terms: Vec::new(),
            n_base: 0,
            has_or: false,
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, idx: usize) -> &WhereTerm {
        &self.terms[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &WhereTerm> {
        self.terms.iter()
    }

    /// Split `expr` on this clause's operator and add each piece as a term
    pub fn split(&mut self, expr: &Expr) {
        self.split_join(expr, None);
    }

    /// Like `split`, tagging every term as belonging to the ON clause of the
    /// LEFT JOIN whose right-hand table is `join_cursor`
    pub fn split_join(&mut self, expr: &Expr, join_cursor: Option<i32>) {
        match expr.skip_collate() {
            Expr::Binary { op, left, right } if *op == self.op => {
                self.split_join(left, join_cursor);
                self.split_join(right, join_cursor);
            }
            _ => {
                let idx = self.insert(expr.clone(), TermFlags::empty());
                self.terms[idx].join_cursor = join_cursor;
            }
        }
    }

    /// Append a term and return its index. Previously obtained references
    /// into the clause are invalidated; indices are not.
    pub fn insert(&mut self, expr: Expr, flags: TermFlags) -> usize {
        let mut truth_prob: LogEst = 1;
        let mut expr = expr;
        let expr = loop {
            expr = match expr {
                Expr::Collate { expr: inner, .. } => *inner,
                Expr::Function(f) if f.likelihood().is_some() && !f.args.is_empty() => {
                    let p = f.likelihood().unwrap_or(1.0);
                    truth_prob = log_est_from_f64(p * 134_217_728.0) - 270;
                    let FunctionCall { mut args, .. } = f;
                    args.swap_remove(0)
                }
                other => break other,
            };
        };
        tracing::trace!(term = self.terms.len(), "where.term_added");
        self.terms.push(WhereTerm::new(expr, flags, truth_prob));
        self.terms.len() - 1
    }

    fn mark_term_as_child(&mut self, child: usize, parent: usize) {
        self.terms[child].parent = Some(parent);
        self.terms[child].truth_prob = self.terms[parent].truth_prob;
        self.terms[parent].n_child += 1;
    }

    /// Add `column = arg` terms for the arguments of a table-valued function
    pub fn add_func_args(&mut self, item: &SrcItem) -> Result<()> {
        if item.func_args.is_empty() {
            return Ok(());
        }
        let table = &item.table;
        let hidden: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_hidden)
            .map(|(i, _)| i)
            .collect();
        if item.func_args.len() > hidden.len() {
            return Err(Error::with_message(
                ErrorCode::Error,
                format!(
                    "too many arguments on {}() - max {}",
                    table.name,
                    hidden.len()
                ),
            ));
        }
        let join_cursor = if item.join_type.is_left() {
            Some(item.cursor)
        } else {
            None
        };
        for (arg, col) in item.func_args.iter().zip(hidden) {
            let column = Expr::Column(ColumnRef::resolve(item.cursor, table, col as i32));
            let idx = self.insert(Expr::eq(column, arg.clone()), TermFlags::empty());
            self.terms[idx].join_cursor = join_cursor;
        }
        Ok(())
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Analyze every term, last to first
    pub fn analyze_all(&mut self, ctx: &AnalyzeContext<'_>) -> Result<()> {
        self.n_base = self.terms.len();
        for idx in (0..self.terms.len()).rev() {
            self.analyze_term(ctx, idx)?;
        }
        Ok(())
    }

    /// Insert a derived term inheriting the source term's join marking
    fn insert_derived(&mut self, expr: Expr, flags: TermFlags, source: usize) -> usize {
        let join_cursor = self.terms[source].join_cursor;
        let idx = self.insert(expr, flags);
        self.terms[idx].join_cursor = join_cursor;
        idx
    }

    /// Analyze term `idx` (exprAnalyze)
    pub fn analyze_term(&mut self, ctx: &AnalyzeContext<'_>, idx: usize) -> Result<()> {
        let mask_set = ctx.mask_set;
        let expr = self.terms[idx].expr.clone();
        let vector_index = self.terms[idx].vector_index;

        let left_operand = match &expr {
            Expr::Binary { left, .. } => Some(left.as_ref()),
            Expr::In { expr, .. } | Expr::IsNull { expr, .. } => Some(expr.as_ref()),
            Expr::Between { expr, .. } => Some(expr.as_ref()),
            _ => None,
        };
        let prereq_left = left_operand.map_or(0, |l| mask_set.expr_usage(l));
        let prereq_right = match &expr {
            Expr::In { expr: lhs, list, .. } => {
                check_in_operands(lhs, list)?;
                mask_set.in_list_usage(list)
            }
            Expr::IsNull { .. } => 0,
            Expr::Binary { right, .. } => mask_set.expr_usage(right),
            _ => 0,
        };
        let mut prereq_all = mask_set.expr_usage(&expr);
        if has_correlated_subquery(&expr) {
            self.terms[idx].flags |= TermFlags::VARSELECT;
        }
        let mut extra_right: Bitmask = 0;
        if let Some(join_cursor) = self.terms[idx].join_cursor {
            let x = mask_set.get_mask(join_cursor);
            prereq_all |= x;
            // ON clause terms may not drive an index on a table left of the join
            extra_right = x.wrapping_sub(1);
            if x != 0 && (prereq_all >> 1) >= x {
                return Err(Error::with_message(
                    ErrorCode::Error,
                    "ON clause references tables to its right",
                ));
            }
        }
        {
            let term = &mut self.terms[idx];
            term.prereq_right = prereq_right;
            term.prereq_all = prereq_all;
            term.left_cursor = -1;
            term.parent = None;
            term.op = OperatorMask::empty();
        }

        if let Some(op_class) = operator_mask(&expr) {
            let op_mask = if prereq_right & prereq_left == 0 {
                OperatorMask::ALL
            } else {
                OperatorMask::EQUIV
            };
            let mut left = left_operand.map(Expr::skip_collate);
            if vector_index > 0 {
                left = left.and_then(|l| l.vector_field(vector_index - 1));
            }
            let binary_op = match &expr {
                Expr::Binary { op, .. } => Some(*op),
                _ => None,
            };
            if let Some((cur, col)) =
                left.and_then(|l| expr_might_be_indexed(ctx, prereq_left, l, binary_op))
            {
                let term = &mut self.terms[idx];
                term.left_cursor = cur;
                term.left_column = col;
                term.op = op_class & op_mask;
            }
            if binary_op == Some(BinaryOp::Is) {
                self.terms[idx].flags |= TermFlags::IS;
            }
            let right = match &expr {
                Expr::Binary { right, .. } => Some(right.skip_collate()),
                _ => None,
            };
            if let Some((cur, col)) =
                right.and_then(|r| expr_might_be_indexed(ctx, prereq_right, r, binary_op))
            {
                let mut dup = expr.clone();
                commute_comparison(&mut dup);
                let new_op = operator_mask(&dup).unwrap_or(OperatorMask::empty());
                let target;
                let mut extra_op = OperatorMask::empty();
                if self.terms[idx].left_cursor >= 0 {
                    let equivalence = term_is_equivalence(ctx.config, &expr, self.terms[idx].join_cursor);
                    target = self.insert_derived(dup, TermFlags::VIRTUAL, idx);
                    self.mark_term_as_child(target, idx);
                    if binary_op == Some(BinaryOp::Is) {
                        self.terms[target].flags |= TermFlags::IS;
                    }
                    self.terms[idx].flags |= TermFlags::COPIED;
                    if equivalence {
                        self.terms[idx].op |= OperatorMask::EQUIV;
                        extra_op = OperatorMask::EQUIV;
                    }
                } else {
                    target = idx;
                    self.terms[idx].expr = dup;
                }
                let term = &mut self.terms[target];
                term.left_cursor = cur;
                term.left_column = col;
                term.prereq_right = prereq_left | extra_right;
                term.prereq_all = prereq_all;
                term.op = (new_op | extra_op) & op_mask;
            }
        } else if let (Expr::Between { expr: lhs, low, high, negated: false }, BinaryOp::And) =
            (&expr, self.op)
        {
            for (op, bound) in [(BinaryOp::Ge, low), (BinaryOp::Le, high)] {
                let new_expr = Expr::binary(op, (**lhs).clone(), (**bound).clone());
                let new_idx = self.insert_derived(new_expr, TermFlags::VIRTUAL, idx);
                self.analyze_term(ctx, new_idx)?;
                self.mark_term_as_child(new_idx, idx);
            }
        } else if matches!(&expr, Expr::Binary { op: BinaryOp::Or, .. }) {
            self.analyze_or_term(ctx, idx)?;
        }

        // x IS NOT NULL  ==>  virtual x>NULL so an index can skip NULLs
        if let Expr::IsNull {
            expr: inner,
            negated: true,
        } = &expr
        {
            if let Expr::Column(col) = inner.as_ref() {
                if col.column >= 0
                    && self.terms[idx].join_cursor.is_none()
                    && ctx.config.stat4
                {
                    let new_expr = Expr::binary(BinaryOp::Gt, (**inner).clone(), Expr::null());
                    let new_idx = self.insert(new_expr, TermFlags::VIRTUAL | TermFlags::VNULL);
                    let prereq_all = self.terms[idx].prereq_all;
                    let t = &mut self.terms[new_idx];
                    t.prereq_right = 0;
                    t.left_cursor = col.cursor;
                    t.left_column = col.column;
                    t.op = OperatorMask::GT;
                    t.prereq_all = prereq_all;
                    self.mark_term_as_child(new_idx, idx);
                    self.terms[idx].flags |= TermFlags::COPIED;
                }
            }
        }

        if self.op == BinaryOp::And && ctx.config.like_opt {
            self.analyze_like(ctx, idx, &expr)?;
        }

        if self.op == BinaryOp::And {
            self.analyze_aux(ctx, idx, &expr);
        }

        // (a,b) = (x,y)  ==>  a=x AND b=y, original disabled
        if self.op == BinaryOp::And {
            if let Expr::Binary {
                op: op @ (BinaryOp::Eq | BinaryOp::Is),
                left,
                right,
            } = &expr
            {
                let n = left.vector_size();
                if n > 1
                    && right.vector_size() == n
                    && matches!(left.skip_collate(), Expr::Vector(_))
                    && matches!(right.skip_collate(), Expr::Vector(_))
                {
                    for i in 0..n {
                        let (Some(l), Some(r)) = (left.vector_field(i), right.vector_field(i)) else {
                            break;
                        };
                        let new_expr = Expr::binary(*op, l.clone(), r.clone());
                        let new_idx = self.insert_derived(new_expr, TermFlags::empty(), idx);
                        self.analyze_term(ctx, new_idx)?;
                    }
                    let term = &mut self.terms[idx];
                    term.flags |= TermFlags::CODED | TermFlags::VIRTUAL;
                    term.op = OperatorMask::empty();
                }
            }
        }

        // (a,b) IN (SELECT x,y ...)  ==>  one virtual term per field
        if self.op == BinaryOp::And && vector_index == 0 {
            if let Expr::In {
                expr: lhs,
                list: InList::Subquery(_),
                negated: false,
            } = &expr
            {
                if matches!(lhs.skip_collate(), Expr::Vector(_)) {
                    for i in 0..lhs.vector_size() {
                        let new_idx = self.insert(expr.clone(), TermFlags::VIRTUAL);
                        self.terms[new_idx].join_cursor = self.terms[idx].join_cursor;
                        self.terms[new_idx].vector_index = i + 1;
                        self.analyze_term(ctx, new_idx)?;
                        self.mark_term_as_child(new_idx, idx);
                    }
                }
            }
        }

        self.terms[idx].prereq_right |= extra_right;
        Ok(())
    }

    /// LIKE/GLOB with a constant prefix gets two virtual range terms
    fn analyze_like(&mut self, ctx: &AnalyzeContext<'_>, idx: usize, expr: &Expr) -> Result<()> {
        let Some(like) = is_like_or_glob(ctx, expr) else {
            return Ok(());
        };
        let Expr::Like { expr: lhs, .. } = expr else {
            return Ok(());
        };
        let mut lower = like.prefix.clone();
        let mut upper = like.prefix.clone();
        let mut complete = like.complete;
        if like.no_case {
            self.terms[idx].flags |= TermFlags::LIKE;
            lower = lower.to_ascii_uppercase();
            upper = upper.to_ascii_lowercase();
        }
        // Replace the last prefix char with its successor to get the
        // exclusive upper bound. UTF-8 byte order matches code point order.
        let Some(mut c) = upper.pop() else {
            return Ok(());
        };
        if like.no_case {
            if c == '@' {
                complete = false;
            }
            c = c.to_ascii_lowercase();
        }
        let Some(next) = next_char(c) else {
            return Ok(());
        };
        upper.push(next);
        let collation = if like.no_case { "NOCASE" } else { DEFAULT_COLLATION };
        let flags = TermFlags::LIKEOPT | TermFlags::VIRTUAL;
        let collated = || Expr::Collate {
            expr: lhs.clone(),
            collation: collation.to_string(),
        };
        let ge = Expr::binary(BinaryOp::Ge, collated(), Expr::string(lower));
        let idx1 = self.insert_derived(ge, flags, idx);
        self.analyze_term(ctx, idx1)?;
        let lt = Expr::binary(BinaryOp::Lt, collated(), Expr::string(upper));
        let idx2 = self.insert_derived(lt, flags, idx);
        self.analyze_term(ctx, idx2)?;
        if complete {
            self.mark_term_as_child(idx1, idx);
            self.mark_term_as_child(idx2, idx);
        }
        Ok(())
    }

    /// Operators only a virtual table can use become WO_AUX terms
    fn analyze_aux(&mut self, ctx: &AnalyzeContext<'_>, idx: usize, expr: &Expr) {
        let candidates = auxiliary_vtab_operators(ctx, expr);
        for (aux_op, left, right) in candidates {
            let prereq_expr = right.as_ref().map_or(0, |r| ctx.mask_set.expr_usage(r));
            let prereq_column = ctx.mask_set.expr_usage(&left);
            if prereq_expr & prereq_column != 0 {
                continue;
            }
            let Expr::Column(col) = &left else { continue };
            let (cursor, column) = (col.cursor, col.column);
            let new_expr = Expr::binary(BinaryOp::Eq, left.clone(), right.unwrap_or_else(Expr::null));
            let new_idx = self.insert_derived(new_expr, TermFlags::VIRTUAL, idx);
            let prereq_all = self.terms[idx].prereq_all;
            let t = &mut self.terms[new_idx];
            t.prereq_right = prereq_expr;
            t.left_cursor = cursor;
            t.left_column = column;
            t.op = OperatorMask::AUX;
            t.aux_op = Some(aux_op);
            t.prereq_all = prereq_all;
            self.mark_term_as_child(new_idx, idx);
            self.terms[idx].flags |= TermFlags::COPIED;
        }
    }

    /// Analyze an OR-group (exprAnalyzeOrTerm)
    fn analyze_or_term(&mut self, ctx: &AnalyzeContext<'_>, idx: usize) -> Result<()> {
        let expr = self.terms[idx].expr.clone();
        let mut or_wc = WhereClause::new(BinaryOp::Or);
        or_wc.split(&expr);
        for t in &mut or_wc.terms {
            t.join_cursor = self.terms[idx].join_cursor;
        }
        or_wc.analyze_all(ctx)?;
        self.terms[idx].flags |= TermFlags::ORINFO;

        let mut indexable = ALL_BITS;
        let mut chng_to_in = ALL_BITS;
        for i in 0..or_wc.terms.len() {
            if indexable == 0 {
                break;
            }
            if !or_wc.terms[i].op.intersects(OperatorMask::SINGLE) {
                chng_to_in = 0;
                let mut and_wc = WhereClause::new(BinaryOp::And);
                and_wc.split(&or_wc.terms[i].expr);
                for t in &mut and_wc.terms {
                    t.join_cursor = or_wc.terms[i].join_cursor;
                }
                and_wc.analyze_all(ctx)?;
                let mut b = 0;
                for t in &and_wc.terms {
                    if allowed_expr_op(&t.expr) || t.op == OperatorMask::AUX {
                        b |= ctx.mask_set.get_mask(t.left_cursor);
                    }
                }
                indexable &= b;
                let or_term = &mut or_wc.terms[i];
                or_term.flags |= TermFlags::ANDINFO;
                or_term.op = OperatorMask::AND;
                or_term.sub = SubClause::And(Box::new(and_wc));
            } else if or_wc.terms[i].flags.contains(TermFlags::COPIED) {
                // revisited through its virtual copy
            } else {
                let mut b = ctx.mask_set.get_mask(or_wc.terms[i].left_cursor);
                if or_wc.terms[i].is_virtual() {
                    if let Some(p) = or_wc.terms[i].parent {
                        b |= ctx.mask_set.get_mask(or_wc.terms[p].left_cursor);
                    }
                }
                indexable &= b;
                if !or_wc.terms[i].op.contains(OperatorMask::EQ) {
                    chng_to_in = 0;
                } else {
                    chng_to_in &= b;
                }
            }
        }

        // Two-way OR: combine x<5 OR x=5 into x<=5
        let mut combined = Vec::new();
        if indexable != 0 && or_wc.terms.len() == 2 {
            let ones = nth_subterms(&or_wc.terms[0]);
            let twos = nth_subterms(&or_wc.terms[1]);
            for one in &ones {
                for two in &twos {
                    if let Some(e) = combine_disjuncts(one, two) {
                        combined.push(e);
                    }
                }
            }
        }

        let in_expr = if chng_to_in != 0 {
            or_to_in(ctx, &mut or_wc, chng_to_in)
        } else {
            None
        };

        {
            let term = &mut self.terms[idx];
            term.op = OperatorMask::OR;
            term.sub = SubClause::Or(Box::new(OrInfo {
                wc: or_wc,
                indexable,
            }));
        }
        if indexable != 0 {
            self.has_or = true;
        }

        for e in combined {
            let new_idx = self.insert_derived(e, TermFlags::VIRTUAL, idx);
            self.analyze_term(ctx, new_idx)?;
        }
        if let Some(e) = in_expr {
            let new_idx = self.insert_derived(e, TermFlags::VIRTUAL, idx);
            self.analyze_term(ctx, new_idx)?;
            self.mark_term_as_child(new_idx, idx);
        }
        Ok(())
    }
}

/// Sub-terms of a disjunct: itself, or the conjuncts of an AND sub-clause
fn nth_subterms(term: &WhereTerm) -> Vec<&WhereTerm> {
    match &term.sub {
        SubClause::And(wc) => wc.terms.iter().collect(),
        _ => vec![term],
    }
}

/// Combine two comparisons of the same operands joined by OR into one
/// (whereCombineDisjuncts)
fn combine_disjuncts(one: &WhereTerm, two: &WhereTerm) -> Option<Expr> {
    let cmp = OperatorMask::EQ | OperatorMask::LT | OperatorMask::LE | OperatorMask::GT | OperatorMask::GE;
    if (one.flags | two.flags).contains(TermFlags::VNULL) {
        return None;
    }
    if !one.op.intersects(cmp) || !two.op.intersects(cmp) {
        return None;
    }
    let mut e_op = (one.op | two.op) & cmp;
    let low = OperatorMask::EQ | OperatorMask::LT | OperatorMask::LE;
    let high = OperatorMask::EQ | OperatorMask::GT | OperatorMask::GE;
    if !low.contains(e_op) && !high.contains(e_op) {
        return None;
    }
    let (Expr::Binary { left: l1, right: r1, .. }, Expr::Binary { left: l2, right: r2, .. }) =
        (&one.expr, &two.expr)
    else {
        return None;
    };
    if l1 != l2 || r1 != r2 {
        return None;
    }
    if e_op.bits().count_ones() > 1 {
        e_op = if e_op.intersects(OperatorMask::LT | OperatorMask::LE) {
            OperatorMask::LE
        } else {
            OperatorMask::GE
        };
    }
    let op = if e_op == OperatorMask::EQ {
        BinaryOp::Eq
    } else if e_op == OperatorMask::LT {
        BinaryOp::Lt
    } else if e_op == OperatorMask::LE {
        BinaryOp::Le
    } else if e_op == OperatorMask::GT {
        BinaryOp::Gt
    } else {
        BinaryOp::Ge
    };
    Some(Expr::binary(op, (**l1).clone(), (**r1).clone()))
}

/// Decide whether every disjunct is `=` on one common column and build the
/// equivalent IN expression
fn or_to_in(ctx: &AnalyzeContext<'_>, or_wc: &mut WhereClause, chng_to_in: Bitmask) -> Option<Expr> {
    let n = or_wc.terms.len();
    let mut ok = false;
    let mut i_cursor = -1;
    let mut i_column = -1;
    for pass in 0..2 {
        if ok {
            break;
        }
        let mut start = None;
        for i in 0..n {
            let t = &mut or_wc.terms[i];
            t.flags.remove(TermFlags::OR_OK);
            if t.left_cursor == i_cursor {
                debug_assert_eq!(pass, 1);
                continue;
            }
            if chng_to_in & ctx.mask_set.get_mask(t.left_cursor) == 0 {
                continue;
            }
            i_column = t.left_column;
            i_cursor = t.left_cursor;
            start = Some(i);
            break;
        }
        let Some(start) = start else { break };
        ok = true;
        let first_left = or_wc.terms[start].lhs().cloned();
        for i in start..n {
            if !ok {
                break;
            }
            let t = &mut or_wc.terms[i];
            if t.left_cursor != i_cursor {
                t.flags.remove(TermFlags::OR_OK);
            } else if t.left_column != i_column
                || (i_column == EXPR_COLUMN && t.lhs() != first_left.as_ref())
            {
                ok = false;
            } else {
                let aff_right = t.rhs().map_or(Affinity::Blob, Expr::affinity);
                let aff_left = t.lhs().map_or(Affinity::Blob, Expr::affinity);
                if aff_right != Affinity::Blob && aff_right != aff_left {
                    ok = false;
                } else {
                    t.flags |= TermFlags::OR_OK;
                }
            }
        }
    }
    if !ok {
        return None;
    }
    let mut values = Vec::new();
    let mut left = None;
    for t in &or_wc.terms {
        if !t.flags.contains(TermFlags::OR_OK) {
            continue;
        }
        if let Some(r) = t.rhs() {
            values.push(r.clone());
        }
        left = t.lhs().cloned();
    }
    left.map(|l| Expr::in_list(l, values))
}

/// Reject IN operators whose two sides have different vector sizes
fn check_in_operands(lhs: &Expr, list: &InList) -> Result<()> {
    let n = lhs.vector_size();
    match list {
        InList::Values(values) => {
            if n > 1 || values.iter().any(Expr::is_vector) {
                return Err(Error::with_message(ErrorCode::Error, "row value misused"));
            }
        }
        InList::Subquery(sub) => {
            if sub.n_column != n {
                return Err(Error::with_message(
                    ErrorCode::Error,
                    format!("sub-select returns {} columns - expected {}", sub.n_column, n),
                ));
            }
        }
    }
    Ok(())
}

fn has_correlated_subquery(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| match e {
        Expr::Subquery(sub) | Expr::Exists { subquery: sub, .. } if !sub.correlated.is_empty() => {
            found = true
        }
        Expr::In {
            list: InList::Subquery(sub),
            ..
        } if !sub.correlated.is_empty() => found = true,
        _ => {}
    });
    found
}

/// If `expr` could drive an index, return the (cursor, column) it
/// constrains. Expressions over a single table match index expressions.
fn expr_might_be_indexed(
    ctx: &AnalyzeContext<'_>,
    prereq: Bitmask,
    expr: &Expr,
    op: Option<BinaryOp>,
) -> Option<(i32, i32)> {
    let mut expr = expr;
    if matches!(op, Some(BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)) {
        if let Expr::Vector(items) = expr {
            expr = items.first()?.skip_collate();
        }
    }
    if let Expr::Column(col) = expr {
        return Some((col.cursor, col.column));
    }
    if prereq == 0 || prereq & (prereq - 1) != 0 {
        return None;
    }
    for item in &ctx.src.items {
        if ctx.mask_set.get_mask(item.cursor) != prereq {
            continue;
        }
        for index in &item.table.indexes {
            let matched = index
                .columns
                .iter()
                .filter_map(|c| c.expr.as_ref())
                .any(|pattern| expr.matches_pattern(pattern, item.cursor));
            if matched {
                return Some((item.cursor, EXPR_COLUMN));
            }
        }
    }
    None
}

/// `A = B` with compatible affinity and collation lets constraints on one
/// side be applied to the other (termIsEquivalence)
fn term_is_equivalence(config: &PlannerConfig, expr: &Expr, join_cursor: Option<i32>) -> bool {
    if !config.transitive || join_cursor.is_some() {
        return false;
    }
    let Expr::Binary {
        op: BinaryOp::Eq | BinaryOp::Is,
        left,
        right,
    } = expr
    else {
        return false;
    };
    let aff1 = left.affinity();
    let aff2 = right.affinity();
    if aff1 != aff2 && (!aff1.is_numeric() || !aff2.is_numeric()) {
        return false;
    }
    let coll = comparison_collation(left, right).unwrap_or(DEFAULT_COLLATION);
    if coll.eq_ignore_ascii_case(DEFAULT_COLLATION) {
        return true;
    }
    let l = left.collation().unwrap_or(DEFAULT_COLLATION);
    let r = right.collation().unwrap_or(DEFAULT_COLLATION);
    l.eq_ignore_ascii_case(r)
}

/// A LIKE or GLOB whose pattern has a literal prefix
struct LikePrefix {
    prefix: String,
    /// The pattern is exactly prefix followed by a single trailing `%`/`*`
    complete: bool,
    no_case: bool,
}

/// Recognize `column LIKE 'abc%'` (isLikeOrGlob)
fn is_like_or_glob(ctx: &AnalyzeContext<'_>, expr: &Expr) -> Option<LikePrefix> {
    let Expr::Like {
        expr: lhs,
        pattern,
        escape,
        op,
        negated: false,
    } = expr
    else {
        return None;
    };
    let (wc_many, wc_one, wc_set, no_case) = match op {
        LikeOp::Like => ('%', '_', None, !ctx.config.case_sensitive_like),
        LikeOp::Glob => ('*', '?', Some('['), false),
        _ => return None,
    };
    let esc = match escape {
        None => None,
        Some(e) => match e.constant_value() {
            Some(Value::Text(s)) if s.chars().count() == 1 => s.chars().next(),
            _ => return None,
        },
    };
    if esc == Some(wc_many) || esc == Some(wc_one) {
        return None;
    }
    let left = lhs.skip_collate();
    let text = match pattern.skip_collate() {
        Expr::Literal(Literal::String(s)) => s.clone(),
        Expr::Variable(v) => match &v.value {
            Some(Value::Text(s)) => s.clone(),
            _ => return None,
        },
        _ => return None,
    };
    let chars: Vec<char> = text.chars().collect();
    let mut cnt = 0;
    let mut stop = None;
    while cnt < chars.len() {
        let c = chars[cnt];
        if c == wc_many || c == wc_one || Some(c) == wc_set {
            stop = Some(c);
            break;
        }
        cnt += 1;
        if Some(c) == esc && cnt < chars.len() {
            cnt += 1;
        }
    }
    if cnt == 0 || chars[cnt - 1] == '\u{ff}' || (cnt == 1 && Some(chars[0]) == esc) {
        return None;
    }
    let complete = stop == Some(wc_many) && cnt + 1 == chars.len();
    let mut prefix = String::new();
    let mut i = 0;
    while i < cnt {
        if Some(chars[i]) == esc {
            i += 1;
        }
        if let Some(c) = chars.get(i) {
            prefix.push(*c);
        }
        i += 1;
    }
    // A prefix that looks numeric only works on a TEXT column
    let first = prefix.chars().next()?;
    if first.is_ascii_digit() || first == '-' || (first == '/' && prefix.chars().count() == 1) {
        let text_column = matches!(left, Expr::Column(c) if c.affinity == Affinity::Text);
        if !text_column || ctx.is_virtual_column(left) {
            return None;
        }
    }
    Some(LikePrefix {
        prefix,
        complete,
        no_case,
    })
}

/// The smallest `char` greater than `c`, stepping over the surrogate gap
fn next_char(c: char) -> Option<char> {
    match c as u32 + 1 {
        0xD800 => Some('\u{E000}'),
        n => char::from_u32(n),
    }
}

/// Operators a virtual table may consume that the btree planner ignores
/// (isAuxiliaryVtabOperator). Returns (operator, column, right operand).
fn auxiliary_vtab_operators(
    ctx: &AnalyzeContext<'_>,
    expr: &Expr,
) -> Vec<(ConstraintOp, Expr, Option<Expr>)> {
    let mut out = Vec::new();
    match expr {
        Expr::Like {
            expr: lhs,
            pattern,
            escape: None,
            op,
            negated: false,
        } => {
            let col = lhs.skip_collate();
            if ctx.is_virtual_column(col) {
                let aux = match op {
                    LikeOp::Like => ConstraintOp::Like,
                    LikeOp::Glob => ConstraintOp::Glob,
                    LikeOp::Regexp => ConstraintOp::Regexp,
                    LikeOp::Match => ConstraintOp::Match,
                };
                out.push((aux, col.clone(), Some((**pattern).clone())));
            }
        }
        Expr::Function(f) if f.args.len() == 2 => {
            let col = f.args[1].skip_collate();
            let builtin = match f.name.to_ascii_lowercase().as_str() {
                "match" => Some(ConstraintOp::Match),
                "glob" => Some(ConstraintOp::Glob),
                "like" => Some(ConstraintOp::Like),
                "regexp" => Some(ConstraintOp::Regexp),
                _ => None,
            };
            if let (Some(aux), true) = (builtin, ctx.is_virtual_column(col)) {
                out.push((aux, col.clone(), Some(f.args[0].clone())));
                return out;
            }
            let col = f.args[0].skip_collate();
            if let Expr::Column(c) = col {
                let vtab = ctx.item_for_cursor(c.cursor).and_then(|i| i.table.vtab.clone());
                if let Some(vtab) = vtab {
                    if let Some(code) = vtab.find_function(&f.name, 2) {
                        if code >= 150 {
                            out.push((ConstraintOp::Function(code), col.clone(), Some(f.args[1].clone())));
                        }
                    }
                }
            }
        }
        Expr::Binary {
            op: op @ (BinaryOp::Ne | BinaryOp::IsNot),
            left,
            right,
        } => {
            let aux = if *op == BinaryOp::Ne {
                ConstraintOp::Ne
            } else {
                ConstraintOp::IsNot
            };
            let l = left.skip_collate();
            let r = right.skip_collate();
            if ctx.is_virtual_column(l) {
                out.push((aux, l.clone(), Some(r.clone())));
            }
            if ctx.is_virtual_column(r) {
                out.push((aux, r.clone(), Some(l.clone())));
            }
        }
        Expr::IsNull {
            expr: inner,
            negated: true,
        } => {
            let l = inner.skip_collate();
            if ctx.is_virtual_column(l) {
                out.push((ConstraintOp::IsNotNull, l.clone(), None));
            }
        }
        _ => {}
    }
    out
}

// ============================================================================
// Scanning for terms
// ============================================================================

/// A clause together with the clauses enclosing it. OR sub-clauses are
/// planned with the main clause as their outer clause so that constraints
/// outside the OR remain visible.
#[derive(Debug, Clone, Copy)]
pub struct ClauseChain<'a> {
    pub clause: &'a WhereClause,
    pub outer: Option<&'a ClauseChain<'a>>,
}

/// Reference to a term of a `ClauseChain`: `depth` 0 is the innermost
/// clause, 1 its outer clause, and so on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermRef {
    pub depth: u8,
    pub idx: usize,
}

impl TermRef {
    pub fn new(idx: usize) -> Self {
        TermRef { depth: 0, idx }
    }
}

impl<'a> ClauseChain<'a> {
    pub fn new(clause: &'a WhereClause) -> Self {
        ClauseChain {
            clause,
            outer: None,
        }
    }

    pub fn nested(clause: &'a WhereClause, outer: &'a ClauseChain<'a>) -> Self {
        ClauseChain {
            clause,
            outer: Some(outer),
        }
    }

    pub fn clause_at(&self, depth: u8) -> Option<&'a WhereClause> {
        let mut chain = self;
        for _ in 0..depth {
            chain = chain.outer?;
        }
        Some(chain.clause)
    }

    pub fn term(&self, r: TermRef) -> Option<&'a WhereTerm> {
        self.clause_at(r.depth).and_then(|c| c.terms.get(r.idx))
    }

    fn levels(&self) -> Vec<&'a WhereClause> {
        let mut out = vec![self.clause];
        let mut chain = self.outer;
        while let Some(c) = chain {
            out.push(c.clause);
            chain = c.outer;
        }
        out
    }
}

/// Iterator over the terms constraining one column, following chains of
/// equivalent columns (whereScanInit/whereScanNext)
pub struct WhereScan<'a> {
    levels: Vec<&'a WhereClause>,
    level: usize,
    k: usize,
    equiv: Vec<(i32, i32)>,
    i_equiv: usize,
    op_mask: OperatorMask,
    idx_affinity: Option<Affinity>,
    collation: Option<String>,
    idx_expr: Option<&'a Expr>,
}

impl<'a> WhereScan<'a> {
    /// Scan for terms on `column` of `cursor`. With an index, `column` is
    /// the index column position and the index's affinity and collation
    /// must match.
    pub fn new(
        chain: &ClauseChain<'a>,
        cursor: i32,
        column: i32,
        op_mask: OperatorMask,
        index: Option<(&'a crate::schema::Index, &'a crate::schema::Table)>,
    ) -> Self {
        let mut scan = WhereScan {
            levels: chain.levels(),
            level: 0,
            k: 0,
            equiv: Vec::with_capacity(MAX_EQUIV),
            i_equiv: 1,
            op_mask,
            idx_affinity: None,
            collation: None,
            idx_expr: None,
        };
        let mut column = column;
        if let Some((index, table)) = index {
            let j = column.max(0) as usize;
            column = table.normalize_column(index.column_at(j));
            if column == EXPR_COLUMN {
                let e = index.columns.get(j).and_then(|c| c.expr.as_ref());
                scan.idx_expr = e;
                scan.idx_affinity = e.map(Expr::affinity);
                scan.collation = Some(index.collation_at(j).to_string());
            } else if column >= 0 {
                scan.idx_affinity = Some(table.column_affinity(column));
                scan.collation = Some(index.collation_at(j).to_string());
            }
        } else if column == EXPR_COLUMN {
            scan.levels.clear();
        }
        scan.equiv.push((cursor, column));
        scan
    }

    fn matches(&self, term: &WhereTerm, cur: i32, col: i32) -> bool {
        if term.left_cursor != cur || term.left_column != col {
            return false;
        }
        if col == EXPR_COLUMN {
            let (Some(lhs), Some(pattern)) = (term.lhs(), self.idx_expr) else {
                return false;
            };
            if !lhs.skip_collate().matches_pattern(pattern, cur) {
                return false;
            }
        }
        !(self.i_equiv > 1 && term.is_from_join())
    }
}

impl<'a> Iterator for WhereScan<'a> {
    type Item = TermRef;

    fn next(&mut self) -> Option<TermRef> {
        loop {
            let (cur, col) = self.equiv[self.i_equiv - 1];
            while self.level < self.levels.len() {
                let clause = self.levels[self.level];
                while self.k < clause.terms.len() {
                    let k = self.k;
                    self.k += 1;
                    let term = &clause.terms[k];
                    if !self.matches(term, cur, col) {
                        continue;
                    }
                    if term.op.contains(OperatorMask::EQUIV) && self.equiv.len() < MAX_EQUIV {
                        if let Some(Expr::Column(x)) = term.rhs().map(Expr::skip_collate) {
                            if !self.equiv.contains(&(x.cursor, x.column)) {
                                self.equiv.push((x.cursor, x.column));
                            }
                        }
                    }
                    if !term.op.intersects(self.op_mask) {
                        continue;
                    }
                    if let Some(coll) = &self.collation {
                        if !term.op.contains(OperatorMask::ISNULL) {
                            if let Some(aff) = self.idx_affinity {
                                if !index_affinity_ok(&term.expr, aff) {
                                    continue;
                                }
                            }
                            if !term_collation(&term.expr).eq_ignore_ascii_case(coll) {
                                continue;
                            }
                        }
                    }
                    if term.op.intersects(OperatorMask::EQ | OperatorMask::IS) {
                        if let Some(Expr::Column(x)) = term.rhs() {
                            if (x.cursor, x.column) == self.equiv[0] {
                                continue;
                            }
                        }
                    }
                    return Some(TermRef {
                        depth: self.level as u8,
                        idx: k,
                    });
                }
                self.level += 1;
                self.k = 0;
            }
            if self.i_equiv >= self.equiv.len() {
                return None;
            }
            self.level = 0;
            self.k = 0;
            self.i_equiv += 1;
        }
    }
}

/// Find the best term constraining `column` of `cursor` whose other
/// tables are all outside `not_ready` (sqlite3WhereFindTerm). An equality
/// against a constant or bound table wins immediately.
pub fn find_term(
    chain: &ClauseChain<'_>,
    cursor: i32,
    column: i32,
    not_ready: Bitmask,
    op: OperatorMask,
    index: Option<(&crate::schema::Index, &crate::schema::Table)>,
) -> Option<TermRef> {
    let mut result = None;
    let scan = WhereScan::new(chain, cursor, column, op, index);
    let op = op & (OperatorMask::EQ | OperatorMask::IS);
    for r in scan {
        let term = chain.term(r)?;
        if term.prereq_right & not_ready == 0 {
            if term.prereq_right == 0 && term.op.intersects(op) {
                return Some(r);
            }
            if result.is_none() {
                result = Some(r);
            }
        }
    }
    result
}
