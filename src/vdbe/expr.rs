//! Expression Compilation
//!
//! Compiles resolved expressions into VDBE instructions. The planner needs
//! two forms: values in registers (seek keys, IN operands, filter
//! arguments) and conditional jumps (residual WHERE tests).

use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{BinaryOp, ColumnRef, Expr, InList, Literal, UnaryOp, ROWID_COLUMN};
use crate::schema::Affinity;

use super::builder::ProgramBuilder;
use super::ops::{affinity, cmp_flags, Opcode, P4};

/// P5 affinity code for a comparison
pub fn affinity_p5(aff: Affinity) -> u16 {
    match aff {
        Affinity::Blob => affinity::BLOB,
        Affinity::Text => affinity::TEXT,
        Affinity::Numeric => affinity::NUMERIC,
        Affinity::Integer => affinity::INTEGER,
        Affinity::Real => affinity::REAL,
    }
}

/// Collating sequence for a binary comparison (sqlite3BinaryCompareCollSeq):
/// an explicit COLLATE on the left wins, then one on the right, then the
/// left column's declared collation, then the right's.
pub fn comparison_collation<'a>(left: &'a Expr, right: &'a Expr) -> Option<&'a str> {
    if left.has_explicit_collation() {
        left.collation()
    } else if right.has_explicit_collation() {
        right.collation()
    } else {
        left.collation().or_else(|| right.collation())
    }
}

fn comparison_opcode(op: BinaryOp) -> Option<Opcode> {
    match op {
        BinaryOp::Eq | BinaryOp::Is => Some(Opcode::Eq),
        BinaryOp::Ne | BinaryOp::IsNot => Some(Opcode::Ne),
        BinaryOp::Lt => Some(Opcode::Lt),
        BinaryOp::Le => Some(Opcode::Le),
        BinaryOp::Gt => Some(Opcode::Gt),
        BinaryOp::Ge => Some(Opcode::Ge),
        _ => None,
    }
}

fn negate_comparison(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Eq => BinaryOp::Ne,
        BinaryOp::Ne => BinaryOp::Eq,
        BinaryOp::Lt => BinaryOp::Ge,
        BinaryOp::Le => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Le,
        BinaryOp::Ge => BinaryOp::Lt,
        BinaryOp::Is => BinaryOp::IsNot,
        BinaryOp::IsNot => BinaryOp::Is,
        other => other,
    }
}

fn row_value_misused() -> Error {
    Error::with_message(ErrorCode::Error, "row value misused")
}

/// Rewrite a row-value comparison into scalar comparisons
fn expand_vector_compare(op: BinaryOp, left: &Expr, right: &Expr) -> Result<Expr> {
    let n = left.vector_size();
    if n != right.vector_size() {
        return Err(row_value_misused());
    }
    let field = |e: &Expr, i: usize| e.vector_field(i).cloned().ok_or_else(row_value_misused);
    match op {
        BinaryOp::Eq | BinaryOp::Is | BinaryOp::Ne | BinaryOp::IsNot => {
            let joiner = if matches!(op, BinaryOp::Eq | BinaryOp::Is) {
                BinaryOp::And
            } else {
                BinaryOp::Or
            };
            let mut out: Option<Expr> = None;
            for i in 0..n {
                let cmp = Expr::binary(op, field(left, i)?, field(right, i)?);
                out = Some(match out {
                    Some(prev) => Expr::binary(joiner, prev, cmp),
                    None => cmp,
                });
            }
            out.ok_or_else(row_value_misused)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let strict = match op {
                BinaryOp::Le => BinaryOp::Lt,
                BinaryOp::Ge => BinaryOp::Gt,
                other => other,
            };
            // (a,b) < (x,y)  ==>  a<x OR (a=x AND b<y)
            let mut acc = Expr::binary(op, field(left, n - 1)?, field(right, n - 1)?);
            for i in (0..n - 1).rev() {
                let l = field(left, i)?;
                let r = field(right, i)?;
                acc = Expr::or(
                    Expr::binary(strict, l.clone(), r.clone()),
                    Expr::and(Expr::eq(l, r), acc),
                );
            }
            Ok(acc)
        }
        _ => Err(row_value_misused()),
    }
}

impl ProgramBuilder {
    // ========================================================================
    // Values
    // ========================================================================

    /// Compile expression and return the register containing the result
    pub fn compile_expr(&mut self, expr: &Expr) -> Result<i32> {
        let target = self.alloc_reg();
        self.compile_expr_target(expr, target)?;
        Ok(target)
    }

    /// Read a table column into `target`. Virtual tables use VColumn; REAL
    /// columns get RealAffinity so integers stored compactly read as reals.
    pub fn code_column(&mut self, col: &ColumnRef, target: i32) {
        if self.is_virtual_cursor(col.cursor) {
            self.add_op(Opcode::VColumn, col.cursor, col.column, target);
        } else if col.column == ROWID_COLUMN {
            self.add_op(Opcode::Rowid, col.cursor, target, 0);
        } else {
            self.add_op(Opcode::Column, col.cursor, col.column, target);
            if col.affinity == Affinity::Real {
                self.add_op(Opcode::RealAffinity, target, 0, 0);
            }
        }
    }

    /// Compile expression into a specific target register
    pub fn compile_expr_target(&mut self, expr: &Expr, target: i32) -> Result<()> {
        let outer = expr;
        match expr {
            Expr::Literal(lit) => self.code_literal(lit, target),

            Expr::Column(col) => self.code_column(col, target),

            Expr::Variable(v) => {
                self.add_op(Opcode::Variable, v.index, target, 0);
            }

            Expr::Unary { op, expr } => match op {
                UnaryOp::Pos => self.compile_expr_target(expr, target)?,
                UnaryOp::Neg => {
                    if let Some(folded) = outer.constant_value() {
                        self.code_value(&folded, target);
                        return Ok(());
                    }
                    let zero = self.alloc_reg();
                    self.add_op(Opcode::Integer, 0, zero, 0);
                    let r = self.compile_expr(expr)?;
                    self.add_op(Opcode::Subtract, r, zero, target);
                }
                UnaryOp::Not => {
                    let r = self.compile_expr(expr)?;
                    self.add_op(Opcode::Not, r, target, 0);
                }
                UnaryOp::BitNot => {
                    let r = self.compile_expr(expr)?;
                    self.add_op(Opcode::BitNot, r, target, 0);
                }
            },

            Expr::Binary { op, left, right } => {
                if op.is_comparison() {
                    if left.is_vector() || right.is_vector() {
                        let scalar = expand_vector_compare(*op, left, right)?;
                        return self.compile_expr_target(&scalar, target);
                    }
                    let r1 = self.compile_expr(left)?;
                    let r2 = self.compile_expr(right)?;
                    let opcode = comparison_opcode(*op).ok_or_else(|| Error::new(ErrorCode::Internal))?;
                    let aff = Affinity::compare(left.affinity(), right.affinity());
                    let mut p5 = cmp_flags::STOREP2 | affinity_p5(aff);
                    if matches!(op, BinaryOp::Is | BinaryOp::IsNot) {
                        p5 |= cmp_flags::NULLEQ;
                    }
                    self.code_compare(opcode, r2, target, r1, comparison_collation(left, right), p5);
                } else {
                    let r1 = self.compile_expr(left)?;
                    let r2 = self.compile_expr(right)?;
                    let opcode = match op {
                        BinaryOp::Add => Opcode::Add,
                        BinaryOp::Sub => Opcode::Subtract,
                        BinaryOp::Mul => Opcode::Multiply,
                        BinaryOp::Div => Opcode::Divide,
                        BinaryOp::Mod => Opcode::Remainder,
                        BinaryOp::Concat => Opcode::Concat,
                        BinaryOp::BitAnd => Opcode::BitAnd,
                        BinaryOp::BitOr => Opcode::BitOr,
                        BinaryOp::ShiftLeft => Opcode::ShiftLeft,
                        BinaryOp::ShiftRight => Opcode::ShiftRight,
                        BinaryOp::And => Opcode::And,
                        BinaryOp::Or => Opcode::Or,
                        _ => return Err(Error::new(ErrorCode::Internal)),
                    };
                    self.add_op(opcode, r2, r1, target);
                }
            }

            Expr::Cast { expr, type_name } => {
                self.compile_expr_target(expr, target)?;
                let aff = crate::schema::type_affinity(type_name);
                self.add_op(Opcode::Cast, target, aff.code() as i32, 0);
            }

            Expr::Collate { expr, .. } => self.compile_expr_target(expr, target)?,

            Expr::Function(call) => {
                if call.likelihood().is_some() {
                    if let Some(arg) = call.args.first() {
                        return self.compile_expr_target(arg, target);
                    }
                }
                let base = self.alloc_regs(call.args.len() as i32);
                for (i, arg) in call.args.iter().enumerate() {
                    self.compile_expr_target(arg, base + i as i32)?;
                }
                self.add_op4(
                    Opcode::Function,
                    0,
                    base,
                    target,
                    P4::FuncDef(call.name.to_lowercase(), call.args.len()),
                );
            }

            Expr::Like {
                expr,
                pattern,
                escape,
                op,
                negated,
            } => {
                // like(pattern, value [, escape])
                let n_arg = if escape.is_some() { 3 } else { 2 };
                let base = self.alloc_regs(n_arg);
                self.compile_expr_target(pattern, base)?;
                self.compile_expr_target(expr, base + 1)?;
                if let Some(escape) = escape {
                    self.compile_expr_target(escape, base + 2)?;
                }
                self.add_op4(
                    Opcode::Function,
                    0,
                    base,
                    target,
                    P4::FuncDef(op.function_name().to_string(), n_arg as usize),
                );
                if *negated {
                    self.add_op(Opcode::Not, target, target, 0);
                }
            }

            Expr::Vector(_) => return Err(row_value_misused()),

            Expr::Subquery(sub) => {
                if sub.n_column > 1 {
                    return Err(row_value_misused());
                }
                self.add_op4(Opcode::Program, -1, target, 0, P4::Subquery(sub.id));
            }

            Expr::Exists { subquery, negated } => {
                self.add_op4(Opcode::Program, -1, target, 0, P4::Subquery(subquery.id));
                self.change_p5(1);
                if *negated {
                    self.add_op(Opcode::Not, target, target, 0);
                }
            }

            Expr::Between { .. } | Expr::In { .. } | Expr::IsNull { .. } => {
                // Boolean-valued: 1 when true, 0 otherwise
                let done = self.make_label();
                self.add_op(Opcode::Integer, 0, target, 0);
                self.jump_if_false(expr, done, true)?;
                self.add_op(Opcode::Integer, 1, target, 0);
                self.resolve_label(done);
            }
        }
        Ok(())
    }

    fn code_literal(&mut self, lit: &Literal, target: i32) {
        self.code_value(&lit.to_value(), target);
    }

    /// Load a constant value into `target`
    pub fn code_value(&mut self, value: &crate::types::Value, target: i32) {
        use crate::types::Value;
        match value {
            Value::Null => {
                self.add_op(Opcode::Null, 0, target, 0);
            }
            Value::Integer(i) => {
                if *i >= i32::MIN as i64 && *i <= i32::MAX as i64 {
                    self.add_op(Opcode::Integer, *i as i32, target, 0);
                } else {
                    self.add_op4(Opcode::Int64, 0, target, 0, P4::Int64(*i));
                }
            }
            Value::Real(r) => {
                self.add_op4(Opcode::Real, 0, target, 0, P4::Real(*r));
            }
            Value::Text(s) => {
                self.add_op4(Opcode::String8, 0, target, 0, P4::Text(s.clone()));
            }
            Value::Blob(b) => {
                self.add_op4(Opcode::Blob, b.len() as i32, target, 0, P4::Blob(b.clone()));
            }
        }
    }

    /// Emit a comparison. `p1`/`p3` are the right/left operand registers.
    pub fn code_compare(
        &mut self,
        opcode: Opcode,
        p1: i32,
        p2: i32,
        p3: i32,
        collation: Option<&str>,
        p5: u16,
    ) -> i32 {
        let addr = match collation {
            Some(c) => self.add_op4(opcode, p1, p2, p3, P4::Collation(c.to_string())),
            None => self.add_op(opcode, p1, p2, p3),
        };
        self.change_p5(p5);
        addr
    }

    // ========================================================================
    // Conditional jumps
    // ========================================================================

    /// Jump to `dest` if `expr` is false. If `jump_if_null`, also jump when
    /// it is NULL; otherwise fall through on NULL.
    pub fn jump_if_false(&mut self, expr: &Expr, dest: i32, jump_if_null: bool) -> Result<()> {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                self.jump_if_false(left, dest, jump_if_null)?;
                self.jump_if_false(right, dest, jump_if_null)?;
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let ok = self.make_label();
                self.jump_if_true(left, ok, !jump_if_null)?;
                self.jump_if_false(right, dest, jump_if_null)?;
                self.resolve_label(ok);
            }
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => self.jump_if_true(expr, dest, jump_if_null)?,
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.code_comparison_jump(negate_comparison(*op), left, right, dest, jump_if_null)?;
            }
            Expr::IsNull { expr, negated } => {
                let r = self.compile_expr(expr)?;
                let opcode = if *negated { Opcode::IsNull } else { Opcode::NotNull };
                self.add_op(opcode, r, dest, 0);
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let test = Expr::and(
                    Expr::binary(BinaryOp::Ge, (**expr).clone(), (**low).clone()),
                    Expr::binary(BinaryOp::Le, (**expr).clone(), (**high).clone()),
                );
                if *negated {
                    self.jump_if_true(&test, dest, jump_if_null)?;
                } else {
                    self.jump_if_false(&test, dest, jump_if_null)?;
                }
            }
            Expr::In {
                expr: lhs,
                list,
                negated,
            } => {
                if *negated {
                    let found = self.make_label();
                    let done = self.make_label();
                    self.code_in_membership(lhs, list, found, done, !jump_if_null)?;
                    self.add_op(Opcode::Goto, 0, done, 0);
                    self.resolve_label(found);
                    self.add_op(Opcode::Goto, 0, dest, 0);
                    self.resolve_label(done);
                } else {
                    let found = self.make_label();
                    self.code_in_membership(lhs, list, found, dest, jump_if_null)?;
                    self.add_op(Opcode::Goto, 0, dest, 0);
                    self.resolve_label(found);
                }
            }
            Expr::Collate { expr, .. } => self.jump_if_false(expr, dest, jump_if_null)?,
            Expr::Function(call) if call.likelihood().is_some() && !call.args.is_empty() => {
                self.jump_if_false(&call.args[0], dest, jump_if_null)?
            }
            _ => {
                if let Some(v) = expr.constant_value() {
                    let truthy = match v {
                        crate::types::Value::Null => None,
                        other => Some(other.as_f64().map_or(false, |f| f != 0.0)),
                    };
                    match truthy {
                        Some(true) => return Ok(()),
                        Some(false) => {
                            self.add_op(Opcode::Goto, 0, dest, 0);
                            return Ok(());
                        }
                        None if jump_if_null => {
                            self.add_op(Opcode::Goto, 0, dest, 0);
                            return Ok(());
                        }
                        None => return Ok(()),
                    }
                }
                let r = self.compile_expr(expr)?;
                self.add_op(Opcode::IfNot, r, dest, jump_if_null as i32);
            }
        }
        Ok(())
    }

    /// Jump to `dest` if `expr` is true. If `jump_if_null`, also jump when
    /// it is NULL.
    pub fn jump_if_true(&mut self, expr: &Expr, dest: i32, jump_if_null: bool) -> Result<()> {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let skip = self.make_label();
                self.jump_if_false(left, skip, !jump_if_null)?;
                self.jump_if_true(right, dest, jump_if_null)?;
                self.resolve_label(skip);
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                self.jump_if_true(left, dest, jump_if_null)?;
                self.jump_if_true(right, dest, jump_if_null)?;
            }
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => self.jump_if_false(expr, dest, jump_if_null)?,
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.code_comparison_jump(*op, left, right, dest, jump_if_null)?;
            }
            Expr::IsNull { expr, negated } => {
                let r = self.compile_expr(expr)?;
                let opcode = if *negated { Opcode::NotNull } else { Opcode::IsNull };
                self.add_op(opcode, r, dest, 0);
            }
            Expr::Collate { expr, .. } => self.jump_if_true(expr, dest, jump_if_null)?,
            _ => {
                let r = self.compile_expr(expr)?;
                self.add_op(Opcode::If, r, dest, jump_if_null as i32);
            }
        }
        Ok(())
    }

    fn code_comparison_jump(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        dest: i32,
        jump_if_null: bool,
    ) -> Result<()> {
        if left.is_vector() || right.is_vector() {
            let scalar = expand_vector_compare(op, left, right)?;
            return self.jump_if_true(&scalar, dest, jump_if_null);
        }
        let r1 = self.compile_expr(left)?;
        let r2 = self.compile_expr(right)?;
        let opcode = comparison_opcode(op).ok_or_else(|| Error::new(ErrorCode::Internal))?;
        let aff = Affinity::compare(left.affinity(), right.affinity());
        let mut p5 = affinity_p5(aff);
        if matches!(op, BinaryOp::Is | BinaryOp::IsNot) {
            p5 |= cmp_flags::NULLEQ;
        } else if jump_if_null {
            p5 |= cmp_flags::JUMPIFNULL;
        }
        self.code_compare(opcode, r2, dest, r1, comparison_collation(left, right), p5);
        Ok(())
    }

    /// Jump to `found` if `lhs` is a member of `list`. Falls through when it
    /// is not. A NULL left operand jumps to `null_dest` when `jump_if_null`.
    fn code_in_membership(
        &mut self,
        lhs: &Expr,
        list: &InList,
        found: i32,
        null_dest: i32,
        jump_if_null: bool,
    ) -> Result<()> {
        if lhs.is_vector() {
            return Err(row_value_misused());
        }
        let r = self.compile_expr(lhs)?;
        if jump_if_null && !lhs.never_null() {
            self.add_op(Opcode::IsNull, r, null_dest, 0);
        }
        match list {
            InList::Values(values) => {
                let lhs_aff = lhs.affinity();
                for value in values {
                    let rv = self.compile_expr(value)?;
                    let aff = Affinity::compare(lhs_aff, value.affinity());
                    self.code_compare(
                        Opcode::Eq,
                        rv,
                        found,
                        r,
                        comparison_collation(lhs, value),
                        affinity_p5(aff),
                    );
                }
            }
            InList::Subquery(sub) => {
                let cursor = self.alloc_cursor();
                let once = self.add_op(Opcode::Once, 0, 0, 0);
                self.add_op(Opcode::OpenEphemeral, cursor, 1, 0);
                self.add_op4(Opcode::Program, cursor, 0, 0, P4::Subquery(sub.id));
                self.jump_here(once);
                let affs = lhs.affinity().code().to_string();
                self.add_op4(Opcode::Affinity, r, 1, 0, P4::Affinity(affs));
                self.add_op4(Opcode::Found, cursor, found, r, P4::Int64(1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    fn table() -> Table {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "REAL"));
        t
    }

    #[test]
    fn test_compile_integer_small_and_large() {
        let mut b = ProgramBuilder::new();
        let r = b.compile_expr(&Expr::int(42)).unwrap();
        assert_eq!(b.ops()[0].opcode, Opcode::Integer);
        assert_eq!(b.ops()[0].p1, 42);
        assert_eq!(b.ops()[0].p2, r);

        b.compile_expr(&Expr::int(1 << 40)).unwrap();
        assert_eq!(b.ops()[1].opcode, Opcode::Int64);
        assert_eq!(b.ops()[1].p4, P4::Int64(1 << 40));
    }

    #[test]
    fn test_compile_column_and_rowid() {
        let t = table();
        let mut b = ProgramBuilder::new();
        b.compile_expr(&Expr::column(3, &t, 0)).unwrap();
        b.compile_expr(&Expr::column(3, &t, 1)).unwrap();
        b.compile_expr(&Expr::rowid(3, &t)).unwrap();
        let ops: Vec<_> = b.ops().iter().map(|o| o.opcode).collect();
        assert_eq!(
            ops,
            vec![Opcode::Column, Opcode::Column, Opcode::RealAffinity, Opcode::Rowid]
        );
    }

    #[test]
    fn test_virtual_column() {
        let t = table();
        let mut b = ProgramBuilder::new();
        b.mark_virtual_cursor(0);
        b.compile_expr(&Expr::column(0, &t, 1)).unwrap();
        assert_eq!(b.ops()[0].opcode, Opcode::VColumn);
    }

    #[test]
    fn test_jump_if_false_comparison_is_negated() {
        let t = table();
        let mut b = ProgramBuilder::new();
        let dest = b.make_label();
        let e = Expr::binary(BinaryOp::Lt, Expr::column(0, &t, 0), Expr::int(5));
        b.jump_if_false(&e, dest, true).unwrap();
        let cmp = b.ops().last().unwrap();
        assert_eq!(cmp.opcode, Opcode::Ge);
        assert_eq!(cmp.p2, dest);
        assert_ne!(cmp.p5 & cmp_flags::JUMPIFNULL, 0);
        assert_eq!(cmp.p5 & cmp_flags::AFFINITY_MASK, affinity::NUMERIC);
    }

    #[test]
    fn test_jump_if_false_and_or() {
        let t = table();
        let mut b = ProgramBuilder::new();
        let dest = b.make_label();
        let a = Expr::eq(Expr::column(0, &t, 0), Expr::int(1));
        let c = Expr::eq(Expr::column(0, &t, 0), Expr::int(2));
        b.jump_if_false(&Expr::or(a, c), dest, true).unwrap();
        b.resolve_label(dest);
        let ops: Vec<_> = b.ops().iter().map(|o| o.opcode).collect();
        // first disjunct jumps past the second when true
        assert!(ops.contains(&Opcode::Eq));
        assert!(ops.contains(&Opcode::Ne));
        let prog = b.finish().unwrap();
        assert!(prog.ops.iter().all(|o| !o.opcode.is_jump() || o.p2 >= 0));
    }

    #[test]
    fn test_in_list_membership() {
        let t = table();
        let mut b = ProgramBuilder::new();
        let dest = b.make_label();
        let e = Expr::in_list(
            Expr::column(0, &t, 0),
            vec![Expr::int(1), Expr::int(2), Expr::int(3)],
        );
        b.jump_if_false(&e, dest, true).unwrap();
        let n_eq = b.ops().iter().filter(|o| o.opcode == Opcode::Eq).count();
        assert_eq!(n_eq, 3);
        assert_eq!(b.ops().last().unwrap().opcode, Opcode::Goto);
    }

    #[test]
    fn test_constant_true_emits_nothing() {
        let mut b = ProgramBuilder::new();
        let dest = b.make_label();
        b.jump_if_false(&Expr::int(1), dest, true).unwrap();
        assert!(b.ops().is_empty());
        b.jump_if_false(&Expr::int(0), dest, true).unwrap();
        assert_eq!(b.ops()[0].opcode, Opcode::Goto);
    }

    #[test]
    fn test_vector_in_scalar_context_is_error() {
        let mut b = ProgramBuilder::new();
        let err = b
            .compile_expr(&Expr::Vector(vec![Expr::int(1), Expr::int(2)]))
            .unwrap_err();
        assert_eq!(err.message.as_deref(), Some("row value misused"));
    }

    #[test]
    fn test_vector_less_than_expands() {
        let t = table();
        let mut b = ProgramBuilder::new();
        let dest = b.make_label();
        let e = Expr::binary(
            BinaryOp::Lt,
            Expr::Vector(vec![Expr::column(0, &t, 0), Expr::column(0, &t, 1)]),
            Expr::Vector(vec![Expr::int(1), Expr::int(2)]),
        );
        b.jump_if_false(&e, dest, true).unwrap();
        assert!(b.ops().iter().any(|o| o.opcode == Opcode::Lt));
    }
}
