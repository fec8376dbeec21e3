//! Cursor-to-bit mapping for table dependency sets
//!
//! Every cursor taking part in a join is given one bit of a 64-bit mask so
//! that sets of tables can be combined with plain bitwise operators.

use crate::parser::ast::{Expr, InList};

/// A set of tables, one bit per cursor registered in a `MaskSet`
pub type Bitmask = u64;

/// Number of bits in a Bitmask
pub const BMS: usize = 64;

/// Every table
pub const ALL_BITS: Bitmask = !0;

/// Maps cursor numbers to mask bits in order of first use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskSet {
    cursors: Vec<i32>,
}

impl MaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bit for `cursor`, allocating one on first use. Returns 0
    /// once every bit is taken.
    pub fn bit_for(&mut self, cursor: i32) -> Bitmask {
        let existing = self.get_mask(cursor);
        if existing != 0 {
            return existing;
        }
        if self.cursors.len() >= BMS {
            return 0;
        }
        self.cursors.push(cursor);
        1 << (self.cursors.len() - 1)
    }

    /// Bit of a cursor already registered, or 0 for cursors that belong to
    /// an outer query
    pub fn get_mask(&self, cursor: i32) -> Bitmask {
        self.cursors
            .iter()
            .position(|c| *c == cursor)
            .map_or(0, |i| 1 << i)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Tables referenced anywhere in `expr`, including the outer columns a
    /// correlated subquery reads
    pub fn expr_usage(&self, expr: &Expr) -> Bitmask {
        let mut mask = 0;
        expr.walk(&mut |e| {
            if let Expr::Column(col) = e {
                mask |= self.get_mask(col.cursor);
            }
        });
        mask
    }

    /// Tables referenced by a list of expressions
    pub fn list_usage(&self, list: &[Expr]) -> Bitmask {
        list.iter().fold(0, |m, e| m | self.expr_usage(e))
    }

    /// Tables referenced by the right-hand side of IN
    pub fn in_list_usage(&self, list: &InList) -> Bitmask {
        match list {
            InList::Values(values) => self.list_usage(values),
            InList::Subquery(sub) => self.list_usage(&sub.correlated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    #[test]
    fn test_bits_assigned_in_order() {
        let mut ms = MaskSet::new();
        assert_eq!(ms.bit_for(7), 1);
        assert_eq!(ms.bit_for(3), 2);
        assert_eq!(ms.bit_for(7), 1);
        assert_eq!(ms.get_mask(3), 2);
        assert_eq!(ms.get_mask(99), 0);
        assert_eq!(ms.len(), 2);
    }

    #[test]
    fn test_full_mask_set_returns_zero() {
        let mut ms = MaskSet::new();
        for c in 0..64 {
            assert_ne!(ms.bit_for(c), 0);
        }
        assert_eq!(ms.bit_for(64), 0);
        assert_eq!(ms.get_mask(63), 1 << 63);
    }

    #[test]
    fn test_expr_usage() {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INT"));
        let mut ms = MaskSet::new();
        ms.bit_for(10);
        ms.bit_for(11);
        let e = Expr::eq(Expr::column(10, &t, 0), Expr::column(11, &t, 0));
        assert_eq!(ms.expr_usage(&e), 3);
        // outer-query references do not count
        let e = Expr::eq(Expr::column(10, &t, 0), Expr::column(42, &t, 0));
        assert_eq!(ms.expr_usage(&e), 1);
    }
}
