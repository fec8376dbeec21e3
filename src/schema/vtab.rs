//! Virtual table planning contract
//!
//! A virtual table takes part in planning only through `best_index`: the
//! planner describes the constraints it could pass down and the ordering it
//! would like, and the table answers with a plan number, an optional plan
//! string, cost and row estimates, and which constraints it consumes.

use std::fmt;

use bitflags::bitflags;

use crate::error::Result;

/// Constraint operator offered to a virtual table (SQLITE_INDEX_CONSTRAINT_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    Like,
    Glob,
    Regexp,
    Ne,
    IsNot,
    IsNotNull,
    IsNull,
    Is,
    /// Overloaded function, numbered from 150 upward
    Function(u8),
}

impl ConstraintOp {
    /// Numeric code as seen by C implementations
    pub fn code(&self) -> u8 {
        match self {
            ConstraintOp::Eq => 2,
            ConstraintOp::Gt => 4,
            ConstraintOp::Le => 8,
            ConstraintOp::Lt => 16,
            ConstraintOp::Ge => 32,
            ConstraintOp::Match => 64,
            ConstraintOp::Like => 65,
            ConstraintOp::Glob => 66,
            ConstraintOp::Regexp => 67,
            ConstraintOp::Ne => 68,
            ConstraintOp::IsNot => 69,
            ConstraintOp::IsNotNull => 70,
            ConstraintOp::IsNull => 71,
            ConstraintOp::Is => 72,
            ConstraintOp::Function(n) => *n,
        }
    }
}

/// One constraint in the request
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConstraint {
    /// Constrained column; -1 for the rowid
    pub column: i32,
    pub op: ConstraintOp,
    /// False if the constraint cannot be used in this request
    pub usable: bool,
    /// Opaque reference back to the planner's term
    pub term_offset: usize,
}

/// One requested ORDER BY column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOrderBy {
    pub column: i32,
    pub desc: bool,
}

/// How the table consumes one constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstraintUsage {
    /// If >0, the constraint's right-hand value is passed as argument
    /// `argv_index` to the filter
    pub argv_index: i32,
    /// The table guarantees the constraint; the planner need not re-test it
    pub omit: bool,
}

bitflags! {
    /// Scan flags returned by best_index (SQLITE_INDEX_SCAN_*)
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct IndexScanFlags: u32 {
        /// Scan visits at most one row
        const UNIQUE = 0x0001;
    }
}

/// Request and response of one best_index call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexInfo {
    // Inputs
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<IndexOrderBy>,
    /// Columns the statement reads
    pub col_used: u64,

    // Outputs
    pub usage: Vec<ConstraintUsage>,
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub order_by_consumed: bool,
    pub estimated_cost: f64,
    pub estimated_rows: i64,
    pub idx_flags: IndexScanFlags,
}

impl IndexInfo {
    /// Build a request with default outputs (the engine's defaults before
    /// calling xBestIndex)
    pub fn new(constraints: Vec<IndexConstraint>, order_by: Vec<IndexOrderBy>) -> Self {
        let n = constraints.len();
        IndexInfo {
            constraints,
            order_by,
            col_used: 0,
            usage: vec![ConstraintUsage::default(); n],
            idx_num: 0,
            idx_str: None,
            order_by_consumed: false,
            estimated_cost: f64::MAX / 2.0,
            estimated_rows: 25,
            idx_flags: IndexScanFlags::empty(),
        }
    }
}

/// A virtual table implementation, as far as planning is concerned
pub trait VirtualTable: fmt::Debug + Send + Sync {
    /// Module name for explain output
    fn module_name(&self) -> &str;

    /// Choose a plan for the usable constraints. Returning an error with
    /// code `Constraint` rejects this combination of usable constraints;
    /// any other error aborts planning.
    fn best_index(&self, info: &mut IndexInfo) -> Result<()>;

    /// Overload lookup for functions used as constraints (xFindFunction).
    /// Returns an operator code of 150 or more if the function should be
    /// offered to `best_index`.
    fn find_function(&self, _name: &str, _n_arg: usize) -> Option<u8> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_codes() {
        assert_eq!(ConstraintOp::Eq.code(), 2);
        assert_eq!(ConstraintOp::Ge.code(), 32);
        assert_eq!(ConstraintOp::IsNull.code(), 71);
        assert_eq!(ConstraintOp::Function(151).code(), 151);
    }

    #[test]
    fn test_index_info_defaults() {
        let info = IndexInfo::new(
            vec![IndexConstraint {
                column: 0,
                op: ConstraintOp::Eq,
                usable: true,
                term_offset: 0,
            }],
            vec![],
        );
        assert_eq!(info.usage.len(), 1);
        assert_eq!(info.estimated_rows, 25);
        assert!(!info.order_by_consumed);
    }
}
