//! Resolved SQL expression tree consumed by the planner

pub mod ast;

pub use ast::{
    BinaryOp, ColumnRef, Expr, FunctionCall, IndexedBy, InList, JoinFlags, LikeOp, Literal,
    OrderingTerm, SrcItem, SrcList, Subquery, UnaryOp, Variable, EXPR_COLUMN, ROWID_COLUMN,
};
