//! WHERE-clause planning and nested-loop code generation
//!
//! The planner runs in four stages. `where_mask` maps cursors to bits,
//! `where_expr` splits and classifies the WHERE terms, `where_loop` builds
//! candidate access paths per table and `where_path` picks the join order.
//! `where_clause` and `wherecode` then emit the loops.

pub mod where_clause;
pub mod where_explain;
pub mod where_expr;
pub mod where_loop;
pub mod where_mask;
pub mod where_path;
pub mod where_stat;
pub mod where_vtab;
pub mod wherecode;

pub use where_clause::{
    begin_plan, DistinctKind, InLoop, OnePass, PlanRequest, WhereFlags, WhereInfo, WhereLevel,
};
pub use where_explain::{describe_scan, explain_rows, render_plan, ExplainRow, ScanStatus};
pub use where_expr::{OperatorMask, TermFlags, WhereClause, WhereTerm};
pub use where_loop::{WhereLoop, WsFlags};
pub use where_mask::{Bitmask, MaskSet, BMS};
pub use where_path::Solution;
pub use wherecode::{STMTSTATUS_AUTOINDEX, STMTSTATUS_FULLSCAN_STEP};
