//! RustQL WHERE - query planner and loop generator for RustQL
//!
//! Given a resolved FROM list, a WHERE expression and optional ORDER BY,
//! DISTINCT and LIMIT information, [`begin_plan`] chooses an access path
//! for every table and a join order, then appends the VDBE instructions
//! that open the nested loops to a [`ProgramBuilder`]. The caller emits the
//! loop body and finishes with [`WhereInfo::end`].

pub mod config;
pub mod error;
pub mod executor;
pub mod parser;
pub mod schema;
pub mod types;
pub mod util;
pub mod vdbe;

pub use config::PlannerConfig;
pub use error::{Error, ErrorCode, Result};
pub use executor::{
    begin_plan, explain_rows, render_plan, DistinctKind, ExplainRow, OnePass, PlanRequest,
    ScanStatus, WhereFlags, WhereInfo, WhereLevel,
};
pub use vdbe::{Program, ProgramBuilder};
