//! Virtual Database Engine (VDBE) emission interface
//!
//! The planner does not execute anything. It appends instructions to a
//! `ProgramBuilder`, which a downstream consumer turns into a runnable
//! program.

pub mod builder;
pub mod expr;
pub mod ops;

pub use builder::{Program, ProgramBuilder};
pub use expr::{affinity_p5, comparison_collation};
pub use ops::{KeyInfo, Opcode, VdbeOp, P4};
