//! Shared utilities

pub mod log_est;

pub use log_est::{est_log, log_est, log_est_add, log_est_from_f64, log_est_to_int, LogEst};
