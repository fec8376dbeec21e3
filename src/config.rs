//! Planner configuration
//!
//! Every tuning constant and optimisation switch the planner consults lives
//! here. A `PlannerConfig` is passed explicitly to `begin_plan` so that two
//! compilations never share mutable state.

use crate::util::log_est::LogEst;

// ============================================================================
// Defaults
// ============================================================================

/// Candidate budget shared by all tables of one join
pub const DEFAULT_SEARCH_BUDGET: i32 = 20000;

/// Minimum repetition count (LogEst) of a leading column before skip-scan
/// is considered. 42 is 18 rows per distinct value.
pub const DEFAULT_SKIP_SCAN_THRESHOLD: LogEst = 42;

/// Selectivity applied to a range with only one bound (about 1/4)
pub const DEFAULT_SINGLE_BOUND_SELECTIVITY: LogEst = -20;

/// Selectivity applied to a range bounded on both sides (about 1/64)
pub const DEFAULT_DOUBLE_BOUND_SELECTIVITY: LogEst = -60;

/// Row estimate for a table with no statistics (about 1 million rows)
pub const DEFAULT_ROW_LOG_EST: LogEst = 200;

// ============================================================================
// PlannerConfig
// ============================================================================

/// Configuration for one planning run
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Number of candidate loops the generator may create before it stops
    /// expanding indexes
    pub search_budget: i32,
    /// Skip-scan repetition threshold
    pub skip_scan_threshold: LogEst,
    /// Fallback selectivity for a single range bound
    pub single_bound_selectivity: LogEst,
    /// Fallback selectivity for a double range bound
    pub double_bound_selectivity: LogEst,
    /// Row estimate used for tables without statistics
    pub default_row_log_est: LogEst,
    /// Override for the solver's beam width
    pub max_choice: Option<usize>,

    /// Allow skip-scan loops
    pub skip_scan: bool,
    /// Allow automatic (ephemeral) indexes
    pub auto_index: bool,
    /// Allow OR-union loops and OR-to-IN rewriting
    pub or_union: bool,
    /// Allow dropping LEFT JOINs that cannot affect the result
    pub omit_noop_join: bool,
    /// Derive and use transitive equality terms
    pub transitive: bool,
    /// Consult stat4 samples when present
    pub stat4: bool,
    /// Derive range terms from LIKE and GLOB
    pub like_opt: bool,
    /// Allow an index scan to satisfy ORDER BY across a join
    pub order_by_idx_join: bool,
    /// Allow a full scan of a covering index in place of the table
    pub cover_idx_scan: bool,
    /// Consider partial indexes
    pub partial_index: bool,

    /// LIKE compares case-sensitively
    pub case_sensitive_like: bool,
    /// Reverse the scan direction of every loop that has no ordering
    /// requirement
    pub reverse_unordered_selects: bool,
    /// Emit trace-level events for every retained solver path
    pub trace: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            search_budget: DEFAULT_SEARCH_BUDGET,
            skip_scan_threshold: DEFAULT_SKIP_SCAN_THRESHOLD,
            single_bound_selectivity: DEFAULT_SINGLE_BOUND_SELECTIVITY,
            double_bound_selectivity: DEFAULT_DOUBLE_BOUND_SELECTIVITY,
            default_row_log_est: DEFAULT_ROW_LOG_EST,
            max_choice: None,
            skip_scan: true,
            auto_index: true,
            or_union: true,
            omit_noop_join: true,
            transitive: true,
            stat4: cfg!(feature = "stat4"),
            like_opt: true,
            order_by_idx_join: true,
            cover_idx_scan: true,
            partial_index: true,
            case_sensitive_like: false,
            reverse_unordered_selects: false,
            trace: false,
        }
    }
}

impl PlannerConfig {
    /// Beam width for a join of `n_level` tables
    pub fn beam_width(&self, n_level: usize) -> usize {
        if let Some(n) = self.max_choice {
            return n.max(1);
        }
        match n_level {
            0 | 1 => 1,
            2 => 5,
            _ => 10,
        }
    }

    /// Turn every optional optimisation off. Useful when comparing plans.
    pub fn without_optimizations(mut self) -> Self {
        self.skip_scan = false;
        self.auto_index = false;
        self.or_union = false;
        self.omit_noop_join = false;
        self.transitive = false;
        self.stat4 = false;
        self.like_opt = false;
        self.order_by_idx_join = false;
        self.cover_idx_scan = false;
        self.partial_index = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let cfg = PlannerConfig::default();
        assert_eq!(cfg.search_budget, 20000);
        assert_eq!(cfg.skip_scan_threshold, 42);
        assert_eq!(cfg.single_bound_selectivity, -20);
        assert_eq!(cfg.double_bound_selectivity, -60);
        assert!(cfg.skip_scan && cfg.auto_index && cfg.or_union);
    }

    #[test]
    fn test_beam_width() {
        let cfg = PlannerConfig::default();
        assert_eq!(cfg.beam_width(1), 1);
        assert_eq!(cfg.beam_width(2), 5);
        assert_eq!(cfg.beam_width(7), 10);

        let cfg = PlannerConfig {
            max_choice: Some(0),
            ..PlannerConfig::default()
        };
        assert_eq!(cfg.beam_width(4), 1);
    }

    #[test]
    fn test_without_optimizations() {
        let cfg = PlannerConfig::default().without_optimizations();
        assert!(!cfg.skip_scan);
        assert!(!cfg.auto_index);
        assert!(!cfg.or_union);
        assert_eq!(cfg.search_budget, DEFAULT_SEARCH_BUDGET);
    }
}
