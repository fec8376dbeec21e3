//! Histogram-driven row estimates
//!
//! When an index carries stat4 samples, equality, IN and range constraints
//! whose values are known at compile time are located in the sample list
//! to estimate how many rows they select. Without samples, ranges fall
//! back to the fixed selectivities in `PlannerConfig`.

use std::cmp::Ordering;

use crate::config::PlannerConfig;
use crate::parser::ast::Expr;
use crate::schema::{Index, Table};
use crate::types::Value;
use crate::util::{log_est, log_est_to_int, LogEst};

use super::where_expr::{OperatorMask, TermFlags, WhereTerm};

/// Probe key built from the constant values of the constraints matched so
/// far, one value per index column
#[derive(Debug, Clone, Default)]
pub struct ProbeRecord {
    pub values: Vec<Value>,
    /// Leading values that are known
    pub n_valid: usize,
}

impl ProbeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, i: usize, value: Value) {
        if self.values.len() <= i {
            self.values.resize(i + 1, Value::Null);
        }
        self.values[i] = value;
    }
}

/// True if the index has samples the planner may consult for column `n_eq`
pub fn has_usable_samples(config: &PlannerConfig, index: &Index, n_eq: usize) -> bool {
    config.stat4
        && !index.samples.is_empty()
        && n_eq < index.samples[0].n_eq.len().max(index.samples[0].key.len())
}

/// Affinity of index column `i`
fn index_column_affinity(index: &Index, table: &Table, i: usize) -> crate::schema::Affinity {
    match index.columns.get(i) {
        Some(c) => match &c.expr {
            Some(e) => e.affinity(),
            None => table.column_affinity(c.column),
        },
        None => crate::schema::Affinity::Integer,
    }
}

/// Store up to `n_elem` constant values of `expr` (a scalar or row value)
/// into `rec` starting at index column `i_val`. Returns how many values
/// were extracted; extraction stops at the first non-constant field.
pub fn probe_set_value(
    index: &Index,
    table: &Table,
    rec: &mut ProbeRecord,
    expr: &Expr,
    n_elem: usize,
    i_val: usize,
) -> usize {
    let mut n = 0;
    for i in 0..n_elem {
        let Some(field) = expr.vector_field(i) else { break };
        let Some(value) = field.constant_value() else { break };
        let aff = index_column_affinity(index, table, i_val + i);
        rec.set(i_val + i, value.apply_affinity(aff));
        n += 1;
    }
    n
}

/// Compare the first `n` fields of a sample key against the probe
fn compare_prefix(index: &Index, key: &[Value], probe: &[Value], n: usize) -> Ordering {
    for j in 0..n {
        let (Some(a), Some(b)) = (key.get(j), probe.get(j)) else {
            return key.len().min(n).cmp(&probe.len().min(n));
        };
        let mut ord = a.compare(b, Some(index.collation_at(j)));
        if index.sort_order_at(j).is_desc() {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Locate `probe` (its first `n_field` values) among the samples
/// (whereKeyStats). Returns the index of the first sample not less than the
/// probe, and `[rows less than probe, rows equal to probe]`.
pub fn key_stats(index: &Index, probe: &[Value], n_field: usize, round_up: bool) -> (usize, [u64; 2]) {
    let samples = &index.samples;
    let n_field = n_field.max(1);
    let lt = |s: usize, c: usize| samples[s].n_lt.get(c).copied().unwrap_or(0);
    let eq = |s: usize, c: usize| samples[s].n_eq.get(c).copied().unwrap_or(0);

    let mut i_col = 0;
    let mut i_min = 0;
    let mut i_sample = samples.len() * n_field;
    let mut i_lower = 0u64;
    let mut res = Ordering::Less;
    while i_min < i_sample {
        let i_test = (i_min + i_sample) / 2;
        let i_samp = i_test / n_field;
        let mut n;
        if i_samp > 0 {
            // Shortest prefix longer than the previous sample's
            n = (i_test % n_field) + 1;
            while n < n_field {
                if lt(i_samp - 1, n - 1) != lt(i_samp, n - 1) {
                    break;
                }
                n += 1;
            }
        } else {
            n = i_test + 1;
        }
        res = compare_prefix(index, &samples[i_samp].key, probe, n);
        if res == Ordering::Less {
            i_lower = lt(i_samp, n - 1) + eq(i_samp, n - 1);
            i_min = i_test + 1;
        } else if res == Ordering::Equal && n < n_field {
            i_lower = lt(i_samp, n - 1);
            i_min = i_test + 1;
            res = Ordering::Less;
        } else {
            i_sample = i_test;
            i_col = n - 1;
            if res == Ordering::Equal {
                break;
            }
        }
    }
    let i = i_sample / n_field;

    if res == Ordering::Equal {
        return (i, [lt(i, i_col), eq(i, i_col)]);
    }
    let i_upper = if i >= samples.len() {
        log_est_to_int(index.row_log_est.first().copied().unwrap_or(0))
    } else {
        lt(i, i_col)
    };
    let gap = i_upper.saturating_sub(i_lower);
    let gap = if round_up { gap * 2 / 3 } else { gap / 3 };
    let avg = index.avg_eq.get(n_field - 1).copied().unwrap_or(1);
    (i, [i_lower + gap, avg])
}

/// Rows selected by `column = expr` on the `n_eq`-th index column, given
/// that the first `n_eq - 1` columns are already in `rec`
/// (whereEqualScanEst). None when no estimate can be made.
pub fn equal_scan_est(
    index: &Index,
    table: &Table,
    rec: &mut ProbeRecord,
    n_eq: usize,
    expr: &Expr,
) -> Option<u64> {
    if n_eq == 0 || rec.n_valid + 1 < n_eq {
        return None;
    }
    if n_eq >= index.n_column() {
        return Some(1);
    }
    if probe_set_value(index, table, rec, expr, 1, n_eq - 1) == 0 {
        return None;
    }
    rec.n_valid = n_eq;
    let (_, stat) = key_stats(index, &rec.values, n_eq, false);
    Some(stat[1])
}

/// Rows selected by `column IN (list)` (whereInScanEst)
pub fn in_scan_est(
    index: &Index,
    table: &Table,
    rec: &mut ProbeRecord,
    n_eq: usize,
    list: &[Expr],
) -> Option<u64> {
    let n_row0 = log_est_to_int(index.row_log_est.first().copied().unwrap_or(0));
    let n_valid = rec.n_valid;
    let mut total = 0u64;
    for value in list {
        let est = equal_scan_est(index, table, rec, n_eq, value);
        rec.n_valid = n_valid;
        total += est?;
    }
    Some(total.min(n_row0))
}

/// Apply the selectivity of one range bound without histogram data
/// (whereRangeAdjust)
pub fn range_adjust(config: &PlannerConfig, term: Option<&WhereTerm>, n_new: LogEst) -> LogEst {
    match term {
        Some(t) if t.truth_prob <= 0 => n_new + t.truth_prob,
        Some(t) if !t.flags.contains(TermFlags::VNULL) => n_new + config.single_bound_selectivity,
        _ => n_new,
    }
}

/// Inputs for a range estimate on one index
pub struct RangeEstimate<'a> {
    pub index: &'a Index,
    pub table: &'a Table,
    pub n_eq: usize,
    pub n_btm: usize,
    pub n_top: usize,
    pub lower: Option<&'a WhereTerm>,
    pub upper: Option<&'a WhereTerm>,
}

/// Estimate the rows a range scan visits (whereRangeScanEst), starting from
/// `n_out` rows matched by the equality prefix
pub fn range_scan_est(
    config: &PlannerConfig,
    rec: &mut ProbeRecord,
    est: RangeEstimate<'_>,
    n_out: LogEst,
) -> LogEst {
    let RangeEstimate {
        index,
        table,
        n_eq,
        mut n_btm,
        mut n_top,
        mut lower,
        mut upper,
    } = est;
    let mut n_out = n_out;

    if has_usable_samples(config, index, n_eq) && n_eq == rec.n_valid {
        let (mut i_lower, mut i_upper) = if n_eq == 0 {
            (0, log_est_to_int(index.row_log_est.first().copied().unwrap_or(0)))
        } else {
            let (_, a) = key_stats(index, &rec.values, n_eq, false);
            (a[0], a[0] + a[1])
        };
        let mut lwr_idx: isize = -2;
        let mut upr_idx: isize = -1;
        if index.sort_order_at(n_eq).is_desc() {
            std::mem::swap(&mut lower, &mut upper);
            std::mem::swap(&mut n_btm, &mut n_top);
        }
        if let Some(t) = lower {
            if let Some(rhs) = t.rhs() {
                let n = probe_set_value(index, table, rec, rhs, n_btm, n_eq);
                if n > 0 {
                    let mask = if rhs.vector_size() > n {
                        OperatorMask::LE | OperatorMask::LT
                    } else {
                        OperatorMask::GT | OperatorMask::LE
                    };
                    let (idx, a) = key_stats(index, &rec.values, n_eq + n, false);
                    lwr_idx = idx as isize;
                    let new = a[0] + if t.op.intersects(mask) { a[1] } else { 0 };
                    i_lower = i_lower.max(new);
                    n_out -= 1;
                }
            }
        }
        if let Some(t) = upper {
            if let Some(rhs) = t.rhs() {
                let n = probe_set_value(index, table, rec, rhs, n_top, n_eq);
                if n > 0 {
                    let mask = if rhs.vector_size() > n {
                        OperatorMask::LE | OperatorMask::LT
                    } else {
                        OperatorMask::GT | OperatorMask::LE
                    };
                    let (idx, a) = key_stats(index, &rec.values, n_eq + n, true);
                    upr_idx = idx as isize;
                    let new = a[0] + if t.op.intersects(mask) { a[1] } else { 0 };
                    i_upper = i_upper.min(new);
                    n_out -= 1;
                }
            }
        }
        let mut n_new = if i_upper > i_lower {
            let n = log_est(i_upper - i_lower);
            // Both bounds in one bucket: assume 4x more selective
            if lwr_idx == upr_idx {
                n - 20
            } else {
                n
            }
        } else {
            10
        };
        n_new = n_new.min(n_out);
        tracing::trace!(lower = i_lower, upper = i_upper, est = n_new, "where.range_est.stat4");
        return n_new;
    }

    let mut n_new = range_adjust(config, lower, n_out);
    n_new = range_adjust(config, upper, n_new);
    if let (Some(l), Some(u)) = (lower, upper) {
        if l.truth_prob > 0 && u.truth_prob > 0 {
            n_new += config.double_bound_selectivity - 2 * config.single_bound_selectivity;
        }
    }
    n_out -= lower.is_some() as LogEst + upper.is_some() as LogEst;
    n_new.max(10).min(n_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::BinaryOp;
    use crate::schema::{parse_stat1, Column, IndexSample};
    use crate::executor::where_expr::WhereClause;

    fn sampled_table() -> Table {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        let sample = |k: i64, lt: u64| IndexSample {
            key: vec![Value::Integer(k), Value::Integer(k)],
            n_eq: vec![1],
            n_lt: vec![lt],
            n_dlt: vec![lt],
        };
        t.add_index(
            Index::new("ia", "t")
                .with_column(0)
                .with_stats(parse_stat1("100 1").unwrap())
                .with_samples(vec![sample(10, 10), sample(50, 50), sample(90, 90)]),
        );
        t
    }

    fn range_term(t: &Table, op: BinaryOp, v: i64) -> WhereTerm {
        let mut wc = WhereClause::new(BinaryOp::And);
        wc.split(&Expr::binary(op, Expr::column(0, t, 0), Expr::int(v)));
        let mut term = wc.terms.remove(0);
        term.op = match op {
            BinaryOp::Gt => OperatorMask::GT,
            BinaryOp::Ge => OperatorMask::GE,
            BinaryOp::Lt => OperatorMask::LT,
            _ => OperatorMask::LE,
        };
        term
    }

    #[test]
    fn test_key_stats_exact_sample() {
        let t = sampled_table();
        let (i, stat) = key_stats(&t.indexes[0], &[Value::Integer(50)], 1, false);
        assert_eq!(i, 1);
        assert_eq!(stat, [50, 1]);
    }

    #[test]
    fn test_key_stats_between_samples() {
        let t = sampled_table();
        let (i, stat) = key_stats(&t.indexes[0], &[Value::Integer(30)], 1, false);
        assert_eq!(i, 1);
        // 11 rows up to and including sample 10, a third of the gap to 50
        assert_eq!(stat[0], 11 + 13);
    }

    #[test]
    fn test_range_without_samples() {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        t.add_index(Index::new("ia", "t").with_column(0));
        let cfg = PlannerConfig::default();
        let lower = range_term(&t, BinaryOp::Gt, 5);
        let upper = range_term(&t, BinaryOp::Lt, 9);
        let mut rec = ProbeRecord::new();
        let one = range_scan_est(
            &cfg,
            &mut rec,
            RangeEstimate {
                index: &t.indexes[0],
                table: &t,
                n_eq: 0,
                n_btm: 1,
                n_top: 0,
                lower: Some(&lower),
                upper: None,
            },
            200,
        );
        assert_eq!(one, 180);
        let both = range_scan_est(
            &cfg,
            &mut rec,
            RangeEstimate {
                index: &t.indexes[0],
                table: &t,
                n_eq: 0,
                n_btm: 1,
                n_top: 1,
                lower: Some(&lower),
                upper: Some(&upper),
            },
            200,
        );
        assert_eq!(both, 140);
    }

    #[test]
    fn test_vnull_bound_does_not_narrow() {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        t.add_index(Index::new("ia", "t").with_column(0));
        let mut lower = range_term(&t, BinaryOp::Gt, 0);
        lower.flags |= TermFlags::VNULL;
        let cfg = PlannerConfig::default().without_optimizations();
        let mut rec = ProbeRecord::new();
        let est = range_scan_est(
            &cfg,
            &mut rec,
            RangeEstimate {
                index: &t.indexes[0],
                table: &t,
                n_eq: 0,
                n_btm: 1,
                n_top: 0,
                lower: Some(&lower),
                upper: None,
            },
            200,
        );
        assert_eq!(est, 199);
    }

    #[test]
    fn test_range_with_samples() {
        let t = sampled_table();
        let cfg = PlannerConfig {
            stat4: true,
            ..PlannerConfig::default()
        };
        let lower = range_term(&t, BinaryOp::Gt, 50);
        let mut rec = ProbeRecord::new();
        let est = range_scan_est(
            &cfg,
            &mut rec,
            RangeEstimate {
                index: &t.indexes[0],
                table: &t,
                n_eq: 0,
                n_btm: 1,
                n_top: 0,
                lower: Some(&lower),
                upper: None,
            },
            t.indexes[0].row_log_est[0],
        );
        let n_row = log_est_to_int(t.indexes[0].row_log_est[0]);
        assert_eq!(est, log_est(n_row - 51));
    }

    #[test]
    fn test_equal_scan_est_on_sample() {
        let t = sampled_table();
        let mut rec = ProbeRecord::new();
        assert_eq!(equal_scan_est(&t.indexes[0], &t, &mut rec, 1, &Expr::int(90)), Some(1));
        assert_eq!(rec.n_valid, 1);
        let mut rec = ProbeRecord::new();
        let col = Expr::column(0, &t, 0);
        assert_eq!(equal_scan_est(&t.indexes[0], &t, &mut rec, 1, &col), None);
    }

    #[test]
    fn test_in_scan_est_sums_values() {
        let t = sampled_table();
        let mut rec = ProbeRecord::new();
        let est = in_scan_est(&t.indexes[0], &t, &mut rec, 1, &[Expr::int(10), Expr::int(50)]);
        assert_eq!(est, Some(2));
        assert_eq!(rec.n_valid, 0);
    }
}
