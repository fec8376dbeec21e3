//! Logarithmic estimates
//!
//! A `LogEst` is ten times the base-2 logarithm of a quantity, so that
//! multiplying two estimates is an addition. The conversions lose a little
//! precision; only relative comparisons between LogEst values matter.
//!
//! | value | LogEst |
//! |------:|-------:|
//! | 1     | 0      |
//! | 2     | 10     |
//! | 10    | 33     |
//! | 100   | 66     |
//! | 1000  | 99     |
//! | 1e6   | 199    |

/// Ten times log2 of an estimate
pub type LogEst = i16;

/// Add two estimates: `log_est_add(log_est(a), log_est(b)) ~= log_est(a + b)`
pub fn log_est_add(a: LogEst, b: LogEst) -> LogEst {
    const CORRECTION: [u8; 32] = [
        10, 10, 9, 9, 8, 8, 7, 7, 7, 6, 6, 6, 5, 5, 5, 4, 4, 4, 4, 3, 3, 3, 3, 3, 3, 2, 2, 2, 2,
        2, 2, 2,
    ];
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    let diff = hi as i32 - lo as i32;
    if diff > 49 {
        hi
    } else if diff > 31 {
        hi.saturating_add(1)
    } else {
        hi.saturating_add(CORRECTION[diff as usize] as i16)
    }
}

/// Convert an integer into a LogEst
pub fn log_est(x: u64) -> LogEst {
    const FRACTION: [i16; 8] = [0, 2, 3, 5, 6, 7, 8, 9];
    let mut x = x;
    let mut y: i16 = 40;
    if x < 8 {
        if x < 2 {
            return 0;
        }
        while x < 8 {
            y -= 10;
            x <<= 1;
        }
    } else {
        while x > 255 {
            y += 40;
            x >>= 4;
        }
        while x > 15 {
            y += 10;
            x >>= 1;
        }
    }
    FRACTION[(x & 7) as usize] + y - 10
}

/// Estimate of log(N) for an estimate N that is itself a LogEst, used for
/// the cost of one binary search
pub fn est_log(n: LogEst) -> LogEst {
    if n <= 10 {
        0
    } else {
        log_est(n as u64) - 33
    }
}

/// Convert a floating point value into a LogEst
pub fn log_est_from_f64(x: f64) -> LogEst {
    if x <= 1.0 {
        return 0;
    }
    if x <= 2_000_000_000.0 {
        return log_est(x as u64);
    }
    let bits = x.to_bits();
    let exponent = ((bits >> 52) as i64 & 0x7ff) - 1022;
    (exponent * 10) as LogEst
}

/// Convert a LogEst back into an integer
pub fn log_est_to_int(x: LogEst) -> u64 {
    if x < 0 {
        return 0;
    }
    let mut n = (x % 10) as u64;
    let x = x / 10;
    if n >= 5 {
        n -= 2;
    } else if n >= 1 {
        n -= 1;
    }
    if x > 60 {
        return u64::MAX >> 1;
    }
    if x >= 3 {
        (n + 8) << (x - 3)
    } else {
        (n + 8) >> (3 - x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_est_log() {
        assert_eq!(est_log(0), 0);
        assert_eq!(est_log(10), 0);
        // a million rows: log2(1e6) is about 20, stored as LogEst 43
        assert_eq!(est_log(199), log_est(199) - 33);
        assert!(est_log(199) > 40 && est_log(199) < 46);
    }

    #[test]
    fn test_log_est_table() {
        assert_eq!(log_est(0), 0);
        assert_eq!(log_est(1), 0);
        assert_eq!(log_est(2), 10);
        assert_eq!(log_est(10), 33);
        assert_eq!(log_est(100), 66);
        assert_eq!(log_est(1000), 99);
        assert_eq!(log_est(1_000_000), 199);
        assert_eq!(log_est(1_048_576), 200);
    }

    #[test]
    fn test_log_est_add() {
        assert_eq!(log_est_add(0, 0), 10);
        assert_eq!(log_est_add(33, 33), 43);
        assert_eq!(log_est_add(100, 0), 100);
        assert_eq!(log_est_add(10, 50), log_est_add(50, 10));
    }

    #[test]
    fn test_log_est_to_int() {
        assert_eq!(log_est_to_int(0), 1);
        assert_eq!(log_est_to_int(10), 2);
        assert_eq!(log_est_to_int(33), 10);
        assert_eq!(log_est_to_int(-5), 0);
    }

    #[test]
    fn test_log_est_from_f64() {
        assert_eq!(log_est_from_f64(0.5), 0);
        assert_eq!(log_est_from_f64(1000.0), 99);
        assert!(log_est_from_f64(1e12) > log_est_from_f64(1e10));
    }
}
