//! Change detection between two product counts

use serde::{Deserialize, Serialize};

/// Outcome of comparing a previous count with a freshly acquired one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub previous: u64,
    pub current: u64,
    pub delta: i64,
    /// Percentage change relative to `previous`, rounded to 2 decimals.
    /// Zero when `previous` is zero.
    pub percent_change: f64,
    pub changed: bool,
    pub increased: bool,
    pub decreased: bool,
}

impl Comparison {
    /// Compare two counts. Pure, never fails.
    pub fn compare(previous: u64, current: u64) -> Self {
        let delta = current as i64 - previous as i64;
        let percent_change = if previous > 0 {
            round2(delta as f64 / previous as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            previous,
            current,
            delta,
            percent_change,
            changed: delta != 0,
            increased: delta > 0,
            decreased: delta < 0,
        }
    }

    /// `+` for increases, empty otherwise (negative numbers carry their own sign)
    pub fn sign(&self) -> &'static str {
        if self.increased {
            "+"
        } else {
            ""
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_iff_counts_differ() {
        for (p, c) in [(0, 0), (0, 5), (5, 0), (7, 7), (100, 99), (1, 1_000_000)] {
            let cmp = Comparison::compare(p, c);
            assert_eq!(cmp.changed, p != c, "compare({p}, {c})");
        }
        assert!(!Comparison::compare(42, 42).changed);
    }

    #[test]
    fn test_increase() {
        let cmp = Comparison::compare(100, 150);
        assert_eq!(cmp.delta, 50);
        assert_eq!(cmp.percent_change, 50.00);
        assert!(cmp.increased);
        assert!(!cmp.decreased);
        assert_eq!(cmp.sign(), "+");
    }

    #[test]
    fn test_decrease() {
        let cmp = Comparison::compare(200, 150);
        assert_eq!(cmp.delta, -50);
        assert_eq!(cmp.percent_change, -25.0);
        assert!(cmp.decreased);
        assert_eq!(cmp.sign(), "");
    }

    #[test]
    fn test_zero_previous_has_zero_percent() {
        let cmp = Comparison::compare(0, 10);
        assert_eq!(cmp.percent_change, 0.0);
        assert!(cmp.changed);
    }

    #[test]
    fn test_percent_rounding() {
        // 1/3 * 100 = 33.333...
        let cmp = Comparison::compare(3, 4);
        assert_eq!(cmp.percent_change, 33.33);

        // 2/3 * 100 = 66.666...
        let cmp = Comparison::compare(3, 5);
        assert_eq!(cmp.percent_change, 66.67);
    }
}
