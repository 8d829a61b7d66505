//! Central Pivot Range
//!
//! Pivot, bottom-central and top-central levels from a high/low/close triple.

use serde::{Deserialize, Serialize};

/// Compute `(pivot, bottom_central, top_central)`.
///
/// The raw BC/TC pair is normalized so bottom <= top regardless of where the
/// close sits in the range.
pub fn calculate_cpr(high: f64, low: f64, close: f64) -> (f64, f64, f64) {
    let pivot = (high + low + close) / 3.0;
    let bc_raw = (high + low) / 2.0;
    let tc_raw = 2.0 * pivot - bc_raw;
    (pivot, bc_raw.min(tc_raw), bc_raw.max(tc_raw))
}

/// CPR levels for one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cpr {
    pub pivot: f64,
    pub bc: f64,
    pub tc: f64,
}

impl Cpr {
    pub fn from_hlc(high: f64, low: f64, close: f64) -> Self {
        let (pivot, bc, tc) = calculate_cpr(high, low, close);
        Self { pivot, bc, tc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpr_known_values() {
        // Close above mid-range: raw TC is the upper level
        let (pivot, bc, tc) = calculate_cpr(110.0, 90.0, 106.0);
        assert!((pivot - 102.0).abs() < 1e-9);
        assert!((bc - 100.0).abs() < 1e-9);
        assert!((tc - 104.0).abs() < 1e-9);

        // Close below mid-range: raw BC would sit above raw TC
        let (pivot, bc, tc) = calculate_cpr(110.0, 90.0, 94.0);
        assert!((pivot - 98.0).abs() < 1e-9);
        assert!((bc - 96.0).abs() < 1e-9);
        assert!((tc - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpr_ordering_holds_across_ranges() {
        for low in [0.0, 50.5, 19_800.0] {
            for span in [0.0, 0.05, 12.0, 450.0] {
                let high = low + span;
                for frac in [0.0, 0.1, 0.5, 0.77, 1.0] {
                    let close = low + span * frac;
                    let (pivot, bc, tc) = calculate_cpr(high, low, close);
                    assert!(bc <= pivot + 1e-9, "bc {} > pivot {}", bc, pivot);
                    assert!(pivot <= tc + 1e-9, "pivot {} > tc {}", pivot, tc);
                    assert!((pivot - (high + low + close) / 3.0).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_cpr_from_hlc() {
        let cpr = Cpr::from_hlc(110.0, 90.0, 106.0);
        assert!((cpr.tc - cpr.bc - 4.0).abs() < 1e-9);
    }
}
