//! Strike selection around a reference price
//!
//! The pair is a strangle: CE below and PE above the rounded reference, with
//! the gap depending on whether the rounded price lands on a 50 or 100 mark.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Underlying;

/// Reference prices are rounded to this grid
pub const STRIKE_GRID: f64 = 50.0;

/// Offset when the rounded price sits on an odd 50 (e.g. 26950)
const OFFSET_ON_FIFTY: f64 = 150.0;

/// Offset when the rounded price sits on a 100 (e.g. 27000)
const OFFSET_ON_HUNDRED: f64 = 200.0;

/// Compute `(ce_strike, pe_strike)` from a reference price.
///
/// Rounding to the grid is half-to-even so a reference exactly between two
/// strikes is resolved deterministically.
pub fn calculate_default_strikes(reference_price: f64, symbol: Underlying) -> (f64, f64) {
    let rounded_base = (reference_price / STRIKE_GRID).round_ties_even() * STRIKE_GRID;
    let offset = if rounded_base.rem_euclid(100.0) == 50.0 {
        OFFSET_ON_FIFTY
    } else {
        OFFSET_ON_HUNDRED
    };
    let strikes = (rounded_base - offset, rounded_base + offset);
    debug!(
        "{} strikes from {:.2}: base {:.0}, CE {:.0}, PE {:.0}",
        symbol, reference_price, rounded_base, strikes.0, strikes.1
    );
    strikes
}

/// Where a reference price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceSource {
    PreviousClose,
    LastPrice,
    MidStrike,
}

impl std::fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceSource::PreviousClose => write!(f, "previous close"),
            ReferenceSource::LastPrice => write!(f, "last price"),
            ReferenceSource::MidStrike => write!(f, "mid strike"),
        }
    }
}

/// Pick the reference price: previous close, then live price, then the
/// middle of the listed strikes.
pub fn resolve_reference_price(
    previous_close: Option<f64>,
    last_price: Option<f64>,
    available_strikes: &[f64],
) -> Option<(f64, ReferenceSource)> {
    let usable = |p: &f64| p.is_finite() && *p > 0.0;

    if let Some(close) = previous_close.filter(usable) {
        return Some((close, ReferenceSource::PreviousClose));
    }
    if let Some(ltp) = last_price.filter(usable) {
        return Some((ltp, ReferenceSource::LastPrice));
    }

    let mut strikes: Vec<f64> = available_strikes.iter().copied().filter(usable).collect();
    if strikes.is_empty() {
        return None;
    }
    strikes.sort_by(f64::total_cmp);
    strikes.dedup();
    Some((strikes[strikes.len() / 2], ReferenceSource::MidStrike))
}
