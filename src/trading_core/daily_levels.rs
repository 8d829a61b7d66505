//! Reference levels derived from prior sessions
//!
//! - PDH/PDL: previous day high/low of an option series
//! - Period HLC: aggregate high/low/close over several daily bars (CPR input)

use serde::{Deserialize, Serialize};

use crate::types::Candle;

/// Previous-day high and low of one instrument.
///
/// Computed once per trading day before scanning and never revised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviousDayLevels {
    pub high: f64,
    pub low: f64,
}

impl PreviousDayLevels {
    pub fn new(high: f64, low: f64) -> Self {
        Self { high, low }
    }

    /// Max high / min low over a full session. `None` for an empty series.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        if candles.is_empty() {
            return None;
        }
        let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        Some(Self { high, low })
    }
}

/// High/low/close over a run of daily bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodHlc {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PeriodHlc {
    /// Aggregate consecutive bars: max high, min low, last close
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let last = candles.last()?;
        let levels = PreviousDayLevels::from_candles(candles)?;
        Some(Self {
            high: levels.high,
            low: levels.low,
            close: last.close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(minute: u32, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(Utc.with_ymd_and_hms(2024, 11, 20, 4, minute, 0).unwrap(), o, h, l, c, 100)
    }

    #[test]
    fn test_previous_day_levels() {
        let candles = vec![
            bar(0, 70.0, 75.0, 65.0, 72.0),
            bar(5, 72.0, 100.0, 71.0, 90.0),
            bar(10, 90.0, 91.0, 60.0, 61.0),
        ];
        let levels = PreviousDayLevels::from_candles(&candles).unwrap();
        assert_eq!(levels, PreviousDayLevels::new(100.0, 60.0));
        assert!(PreviousDayLevels::from_candles(&[]).is_none());
    }

    #[test]
    fn test_period_hlc_uses_last_close() {
        let candles = vec![bar(0, 10.0, 12.0, 9.0, 11.0), bar(5, 11.0, 15.0, 10.0, 14.0)];
        let hlc = PeriodHlc::from_candles(&candles).unwrap();
        assert_eq!(hlc, PeriodHlc { high: 15.0, low: 9.0, close: 14.0 });
    }
}
