//! Multi-timeframe CPR strategy
//!
//! Levels come from daily underlying bars: daily CPR from the previous
//! session, weekly from the previous 5 sessions and monthly from the previous
//! 20. A long needs the three ranges stacked upward with price above every
//! top-central; a short mirrors it. Open positions are stopped on a close
//! through the daily CPR and flattened at the end-of-day cutoff.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::calendar::{hm, session_time};
use super::cpr::Cpr;
use super::daily_levels::PeriodHlc;
use super::signal::ExitReason;
use super::stats::ScoredTrade;
use crate::types::Candle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCprConfig {
    /// No new entries at/after this time (default: 15:15)
    pub entry_cutoff: NaiveTime,
    /// Open positions are closed at/after this time (default: 15:20)
    pub exit_time: NaiveTime,
    /// Sessions in the weekly window
    pub weekly_lookback: usize,
    /// Sessions in the monthly window
    pub monthly_lookback: usize,
    /// Body/range above this marks a strong candle
    pub strong_body_ratio: f64,
}

impl Default for MultiCprConfig {
    fn default() -> Self {
        Self {
            entry_cutoff: hm(15, 15),
            exit_time: hm(15, 20),
            weekly_lookback: 5,
            monthly_lookback: 20,
            strong_body_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CprDirection {
    Buy,
    Sell,
}

impl CprDirection {
    pub fn opposite(self) -> Self {
        match self {
            CprDirection::Buy => CprDirection::Sell,
            CprDirection::Sell => CprDirection::Buy,
        }
    }
}

impl std::fmt::Display for CprDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CprDirection::Buy => write!(f, "BUY"),
            CprDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// Daily, weekly and monthly CPR in force for one session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiCprLevels {
    pub daily: Cpr,
    pub weekly: Cpr,
    pub monthly: Cpr,
}

impl MultiCprLevels {
    /// Levels for the session at `idx` in a daily bar series, from the bars
    /// strictly before it. `None` until a full monthly window is available.
    pub fn from_daily_bars(daily: &[Candle], idx: usize, config: &MultiCprConfig) -> Option<Self> {
        if idx == 0 || idx > daily.len() || idx < config.monthly_lookback || idx < config.weekly_lookback {
            return None;
        }

        let prev = &daily[idx - 1];
        let week = PeriodHlc::from_candles(&daily[idx - config.weekly_lookback..idx])?;
        let month = PeriodHlc::from_candles(&daily[idx - config.monthly_lookback..idx])?;

        Some(Self {
            daily: Cpr::from_hlc(prev.high, prev.low, prev.close),
            weekly: Cpr::from_hlc(week.high, week.low, week.close),
            monthly: Cpr::from_hlc(month.high, month.low, month.close),
        })
    }

    fn bullish_stack(&self) -> bool {
        self.daily.tc > self.weekly.bc && self.weekly.tc > self.monthly.bc
    }

    fn bearish_stack(&self) -> bool {
        self.daily.bc < self.weekly.tc && self.weekly.bc < self.monthly.tc
    }

    fn above_all_tops(&self, price: f64) -> bool {
        price > self.daily.tc && price > self.weekly.tc && price > self.monthly.tc
    }

    fn below_all_bottoms(&self, price: f64) -> bool {
        price < self.daily.bc && price < self.weekly.bc && price < self.monthly.bc
    }

    /// Entry on a closed bar: needs a retest of a CPR edge and no strong
    /// counter-candle.
    pub fn candle_signal(&self, candle: &Candle, config: &MultiCprConfig) -> Option<CprDirection> {
        let strong = candle.body_ratio() > config.strong_body_ratio;
        let strong_red = candle.is_bearish() && strong;
        let strong_green = candle.is_bullish() && strong;

        let retested_top = candle.low <= self.daily.tc || candle.low <= self.weekly.tc || candle.low <= self.monthly.tc;
        let retested_bottom =
            candle.high >= self.daily.bc || candle.high >= self.weekly.bc || candle.high >= self.monthly.bc;

        if self.bullish_stack() && self.above_all_tops(candle.close) && retested_top && !strong_red {
            Some(CprDirection::Buy)
        } else if self.bearish_stack() && self.below_all_bottoms(candle.close) && retested_bottom && !strong_green {
            Some(CprDirection::Sell)
        } else {
            None
        }
    }

    /// Entry on a last-traded price (live polling)
    pub fn price_signal(&self, price: f64) -> Option<CprDirection> {
        if self.bullish_stack() && self.above_all_tops(price) {
            Some(CprDirection::Buy)
        } else if self.bearish_stack() && self.below_all_bottoms(price) {
            Some(CprDirection::Sell)
        } else {
            None
        }
    }

    /// Price has crossed back through the daily CPR against the position
    pub fn stop_breached(&self, direction: CprDirection, price: f64) -> bool {
        match direction {
            CprDirection::Buy => price < self.daily.bc,
            CprDirection::Sell => price > self.daily.tc,
        }
    }
}

/// Exit decision for an open position at `time` with `price`
pub fn cpr_exit_reason(
    levels: &MultiCprLevels,
    direction: CprDirection,
    time: NaiveTime,
    price: f64,
    config: &MultiCprConfig,
) -> Option<ExitReason> {
    if levels.stop_breached(direction, price) {
        Some(ExitReason::StopLoss)
    } else if time >= config.exit_time {
        Some(ExitReason::MarketClose)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CprExit {
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Signed by direction, in index points
    pub pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CprTrade {
    pub direction: CprDirection,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub levels: MultiCprLevels,
    /// `None` while the position is open
    pub exit: Option<CprExit>,
}

impl CprTrade {
    pub fn open(direction: CprDirection, entry_time: DateTime<Utc>, entry_price: f64, levels: MultiCprLevels) -> Self {
        Self { direction, entry_time, entry_price, levels, exit: None }
    }

    pub fn is_open(&self) -> bool {
        self.exit.is_none()
    }

    pub fn close(&mut self, exit_time: DateTime<Utc>, exit_price: f64, exit_reason: ExitReason) -> CprExit {
        let pnl = match self.direction {
            CprDirection::Buy => exit_price - self.entry_price,
            CprDirection::Sell => self.entry_price - exit_price,
        };
        let pnl_pct = if self.entry_price != 0.0 { pnl / self.entry_price * 100.0 } else { 0.0 };
        let exit = CprExit { exit_time, exit_price, exit_reason, pnl, pnl_pct };
        self.exit = Some(exit);
        exit
    }

    /// Scoring for statistics: a win is any positive pnl
    pub fn scored(&self) -> Option<ScoredTrade> {
        self.exit.map(|exit| ScoredTrade {
            entry_time: self.entry_time,
            pnl: exit.pnl,
            win: exit.pnl > 0.0,
        })
    }
}

/// Candle-driven position tracker for backtests
#[derive(Debug, Clone, Default)]
pub struct CprTracker {
    config: MultiCprConfig,
    position: Option<CprTrade>,
}

impl CprTracker {
    pub fn new(config: MultiCprConfig) -> Self {
        Self { config, position: None }
    }

    pub fn position(&self) -> Option<&CprTrade> {
        self.position.as_ref()
    }

    /// Feed one closed bar. Returns a trade when it closes on this bar.
    pub fn on_candle(&mut self, candle: &Candle, levels: &MultiCprLevels) -> Option<CprTrade> {
        let time = session_time(candle.timestamp);

        if self.position.is_none() {
            if time < self.config.entry_cutoff {
                if let Some(direction) = levels.candle_signal(candle, &self.config) {
                    info!(
                        "CPR ENTRY: {} @ {:.2} | Daily BC/TC: {:.2}/{:.2}",
                        direction, candle.close, levels.daily.bc, levels.daily.tc
                    );
                    self.position = Some(CprTrade::open(direction, candle.timestamp, candle.close, *levels));
                }
            }
            return None;
        }

        let open = self.position.as_mut()?;

        // Stop is measured against the levels of the bar's own session
        let reason = cpr_exit_reason(levels, open.direction, time, candle.close, &self.config)?;
        let exit = open.close(candle.timestamp, candle.close, reason);
        info!("CPR EXIT: {} {} @ {:.2} | PnL: {:+.2} ({:+.2}%)", open.direction, reason, exit.exit_price, exit.pnl, exit.pnl_pct);
        self.position.take()
    }

    /// Position still open at end of data, left unclosed
    pub fn into_open_position(self) -> Option<CprTrade> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::calendar::session_instant;
    use chrono::{Duration, NaiveDate};

    fn day_bar(day: i64, h: f64, l: f64, c: f64) -> Candle {
        let date = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap() + Duration::days(day);
        Candle::new(session_instant(date, hm(9, 15)), l, h, l, c, 0)
    }

    fn flat_history(n: usize) -> Vec<Candle> {
        (0..n as i64).map(|d| day_bar(d, 110.0, 90.0, 100.0)).collect()
    }

    fn levels(daily: (f64, f64), weekly: (f64, f64), monthly: (f64, f64)) -> MultiCprLevels {
        let cpr = |(bc, tc): (f64, f64)| Cpr { pivot: (bc + tc) / 2.0, bc, tc };
        MultiCprLevels { daily: cpr(daily), weekly: cpr(weekly), monthly: cpr(monthly) }
    }

    fn intraday(h: u32, m: u32, o: f64, hi: f64, lo: f64, c: f64) -> Candle {
        let date = NaiveDate::from_ymd_opt(2024, 11, 21).unwrap();
        Candle::new(session_instant(date, hm(h, m)), o, hi, lo, c, 0)
    }

    #[test]
    fn test_levels_need_full_monthly_window() {
        let config = MultiCprConfig::default();
        let daily = flat_history(25);
        assert!(MultiCprLevels::from_daily_bars(&daily, 19, &config).is_none());
        let lv = MultiCprLevels::from_daily_bars(&daily, 20, &config).unwrap();
        assert!((lv.daily.pivot - 100.0).abs() < 1e-9);
        assert!((lv.monthly.bc - 100.0).abs() < 1e-9);
        assert!(MultiCprLevels::from_daily_bars(&daily, 26, &config).is_none());
    }

    #[test]
    fn test_levels_use_previous_sessions_only() {
        let config = MultiCprConfig::default();
        let mut daily = flat_history(21);
        // Current session's own bar must not leak into its levels
        daily[20] = day_bar(20, 500.0, 10.0, 300.0);
        daily[19] = day_bar(19, 120.0, 100.0, 118.0);
        let lv = MultiCprLevels::from_daily_bars(&daily, 20, &config).unwrap();
        assert_eq!(lv.daily, Cpr::from_hlc(120.0, 100.0, 118.0));
        assert_eq!(lv.weekly, Cpr::from_hlc(120.0, 90.0, 118.0));
    }

    #[test]
    fn test_buy_signal_requires_retest_and_no_strong_red() {
        let config = MultiCprConfig::default();
        let lv = levels((104.0, 106.0), (100.0, 103.0), (96.0, 99.0));

        // Closes above all tops after dipping to the daily TC
        let retest = intraday(10, 15, 106.5, 109.0, 105.5, 108.0);
        assert_eq!(lv.candle_signal(&retest, &config), Some(CprDirection::Buy));

        // No retest: low stays above every TC
        let no_retest = intraday(10, 15, 107.0, 110.0, 106.5, 109.0);
        assert_eq!(lv.candle_signal(&no_retest, &config), None);

        // Strong red bar rejected
        let strong_red = intraday(10, 15, 115.0, 115.5, 105.0, 107.0);
        assert_eq!(lv.candle_signal(&strong_red, &config), None);

        assert_eq!(lv.price_signal(107.0), Some(CprDirection::Buy));
    }

    #[test]
    fn test_sell_signal() {
        let config = MultiCprConfig::default();
        let lv = levels((94.0, 96.0), (97.0, 100.0), (101.0, 104.0));
        let candle = intraday(11, 15, 93.5, 94.5, 91.0, 92.0);
        assert_eq!(lv.candle_signal(&candle, &config), Some(CprDirection::Sell));
        assert_eq!(lv.price_signal(93.0), Some(CprDirection::Sell));
        assert_eq!(lv.price_signal(95.0), None);
    }

    #[test]
    fn test_tracker_stop_and_eod() {
        let lv = levels((104.0, 106.0), (100.0, 103.0), (96.0, 99.0));
        let mut tracker = CprTracker::new(MultiCprConfig::default());

        assert!(tracker.on_candle(&intraday(10, 15, 106.5, 109.0, 105.5, 108.0), &lv).is_none());
        assert_eq!(tracker.position().unwrap().direction, CprDirection::Buy);

        // Close back below daily BC stops out
        let closed = tracker.on_candle(&intraday(11, 15, 105.0, 105.5, 102.0, 103.0), &lv).unwrap();
        let exit = closed.exit.unwrap();
        assert_eq!(exit.exit_reason, ExitReason::StopLoss);
        assert!((exit.pnl - -5.0).abs() < 1e-9);
        assert!(tracker.position().is_none());

        // Re-entry allowed; no entries at/after 15:15
        assert!(tracker.on_candle(&intraday(15, 15, 106.5, 109.0, 105.5, 108.0), &lv).is_none());
        assert!(tracker.position().is_none());

        tracker.on_candle(&intraday(14, 15, 106.5, 109.0, 105.5, 108.0), &lv);
        let closed = tracker.on_candle(&intraday(15, 20, 108.0, 111.0, 107.5, 110.0), &lv).unwrap();
        let exit = closed.exit.unwrap();
        assert_eq!(exit.exit_reason, ExitReason::MarketClose);
        assert!((exit.pnl - 2.0).abs() < 1e-9);
        assert!(closed.scored().unwrap().win);
    }

    #[test]
    fn test_sell_pnl_is_signed() {
        let lv = levels((94.0, 96.0), (97.0, 100.0), (101.0, 104.0));
        let mut trade = CprTrade::open(CprDirection::Sell, intraday(10, 15, 0.0, 0.0, 0.0, 0.0).timestamp, 200.0, lv);
        let exit = trade.close(intraday(12, 15, 0.0, 0.0, 0.0, 0.0).timestamp, 190.0, ExitReason::MarketClose);
        assert_eq!(exit.pnl, 10.0);
        assert_eq!(exit.pnl_pct, 5.0);
        assert!(!trade.is_open());
    }
}
