//! Multi-CPR Backtest
//!
//! Walks intraday index bars over `[from, to]` with the daily, weekly and
//! monthly CPR of each session. Levels are computed once per session from the
//! daily bars before it. Re-entry after an exit is allowed; a trade still open
//! when the data ends is reported separately and left out of the statistics.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::validate_range;
use crate::execution::MultiCprRunConfig;
use crate::market::MarketData;
use crate::trading_core::calendar::{hm, session_date, session_instant, session_today};
use crate::trading_core::{CprTrade, CprTracker, MultiCprLevels, TradeStatistics};
use crate::types::{Candle, CandleInterval, Underlying};

/// Minimum daily bars needed before a run is attempted
const MIN_DAILY_BARS: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CprBacktestReport {
    pub symbol: Underlying,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub timeframe: CandleInterval,
    pub summary: TradeStatistics,
    /// Closed trades, by entry time
    pub trades: Vec<CprTrade>,
    pub open_position: Option<CprTrade>,
}

pub struct MultiCprBacktest {
    market: Arc<dyn MarketData>,
    config: MultiCprRunConfig,
}

impl MultiCprBacktest {
    pub fn new(market: Arc<dyn MarketData>, config: MultiCprRunConfig) -> Self {
        Self { market, config }
    }

    pub async fn run(&self, from: NaiveDate, to: NaiveDate) -> Result<CprBacktestReport> {
        validate_range(from, to, session_today())?;
        self.market.verify_session().await.context("verifying broker session")?;

        let symbol = self.config.symbol;
        let timeframe = self.config.timeframe;
        info!("=== MULTI-CPR BACKTEST: {} {} -> {} ({}) ===", symbol, from, to, timeframe);

        let daily_from = from - Duration::days(self.config.daily_lookback_days);
        let daily = self
            .market
            .index_candles(
                symbol,
                session_instant(daily_from, hm(0, 0)),
                session_instant(to, hm(23, 59)),
                CandleInterval::Day,
            )
            .await
            .context("fetching daily bars")?;
        let bars = self
            .market
            .index_candles(symbol, session_instant(from, hm(0, 0)), session_instant(to, hm(23, 59)), timeframe)
            .await
            .with_context(|| format!("fetching {} bars", timeframe))?;

        if daily.len() < MIN_DAILY_BARS {
            anyhow::bail!("insufficient daily history: {} bars, need {}", daily.len(), MIN_DAILY_BARS);
        }

        let report = self.simulate(from, to, &daily, &bars);
        info!("{} multi-CPR backtest complete: {}", symbol, report.summary);
        Ok(report)
    }

    /// Replay `bars` against levels derived from `daily`
    pub fn simulate(&self, from: NaiveDate, to: NaiveDate, daily: &[Candle], bars: &[Candle]) -> CprBacktestReport {
        let daily_index: HashMap<NaiveDate, usize> =
            daily.iter().enumerate().map(|(i, c)| (session_date(c.timestamp), i)).collect();
        let mut levels_cache: HashMap<NaiveDate, Option<MultiCprLevels>> = HashMap::new();

        let mut tracker = CprTracker::new(self.config.strategy.clone());
        let mut trades = Vec::new();

        for candle in bars {
            let date = session_date(candle.timestamp);
            if date < from || date > to {
                continue;
            }

            let levels = *levels_cache.entry(date).or_insert_with(|| {
                let levels = daily_index
                    .get(&date)
                    .and_then(|idx| MultiCprLevels::from_daily_bars(daily, *idx, &self.config.strategy));
                if levels.is_none() {
                    debug!("{}: not enough daily history for CPR levels", date);
                }
                levels
            });
            let Some(levels) = levels else {
                continue;
            };

            if let Some(trade) = tracker.on_candle(candle, &levels) {
                trades.push(trade);
            }
        }

        let open_position = tracker.into_open_position();
        if let Some(open) = &open_position {
            warn!("{} position from {} still open at end of data", open.direction, open.entry_time);
        }

        trades.sort_by_key(|t| t.entry_time);
        let scored: Vec<_> = trades.iter().filter_map(CprTrade::scored).collect();

        CprBacktestReport {
            symbol: self.config.symbol,
            from_date: from,
            to_date: to,
            timeframe: self.config.timeframe,
            summary: TradeStatistics::from_trades(&scored),
            trades,
            open_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_auth_error;
    use crate::market::testing::{bar, FakeMarket};
    use crate::trading_core::{CprDirection, ExitReason};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    /// 25 daily bars ending on 2024-10-25. The 10-24 bar lifts the daily CPR
    /// to 120/123.33 over weekly and monthly 110/120.
    fn daily_bars() -> Vec<Candle> {
        let start = d(10, 1);
        (0..25)
            .map(|i| {
                let date = start + Duration::days(i);
                match i {
                    23 => bar(date, 9, 15, 112.0, 130.0, 110.0, 125.0),
                    _ => bar(date, 9, 15, 100.0, 110.0, 90.0, 100.0),
                }
            })
            .collect()
    }

    fn hourly_bars() -> Vec<Candle> {
        let day = d(10, 25);
        vec![
            bar(day, 9, 15, 121.0, 122.0, 119.0, 121.5),
            // Closes above every TC after dipping into the daily CPR
            bar(day, 10, 15, 123.0, 126.5, 122.0, 126.0),
            bar(day, 11, 15, 126.0, 128.0, 125.0, 127.0),
            // Close below daily BC 120
            bar(day, 12, 15, 127.0, 127.0, 118.0, 119.0),
            bar(day, 13, 15, 119.0, 124.5, 119.0, 124.0),
            bar(day, 14, 15, 124.0, 125.5, 123.5, 125.0),
            bar(day, 15, 15, 125.0, 126.5, 124.5, 126.0),
        ]
    }

    fn market() -> Arc<FakeMarket> {
        let market = Arc::new(FakeMarket::new());
        market.set_index(CandleInterval::Day, daily_bars());
        market.set_index(CandleInterval::SixtyMinute, hourly_bars());
        market
    }

    #[tokio::test]
    async fn test_stop_exit_then_reentry_left_open() {
        let backtest = MultiCprBacktest::new(market(), MultiCprRunConfig::default());
        let report = backtest.run(d(10, 25), d(10, 25)).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.direction, CprDirection::Buy);
        assert_eq!(trade.entry_price, 126.0);
        let exit = trade.exit.unwrap();
        assert_eq!(exit.exit_reason, ExitReason::StopLoss);
        assert_eq!(exit.exit_price, 119.0);
        assert_eq!(exit.pnl, -7.0);

        // 13:15 re-entry never reaches 15:20 on hourly bars
        let open = report.open_position.unwrap();
        assert_eq!(open.entry_price, 124.0);
        assert!(open.is_open());

        assert_eq!(report.summary.total_trades, 1);
        assert_eq!(report.summary.losing_trades, 1);
        assert_eq!(report.summary.total_pnl, -7.0);
    }

    #[tokio::test]
    async fn test_short_history_skips_sessions() {
        let market = market();
        // Still 25 bars, but the session itself now sits at index 9
        let mut daily = daily_bars();
        daily.rotate_left(15);
        market.set_index(CandleInterval::Day, daily);

        let report = MultiCprBacktest::new(market, MultiCprRunConfig::default())
            .run(d(10, 25), d(10, 25))
            .await
            .unwrap();
        assert!(report.trades.is_empty());
        assert!(report.open_position.is_none());
    }

    #[tokio::test]
    async fn test_insufficient_daily_history_is_an_error() {
        let market = market();
        market.set_index(CandleInterval::Day, daily_bars().into_iter().take(10).collect());
        let err = MultiCprBacktest::new(market, MultiCprRunConfig::default())
            .run(d(10, 25), d(10, 25))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient daily history"));
    }

    #[tokio::test]
    async fn test_auth_failure_propagates() {
        let market = market();
        market.set_unauthorized(true);
        let err = MultiCprBacktest::new(market, MultiCprRunConfig::default())
            .run(d(10, 25), d(10, 25))
            .await
            .unwrap_err();
        assert!(is_auth_error(&err));
    }
}
