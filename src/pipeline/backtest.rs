//! High-Low Backtest
//!
//! Replays the signal detector day by day over a historical range:
//! 1. Previous trading day close -> CE/PE strikes
//! 2. Previous-day option candles -> PDH/PDL for both legs
//! 3. Current-day option candles -> CE entry check, then PE
//! 4. Simulated exit, or a NO SIGNAL entry in the trade log
//!
//! A failing day is logged and skipped. Authorization failures abort the run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{is_auth_error, validate_range};
use crate::execution::HighLowConfig;
use crate::market::MarketData;
use crate::trading_core::calendar::session_today;
use crate::trading_core::{
    calculate_default_strikes, DayContext, PreviousDayLevels, SignalDetector, SimulatedTrade, TradeLogEntry,
    TradeStatistics, TradingCalendar, TtlCache,
};
use crate::types::{Candle, CandleInterval, OptionContract, OptionType, Underlying};

/// How long fetched option candles are reused within a run
const CANDLE_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache key for one option's candles over one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: Underlying,
    /// Strike in paise so the key stays hashable
    pub strike_paise: i64,
    pub option_type: OptionType,
    pub date: NaiveDate,
    pub interval: CandleInterval,
}

impl CandleKey {
    pub fn new(contract: OptionContract, date: NaiveDate, interval: CandleInterval) -> Self {
        Self {
            symbol: contract.underlying,
            strike_paise: (contract.strike * 100.0).round() as i64,
            option_type: contract.option_type,
            date,
            interval,
        }
    }
}

/// Result of one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: Underlying,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub summary: TradeStatistics,
    /// One entry per evaluated day, NO SIGNAL days included
    pub trades: Vec<TradeLogEntry>,
}

impl BacktestReport {
    pub fn from_entries(symbol: Underlying, start_date: NaiveDate, end_date: NaiveDate, trades: Vec<TradeLogEntry>) -> Self {
        let scored: Vec<_> = trades.iter().filter_map(TradeLogEntry::scored).collect();
        Self {
            symbol,
            start_date,
            end_date,
            summary: TradeStatistics::from_trades(&scored),
            trades,
        }
    }

    pub fn no_signal_days(&self) -> usize {
        self.trades.iter().filter(|t| t.is_no_signal()).count()
    }
}

/// Day-by-day backtest of the High-Low strategy for one underlying
pub struct HighLowBacktest {
    market: Arc<dyn MarketData>,
    config: HighLowConfig,
    calendar: TradingCalendar,
    detector: SignalDetector,
    candles: TtlCache<CandleKey, Vec<Candle>>,
}

impl HighLowBacktest {
    pub fn new(market: Arc<dyn MarketData>, config: HighLowConfig, calendar: TradingCalendar) -> Self {
        let detector = SignalDetector::new(config.signal.clone());
        Self {
            market,
            config,
            calendar,
            detector,
            candles: TtlCache::new(CANDLE_CACHE_TTL),
        }
    }

    pub fn config(&self) -> &HighLowConfig {
        &self.config
    }

    /// Drop every cached candle series
    pub fn clear_cache(&mut self) {
        self.candles.clear();
    }

    /// Backtest every trading day in `[from, to]`
    pub async fn run(&mut self, from: NaiveDate, to: NaiveDate) -> Result<BacktestReport> {
        validate_range(from, to, session_today())?;
        self.market.verify_session().await.context("verifying broker session")?;

        let symbol = self.config.symbol;
        info!("=== HIGH-LOW BACKTEST: {} {} -> {} ===", symbol, from, to);

        self.detector.reset();
        let mut entries = Vec::new();

        let days = self.calendar.trading_days(from, to);
        debug!("{} trading days in range", days.len());

        for date in days {
            let result = self.run_day(date).await;
            // Never carry detector state into the next day
            self.detector.reset();

            match result {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) if is_auth_error(&e) => return Err(e.context(format!("backtest aborted on {}", date))),
                Err(e) => warn!("{}: skipped after error: {:#}", date, e),
            }
            self.candles.purge_expired();
        }

        let report = BacktestReport::from_entries(symbol, from, to, entries);
        info!("{} backtest complete: {}", symbol, report.summary);
        Ok(report)
    }

    /// Evaluate one trading day. `Ok(None)` when data is missing.
    pub async fn run_day(&mut self, date: NaiveDate) -> Result<Option<TradeLogEntry>> {
        let symbol = self.config.symbol;

        let Some(previous_day) = self.calendar.previous_trading_day(date) else {
            warn!("{}: no previous trading day found", date);
            return Ok(None);
        };

        let Some(underlying_close) = self.market.session_close(symbol, previous_day).await? else {
            warn!("{}: no {} close for {}", date, symbol, previous_day);
            return Ok(None);
        };

        let (ce_strike, pe_strike) = calculate_default_strikes(underlying_close, symbol);
        let ce = OptionContract::new(symbol, ce_strike, OptionType::CE);
        let pe = OptionContract::new(symbol, pe_strike, OptionType::PE);

        let ce_prev = self.option_candles(ce, previous_day).await?;
        let pe_prev = self.option_candles(pe, previous_day).await?;
        let (Some(ce_levels), Some(pe_levels)) =
            (PreviousDayLevels::from_candles(&ce_prev), PreviousDayLevels::from_candles(&pe_prev))
        else {
            warn!("{}: missing previous-day candles for {} / {}", date, ce, pe);
            return Ok(None);
        };

        let ce_day = self.option_candles(ce, date).await?;
        let pe_day = self.option_candles(pe, date).await?;
        if ce_day.is_empty() || pe_day.is_empty() {
            warn!("{}: missing candles for {} / {}", date, ce, pe);
            return Ok(None);
        }

        let context = DayContext {
            symbol,
            date,
            previous_day,
            underlying_close,
            ce_strike,
            pe_strike,
            ce_levels,
            pe_levels,
        };

        let signal = self
            .detector
            .check_entry(OptionType::CE, &ce_day, &pe_day, ce_levels, pe_levels)
            .or_else(|| self.detector.check_entry(OptionType::PE, &pe_day, &ce_day, pe_levels, ce_levels));

        let Some(signal) = signal else {
            info!("{}: NO SIGNAL (CE {} PDH {:.2}, PE {} PDH {:.2})", date, ce_strike, ce_levels.high, pe_strike, pe_levels.high);
            return Ok(Some(TradeLogEntry::no_signal(context)));
        };

        let (strike, primary) = match signal.option_type {
            OptionType::CE => (ce_strike, &ce_day),
            OptionType::PE => (pe_strike, &pe_day),
        };

        let Some(exit) = self.detector.execute_trade(&signal, primary) else {
            return Ok(Some(TradeLogEntry::no_signal(context)));
        };

        info!(
            "{}: {} {} entry {:.2} -> {} {:.2} ({:+.2})",
            date, signal.option_type, strike, signal.entry_price, exit.exit_reason, exit.exit_price, exit.pnl
        );

        Ok(Some(TradeLogEntry::traded(context, SimulatedTrade { strike, entry: signal, exit })))
    }

    async fn option_candles(&mut self, contract: OptionContract, date: NaiveDate) -> Result<Vec<Candle>> {
        let key = CandleKey::new(contract, date, self.config.interval);
        if let Some(candles) = self.candles.get(&key) {
            return Ok(candles);
        }

        let candles = self
            .market
            .option_candles(contract, date, self.config.interval)
            .await
            .with_context(|| format!("fetching {} candles for {}", contract, date))?;

        if !candles.is_empty() {
            self.candles.insert(key, candles.clone());
        }
        Ok(candles)
    }
}

/// Backtest several underlyings with at most `max_workers` runs in flight.
///
/// Each symbol gets its own detector. Results come back in completion order.
pub async fn run_backtests(
    market: Arc<dyn MarketData>,
    config: &HighLowConfig,
    calendar: &TradingCalendar,
    symbols: &[Underlying],
    from: NaiveDate,
    to: NaiveDate,
    max_workers: usize,
) -> Vec<(Underlying, Result<BacktestReport>)> {
    stream::iter(symbols.iter().copied())
        .map(|symbol| {
            let market = market.clone();
            let config = HighLowConfig { symbol, ..config.clone() };
            let calendar = calendar.clone();
            async move {
                let mut backtest = HighLowBacktest::new(market, config, calendar);
                (symbol, backtest.run(from, to).await)
            }
        })
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await
}
