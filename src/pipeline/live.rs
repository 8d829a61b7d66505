//! High-Low Live Trading
//!
//! Per trading day:
//! Idle -> Initializing (strikes + previous-day levels) -> Scanning
//!      -> PositionOpen (entry order accepted) -> Idle (exit order accepted)
//!
//! One trade per day. Order failures leave state untouched so the next tick
//! retries. An open position is carried into the next session if its exit
//! order never went through, and is closed on that session's first bar.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scheduler::{LiveStrategy, TickSchedule};
use crate::execution::{HighLowConfig, OrderGateway, OrderRequest, OrderSide, OrderTarget};
use crate::market::MarketData;
use crate::trading_core::calendar::{session_date, session_time};
use crate::trading_core::{
    calculate_default_strikes, resolve_reference_price, EntrySignal, ExitOutcome, ExitReason, PreviousDayLevels,
    SignalDetector, TradingCalendar,
};
use crate::types::{Candle, OptionContract, OptionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivePhase {
    /// Before initialisation, or done for the day
    Idle,
    /// Levels requested but not yet complete
    Initializing,
    Scanning,
    PositionOpen,
}

/// Strikes and previous-day levels for one session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayLevels {
    pub date: NaiveDate,
    pub ce: OptionContract,
    pub pe: OptionContract,
    pub ce_levels: PreviousDayLevels,
    pub pe_levels: PreviousDayLevels,
}

impl DayLevels {
    fn contract(&self, option_type: OptionType) -> OptionContract {
        match option_type {
            OptionType::CE => self.ce,
            OptionType::PE => self.pe,
        }
    }
}

/// The open option position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub contract: OptionContract,
    pub signal: EntrySignal,
    pub order_id: String,
    pub quantity: u32,
    pub opened_on: NaiveDate,
    /// Stop in force; never lowered
    pub stop_loss: f64,
}

/// Completed round trip, kept for the session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit: ExitOutcome,
    pub exit_order_id: String,
}

pub struct HighLowLive {
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn OrderGateway>,
    config: HighLowConfig,
    calendar: TradingCalendar,
    detector: SignalDetector,
    phase: LivePhase,
    day: Option<NaiveDate>,
    levels: Option<DayLevels>,
    position: Option<Position>,
    trade_taken: bool,
    closed: Vec<ClosedTrade>,
}

impl HighLowLive {
    pub fn new(
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn OrderGateway>,
        config: HighLowConfig,
        calendar: TradingCalendar,
    ) -> Self {
        let detector = SignalDetector::new(config.signal.clone());
        Self {
            market,
            gateway,
            config,
            calendar,
            detector,
            phase: LivePhase::Idle,
            day: None,
            levels: None,
            position: None,
            trade_taken: false,
            closed: Vec::new(),
        }
    }

    /// Ticks: level initialisation, then every scan mark through the last tick
    pub fn schedule(&self) -> TickSchedule {
        TickSchedule::every(self.config.first_tick, self.config.last_tick, self.config.tick_minutes)
            .with_time(self.config.init_time)
    }

    pub fn phase(&self) -> LivePhase {
        self.phase
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn levels(&self) -> Option<&DayLevels> {
        self.levels.as_ref()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Start a new session: detector and levels are reset, the position is kept
    fn roll_day(&mut self, date: NaiveDate) {
        if self.day.is_some() {
            info!("New session {}: resetting detector", date);
        }
        self.day = Some(date);
        self.detector.reset();
        self.levels = None;
        self.trade_taken = false;
        self.phase = if self.position.is_some() { LivePhase::PositionOpen } else { LivePhase::Idle };
    }

    async fn initialize(&mut self, date: NaiveDate) -> Result<Option<DayLevels>> {
        let symbol = self.config.symbol;
        let Some(previous_day) = self.calendar.previous_trading_day(date) else {
            warn!("No previous trading day before {}", date);
            return Ok(None);
        };

        let previous_close = self.market.previous_close(symbol).await?;
        let last_price = match previous_close {
            Some(_) => None,
            None => self.market.last_price(symbol).await?,
        };
        let strikes = match (previous_close, last_price) {
            (None, None) => self.market.available_strikes(symbol, date).await?,
            _ => Vec::new(),
        };
        let Some((reference, source)) = resolve_reference_price(previous_close, last_price, &strikes) else {
            warn!("No reference price for {} yet", symbol);
            return Ok(None);
        };

        let (ce_strike, pe_strike) = calculate_default_strikes(reference, symbol);
        let ce = OptionContract::new(symbol, ce_strike, OptionType::CE);
        let pe = OptionContract::new(symbol, pe_strike, OptionType::PE);
        info!("{} reference {:.2} ({}): {} / {}", symbol, reference, source, ce, pe);

        let ce_prev = self.market.option_candles(ce, previous_day, self.config.interval).await?;
        let pe_prev = self.market.option_candles(pe, previous_day, self.config.interval).await?;
        let (Some(ce_levels), Some(pe_levels)) =
            (PreviousDayLevels::from_candles(&ce_prev), PreviousDayLevels::from_candles(&pe_prev))
        else {
            warn!("Previous-day candles for {} / {} not available yet", ce, pe);
            return Ok(None);
        };

        info!(
            "Levels for {}: CE PDH {:.2} PDL {:.2} | PE PDH {:.2} PDL {:.2}",
            date, ce_levels.high, ce_levels.low, pe_levels.high, pe_levels.low
        );
        Ok(Some(DayLevels { date, ce, pe, ce_levels, pe_levels }))
    }

    /// Candles of today's session whose bar has fully closed by `now`
    async fn closed_candles(&self, contract: OptionContract, date: NaiveDate, now: DateTime<Utc>) -> Result<Vec<Candle>> {
        let bar = Duration::minutes(i64::from(self.config.interval.minutes()));
        let mut candles = self
            .market
            .option_candles(contract, date, self.config.interval)
            .await
            .with_context(|| format!("fetching live candles for {}", contract))?;
        candles.retain(|c| c.timestamp + bar <= now);
        Ok(candles)
    }

    async fn scan(&mut self, levels: DayLevels, now: DateTime<Utc>) -> Result<()> {
        let ce = self.closed_candles(levels.ce, levels.date, now).await?;
        let pe = self.closed_candles(levels.pe, levels.date, now).await?;
        debug!("Scan at {}: {} CE / {} PE bars", session_time(now), ce.len(), pe.len());

        let signal = self
            .detector
            .check_entry(OptionType::CE, &ce, &pe, levels.ce_levels, levels.pe_levels)
            .or_else(|| self.detector.check_entry(OptionType::PE, &pe, &ce, levels.pe_levels, levels.ce_levels));
        let Some(signal) = signal else {
            return Ok(());
        };

        let contract = levels.contract(signal.option_type);
        let lot_size = self.market.lot_size(self.config.symbol).await?;
        let quantity = lot_size * self.config.lots;
        let request = OrderRequest::new(OrderTarget::Option(contract), OrderSide::Buy, quantity);

        match self.gateway.place_order(&request).await {
            Ok(receipt) => {
                info!("Position opened: {} x{} @ {:.2} ({})", contract, quantity, signal.entry_price, receipt.order_id);
                self.position = Some(Position {
                    contract,
                    signal,
                    order_id: receipt.order_id,
                    quantity,
                    opened_on: levels.date,
                    stop_loss: signal.stop_loss,
                });
                self.trade_taken = true;
                self.phase = LivePhase::PositionOpen;
            }
            Err(e) => {
                warn!("Entry order for {} failed, retrying next tick: {:#}", contract, e);
                self.detector.abandon_entry();
            }
        }
        Ok(())
    }

    async fn monitor(&mut self, date: NaiveDate, now: DateTime<Utc>) -> Result<()> {
        let Some(mut position) = self.position.clone() else {
            return Ok(());
        };

        let candles = self.closed_candles(position.contract, date, now).await?;
        let exit = if position.opened_on < date {
            // Exit from an earlier session never filled: close on the first closed bar
            self.detector.force_exit(&position.signal, &candles, ExitReason::MarketClose)
        } else {
            let exit = self.detector.check_exit(&position.signal, &candles);
            if let Some(stop) = self.detector.current_stop_loss() {
                position.stop_loss = position.stop_loss.max(stop);
            }
            match exit {
                None if session_time(now) >= self.config.signal.market_close => {
                    self.detector.force_exit(&position.signal, &candles, ExitReason::MarketClose)
                }
                exit => exit,
            }
        };

        let Some(exit) = exit else {
            debug!("{} held, stop {:.2}", position.contract, position.stop_loss);
            self.position = Some(position);
            return Ok(());
        };

        let request = OrderRequest::new(OrderTarget::Option(position.contract), OrderSide::Sell, position.quantity);
        match self.gateway.place_order(&request).await {
            Ok(receipt) => {
                info!(
                    "Position closed: {} {} @ {:.2} ({:+.2}) ({})",
                    position.contract, exit.exit_reason, exit.exit_price, exit.pnl, receipt.order_id
                );
                self.closed.push(ClosedTrade { position, exit, exit_order_id: receipt.order_id });
                self.position = None;
                self.phase = LivePhase::Idle;
            }
            Err(e) => {
                warn!("Exit order for {} failed, retrying next tick: {:#}", position.contract, e);
                self.position = Some(position);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LiveStrategy for HighLowLive {
    fn name(&self) -> &str {
        "high-low"
    }

    async fn step(&mut self, now: DateTime<Utc>) -> Result<()> {
        let date = session_date(now);
        let time = session_time(now);

        if self.day != Some(date) {
            self.roll_day(date);
        }
        if !self.calendar.is_trading_day(date) || time < self.config.init_time {
            return Ok(());
        }

        if self.levels.is_none() && !self.trade_taken && time < self.config.last_tick {
            self.phase = LivePhase::Initializing;
            self.levels = self.initialize(date).await?;
            if self.levels.is_some() && self.position.is_none() {
                self.phase = LivePhase::Scanning;
            }
        }

        if self.position.is_some() {
            self.phase = LivePhase::PositionOpen;
            return self.monitor(date, now).await;
        }

        if self.trade_taken {
            self.phase = LivePhase::Idle;
            return Ok(());
        }

        let Some(levels) = self.levels else {
            return Ok(());
        };
        if time >= self.config.first_tick && self.config.is_scan_time(time) {
            self.scan(levels, now).await?;
        } else if time >= self.config.last_tick {
            self.phase = LivePhase::Idle;
        }
        Ok(())
    }
}
