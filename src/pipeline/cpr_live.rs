//! Multi-CPR Live Trading
//!
//! Polls the index last price every minute during the session. Entries are
//! checked once per hour, at the first tick on minute :15 or :16 (the close
//! of an hourly bar), and trade the near-month future. Exits fire on a daily
//! CPR breach or the end-of-day cutoff, on any tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scheduler::{LiveStrategy, TickSchedule};
use crate::execution::{MultiCprRunConfig, OrderGateway, OrderRequest, OrderSide, OrderTarget};
use crate::market::MarketData;
use crate::trading_core::calendar::{hm, session_date, session_instant, session_time};
use crate::trading_core::multi_cpr::cpr_exit_reason;
use crate::trading_core::{CprDirection, CprTrade, MultiCprLevels, TradingCalendar};
use crate::types::CandleInterval;

fn order_side(direction: CprDirection) -> OrderSide {
    match direction {
        CprDirection::Buy => OrderSide::Buy,
        CprDirection::Sell => OrderSide::Sell,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CprPosition {
    pub trade: CprTrade,
    pub order_id: String,
    pub quantity: u32,
}

pub struct MultiCprLive {
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn OrderGateway>,
    config: MultiCprRunConfig,
    calendar: TradingCalendar,
    day: Option<NaiveDate>,
    levels: Option<MultiCprLevels>,
    position: Option<CprPosition>,
    /// (session, hour) of the last entry check
    last_check: Option<(NaiveDate, u32)>,
    closed: Vec<CprTrade>,
}

impl MultiCprLive {
    pub fn new(
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn OrderGateway>,
        config: MultiCprRunConfig,
        calendar: TradingCalendar,
    ) -> Self {
        Self {
            market,
            gateway,
            config,
            calendar,
            day: None,
            levels: None,
            position: None,
            last_check: None,
            closed: Vec::new(),
        }
    }

    /// One tick per minute across the polling window
    pub fn schedule(&self) -> TickSchedule {
        TickSchedule::every(self.config.session_start, self.config.session_end, 1)
    }

    pub fn position(&self) -> Option<&CprPosition> {
        self.position.as_ref()
    }

    pub fn levels(&self) -> Option<&MultiCprLevels> {
        self.levels.as_ref()
    }

    pub fn closed_trades(&self) -> &[CprTrade] {
        &self.closed
    }

    fn is_check_minute(&self, now: DateTime<Utc>) -> bool {
        let time = session_time(now);
        let (first, second) = self.config.check_minutes;
        let on_mark = time.minute() == first || time.minute() == second;
        on_mark && time < self.config.strategy.entry_cutoff && self.last_check != Some((session_date(now), time.hour()))
    }

    /// Levels for `date` from the daily bars closed before it
    async fn load_levels(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Option<MultiCprLevels>> {
        let from = date - Duration::days(self.config.daily_lookback_days);
        let daily = self
            .market
            .index_candles(self.config.symbol, session_instant(from, hm(0, 0)), now, CandleInterval::Day)
            .await
            .context("fetching daily bars for CPR levels")?;

        // Today's partial bar, if present, is excluded
        let idx = daily.partition_point(|c| session_date(c.timestamp) < date);
        let levels = MultiCprLevels::from_daily_bars(&daily, idx, &self.config.strategy);
        match &levels {
            Some(l) => info!(
                "CPR levels for {}: daily {:.2}/{:.2} weekly {:.2}/{:.2} monthly {:.2}/{:.2}",
                date, l.daily.bc, l.daily.tc, l.weekly.bc, l.weekly.tc, l.monthly.bc, l.monthly.tc
            ),
            None => warn!("Insufficient daily history for CPR levels on {} ({} bars)", date, idx),
        }
        Ok(levels)
    }

    async fn try_enter(&mut self, levels: MultiCprLevels, ltp: f64, now: DateTime<Utc>) -> Result<()> {
        info!(
            "Checking signal at {}: LTP {:.2}, daily BC/TC {:.2}/{:.2}",
            session_time(now),
            ltp,
            levels.daily.bc,
            levels.daily.tc
        );
        let Some(direction) = levels.price_signal(ltp) else {
            return Ok(());
        };

        let lot_size = self.market.lot_size(self.config.symbol).await?;
        let quantity = lot_size * self.config.quantity;
        let request = OrderRequest::new(OrderTarget::NearMonthFuture(self.config.symbol), order_side(direction), quantity);

        match self.gateway.place_order(&request).await {
            Ok(receipt) => {
                info!("Entered {} {} x{} @ {:.2} ({})", direction, self.config.symbol, quantity, ltp, receipt.order_id);
                self.position = Some(CprPosition {
                    trade: CprTrade::open(direction, now, ltp, levels),
                    order_id: receipt.order_id,
                    quantity,
                });
            }
            Err(e) => warn!("{} entry order failed: {:#}", direction, e),
        }
        Ok(())
    }

    async fn try_exit(&mut self, levels: MultiCprLevels, ltp: f64, now: DateTime<Utc>) -> Result<()> {
        let Some(position) = &self.position else {
            return Ok(());
        };
        let direction = position.trade.direction;

        let Some(reason) = cpr_exit_reason(&levels, direction, session_time(now), ltp, &self.config.strategy) else {
            debug!("{} held at {:.2}", direction, ltp);
            return Ok(());
        };

        let request = OrderRequest::new(
            OrderTarget::NearMonthFuture(self.config.symbol),
            order_side(direction.opposite()),
            position.quantity,
        );
        match self.gateway.place_order(&request).await {
            Ok(receipt) => {
                let mut trade = position.trade;
                let exit = trade.close(now, ltp, reason);
                info!("{}: exited {} @ {:.2}, PnL {:+.2} ({})", reason, direction, ltp, exit.pnl, receipt.order_id);
                self.closed.push(trade);
                self.position = None;
            }
            Err(e) => warn!("{} exit order failed, retrying next tick: {:#}", direction, e),
        }
        Ok(())
    }
}

#[async_trait]
impl LiveStrategy for MultiCprLive {
    fn name(&self) -> &str {
        "multi-cpr"
    }

    async fn step(&mut self, now: DateTime<Utc>) -> Result<()> {
        let date = session_date(now);
        if !self.calendar.is_trading_day(date) || !self.config.is_trading_time(session_time(now)) {
            return Ok(());
        }
        if self.day != Some(date) {
            self.day = Some(date);
            self.levels = None;
        }

        let Some(ltp) = self.market.last_price(self.config.symbol).await? else {
            warn!("No last price for {}", self.config.symbol);
            return Ok(());
        };

        let check_entry = self.position.is_none() && self.is_check_minute(now);
        if check_entry || self.levels.is_none() {
            self.levels = self.load_levels(date, now).await?;
        }
        let Some(levels) = self.levels else {
            return Ok(());
        };

        if check_entry {
            self.last_check = Some((date, session_time(now).hour()));
            self.try_enter(levels, ltp, now).await
        } else {
            self.try_exit(levels, ltp, now).await
        }
    }
}
