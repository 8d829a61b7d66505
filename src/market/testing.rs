//! In-memory market data for orchestrator tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::MarketData;
use crate::error::BrokerError;
use crate::trading_core::calendar::{hm, session_instant};
use crate::types::{Candle, CandleInterval, OptionContract, OptionType, Underlying};

/// Candle starting at `hour:minute` session time on `date`
pub fn bar(date: NaiveDate, hour: u32, minute: u32, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle::new(session_instant(date, hm(hour, minute)), open, high, low, close, 1_000)
}

type OptionKey = (OptionType, i64, NaiveDate);

/// Canned candles and quotes; every field can be changed between calls
#[derive(Default)]
pub struct FakeMarket {
    options: Mutex<HashMap<OptionKey, Vec<Candle>>>,
    index: Mutex<HashMap<CandleInterval, Vec<Candle>>>,
    closes: Mutex<HashMap<NaiveDate, f64>>,
    previous_close: Mutex<Option<f64>>,
    last_price: Mutex<Option<f64>>,
    strikes: Vec<f64>,
    lot_size: u32,
    unauthorized: Mutex<bool>,
    failing_dates: Mutex<HashSet<NaiveDate>>,
    failing_quotes: Mutex<bool>,
    option_fetches: Mutex<usize>,
}

impl FakeMarket {
    pub fn new() -> Self {
        Self { lot_size: 75, ..Default::default() }
    }

    pub fn with_strikes(mut self, strikes: Vec<f64>) -> Self {
        self.strikes = strikes;
        self
    }

    pub fn set_option(&self, option_type: OptionType, strike: f64, date: NaiveDate, candles: Vec<Candle>) {
        self.options.lock().unwrap().insert((option_type, strike as i64, date), candles);
    }

    pub fn set_index(&self, interval: CandleInterval, candles: Vec<Candle>) {
        self.index.lock().unwrap().insert(interval, candles);
    }

    pub fn set_close(&self, date: NaiveDate, close: f64) {
        self.closes.lock().unwrap().insert(date, close);
    }

    pub fn set_previous_close(&self, close: Option<f64>) {
        *self.previous_close.lock().unwrap() = close;
    }

    pub fn set_last_price(&self, price: Option<f64>) {
        *self.last_price.lock().unwrap() = price;
    }

    pub fn set_unauthorized(&self, value: bool) {
        *self.unauthorized.lock().unwrap() = value;
    }

    /// Make every fetch for `date` fail with a non-auth API error
    pub fn fail_date(&self, date: NaiveDate) {
        self.failing_dates.lock().unwrap().insert(date);
    }

    /// Make quote fetches fail with a non-auth API error
    pub fn set_quotes_failing(&self, value: bool) {
        *self.failing_quotes.lock().unwrap() = value;
    }

    pub fn recover_date(&self, date: NaiveDate) {
        self.failing_dates.lock().unwrap().remove(&date);
    }

    pub fn option_fetches(&self) -> usize {
        *self.option_fetches.lock().unwrap()
    }

    fn check_auth(&self) -> Result<()> {
        if *self.unauthorized.lock().unwrap() {
            return Err(BrokerError::Unauthorized("TokenException: session expired".into()).into());
        }
        Ok(())
    }

    fn check_quotes(&self) -> Result<()> {
        if *self.failing_quotes.lock().unwrap() {
            return Err(BrokerError::Unreachable("quote request timed out".into()).into());
        }
        Ok(())
    }

    fn check_date(&self, date: NaiveDate) -> Result<()> {
        if self.failing_dates.lock().unwrap().contains(&date) {
            return Err(BrokerError::Api { status: 500, message: format!("no data service for {}", date) }.into());
        }
        Ok(())
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn verify_session(&self) -> Result<()> {
        self.check_auth()
    }

    async fn option_candles(
        &self,
        contract: OptionContract,
        date: NaiveDate,
        _interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        self.check_auth()?;
        self.check_date(date)?;
        *self.option_fetches.lock().unwrap() += 1;
        let key = (contract.option_type, contract.strike as i64, date);
        Ok(self.options.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }

    async fn index_candles(
        &self,
        _symbol: Underlying,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        self.check_auth()?;
        let candles = self.index.lock().unwrap().get(&interval).cloned().unwrap_or_default();
        Ok(candles.into_iter().filter(|c| c.timestamp >= from && c.timestamp <= to).collect())
    }

    async fn session_close(&self, _symbol: Underlying, date: NaiveDate) -> Result<Option<f64>> {
        self.check_auth()?;
        self.check_date(date)?;
        Ok(self.closes.lock().unwrap().get(&date).copied())
    }

    async fn previous_close(&self, _symbol: Underlying) -> Result<Option<f64>> {
        self.check_auth()?;
        self.check_quotes()?;
        Ok(*self.previous_close.lock().unwrap())
    }

    async fn last_price(&self, _symbol: Underlying) -> Result<Option<f64>> {
        self.check_auth()?;
        self.check_quotes()?;
        Ok(*self.last_price.lock().unwrap())
    }

    async fn lot_size(&self, _symbol: Underlying) -> Result<u32> {
        Ok(self.lot_size)
    }

    async fn available_strikes(&self, _symbol: Underlying, _date: NaiveDate) -> Result<Vec<f64>> {
        Ok(self.strikes.clone())
    }
}
