//! Market data collaborator
//!
//! The orchestrators only see this trait. Missing data comes back as an empty
//! series or `None`; authorization failures surface as
//! [`BrokerError::Unauthorized`](crate::error::BrokerError) in the error chain.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{Candle, CandleInterval, OptionContract, Underlying};

#[cfg(test)]
pub mod testing;

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Confirm the broker session is usable before a run
    async fn verify_session(&self) -> Result<()>;

    /// Candles of an option over one session. The contract's expiry is the
    /// nearest one on or after `date`.
    async fn option_candles(
        &self,
        contract: OptionContract,
        date: NaiveDate,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>>;

    /// Candles of the spot index over `[from, to]`
    async fn index_candles(
        &self,
        symbol: Underlying,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>>;

    /// Closing price of the index on a given session
    async fn session_close(&self, symbol: Underlying, date: NaiveDate) -> Result<Option<f64>>;

    /// Previous session close as reported by the live quote
    async fn previous_close(&self, symbol: Underlying) -> Result<Option<f64>>;

    /// Last traded price of the index
    async fn last_price(&self, symbol: Underlying) -> Result<Option<f64>>;

    /// Contract size for orders on this underlying
    async fn lot_size(&self, symbol: Underlying) -> Result<u32>;

    /// Strikes listed for the nearest expiry on or after `date`
    async fn available_strikes(&self, symbol: Underlying, date: NaiveDate) -> Result<Vec<f64>>;
}
