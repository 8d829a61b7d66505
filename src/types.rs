//! Shared market data types
//!
//! Candles, option contract descriptors and the supported NSE underlyings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::InputError;

/// One OHLC bar. Immutable once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Body as a fraction of the full range (0 for a zero-range bar)
    pub fn body_ratio(&self) -> f64 {
        let range = self.range();
        if range > 0.0 {
            self.body() / range
        } else {
            0.0
        }
    }
}

/// Option right: call (CE) or put (PE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    CE,
    PE,
}

impl OptionType {
    /// The counterpart option monitored alongside this one
    pub fn opposite(self) -> Self {
        match self {
            OptionType::CE => OptionType::PE,
            OptionType::PE => OptionType::CE,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            OptionType::CE => 0,
            OptionType::PE => 1,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::CE => write!(f, "CE"),
            OptionType::PE => write!(f, "PE"),
        }
    }
}

/// Bar interval as understood by the historical data endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    Minute,
    FiveMinute,
    FifteenMinute,
    ThirtyMinute,
    SixtyMinute,
    Day,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::Minute => "minute",
            CandleInterval::FiveMinute => "5minute",
            CandleInterval::FifteenMinute => "15minute",
            CandleInterval::ThirtyMinute => "30minute",
            CandleInterval::SixtyMinute => "60minute",
            CandleInterval::Day => "day",
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            CandleInterval::Minute => 1,
            CandleInterval::FiveMinute => 5,
            CandleInterval::FifteenMinute => 15,
            CandleInterval::ThirtyMinute => 30,
            CandleInterval::SixtyMinute => 60,
            CandleInterval::Day => 375,
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minute" | "1minute" => Ok(CandleInterval::Minute),
            "5minute" => Ok(CandleInterval::FiveMinute),
            "15minute" => Ok(CandleInterval::FifteenMinute),
            "30minute" => Ok(CandleInterval::ThirtyMinute),
            "60minute" | "hour" => Ok(CandleInterval::SixtyMinute),
            "day" => Ok(CandleInterval::Day),
            other => Err(InputError::UnsupportedInterval(other.to_string())),
        }
    }
}

/// NSE index underlyings with listed weekly/monthly options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Underlying {
    Nifty,
    BankNifty,
    FinNifty,
}

impl Underlying {
    /// Name used in NFO trading symbols and the instrument master
    pub fn name(&self) -> &'static str {
        match self {
            Underlying::Nifty => "NIFTY",
            Underlying::BankNifty => "BANKNIFTY",
            Underlying::FinNifty => "FINNIFTY",
        }
    }

    /// Instrument token of the spot index
    pub fn index_token(&self) -> u64 {
        match self {
            Underlying::Nifty => 256265,
            Underlying::BankNifty => 260105,
            Underlying::FinNifty => 257801,
        }
    }

    /// Quote key of the spot index ("EXCHANGE:TRADINGSYMBOL")
    pub fn quote_key(&self) -> &'static str {
        match self {
            Underlying::Nifty => "NSE:NIFTY 50",
            Underlying::BankNifty => "NSE:NIFTY BANK",
            Underlying::FinNifty => "NSE:NIFTY FIN SERVICE",
        }
    }

    /// Lot size used when the instrument master is unavailable
    pub fn default_lot_size(&self) -> u32 {
        match self {
            Underlying::Nifty => 75,
            Underlying::BankNifty => 25,
            Underlying::FinNifty => 40,
        }
    }
}

impl std::fmt::Display for Underlying {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Underlying {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NIFTY" | "NIFTY50" | "NIFTY 50" => Ok(Underlying::Nifty),
            "BANKNIFTY" | "NIFTY BANK" => Ok(Underlying::BankNifty),
            "FINNIFTY" | "NIFTY FIN SERVICE" => Ok(Underlying::FinNifty),
            other => Err(InputError::UnsupportedSymbol(other.to_string())),
        }
    }
}

/// An option identified by underlying, strike and right.
///
/// Expiry is resolved by the market data adapter for the trading day at hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: Underlying,
    pub strike: f64,
    pub option_type: OptionType,
}

impl OptionContract {
    pub fn new(underlying: Underlying, strike: f64, option_type: OptionType) -> Self {
        Self { underlying, strike, option_type }
    }
}

impl std::fmt::Display for OptionContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:.0} {}", self.underlying, self.strike, self.option_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_option_type_opposite() {
        assert_eq!(OptionType::CE.opposite(), OptionType::PE);
        assert_eq!(OptionType::PE.opposite(), OptionType::CE);
        assert_eq!(OptionType::CE.to_string(), "CE");
    }

    #[test]
    fn test_underlying_parse() {
        assert_eq!("nifty".parse::<Underlying>().unwrap(), Underlying::Nifty);
        assert_eq!("BANKNIFTY".parse::<Underlying>().unwrap(), Underlying::BankNifty);
        assert!("SENSEX".parse::<Underlying>().is_err());
        assert_eq!(Underlying::FinNifty.default_lot_size(), 40);
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("60minute".parse::<CandleInterval>().unwrap(), CandleInterval::SixtyMinute);
        assert_eq!(CandleInterval::FiveMinute.as_str(), "5minute");
        assert!("7minute".parse::<CandleInterval>().is_err());
    }

    #[test]
    fn test_body_ratio() {
        let ts = Utc.with_ymd_and_hms(2024, 11, 21, 4, 0, 0).unwrap();
        let candle = Candle::new(ts, 100.0, 110.0, 90.0, 92.0, 0);
        assert!((candle.body_ratio() - 0.4).abs() < 1e-9);
        assert!(candle.is_bearish());

        let flat = Candle::new(ts, 100.0, 100.0, 100.0, 100.0, 0);
        assert_eq!(flat.body_ratio(), 0.0);
    }
}
