//! Instrument master lookups
//!
//! The `/instruments/{exchange}` dump is a CSV with one row per listed
//! contract. Lookups resolve strike/right/expiry to a trading symbol and
//! instrument token.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{OptionType, Underlying};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_token: u64,
    pub exchange_token: u64,
    pub tradingsymbol: String,
    pub name: String,
    pub last_price: f64,
    #[serde(deserialize_with = "empty_date")]
    pub expiry: Option<NaiveDate>,
    pub strike: f64,
    pub tick_size: f64,
    pub lot_size: u32,
    pub instrument_type: String,
    pub segment: String,
    pub exchange: String,
}

fn empty_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(serde::de::Error::custom)
}

impl Instrument {
    fn is_option_of(&self, underlying: Underlying, option_type: OptionType) -> bool {
        self.name == underlying.name() && self.instrument_type == option_type.to_string()
    }
}

/// Parsed instrument master for one exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentMaster {
    pub instruments: Vec<Instrument>,
}

impl InstrumentMaster {
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let instruments = reader
            .deserialize()
            .collect::<std::result::Result<Vec<Instrument>, _>>()
            .context("parsing instrument master CSV")?;
        Ok(Self { instruments })
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Nearest option expiry on or after `date`
    pub fn nearest_option_expiry(&self, underlying: Underlying, date: NaiveDate) -> Option<NaiveDate> {
        self.instruments
            .iter()
            .filter(|i| i.name == underlying.name() && (i.instrument_type == "CE" || i.instrument_type == "PE"))
            .filter_map(|i| i.expiry)
            .filter(|expiry| *expiry >= date)
            .min()
    }

    /// Option contract at the nearest expiry on or after `date`
    pub fn option(
        &self,
        underlying: Underlying,
        strike: f64,
        option_type: OptionType,
        date: NaiveDate,
    ) -> Option<&Instrument> {
        self.instruments
            .iter()
            .filter(|i| i.is_option_of(underlying, option_type))
            .filter(|i| (i.strike - strike).abs() < 1e-6)
            .filter(|i| i.expiry.is_some_and(|e| e >= date))
            .min_by_key(|i| i.expiry)
    }

    /// Front futures contract expiring on or after `date`
    pub fn near_month_future(&self, underlying: Underlying, date: NaiveDate) -> Option<&Instrument> {
        self.instruments
            .iter()
            .filter(|i| i.name == underlying.name() && i.instrument_type == "FUT")
            .filter(|i| i.expiry.is_some_and(|e| e >= date))
            .min_by_key(|i| i.expiry)
    }

    /// Distinct strikes listed for the nearest expiry, ascending
    pub fn strikes(&self, underlying: Underlying, date: NaiveDate) -> Vec<f64> {
        let Some(expiry) = self.nearest_option_expiry(underlying, date) else {
            return Vec::new();
        };
        let mut strikes: Vec<f64> = self
            .instruments
            .iter()
            .filter(|i| i.name == underlying.name() && i.expiry == Some(expiry) && i.instrument_type == "CE")
            .map(|i| i.strike)
            .collect();
        strikes.sort_by(f64::total_cmp);
        strikes.dedup();
        strikes
    }

    /// Lot size of the underlying's derivatives
    pub fn lot_size(&self, underlying: Underlying) -> Option<u32> {
        self.instruments
            .iter()
            .find(|i| i.name == underlying.name() && i.lot_size > 0)
            .map(|i| i.lot_size)
    }
}
