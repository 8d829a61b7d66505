//! Configuration for strategy execution

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::trading_core::calendar::hm;
use crate::trading_core::{MultiCprConfig, SignalConfig};
use crate::types::{CandleInterval, Underlying};

/// Execution mode determines whether orders reach the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Orders are logged and acknowledged locally
    Paper,
    /// Orders are sent to the broker
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Configuration for the High-Low strategy (backtest and live)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighLowConfig {
    /// Index whose options are traded
    pub symbol: Underlying,

    /// Detector session and risk parameters
    pub signal: SignalConfig,

    /// Option candle interval
    pub interval: CandleInterval,

    /// Live: levels are initialised at this time (default 09:15)
    pub init_time: NaiveTime,

    /// Live: first scan tick (default 09:20)
    pub first_tick: NaiveTime,

    /// Live: last scan tick (default 15:25)
    pub last_tick: NaiveTime,

    /// Live: minutes between ticks
    pub tick_minutes: u32,

    /// Lots per order
    pub lots: u32,

    pub mode: ExecutionMode,
}

impl Default for HighLowConfig {
    fn default() -> Self {
        Self {
            symbol: Underlying::Nifty,
            signal: SignalConfig::default(),
            interval: CandleInterval::FiveMinute,
            init_time: hm(9, 15),
            first_tick: hm(9, 20),
            last_tick: hm(15, 25),
            tick_minutes: 5,
            lots: 1,
            mode: ExecutionMode::Paper,
        }
    }
}

impl HighLowConfig {
    /// Check if a live tick at `time` may look for new entries
    pub fn is_scan_time(&self, time: NaiveTime) -> bool {
        time >= self.signal.market_open && time < self.last_tick
    }
}

/// Configuration for the multi-CPR strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCprRunConfig {
    pub symbol: Underlying,

    pub strategy: MultiCprConfig,

    /// Intraday bar size for backtests (default 60 minutes)
    pub timeframe: CandleInterval,

    /// Calendar days of daily bars fetched before the start date
    pub daily_lookback_days: i64,

    /// Live: polling starts at this time
    pub session_start: NaiveTime,

    /// Live: polling stops at this time
    pub session_end: NaiveTime,

    /// Live: entry checks run at these minutes past each hour
    pub check_minutes: (u32, u32),

    /// Futures lots per order
    pub quantity: u32,

    pub mode: ExecutionMode,
}

impl Default for MultiCprRunConfig {
    fn default() -> Self {
        Self {
            symbol: Underlying::Nifty,
            strategy: MultiCprConfig::default(),
            timeframe: CandleInterval::SixtyMinute,
            daily_lookback_days: 60,
            session_start: hm(9, 15),
            session_end: hm(15, 30),
            check_minutes: (15, 16),
            quantity: 1,
            mode: ExecutionMode::Paper,
        }
    }
}

impl MultiCprRunConfig {
    /// Check if within the live polling window
    pub fn is_trading_time(&self, time: NaiveTime) -> bool {
        time >= self.session_start && time <= self.session_end
    }
}

/// Where backtest reports and broker metadata are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            cache_dir: PathBuf::from("cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_hours() {
        let config = HighLowConfig::default();

        // Before market
        assert!(!config.is_scan_time(hm(9, 0)));
        assert!(!config.is_scan_time(hm(9, 14)));

        // During market
        assert!(config.is_scan_time(hm(9, 15)));
        assert!(config.is_scan_time(hm(12, 0)));
        assert!(config.is_scan_time(hm(15, 20)));

        // After last tick
        assert!(!config.is_scan_time(hm(15, 25)));
        assert!(!config.is_scan_time(hm(15, 30)));
    }

    #[test]
    fn test_cpr_trading_time() {
        let config = MultiCprRunConfig::default();
        assert!(!config.is_trading_time(hm(9, 14)));
        assert!(config.is_trading_time(hm(9, 15)));
        assert!(config.is_trading_time(hm(15, 30)));
        assert!(!config.is_trading_time(hm(15, 31)));
    }

    #[test]
    fn test_defaults() {
        let config = HighLowConfig::default();
        assert_eq!(config.signal.stop_offset, 20.0);
        assert_eq!(config.mode, ExecutionMode::Paper);
        assert_eq!(MultiCprRunConfig::default().timeframe, CandleInterval::SixtyMinute);
    }
}
