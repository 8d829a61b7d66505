//! Trading Core - broker-agnostic strategy logic
//!
//! Shared by backtests, live trading and the HTTP API:
//! - CPR levels and the multi-timeframe CPR strategy
//! - Previous-day reference levels
//! - High-Low signal detection and exit simulation
//! - Strike selection
//! - Trading calendar, trade log, statistics, caching

pub mod cache;
pub mod calendar;
pub mod cpr;
pub mod daily_levels;
pub mod multi_cpr;
pub mod signal;
pub mod stats;
pub mod strikes;
pub mod trades;

// Re-export commonly used types
pub use cache::TtlCache;
pub use calendar::{TradingCalendar, SESSION_TZ};
pub use cpr::{calculate_cpr, Cpr};
pub use daily_levels::{PeriodHlc, PreviousDayLevels};
pub use multi_cpr::{CprDirection, CprExit, CprTrade, CprTracker, MultiCprConfig, MultiCprLevels};
pub use signal::{EntrySignal, EntryTrigger, ExitOutcome, ExitReason, SignalConfig, SignalDetector, TrailingStop};
pub use stats::{ScoredTrade, TradeStatistics};
pub use strikes::{calculate_default_strikes, resolve_reference_price, ReferenceSource};
pub use trades::{DayContext, SimulatedTrade, TradeLogEntry, NO_SIGNAL};
