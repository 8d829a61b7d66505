//! Trade log types
//!
//! One entry per evaluated trading day: the day's context plus either the
//! simulated trade or a "NO SIGNAL" marker.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::daily_levels::PreviousDayLevels;
use super::signal::{EntrySignal, ExitOutcome, ExitReason};
use super::stats::ScoredTrade;
use crate::types::Underlying;

/// Marker written in place of trade fields on days without an entry
pub const NO_SIGNAL: &str = "NO SIGNAL";

/// Inputs the detector saw on a given day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayContext {
    pub symbol: Underlying,
    pub date: NaiveDate,
    pub previous_day: NaiveDate,
    pub underlying_close: f64,
    pub ce_strike: f64,
    pub pe_strike: f64,
    pub ce_levels: PreviousDayLevels,
    pub pe_levels: PreviousDayLevels,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub strike: f64,
    pub entry: EntrySignal,
    pub exit: ExitOutcome,
}

/// Append-only record of one trading day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub context: DayContext,
    /// `None` for a no-signal day
    pub trade: Option<SimulatedTrade>,
}

impl TradeLogEntry {
    pub fn traded(context: DayContext, trade: SimulatedTrade) -> Self {
        Self { context, trade: Some(trade) }
    }

    pub fn no_signal(context: DayContext) -> Self {
        Self { context, trade: None }
    }

    pub fn is_no_signal(&self) -> bool {
        self.trade.is_none()
    }

    /// Scoring for statistics: a win is a target exit
    pub fn scored(&self) -> Option<ScoredTrade> {
        self.trade.as_ref().map(|t| ScoredTrade {
            entry_time: t.entry.entry_time,
            pnl: t.exit.pnl,
            win: t.exit.exit_reason == ExitReason::Target,
        })
    }
}
