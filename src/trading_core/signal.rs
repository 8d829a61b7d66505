//! High-Low Signal Detector
//!
//! Scans a paired option series (the option under test and its opposite) for
//! a breakout above the opposite option's previous-day high, then walks the
//! candles after entry to decide when and why the position closes.
//!
//! Entry rules, per 5-minute candle inside the session window:
//! - Leader: this option's PDH must exceed the opposite's PDH
//! - Not chasing: this option's day high has not reached its own PDH
//! - Opposite weak: opposite low at the same bar is below this option's PDL
//! - Day opened below opposite PDH: the bar must cross it (open and low at or
//!   below, close above)
//! - Day opened at/above opposite PDH: a touch or a cross qualifies
//!
//! Exit rules, per candle after entry:
//! 1. At/after market close: exit at close (no alignment gate)
//! 2. Stop-loss before target on the same bar
//! 3. Target at the option's PDH
//! 4. Trailing stop in fixed steps below the best close

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::calendar::{hm, is_aligned, session_time};
use super::daily_levels::PreviousDayLevels;
use crate::types::{Candle, OptionType};

/// Session and risk parameters for the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// First bar eligible for entry (default: 09:15)
    pub market_open: NaiveTime,
    /// Entries are not considered at/after this time (default: 15:20)
    pub signal_cutoff: NaiveTime,
    /// Open positions are force-closed at/after this time (default: 15:20)
    pub market_close: NaiveTime,
    /// Only bars starting on a multiple of this many minutes are evaluated
    pub alignment_minutes: u32,
    /// Initial stop distance below entry, in premium points
    pub stop_offset: f64,
    /// Trailing stop step, in premium points
    pub trail_step: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            market_open: hm(9, 15),
            signal_cutoff: hm(15, 20),
            market_close: hm(15, 20),
            alignment_minutes: 5,
            stop_offset: 20.0,
            trail_step: 20.0,
        }
    }
}

/// Which entry shape fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryTrigger {
    /// Bar opened at/below the level and closed above it
    Cross,
    /// Bar traded through the level and closed above it
    Touch,
}

impl std::fmt::Display for EntryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryTrigger::Cross => write!(f, "cross"),
            EntryTrigger::Touch => write!(f, "touch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub option_type: OptionType,
    /// Option's own previous-day high. Fixed for the life of the trade.
    pub target: f64,
    /// Initial stop (entry - offset)
    pub stop_loss: f64,
    pub trigger: EntryTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "Stop Loss")]
    StopLoss,
    Target,
    #[serde(rename = "Market Close")]
    MarketClose,
    #[serde(rename = "EOD")]
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::Target => write!(f, "Target"),
            ExitReason::MarketClose => write!(f, "Market Close"),
            ExitReason::EndOfData => write!(f, "EOD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitOutcome {
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// exit - entry, in premium points
    pub pnl: f64,
}

/// Stop that only ratchets upward as the close moves in our favour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStop {
    entry_price: f64,
    step: f64,
    current: f64,
}

impl TrailingStop {
    pub fn new(entry_price: f64, initial_stop: f64, step: f64) -> Self {
        Self { entry_price, step, current: initial_stop }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Trail one step behind the best whole-step profit. Returns true if raised.
    pub fn update(&mut self, close: f64) -> bool {
        let profit = close - self.entry_price;
        if self.step <= 0.0 || profit < self.step {
            return false;
        }
        let increments = (profit / self.step).floor();
        let candidate = self.entry_price + (increments - 1.0) * self.step;
        if candidate > self.current {
            self.current = candidate;
            true
        } else {
            false
        }
    }
}

/// Result of walking the candles after an entry
#[derive(Debug, Clone, PartialEq)]
pub struct ExitScan {
    /// First exit found, if any
    pub outcome: Option<ExitOutcome>,
    /// Stop in force at each evaluated bar
    pub stop_history: Vec<(DateTime<Utc>, f64)>,
    /// Stop level after the last evaluated bar
    pub final_stop: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct OptionDayFlags {
    /// PDH not above the opposite's PDH: no entry possible today
    not_leader: bool,
    /// Day high already reached own PDH
    touched_own_pdh: bool,
}

/// Stateful scanner for one option pair.
///
/// Not thread-safe by contract: one instance per sequential run, reset by the
/// caller between trading days.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    config: SignalConfig,
    in_trade: bool,
    current_stop_loss: Option<f64>,
    entry_option_type: Option<OptionType>,
    flags: [OptionDayFlags; 2],
}

impl Default for SignalDetector {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

impl SignalDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            in_trade: false,
            current_stop_loss: None,
            entry_option_type: None,
            flags: [OptionDayFlags::default(); 2],
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn in_trade(&self) -> bool {
        self.in_trade
    }

    pub fn current_stop_loss(&self) -> Option<f64> {
        self.current_stop_loss
    }

    pub fn entry_option_type(&self) -> Option<OptionType> {
        self.entry_option_type
    }

    /// Back to the start-of-day state. Call between trading days.
    pub fn reset(&mut self) {
        self.in_trade = false;
        self.current_stop_loss = None;
        self.entry_option_type = None;
        self.flags = [OptionDayFlags::default(); 2];
    }

    /// Drop a signal that could not be acted on (e.g. order rejected) so the
    /// next scan can find it again. Day flags are kept.
    pub fn abandon_entry(&mut self) {
        self.in_trade = false;
        self.current_stop_loss = None;
        self.entry_option_type = None;
    }

    /// Look for an entry on `option_type` against its opposite.
    ///
    /// Call CE before PE; the caller skips PE once CE has signalled.
    pub fn check_entry(
        &mut self,
        option_type: OptionType,
        primary: &[Candle],
        opposite: &[Candle],
        primary_levels: PreviousDayLevels,
        opposite_levels: PreviousDayLevels,
    ) -> Option<EntrySignal> {
        let len = primary.len().min(opposite.len());
        if len == 0 {
            return None;
        }

        let idx = option_type.index();
        if self.flags[idx].not_leader || self.flags[idx].touched_own_pdh {
            return None;
        }
        if primary_levels.high <= opposite_levels.high {
            debug!(
                "{} not leader: PDH {:.2} <= {} PDH {:.2}",
                option_type,
                primary_levels.high,
                option_type.opposite(),
                opposite_levels.high
            );
            self.flags[idx].not_leader = true;
            return None;
        }

        let level = opposite_levels.high;
        let opened_below = primary[0].open < level;
        let mut day_high = primary[0].high;

        for i in 1..len {
            let candle = &primary[i];
            day_high = day_high.max(candle.high);
            let time = session_time(candle.timestamp);

            if time >= self.config.signal_cutoff {
                if self.in_trade {
                    info!("Session cutoff reached, clearing open trade flag");
                    self.in_trade = false;
                }
                continue;
            }

            if time < self.config.market_open || !is_aligned(candle.timestamp, self.config.alignment_minutes) {
                continue;
            }

            if self.in_trade {
                continue;
            }

            if day_high >= primary_levels.high {
                if !self.flags[idx].touched_own_pdh {
                    debug!("{} day high {:.2} reached own PDH {:.2}, no further entries", option_type, day_high, primary_levels.high);
                    self.flags[idx].touched_own_pdh = true;
                }
                continue;
            }

            let Some(trigger) = entry_trigger(candle, &opposite[i], level, primary_levels.low, opened_below) else {
                continue;
            };

            let entry_price = candle.close;
            let stop_loss = entry_price - self.config.stop_offset;
            self.in_trade = true;
            self.current_stop_loss = Some(stop_loss);
            self.entry_option_type = Some(option_type);

            info!(
                "ENTRY: {} {} @ {:.2} | Level: {:.2} | Stop: {:.2} | Target: {:.2}",
                option_type, trigger, entry_price, level, stop_loss, primary_levels.high
            );

            return Some(EntrySignal {
                entry_time: candle.timestamp,
                entry_price,
                option_type,
                target: primary_levels.high,
                stop_loss,
                trigger,
            });
        }

        None
    }

    /// Walk the candles after entry. Pure: detector state is not touched.
    pub fn scan_exit(&self, signal: &EntrySignal, primary: &[Candle]) -> ExitScan {
        let start = primary.partition_point(|c| c.timestamp <= signal.entry_time);
        let mut stop = TrailingStop::new(signal.entry_price, signal.stop_loss, self.config.trail_step);
        let mut stop_history = Vec::new();

        for candle in &primary[start..] {
            let time = session_time(candle.timestamp);

            if time >= self.config.market_close {
                return ExitScan {
                    outcome: Some(outcome(signal, candle.timestamp, candle.close, ExitReason::MarketClose)),
                    stop_history,
                    final_stop: stop.current(),
                };
            }

            if !is_aligned(candle.timestamp, self.config.alignment_minutes) {
                continue;
            }

            stop_history.push((candle.timestamp, stop.current()));

            if candle.low <= stop.current() {
                return ExitScan {
                    outcome: Some(outcome(signal, candle.timestamp, stop.current(), ExitReason::StopLoss)),
                    stop_history,
                    final_stop: stop.current(),
                };
            }

            if candle.high >= signal.target {
                return ExitScan {
                    outcome: Some(outcome(signal, candle.timestamp, signal.target, ExitReason::Target)),
                    stop_history,
                    final_stop: stop.current(),
                };
            }

            if stop.update(candle.close) {
                debug!("Trailing stop raised to {:.2} (close {:.2})", stop.current(), candle.close);
            }
        }

        ExitScan {
            outcome: None,
            stop_history,
            final_stop: stop.current(),
        }
    }

    /// Simulate the exit of `signal` over `primary`.
    ///
    /// Falls back to the last candle's close when nothing fires. `None` only
    /// for an empty series. Always clears the in-trade flag.
    pub fn execute_trade(&mut self, signal: &EntrySignal, primary: &[Candle]) -> Option<ExitOutcome> {
        self.in_trade = false;
        let last = primary.last()?;

        let scan = self.scan_exit(signal, primary);
        self.current_stop_loss = Some(scan.final_stop);

        let exit = scan.outcome.unwrap_or_else(|| {
            outcome(signal, last.timestamp.max(signal.entry_time), last.close, ExitReason::EndOfData)
        });
        log_exit(signal, &exit);
        Some(exit)
    }

    /// Live variant of [`execute_trade`](Self::execute_trade): no end-of-data
    /// fallback, and the trade stays open until an exit condition is seen.
    pub fn check_exit(&mut self, signal: &EntrySignal, primary: &[Candle]) -> Option<ExitOutcome> {
        let scan = self.scan_exit(signal, primary);
        self.current_stop_loss = Some(scan.final_stop);

        let exit = scan.outcome?;
        self.in_trade = false;
        log_exit(signal, &exit);
        Some(exit)
    }

    /// Close at the last candle's close with `reason`. `None` for an empty series.
    pub fn force_exit(&mut self, signal: &EntrySignal, primary: &[Candle], reason: ExitReason) -> Option<ExitOutcome> {
        let last = primary.last()?;
        self.in_trade = false;
        let exit = outcome(signal, last.timestamp.max(signal.entry_time), last.close, reason);
        log_exit(signal, &exit);
        Some(exit)
    }
}

fn entry_trigger(
    candle: &Candle,
    opposite: &Candle,
    level: f64,
    own_pdl: f64,
    opened_below: bool,
) -> Option<EntryTrigger> {
    if opposite.low >= own_pdl {
        return None;
    }

    let crossed = candle.open <= level && candle.low <= level && candle.close > level;
    if opened_below {
        return crossed.then_some(EntryTrigger::Cross);
    }

    let touched = candle.high >= level && candle.low <= level && candle.close > level;
    if touched {
        Some(EntryTrigger::Touch)
    } else if crossed {
        Some(EntryTrigger::Cross)
    } else {
        None
    }
}

fn outcome(signal: &EntrySignal, exit_time: DateTime<Utc>, exit_price: f64, exit_reason: ExitReason) -> ExitOutcome {
    ExitOutcome {
        exit_time,
        exit_price,
        exit_reason,
        pnl: exit_price - signal.entry_price,
    }
}

fn log_exit(signal: &EntrySignal, exit: &ExitOutcome) {
    info!(
        "EXIT: {} {} @ {:.2} | Entry: {:.2} | PnL: {:+.2}",
        signal.option_type, exit.exit_reason, exit.exit_price, signal.entry_price, exit.pnl
    );
}
