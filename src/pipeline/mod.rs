//! Orchestration of the strategies over market data
//!
//! - Backtests replay historical sessions and produce trade logs
//! - Live runners are step functions driven by the wall-clock scheduler
//! - Reports write backtest results to disk

pub mod backtest;
pub mod cpr_backtest;
pub mod cpr_live;
pub mod live;
pub mod report;
pub mod scheduler;

pub use backtest::{run_backtests, BacktestReport, HighLowBacktest};
pub use cpr_backtest::{CprBacktestReport, MultiCprBacktest};
pub use cpr_live::MultiCprLive;
pub use live::{HighLowLive, LivePhase};
pub use report::{print_summary, write_backtest_report, write_cpr_report};
pub use scheduler::{run_schedule, run_tick, Clock, LiveStrategy, SystemClock, TickSchedule};
