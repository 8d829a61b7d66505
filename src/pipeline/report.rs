//! Backtest output: pretty JSON of the full report and a flat CSV trade log

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::backtest::BacktestReport;
use super::cpr_backtest::CprBacktestReport;
use crate::trading_core::calendar::SESSION_TZ;
use crate::trading_core::stats::round2;
use crate::trading_core::{CprTrade, TradeLogEntry, TradeStatistics, NO_SIGNAL};

fn local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&SESSION_TZ).format("%Y-%m-%d %H:%M").to_string()
}

/// One CSV row per evaluated day
#[derive(Debug, Serialize)]
struct TradeRow {
    date: String,
    previous_day: String,
    underlying_close: f64,
    ce_strike: f64,
    pe_strike: f64,
    ce_pdh: f64,
    ce_pdl: f64,
    pe_pdh: f64,
    pe_pdl: f64,
    /// Option type traded, or the NO SIGNAL sentinel
    signal: String,
    strike: Option<f64>,
    trigger: Option<String>,
    entry_time: Option<String>,
    entry_price: Option<f64>,
    target: Option<f64>,
    stop_loss: Option<f64>,
    exit_time: Option<String>,
    exit_price: Option<f64>,
    exit_reason: Option<String>,
    pnl: Option<f64>,
}

impl From<&TradeLogEntry> for TradeRow {
    fn from(entry: &TradeLogEntry) -> Self {
        let ctx = &entry.context;
        let trade = entry.trade.as_ref();
        Self {
            date: ctx.date.to_string(),
            previous_day: ctx.previous_day.to_string(),
            underlying_close: round2(ctx.underlying_close),
            ce_strike: ctx.ce_strike,
            pe_strike: ctx.pe_strike,
            ce_pdh: round2(ctx.ce_levels.high),
            ce_pdl: round2(ctx.ce_levels.low),
            pe_pdh: round2(ctx.pe_levels.high),
            pe_pdl: round2(ctx.pe_levels.low),
            signal: trade.map_or_else(|| NO_SIGNAL.to_string(), |t| t.entry.option_type.to_string()),
            strike: trade.map(|t| t.strike),
            trigger: trade.map(|t| t.entry.trigger.to_string()),
            entry_time: trade.map(|t| local(t.entry.entry_time)),
            entry_price: trade.map(|t| round2(t.entry.entry_price)),
            target: trade.map(|t| round2(t.entry.target)),
            stop_loss: trade.map(|t| round2(t.entry.stop_loss)),
            exit_time: trade.map(|t| local(t.exit.exit_time)),
            exit_price: trade.map(|t| round2(t.exit.exit_price)),
            exit_reason: trade.map(|t| t.exit.exit_reason.to_string()),
            pnl: trade.map(|t| round2(t.exit.pnl)),
        }
    }
}

#[derive(Debug, Serialize)]
struct CprRow {
    direction: String,
    entry_time: String,
    entry_price: f64,
    daily_bc: f64,
    daily_tc: f64,
    exit_time: String,
    exit_price: Option<f64>,
    exit_reason: String,
    pnl: Option<f64>,
    pnl_pct: Option<f64>,
}

impl From<&CprTrade> for CprRow {
    fn from(trade: &CprTrade) -> Self {
        Self {
            direction: trade.direction.to_string(),
            entry_time: local(trade.entry_time),
            entry_price: round2(trade.entry_price),
            daily_bc: round2(trade.levels.daily.bc),
            daily_tc: round2(trade.levels.daily.tc),
            exit_time: trade.exit.map_or_else(|| "-".to_string(), |e| local(e.exit_time)),
            exit_price: trade.exit.map(|e| round2(e.exit_price)),
            exit_reason: trade.exit.map_or_else(|| "Open".to_string(), |e| e.exit_reason.to_string()),
            pnl: trade.exit.map(|e| round2(e.pnl)),
            pnl_pct: trade.exit.map(|e| round2(e.pnl_pct)),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {:?}", path))
}

fn write_csv<R: Serialize>(path: &Path, rows: impl IntoIterator<Item = R>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `highlow_<symbol>_<from>_<to>.{json,csv}` under `output_dir`
pub fn write_backtest_report(report: &BacktestReport, output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {:?}", output_dir))?;
    let stem = format!("highlow_{}_{}_{}", report.symbol, report.start_date, report.end_date);
    let json_path = output_dir.join(format!("{}.json", stem));
    let csv_path = output_dir.join(format!("{}.csv", stem));

    write_json(&json_path, report)?;
    write_csv(&csv_path, report.trades.iter().map(TradeRow::from))?;

    info!("Wrote {:?} and {:?}", json_path, csv_path);
    Ok((json_path, csv_path))
}

/// Write `multicpr_<symbol>_<from>_<to>.{json,csv}`. The CSV lists closed
/// trades, then the open position if any.
pub fn write_cpr_report(report: &CprBacktestReport, output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {:?}", output_dir))?;
    let stem = format!("multicpr_{}_{}_{}", report.symbol, report.from_date, report.to_date);
    let json_path = output_dir.join(format!("{}.json", stem));
    let csv_path = output_dir.join(format!("{}.csv", stem));

    write_json(&json_path, report)?;
    write_csv(&csv_path, report.trades.iter().chain(report.open_position.iter()).map(CprRow::from))?;

    info!("Wrote {:?} and {:?}", json_path, csv_path);
    Ok((json_path, csv_path))
}

/// Human-readable summary for the CLI
pub fn print_summary(title: &str, summary: &TradeStatistics) {
    println!("\n========== {} ==========", title);
    println!("Total trades:      {}", summary.total_trades);
    println!("Winning trades:    {}", summary.winning_trades);
    println!("Losing trades:     {}", summary.losing_trades);
    println!("Win rate:          {:.2}%", summary.win_rate);
    println!("Total P&L:         {:+.2} pts", summary.total_pnl);
    println!("Average P&L:       {:+.2} pts", summary.avg_pnl);
    println!(
        "Max consecutive:   {} wins ({:+.2}) / {} losses ({:+.2})",
        summary.max_consecutive_wins,
        summary.max_consecutive_wins_pnl,
        summary.max_consecutive_losses,
        summary.max_consecutive_losses_pnl
    );
    println!("=========================================\n");
}
