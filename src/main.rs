use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use highlow_options::api::{self, AppState};
use highlow_options::error::parse_date;
use highlow_options::execution::{ExecutionMode, HighLowConfig, MultiCprRunConfig, OrderGateway, OutputConfig, PaperGateway};
use highlow_options::kite::{KiteClient, KITE_API_URL};
use highlow_options::market::MarketData;
use highlow_options::pipeline::{
    print_summary, run_backtests, run_schedule, write_backtest_report, write_cpr_report, HighLowLive,
    MultiCprBacktest, MultiCprLive, SystemClock,
};
use highlow_options::trading_core::calendar::session_today;
use highlow_options::trading_core::{calculate_default_strikes, resolve_reference_price, TradingCalendar};
use highlow_options::types::{CandleInterval, Underlying};

#[derive(Parser, Debug)]
#[command(name = "highlow")]
#[command(about = "High-Low and multi-CPR options strategies for NSE indices")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Kite Connect API key
    #[arg(long, env = "KITE_API_KEY", global = true)]
    api_key: Option<String>,

    /// Kite Connect access token from the login flow
    #[arg(long, env = "KITE_ACCESS_TOKEN", global = true, hide_env_values = true)]
    access_token: Option<String>,

    /// Kite Connect endpoint
    #[arg(long, env = "KITE_BASE_URL", global = true, default_value = KITE_API_URL)]
    base_url: String,

    /// Instrument master snapshot directory
    #[arg(long, env = "HIGHLOW_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// JSON array of extra holidays (YYYY-MM-DD)
    #[arg(long, global = true)]
    holidays: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// High-Low backtest over a date range
    Backtest {
        /// Comma-separated underlyings
        #[arg(short, long, default_value = "NIFTY")]
        symbols: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Concurrent symbol runs
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Output directory for JSON/CSV reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Multi-timeframe CPR backtest over a date range
    CprBacktest {
        #[arg(short, long, default_value = "NIFTY")]
        symbol: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Intraday bar size (minute, 5minute, 15minute, 30minute, 60minute)
        #[arg(short, long, default_value = "60minute")]
        timeframe: String,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Run the High-Low strategy during market hours
    Live {
        #[arg(short, long, default_value = "NIFTY")]
        symbol: String,

        /// Lots per order
        #[arg(short, long, default_value = "1")]
        lots: u32,

        /// Execution mode: paper or live
        #[arg(short, long, default_value = "paper")]
        mode: String,
    },

    /// Run the multi-CPR strategy on the near-month future
    CprLive {
        #[arg(short, long, default_value = "NIFTY")]
        symbol: String,

        /// Futures lots per order
        #[arg(short, long, default_value = "1")]
        quantity: u32,

        #[arg(short, long, default_value = "paper")]
        mode: String,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Print today's default CE/PE strikes
    Strikes {
        #[arg(short, long, default_value = "NIFTY")]
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("highlow_options=info".parse()?))
        .init();

    let args = Args::parse();

    let mut calendar = TradingCalendar::nse();
    if let Some(path) = &args.holidays {
        calendar = calendar.load_extra_holidays(path)?;
    }

    match &args.command {
        Commands::Backtest { symbols, from, to, workers, output_dir } => {
            let symbols = symbols
                .split(',')
                .map(|s| s.parse::<Underlying>())
                .collect::<Result<Vec<_>, _>>()?;
            let (from, to) = (parse_date(from)?, parse_date(to)?);
            let output_dir = output_dir.clone().unwrap_or_else(|| OutputConfig::default().output_dir);

            let market = kite_client(&args)?;
            let results =
                run_backtests(market, &HighLowConfig::default(), &calendar, &symbols, from, to, *workers).await;

            let mut failed = 0;
            for (symbol, result) in results {
                match result {
                    Ok(report) => {
                        print_summary(&format!("HIGH-LOW {} {} -> {}", symbol, from, to), &report.summary);
                        println!("NO SIGNAL days: {}", report.no_signal_days());
                        write_backtest_report(&report, &output_dir)?;
                    }
                    Err(e) => {
                        error!("{} backtest failed: {:#}", symbol, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} backtests failed", failed, symbols.len());
            }
        }

        Commands::CprBacktest { symbol, from, to, timeframe, output_dir } => {
            let config = MultiCprRunConfig {
                symbol: symbol.parse()?,
                timeframe: timeframe.parse::<CandleInterval>()?,
                ..MultiCprRunConfig::default()
            };
            let (from, to) = (parse_date(from)?, parse_date(to)?);
            let output_dir = output_dir.clone().unwrap_or_else(|| OutputConfig::default().output_dir);

            let report = MultiCprBacktest::new(kite_client(&args)?, config).run(from, to).await?;
            print_summary(&format!("MULTI-CPR {} {} -> {} ({})", report.symbol, from, to, report.timeframe), &report.summary);
            if let Some(open) = &report.open_position {
                println!("Open position: {} from {} @ {:.2}", open.direction, open.entry_time, open.entry_price);
            }
            write_cpr_report(&report, &output_dir)?;
        }

        Commands::Live { symbol, lots, mode } => {
            let Some(mode) = confirm_mode(mode)? else {
                return Ok(());
            };
            let config = HighLowConfig { symbol: symbol.parse()?, lots: *lots, mode, ..HighLowConfig::default() };
            info!("=== HIGH-LOW LIVE: {} x{} lots ({}) ===", config.symbol, config.lots, mode);

            let client = kite_client(&args)?;
            client.verify_session().await.context("verifying broker session")?;
            let gateway = order_gateway(mode, &client);

            let mut strategy = HighLowLive::new(client, gateway, config, calendar.clone());
            let schedule = strategy.schedule();
            let result = run_schedule(&mut strategy, &schedule, &calendar, &SystemClock).await;

            let closed = strategy.closed_trades();
            let pnl: f64 = closed.iter().map(|t| t.exit.pnl).sum();
            info!("{} trades closed this run, total P&L {:+.2}", closed.len(), pnl);
            if let Some(position) = strategy.position() {
                warn!("Position still open: {} (order {})", position.contract, position.order_id);
            }
            result?;
        }

        Commands::CprLive { symbol, quantity, mode } => {
            let Some(mode) = confirm_mode(mode)? else {
                return Ok(());
            };
            let config =
                MultiCprRunConfig { symbol: symbol.parse()?, quantity: *quantity, mode, ..MultiCprRunConfig::default() };
            info!("=== MULTI-CPR LIVE: {} x{} ({}) ===", config.symbol, config.quantity, mode);

            let client = kite_client(&args)?;
            client.verify_session().await.context("verifying broker session")?;
            let gateway = order_gateway(mode, &client);

            let mut strategy = MultiCprLive::new(client, gateway, config, calendar.clone());
            let schedule = strategy.schedule();
            let result = run_schedule(&mut strategy, &schedule, &calendar, &SystemClock).await;

            let closed = strategy.closed_trades();
            let pnl: f64 = closed.iter().filter_map(|t| t.exit).map(|e| e.pnl).sum();
            info!("{} trades closed this run, total P&L {:+.2} pts", closed.len(), pnl);
            if let Some(position) = strategy.position() {
                warn!("Position still open: {} since {} (order {})", position.trade.direction, position.trade.entry_time, position.order_id);
            }
            result?;
        }

        Commands::Serve { port } => {
            let state = Arc::new(AppState {
                market: kite_client(&args)?,
                highlow: HighLowConfig::default(),
                cpr: MultiCprRunConfig::default(),
                calendar,
            });
            let app = api::router(state);

            let addr = SocketAddr::from(([127, 0, 0, 1], *port));
            info!("Server running at http://{}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Shutting down server");
                })
                .await?;
        }

        Commands::Strikes { symbol } => {
            let symbol: Underlying = symbol.parse()?;
            let client = kite_client(&args)?;
            let previous_close = client.previous_close(symbol).await?;
            let last_price = client.last_price(symbol).await?;
            let listed = client.available_strikes(symbol, session_today()).await?;

            let Some((price, source)) = resolve_reference_price(previous_close, last_price, &listed) else {
                anyhow::bail!("no reference price available for {}", symbol);
            };
            let (ce, pe) = calculate_default_strikes(price, symbol);
            println!("{} reference {:.2} ({})", symbol, price, source);
            println!("CE strike: {}", ce);
            println!("PE strike: {}", pe);
        }
    }

    Ok(())
}

fn kite_client(args: &Args) -> Result<Arc<KiteClient>> {
    let api_key = args.api_key.clone().context("KITE_API_KEY is not set")?;
    let access_token = args.access_token.clone().context("KITE_ACCESS_TOKEN is not set")?;
    let cache_dir = args.cache_dir.clone().unwrap_or_else(|| OutputConfig::default().cache_dir);
    Ok(Arc::new(KiteClient::new(api_key, access_token, args.base_url.clone())?.with_cache_dir(cache_dir)))
}

fn order_gateway(mode: ExecutionMode, client: &Arc<KiteClient>) -> Arc<dyn OrderGateway> {
    match mode {
        ExecutionMode::Paper => Arc::new(PaperGateway::new()),
        ExecutionMode::Live => client.clone(),
    }
}

/// Parse the execution mode. Live mode needs an interactive CONFIRM;
/// `None` means the operator cancelled.
fn confirm_mode(mode: &str) -> Result<Option<ExecutionMode>> {
    match mode.to_lowercase().as_str() {
        "paper" => Ok(Some(ExecutionMode::Paper)),
        "live" => {
            println!("\nWARNING: LIVE TRADING MODE");
            println!("Orders will be sent to the broker with real money.");
            println!("Type 'CONFIRM' to proceed or anything else to cancel:");

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if input.trim() != "CONFIRM" {
                println!("Live trading cancelled.");
                return Ok(None);
            }
            Ok(Some(ExecutionMode::Live))
        }
        other => {
            warn!("Unknown mode '{}', defaulting to paper", other);
            Ok(Some(ExecutionMode::Paper))
        }
    }
}
