use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::{is_auth_error, is_input_error, parse_date};
use crate::execution::{HighLowConfig, MultiCprRunConfig};
use crate::market::MarketData;
use crate::pipeline::{HighLowBacktest, MultiCprBacktest};
use crate::trading_core::calendar::session_today;
use crate::trading_core::{calculate_default_strikes, resolve_reference_price, ReferenceSource, TradingCalendar};
use crate::types::{CandleInterval, Underlying};

/// Shared state for the HTTP handlers
pub struct AppState {
    pub market: Arc<dyn MarketData>,
    pub highlow: HighLowConfig,
    pub cpr: MultiCprRunConfig,
    pub calendar: TradingCalendar,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/strikes", get(get_strikes))
        .route("/api/strategy-backtest", post(strategy_backtest))
        .route("/api/multi-cpr-backtest", post(multi_cpr_backtest))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state)
}

/// Map an orchestration error onto a status code
fn error_response(err: anyhow::Error) -> Response {
    let status = if is_auth_error(&err) {
        StatusCode::UNAUTHORIZED
    } else if is_input_error(&err) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {:#}", err);
    } else {
        warn!("Request rejected ({}): {:#}", status, err);
    }
    (status, Json(serde_json::json!({ "error": format!("{:#}", err) }))).into_response()
}

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct StrikesQueryParams {
    pub symbol: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StrikesResponse {
    pub symbol: Underlying,
    pub reference_price: f64,
    pub source: ReferenceSource,
    pub ce_strike: f64,
    pub pe_strike: f64,
}

/// GET /api/strikes?symbol= - Default CE/PE strikes from the reference price
pub async fn get_strikes(State(state): State<Arc<AppState>>, Query(params): Query<StrikesQueryParams>) -> Response {
    match strikes_for(&state, params.symbol.as_deref()).await {
        Ok(Some(body)) => (StatusCode::OK, Json(serde_json::json!(body))).into_response(),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "no reference price available" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn strikes_for(state: &AppState, symbol: Option<&str>) -> anyhow::Result<Option<StrikesResponse>> {
    let symbol: Underlying = match symbol {
        Some(s) => s.parse()?,
        None => state.highlow.symbol,
    };

    let previous_close = state.market.previous_close(symbol).await?;
    let last_price = if previous_close.is_none() { state.market.last_price(symbol).await? } else { None };
    let listed = if previous_close.is_none() && last_price.is_none() {
        state.market.available_strikes(symbol, session_today()).await?
    } else {
        Vec::new()
    };

    Ok(resolve_reference_price(previous_close, last_price, &listed).map(|(reference_price, source)| {
        let (ce_strike, pe_strike) = calculate_default_strikes(reference_price, symbol);
        StrikesResponse { symbol, reference_price, source, ce_strike, pe_strike }
    }))
}

#[derive(Debug, Deserialize)]
pub struct StrategyBacktestRequest {
    pub symbol: String,
    pub start_date: String,
    pub end_date: String,
}

/// POST /api/strategy-backtest - High-Low backtest over a date range
pub async fn strategy_backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StrategyBacktestRequest>,
) -> Response {
    let run = async {
        let symbol: Underlying = req.symbol.parse()?;
        let from = parse_date(&req.start_date)?;
        let to = parse_date(&req.end_date)?;
        info!("API strategy backtest: {} {} -> {}", symbol, from, to);

        let config = HighLowConfig { symbol, ..state.highlow.clone() };
        let mut backtest = HighLowBacktest::new(state.market.clone(), config, state.calendar.clone());
        backtest.run(from, to).await
    };

    match run.await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MultiCprBacktestRequest {
    pub symbol: String,
    pub from_date: String,
    pub to_date: String,
    pub timeframe: Option<String>,
}

/// POST /api/multi-cpr-backtest - Multi-timeframe CPR backtest
pub async fn multi_cpr_backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MultiCprBacktestRequest>,
) -> Response {
    let run = async {
        let symbol: Underlying = req.symbol.parse()?;
        let from = parse_date(&req.from_date)?;
        let to = parse_date(&req.to_date)?;
        let timeframe: CandleInterval = match req.timeframe.as_deref() {
            Some(tf) => tf.parse()?,
            None => state.cpr.timeframe,
        };
        info!("API multi-CPR backtest: {} {} -> {} ({})", symbol, from, to, timeframe);

        let config = MultiCprRunConfig { symbol, timeframe, ..state.cpr.clone() };
        MultiCprBacktest::new(state.market.clone(), config).run(from, to).await
    };

    match run.await {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Err(e) => error_response(e),
    }
}
