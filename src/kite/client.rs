//! Kite Connect API Client
//!
//! HTTP client for the Kite Connect v3 REST API. Implements both
//! [`MarketData`] and [`OrderGateway`].
//!
//! Requests are spaced to stay under the broker's rate limit and retried with
//! backoff on HTTP 429/5xx. Authorization failures and order placement are
//! never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::instruments::InstrumentMaster;
use super::models::*;
use crate::error::BrokerError;
use crate::execution::{OrderGateway, OrderReceipt, OrderRequest, OrderTarget};
use crate::market::MarketData;
use crate::trading_core::cache::{load_snapshot, store_snapshot};
use crate::trading_core::calendar::{hm, session_instant, session_today, SESSION_TZ};
use crate::trading_core::TtlCache;
use crate::types::{Candle, CandleInterval, OptionContract, Underlying};

/// Production API base URL
pub const KITE_API_URL: &str = "https://api.kite.trade";

/// Minimum spacing between requests
const MIN_REQUEST_SPACING: Duration = Duration::from_millis(350);

/// Retries on throttling or server errors
const MAX_RETRIES: u32 = 3;

/// Instrument master refresh interval
const INSTRUMENT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Derivatives exchange segment
const NFO: &str = "NFO";

/// Kite API client with request pacing and an instrument master cache
pub struct KiteClient {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
    cache_dir: Option<PathBuf>,
    last_request: Mutex<Option<Instant>>,
    instruments: Mutex<TtlCache<String, Arc<InstrumentMaster>>>,
}

impl KiteClient {
    /// Create a new client with explicit configuration
    pub fn new(api_key: String, access_token: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
            cache_dir: None,
            last_request: Mutex::new(None),
            instruments: Mutex::new(TtlCache::new(INSTRUMENT_TTL)),
        })
    }

    /// Persist the instrument master under `dir`
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-Kite-Version", "3")
            .header("Authorization", format!("token {}:{}", self.api_key, self.access_token))
    }

    /// Wait until the minimum spacing since the previous request has elapsed
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_REQUEST_SPACING {
                tokio::time::sleep(MIN_REQUEST_SPACING - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// One paced request. Throttling, server errors and transport failures
    /// come back as `Attempt::Transient`.
    async fn attempt(&self, request: RequestBuilder) -> Result<Attempt> {
        self.pace().await;
        match self.authorized(request).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.context("reading response body")?;
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let message = body.chars().take(200).collect();
                    return Ok(Attempt::Transient(BrokerError::Api { status: status.as_u16(), message }));
                }
                Ok(Attempt::Done(status, body))
            }
            Err(e) if e.is_timeout() || e.is_connect() => Ok(Attempt::Transient(BrokerError::Unreachable(e.to_string()))),
            Err(e) => Err(e).context("sending request"),
        }
    }

    /// Send with pacing and retry, returning status and body text.
    /// Only for idempotent reads.
    async fn send(&self, make: impl Fn() -> RequestBuilder) -> Result<(StatusCode, String)> {
        let mut retries = 0;
        loop {
            let failure = match self.attempt(make()).await? {
                Attempt::Done(status, body) => return Ok((status, body)),
                Attempt::Transient(failure) => failure,
            };

            retries += 1;
            if retries > MAX_RETRIES {
                return Err(match failure {
                    BrokerError::Api { status: 429, .. } => BrokerError::RateLimited { attempts: retries },
                    other => other,
                }
                .into());
            }
            let backoff = Duration::from_millis(500 * 2u64.pow(retries - 1));
            warn!("Kite request failed ({}), retry {}/{} in {:?}", failure, retries, MAX_RETRIES, backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Send exactly once with pacing. Order placement goes through here: a
    /// timed-out or failed POST may still have been accepted by the broker.
    async fn send_once(&self, request: RequestBuilder) -> Result<(StatusCode, String)> {
        match self.attempt(request).await? {
            Attempt::Done(status, body) => Ok((status, body)),
            Attempt::Transient(failure) => Err(failure.into()),
        }
    }

    /// GET a JSON endpoint and unwrap the response envelope
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let (status, body) = self.send(|| self.client.get(&url).query(query)).await?;
        decode_envelope(status, &body).with_context(|| format!("GET {}", path))
    }

    /// Check the access token by fetching the user profile
    pub async fn profile(&self) -> Result<UserProfile> {
        self.get_json("/user/profile", &[]).await
    }

    /// Historical candles for an instrument token
    pub async fn historical(
        &self,
        instrument_token: u64,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let path = format!("/instruments/historical/{}/{}", instrument_token, interval.as_str());
        let query = [
            ("from", from.with_timezone(&SESSION_TZ).format(RANGE_TIME_FORMAT).to_string()),
            ("to", to.with_timezone(&SESSION_TZ).format(RANGE_TIME_FORMAT).to_string()),
        ];
        let data: HistoricalData = self.get_json(&path, &query).await?;
        let candles = data.into_candles()?;
        debug!("{} {} candles for token {}", candles.len(), interval, instrument_token);
        Ok(candles)
    }

    /// Full quotes keyed by "EXCHANGE:TRADINGSYMBOL"
    pub async fn quote(&self, keys: &[&str]) -> Result<QuoteData> {
        let query: Vec<(&str, String)> = keys.iter().map(|k| ("i", k.to_string())).collect();
        self.get_json("/quote", &query).await
    }

    /// Last traded prices keyed by "EXCHANGE:TRADINGSYMBOL"
    pub async fn ltp(&self, keys: &[&str]) -> Result<LtpData> {
        let query: Vec<(&str, String)> = keys.iter().map(|k| ("i", k.to_string())).collect();
        self.get_json("/quote/ltp", &query).await
    }

    /// Instrument master for an exchange: memory, then disk, then network
    pub async fn instruments(&self, exchange: &str) -> Result<Arc<InstrumentMaster>> {
        let mut cache = self.instruments.lock().await;
        if let Some(master) = cache.get(&exchange.to_string()) {
            return Ok(master);
        }

        let snapshot_path = self
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("instruments_{}.json.zst", exchange)));

        if let Some(path) = &snapshot_path {
            match load_snapshot::<InstrumentMaster>(path, cache.ttl()) {
                Ok(Some(master)) => {
                    let master = Arc::new(master);
                    cache.insert(exchange.to_string(), master.clone());
                    return Ok(master);
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable instrument snapshot: {:#}", e),
            }
        }

        let url = format!("{}/instruments/{}", self.base_url, exchange);
        info!("Fetching instrument master from {}", url);
        let (status, body) = self.send(|| self.client.get(&url)).await?;
        if !status.is_success() {
            let error: Option<KiteErrorBody> = serde_json::from_str(&body).ok();
            let (error_type, message) = error.map(|e| (e.error_type, e.message)).unwrap_or((None, None));
            return Err(classify_error(status.as_u16(), error_type.as_deref(), message).into());
        }

        let master = InstrumentMaster::from_csv(&body)?;
        info!("Loaded {} {} instruments", master.len(), exchange);

        if let Some(path) = &snapshot_path {
            if let Err(e) = store_snapshot(path, &master) {
                warn!("Failed to persist instrument master: {:#}", e);
            }
        }

        let master = Arc::new(master);
        cache.insert(exchange.to_string(), master.clone());
        Ok(master)
    }

    /// Drop the cached instrument master so the next lookup refetches it
    pub async fn invalidate_instruments(&self, exchange: &str) {
        self.instruments.lock().await.invalidate(&exchange.to_string());
    }

    async fn tradingsymbol(&self, target: &OrderTarget) -> Result<String> {
        let master = self.instruments(NFO).await?;
        // Orders go to the first expiry after today
        let after_today = session_today() + ChronoDuration::days(1);
        let instrument = match target {
            OrderTarget::Option(contract) => {
                master.option(contract.underlying, contract.strike, contract.option_type, after_today)
            }
            OrderTarget::NearMonthFuture(underlying) => master.near_month_future(*underlying, session_today()),
        };
        if let Some(instrument) = instrument {
            return Ok(instrument.tradingsymbol.clone());
        }
        // Listings roll over at expiry; refetch on the next attempt
        self.invalidate_instruments(NFO).await;
        Err(BrokerError::InstrumentNotFound(target.to_string()).into())
    }
}

enum Attempt {
    Done(StatusCode, String),
    Transient(BrokerError),
}

fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T> {
    let envelope: KiteEnvelope<T> = serde_json::from_str(body).map_err(|e| {
        if status == StatusCode::FORBIDDEN {
            BrokerError::Unauthorized(format!("HTTP 403: {}", e))
        } else {
            BrokerError::Decode(format!("HTTP {}: {}", status.as_u16(), e))
        }
    })?;
    Ok(envelope.into_data(status.as_u16())?)
}

#[async_trait]
impl MarketData for KiteClient {
    async fn verify_session(&self) -> Result<()> {
        let profile = self.profile().await?;
        info!("Kite session verified for {}", profile.user_id);
        Ok(())
    }

    async fn option_candles(
        &self,
        contract: OptionContract,
        date: NaiveDate,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        let master = self.instruments(NFO).await?;
        let Some(instrument) = master.option(contract.underlying, contract.strike, contract.option_type, date) else {
            warn!("No listed contract for {} on {}", contract, date);
            return Ok(Vec::new());
        };
        let from = session_instant(date, hm(9, 15));
        let to = session_instant(date, hm(15, 30));
        self.historical(instrument.instrument_token, interval, from, to)
            .await
            .with_context(|| format!("candles for {} on {}", instrument.tradingsymbol, date))
    }

    async fn index_candles(
        &self,
        symbol: Underlying,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        self.historical(symbol.index_token(), interval, from, to).await
    }

    async fn session_close(&self, symbol: Underlying, date: NaiveDate) -> Result<Option<f64>> {
        let from = session_instant(date, hm(0, 0));
        let to = session_instant(date, hm(23, 59));
        let candles = self.historical(symbol.index_token(), CandleInterval::Day, from, to).await?;
        Ok(candles.last().map(|c| c.close))
    }

    async fn previous_close(&self, symbol: Underlying) -> Result<Option<f64>> {
        let quotes = self.quote(&[symbol.quote_key()]).await?;
        Ok(quotes.get(symbol.quote_key()).map(|q| q.ohlc.close))
    }

    async fn last_price(&self, symbol: Underlying) -> Result<Option<f64>> {
        let quotes = self.ltp(&[symbol.quote_key()]).await?;
        Ok(quotes.get(symbol.quote_key()).map(|q| q.last_price))
    }

    async fn lot_size(&self, symbol: Underlying) -> Result<u32> {
        let master = self.instruments(NFO).await?;
        Ok(master.lot_size(symbol).unwrap_or_else(|| {
            warn!("No lot size listed for {}, using {}", symbol, symbol.default_lot_size());
            symbol.default_lot_size()
        }))
    }

    async fn available_strikes(&self, symbol: Underlying, date: NaiveDate) -> Result<Vec<f64>> {
        Ok(self.instruments(NFO).await?.strikes(symbol, date))
    }
}

#[async_trait]
impl OrderGateway for KiteClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let tradingsymbol = self.tradingsymbol(&request.target).await?;
        let product = match request.target {
            OrderTarget::Option(_) => PRODUCT_NRML,
            OrderTarget::NearMonthFuture(_) => PRODUCT_MIS,
        };
        let form = PlaceOrderForm::market_nfo(tradingsymbol.clone(), &request.side.to_string(), request.quantity, product);

        info!("[KITE] Placing {} {} x{}", request.side, tradingsymbol, request.quantity);

        let url = format!("{}/orders/regular", self.base_url);
        let (status, body) = self
            .send_once(self.client.post(&url).form(&form))
            .await
            .with_context(|| format!("placing order for {}", tradingsymbol))?;
        let data: PlaceOrderData =
            decode_envelope(status, &body).with_context(|| format!("placing order for {}", tradingsymbol))?;

        info!("[KITE] Order placed: {} (HTTP {})", data.order_id, status);
        Ok(OrderReceipt { order_id: data.order_id, placed_at: Utc::now() })
    }

    fn name(&self) -> &'static str {
        "kite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_auth_error;
    use crate::execution::OrderSide;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        line.strip_prefix("content-length:").and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Local HTTP server answering every request with `status`; counts requests
    async fn fixed_status_server(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    async fn client_with_future(url: String) -> KiteClient {
        let expiry = session_today() + ChronoDuration::days(20);
        let csv = format!(
            "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange\n\
             13000,60,NIFTYFUT,NIFTY,0,{},0,0.05,75,FUT,NFO-FUT,NFO\n",
            expiry.format("%Y-%m-%d")
        );
        let client = KiteClient::new("key".into(), "token".into(), url).unwrap();
        let master = InstrumentMaster::from_csv(&csv).unwrap();
        client.instruments.lock().await.insert(NFO.to_string(), Arc::new(master));
        client
    }

    fn has_api_status(err: &anyhow::Error, expected: u16) -> bool {
        err.chain()
            .any(|cause| matches!(cause.downcast_ref::<BrokerError>(), Some(BrokerError::Api { status, .. }) if *status == expected))
    }

    #[tokio::test]
    async fn test_order_post_sent_once_on_server_error() {
        let (url, hits) = fixed_status_server("503 Service Unavailable").await;
        let client = client_with_future(url).await;
        let request = OrderRequest::new(OrderTarget::NearMonthFuture(Underlying::Nifty), OrderSide::Buy, 75);

        let err = client.place_order(&request).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(has_api_status(&err, 503));
        assert!(!is_auth_error(&err));
    }

    #[tokio::test]
    async fn test_order_post_sent_once_when_throttled() {
        let (url, hits) = fixed_status_server("429 Too Many Requests").await;
        let client = client_with_future(url).await;
        let request = OrderRequest::new(OrderTarget::NearMonthFuture(Underlying::Nifty), OrderSide::Sell, 75);

        let err = client.place_order(&request).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(has_api_status(&err, 429));
    }

    #[tokio::test]
    async fn test_reads_retry_and_report_server_errors() {
        let (url, hits) = fixed_status_server("502 Bad Gateway").await;
        let client = KiteClient::new("key".into(), "token".into(), url).unwrap();

        let err = client.profile().await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1 + MAX_RETRIES as usize);
        assert!(has_api_status(&err, 502));

        let (url, _) = fixed_status_server("429 Too Many Requests").await;
        let client = KiteClient::new("key".into(), "token".into(), url).unwrap();
        let err = client.profile().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BrokerError>(), Some(BrokerError::RateLimited { attempts: 4 })));
    }

    #[test]
    fn test_decode_envelope_maps_auth_failure() {
        let body = r#"{"status":"error","message":"Token is invalid or has expired.","error_type":"TokenException"}"#;
        let err = decode_envelope::<UserProfile>(StatusCode::FORBIDDEN, body).unwrap_err();
        assert!(crate::error::is_auth_error(&err));

        // Non-JSON 403 body still reads as an auth failure
        let err = decode_envelope::<UserProfile>(StatusCode::FORBIDDEN, "<html>Forbidden</html>").unwrap_err();
        assert!(crate::error::is_auth_error(&err));
    }

    #[test]
    fn test_decode_envelope_success() {
        let body = r#"{"status":"success","data":{"order_id":"151220000000000"}}"#;
        let data: PlaceOrderData = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(data.order_id, "151220000000000");
    }

    #[test]
    fn test_new_trims_base_url() {
        let client = KiteClient::new("key".into(), "token".into(), "http://localhost:9000/".into()).unwrap();
        assert_eq!(client.base_url, "http://localhost:9000");
        assert_eq!(client.name(), "kite");
    }
}
