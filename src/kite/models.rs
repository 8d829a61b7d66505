//! Kite Connect API Models
//!
//! Request/response types for the Kite Connect v3 REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BrokerError;
use crate::types::Candle;

/// Timestamp format of historical candles ("2024-11-21T09:15:00+0530")
pub const CANDLE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Query-string format for historical ranges (exchange local time)
pub const RANGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Standard response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct KiteEnvelope<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error_type: Option<String>,
}

impl<T> KiteEnvelope<T> {
    /// Unwrap `data`, mapping error envelopes to broker errors
    pub fn into_data(self, http_status: u16) -> Result<T, BrokerError> {
        if self.status != "success" {
            return Err(classify_error(http_status, self.error_type.as_deref(), self.message));
        }
        self.data
            .ok_or_else(|| BrokerError::Decode("success response without data".to_string()))
    }
}

/// Error envelope without a typed payload
#[derive(Debug, Clone, Deserialize)]
pub struct KiteErrorBody {
    pub message: Option<String>,
    pub error_type: Option<String>,
}

/// Map an HTTP status and Kite error type to a broker error
pub fn classify_error(http_status: u16, error_type: Option<&str>, message: Option<String>) -> BrokerError {
    let message = message.unwrap_or_else(|| "unknown error".to_string());
    match (http_status, error_type) {
        (403, _) | (_, Some("TokenException")) | (_, Some("PermissionException")) => {
            BrokerError::Unauthorized(message)
        }
        (status, _) => BrokerError::Api { status, message },
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// `data` of `/instruments/historical/...`
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalData {
    pub candles: Vec<Vec<serde_json::Value>>,
}

impl HistoricalData {
    /// Convert raw rows `[time, o, h, l, c, v(, oi)]` into candles
    pub fn into_candles(self) -> Result<Vec<Candle>, BrokerError> {
        self.candles.iter().map(|row| parse_candle_row(row)).collect()
    }
}

fn parse_candle_row(row: &[serde_json::Value]) -> Result<Candle, BrokerError> {
    if row.len() < 5 {
        return Err(BrokerError::Decode(format!("candle row has {} fields", row.len())));
    }

    let raw_time = row[0]
        .as_str()
        .ok_or_else(|| BrokerError::Decode("candle timestamp is not a string".to_string()))?;
    let timestamp = DateTime::parse_from_str(raw_time, CANDLE_TIME_FORMAT)
        .map_err(|e| BrokerError::Decode(format!("candle timestamp '{}': {}", raw_time, e)))?
        .with_timezone(&Utc);

    let num = |i: usize| {
        row[i]
            .as_f64()
            .ok_or_else(|| BrokerError::Decode(format!("candle field {} is not numeric", i)))
    };
    let volume = row.get(5).and_then(|v| v.as_f64()).unwrap_or(0.0) as u64;

    Ok(Candle::new(timestamp, num(1)?, num(2)?, num(3)?, num(4)?, volume))
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuoteOhlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// Previous session close
    pub close: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub last_price: f64,
    pub ohlc: QuoteOhlc,
}

/// `data` of `/quote`, keyed by "EXCHANGE:TRADINGSYMBOL"
pub type QuoteData = HashMap<String, Quote>;

#[derive(Debug, Clone, Deserialize)]
pub struct LtpQuote {
    pub instrument_token: u64,
    pub last_price: f64,
}

/// `data` of `/quote/ltp`
pub type LtpData = HashMap<String, LtpQuote>;

/// Form body of `POST /orders/regular`
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderForm {
    pub tradingsymbol: String,
    pub exchange: String,
    pub transaction_type: String,
    pub order_type: String,
    pub quantity: u32,
    pub product: String,
    pub validity: String,
}

/// Carry-forward product for option positions
pub const PRODUCT_NRML: &str = "NRML";

/// Intraday product, squared off by the broker at session end
pub const PRODUCT_MIS: &str = "MIS";

impl PlaceOrderForm {
    /// NFO market order, valid for the day
    pub fn market_nfo(tradingsymbol: String, transaction_type: &str, quantity: u32, product: &str) -> Self {
        Self {
            tradingsymbol,
            exchange: "NFO".to_string(),
            transaction_type: transaction_type.to_string(),
            order_type: "MARKET".to_string(),
            quantity,
            product: product.to_string(),
            validity: "DAY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderData {
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_historical_candles() {
        let body = r#"{
            "status": "success",
            "data": {
                "candles": [
                    ["2024-11-21T09:15:00+0530", 112.5, 118.0, 110.05, 116.4, 152300],
                    ["2024-11-21T09:20:00+0530", 116.4, 121, 115, 120.15, 98100, 4500]
                ]
            }
        }"#;
        let envelope: KiteEnvelope<HistoricalData> = serde_json::from_str(body).unwrap();
        let candles = envelope.into_data(200).unwrap().into_candles().unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, Utc.with_ymd_and_hms(2024, 11, 21, 3, 45, 0).unwrap());
        assert_eq!(candles[1].high, 121.0);
        assert_eq!(candles[1].volume, 98100);
    }

    #[test]
    fn test_bad_candle_row() {
        let data = HistoricalData { candles: vec![vec![serde_json::json!("2024-11-21"), serde_json::json!(1.0)]] };
        assert!(matches!(data.into_candles(), Err(BrokerError::Decode(_))));
    }

    #[test]
    fn test_token_exception_is_unauthorized() {
        let body = r#"{"status":"error","message":"Incorrect `api_key` or `access_token`.","error_type":"TokenException"}"#;
        let envelope: KiteEnvelope<UserProfile> = serde_json::from_str(body).unwrap();
        assert!(matches!(envelope.into_data(403), Err(BrokerError::Unauthorized(_))));

        assert!(matches!(classify_error(403, None, None), BrokerError::Unauthorized(_)));
        assert!(matches!(
            classify_error(400, Some("InputException"), Some("invalid".into())),
            BrokerError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn test_order_form_encoding() {
        let form = PlaceOrderForm::market_nfo("NIFTY24N2826800CE".into(), "BUY", 75, PRODUCT_NRML);
        let encoded = serde_json::to_value(&form).unwrap();
        assert_eq!(encoded["exchange"], "NFO");
        assert_eq!(encoded["order_type"], "MARKET");
        assert_eq!(encoded["product"], "NRML");
        assert_eq!(encoded["quantity"], 75);
    }

    #[test]
    fn test_parse_quote() {
        let body = r#"{"status":"success","data":{"NSE:NIFTY 50":{"instrument_token":256265,"last_price":23520.35,"ohlc":{"open":23411.8,"high":23550.1,"low":23380.0,"close":23349.9}}}}"#;
        let envelope: KiteEnvelope<QuoteData> = serde_json::from_str(body).unwrap();
        let data = envelope.into_data(200).unwrap();
        let quote = &data["NSE:NIFTY 50"];
        assert_eq!(quote.ohlc.close, 23349.9);
        assert_eq!(quote.last_price, 23520.35);
    }
}
