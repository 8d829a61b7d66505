//! Error types callers need to tell apart
//!
//! Everything else propagates as `anyhow::Error`. Missing data is not an
//! error: fetchers return empty series and orchestrators skip.

use chrono::NaiveDate;
use thiserror::Error;

/// Failures reported by the broker adapter
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Session expired or credentials rejected. Needs re-authentication.
    #[error("broker session is not authorized: {0}")]
    Unauthorized(String),

    #[error("rate limited by broker after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("broker API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Timed out or could not connect. The request may or may not have landed.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("failed to decode broker response: {0}")]
    Decode(String),

    #[error("no instrument found for {0}")]
    InstrumentNotFound(String),
}

/// Rejected request parameters, raised before any fetching
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("malformed date '{0}', expected YYYY-MM-DD")]
    MalformedDate(String),

    #[error("date {0} is in the future")]
    FutureDate(NaiveDate),

    #[error("start date {from} is after end date {to}")]
    InvertedRange { from: NaiveDate, to: NaiveDate },

    #[error("unsupported symbol '{0}'")]
    UnsupportedSymbol(String),

    #[error("unsupported candle interval '{0}'")]
    UnsupportedInterval(String),
}

/// True if any error in the chain is an authorization failure
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<BrokerError>(), Some(BrokerError::Unauthorized(_))))
}

/// True if any error in the chain is a rejected input
pub fn is_input_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<InputError>().is_some())
}

/// Parse a `YYYY-MM-DD` date string
pub fn parse_date(s: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| InputError::MalformedDate(s.to_string()))
}

/// Validate a backtest date range against `today`
pub fn validate_range(from: NaiveDate, to: NaiveDate, today: NaiveDate) -> Result<(), InputError> {
    if from > today {
        return Err(InputError::FutureDate(from));
    }
    if to > today {
        return Err(InputError::FutureDate(to));
    }
    if from > to {
        return Err(InputError::InvertedRange { from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_auth_error_detected_through_context() {
        let err: anyhow::Result<()> = Err(BrokerError::Unauthorized("TokenException".into()).into());
        let wrapped = err.context("fetching candles").context("backtest day 2024-11-21").unwrap_err();
        assert!(is_auth_error(&wrapped));
        assert!(!is_input_error(&wrapped));

        let other = anyhow::Error::from(BrokerError::Api { status: 500, message: "boom".into() });
        assert!(!is_auth_error(&other));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-11-21").unwrap(), NaiveDate::from_ymd_opt(2024, 11, 21).unwrap());
        assert_eq!(parse_date("21/11/2024"), Err(InputError::MalformedDate("21/11/2024".into())));
    }

    #[test]
    fn test_validate_range() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let today = d(11, 25);
        assert!(validate_range(d(11, 1), d(11, 22), today).is_ok());
        assert_eq!(validate_range(d(11, 1), d(11, 26), today), Err(InputError::FutureDate(d(11, 26))));
        assert_eq!(
            validate_range(d(11, 20), d(11, 10), today),
            Err(InputError::InvertedRange { from: d(11, 20), to: d(11, 10) })
        );
    }
}
