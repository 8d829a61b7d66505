//! NSE trading calendar and session clock helpers
//!
//! All session rules are evaluated in Asia/Kolkata wall-clock time. Candle
//! timestamps are stored in UTC and converted on demand.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// Exchange session timezone
pub const SESSION_TZ: Tz = Kolkata;

/// Maximum days to walk back looking for a previous session
const MAX_LOOKBACK_DAYS: i64 = 30;

const NSE_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 26),
    (2024, 3, 8),
    (2024, 3, 25),
    (2024, 4, 11),
    (2024, 4, 17),
    (2024, 5, 1),
    (2024, 6, 17),
    (2024, 8, 15),
    (2024, 10, 2),
    (2024, 11, 1),
    (2024, 11, 15),
    (2024, 12, 25),
    // 2025
    (2025, 1, 26),
    (2025, 3, 14),
    (2025, 3, 31),
    (2025, 4, 10),
    (2025, 4, 14),
    (2025, 5, 1),
    (2025, 6, 6),
    (2025, 8, 15),
    (2025, 10, 2),
    (2025, 10, 31),
    (2025, 11, 4),
    (2025, 12, 25),
];

/// Wall-clock time from hour and minute (midnight if out of range)
pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Session wall-clock time of a UTC timestamp
pub fn session_time(ts: DateTime<Utc>) -> NaiveTime {
    ts.with_timezone(&SESSION_TZ).time()
}

/// Session calendar date of a UTC timestamp
pub fn session_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&SESSION_TZ).date_naive()
}

/// UTC instant of a session-local date and time
pub fn session_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    SESSION_TZ
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| SESSION_TZ.from_utc_datetime(&naive))
        .with_timezone(&Utc)
}

/// Today's date on the exchange
pub fn session_today() -> NaiveDate {
    session_date(Utc::now())
}

/// True if the bar opens on a multiple of `minutes` (session clock)
pub fn is_aligned(ts: DateTime<Utc>, minutes: u32) -> bool {
    minutes <= 1 || session_time(ts).minute() % minutes == 0
}

/// Weekends plus a fixed list of exchange holidays
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::nse()
    }
}

impl TradingCalendar {
    /// Calendar with the published NSE holiday list
    pub fn nse() -> Self {
        let holidays = NSE_HOLIDAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();
        Self { holidays }
    }

    /// Calendar with weekends only
    pub fn weekends_only() -> Self {
        Self { holidays: BTreeSet::new() }
    }

    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, extra: I) -> Self {
        self.holidays.extend(extra);
        self
    }

    /// Add holidays from a JSON array of `YYYY-MM-DD` strings
    pub fn load_extra_holidays(self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading holiday file {}", path.display()))?;
        let dates: Vec<NaiveDate> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing holiday file {}", path.display()))?;
        info!("Loaded {} extra holidays from {}", dates.len(), path.display());
        Ok(self.with_holidays(dates))
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !Self::is_weekend(date) && !self.is_holiday(date)
    }

    /// Most recent trading day strictly before `date`
    pub fn previous_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=MAX_LOOKBACK_DAYS)
            .map(|back| date - Duration::days(back))
            .find(|d| self.is_trading_day(*d))
    }

    /// Trading days in `[from, to]`, inclusive
    pub fn trading_days(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        from.iter_days()
            .take_while(|d| *d <= to)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}
