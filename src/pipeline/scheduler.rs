//! Wall-clock scheduling for the live orchestrators
//!
//! A live strategy is a step function over an injected time. The runner wakes
//! at the next scheduled mark, calls the step once and sleeps again, so ticks
//! never overlap and tests can drive the step directly.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};

use crate::error::is_auth_error;
use crate::trading_core::calendar::{session_date, session_instant, session_time};
use crate::trading_core::TradingCalendar;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Ordered session-local times at which a strategy wakes up
#[derive(Debug, Clone, PartialEq)]
pub struct TickSchedule {
    times: Vec<NaiveTime>,
}

impl TickSchedule {
    /// Every `step_minutes` from `first` through `last`, inclusive
    pub fn every(first: NaiveTime, last: NaiveTime, step_minutes: u32) -> Self {
        let step = chrono::Duration::minutes(i64::from(step_minutes.max(1)));
        let mut times = Vec::new();
        let mut t = first;
        while t <= last {
            times.push(t);
            let (next, wrapped) = t.overflowing_add_signed(step);
            if wrapped != 0 {
                break;
            }
            t = next;
        }
        Self { times }
    }

    /// Add a one-off mark (e.g. level initialisation before the first scan)
    pub fn with_time(mut self, time: NaiveTime) -> Self {
        if !self.times.contains(&time) {
            self.times.push(time);
            self.times.sort();
        }
        self
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.times.contains(&time)
    }

    /// First scheduled instant strictly after `now`, skipping non-trading days
    pub fn next_after(&self, now: DateTime<Utc>, calendar: &TradingCalendar) -> Option<DateTime<Utc>> {
        let today = session_date(now);
        let time = session_time(now);

        if calendar.is_trading_day(today) {
            if let Some(t) = self.times.iter().find(|t| **t > time) {
                return Some(session_instant(today, *t));
            }
        }

        let first = *self.times.first()?;
        next_trading_day(calendar, today).map(|day| session_instant(day, first))
    }
}

fn next_trading_day(calendar: &TradingCalendar, date: NaiveDate) -> Option<NaiveDate> {
    date.iter_days().skip(1).take(30).find(|d| calendar.is_trading_day(*d))
}

/// A live strategy driven one tick at a time
#[async_trait]
pub trait LiveStrategy: Send {
    fn name(&self) -> &str;

    /// Handle one scheduled tick. See [`run_tick`] for how errors are treated.
    async fn step(&mut self, now: DateTime<Utc>) -> Result<()>;
}

/// Run one tick. Authorization failures are returned; anything else is
/// logged and the tick skipped, leaving strategy state for the next tick.
pub async fn run_tick<S: LiveStrategy + ?Sized>(strategy: &mut S, now: DateTime<Utc>) -> Result<()> {
    match strategy.step(now).await {
        Err(e) if is_auth_error(&e) => Err(e),
        Err(e) => {
            warn!("{} tick at {} skipped: {:#}", strategy.name(), session_time(now), e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Run `strategy` on `schedule` until Ctrl-C or an authorization failure
pub async fn run_schedule<S: LiveStrategy>(
    strategy: &mut S,
    schedule: &TickSchedule,
    calendar: &TradingCalendar,
    clock: &dyn Clock,
) -> Result<()> {
    info!("{} scheduler started ({} marks per session)", strategy.name(), schedule.times().len());

    loop {
        let now = clock.now();
        let Some(next) = schedule.next_after(now, calendar) else {
            anyhow::bail!("no trading day within the next 30 days");
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("Next tick at {} (in {:?})", next, wait);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down {}", strategy.name());
                return Ok(());
            }
        }

        run_tick(strategy, next).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::calendar::hm;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn high_low_schedule() -> TickSchedule {
        TickSchedule::every(hm(9, 20), hm(15, 25), 5).with_time(hm(9, 15))
    }

    #[test]
    fn test_high_low_marks() {
        let schedule = high_low_schedule();
        let times = schedule.times();
        assert_eq!(times.first(), Some(&hm(9, 15)));
        assert_eq!(times[1], hm(9, 20));
        assert_eq!(times.last(), Some(&hm(15, 25)));
        // 09:15 + 09:20..=15:25 every five minutes
        assert_eq!(times.len(), 1 + 74);
        assert!(!schedule.contains(hm(9, 22)));
    }

    #[test]
    fn test_next_after_same_day() {
        let calendar = TradingCalendar::weekends_only();
        let schedule = high_low_schedule();

        // Thursday 2024-11-21
        let now = session_instant(d(11, 21), hm(9, 21));
        assert_eq!(schedule.next_after(now, &calendar), Some(session_instant(d(11, 21), hm(9, 25))));

        // Exactly on a mark: strictly after
        let now = session_instant(d(11, 21), hm(9, 25));
        assert_eq!(schedule.next_after(now, &calendar), Some(session_instant(d(11, 21), hm(9, 30))));
    }

    #[test]
    fn test_next_after_rolls_over_weekend() {
        let calendar = TradingCalendar::weekends_only();
        let schedule = high_low_schedule();

        // Friday after the last mark -> Monday open
        let now = session_instant(d(11, 22), hm(15, 40));
        assert_eq!(schedule.next_after(now, &calendar), Some(session_instant(d(11, 25), hm(9, 15))));

        // Saturday morning -> Monday open
        let now = session_instant(d(11, 23), hm(8, 0));
        assert_eq!(schedule.next_after(now, &calendar), Some(session_instant(d(11, 25), hm(9, 15))));
    }

    struct Flaky {
        failures: Vec<anyhow::Error>,
        ticks: usize,
    }

    #[async_trait]
    impl LiveStrategy for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn step(&mut self, _now: DateTime<Utc>) -> Result<()> {
            self.ticks += 1;
            match self.failures.pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_run_tick_skips_transient_errors() {
        use crate::error::BrokerError;

        let now = session_instant(d(11, 21), hm(9, 30));
        let mut strategy = Flaky {
            failures: vec![
                BrokerError::Unauthorized("TokenException".into()).into(),
                BrokerError::Api { status: 500, message: "gateway".into() }.into(),
                BrokerError::Unreachable("timed out".into()).into(),
            ],
            ticks: 0,
        };

        assert!(run_tick(&mut strategy, now).await.is_ok());
        assert!(run_tick(&mut strategy, now).await.is_ok());
        let err = run_tick(&mut strategy, now).await.unwrap_err();
        assert!(is_auth_error(&err));
        assert!(run_tick(&mut strategy, now).await.is_ok());
        assert_eq!(strategy.ticks, 4);
    }

    #[test]
    fn test_minute_schedule() {
        let schedule = TickSchedule::every(hm(9, 15), hm(15, 30), 1);
        assert_eq!(schedule.times().len(), 376);
        assert!(schedule.contains(hm(10, 16)));
    }
}
