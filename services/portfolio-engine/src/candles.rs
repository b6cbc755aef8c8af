//! OHLC candles of the total portfolio value
//!
//! A candle is stamped with the instant at which it closes, in Unix
//! seconds. Boundaries are aligned to the bucket period in the configured
//! local timezone, so hourly candles close on the local hour.

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: u64 = 86_400;

/// A single OHLC bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleStick {
    /// Close instant of the bucket (Unix seconds)
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl CandleStick {
    /// Create a flat candle at `value`.
    pub fn new(time: i64, value: Decimal) -> Self {
        Self {
            time,
            open: value,
            high: value,
            low: value,
            close: value,
        }
    }

    /// Record a new observation.
    pub fn tick(&mut self, value: Decimal) {
        self.close = value;
        if value > self.high {
            self.high = value;
        } else if value < self.low {
            self.low = value;
        }
    }

    /// The following bucket, opened at this bucket's close.
    pub fn next(&self, clock: &BucketClock) -> CandleStick {
        CandleStick::new(clock.next_boundary(self.time), self.close)
    }

    /// Validate candle integrity (OHLC invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
    }
}

/// Computes bucket boundaries in a timezone.
#[derive(Debug, Clone)]
pub struct BucketClock {
    tz: Tz,
    period_secs: u64,
}

impl BucketClock {
    /// Periods are clamped to `[1s, 1 day]`.
    pub fn new(tz: Tz, period: Duration) -> Self {
        Self {
            tz,
            period_secs: period.as_secs().clamp(1, SECONDS_PER_DAY),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// First boundary strictly after `after` (Unix seconds).
    pub fn next_boundary(&self, after: i64) -> i64 {
        let fallback = after + self.period_secs as i64;
        let Some(utc) = DateTime::from_timestamp(after, 0) else {
            return fallback;
        };
        let local = utc.with_timezone(&self.tz).naive_local();

        let of_day = u64::from(local.num_seconds_from_midnight());
        let floor = local.date().and_time(chrono::NaiveTime::MIN)
            + chrono::Duration::seconds((of_day - of_day % self.period_secs) as i64);

        // A repeated hour maps the current floor to a second, later instant.
        (0..=2)
            .map(|k| floor + chrono::Duration::seconds((k * self.period_secs) as i64))
            .flat_map(|target| self.instants(target))
            .filter(|ts| *ts > after)
            .min()
            .unwrap_or(fallback)
    }

    /// Every instant showing `local` on the wall clock. Times skipped by a
    /// DST jump resolve to the first instant after the gap.
    fn instants(&self, local: NaiveDateTime) -> Vec<i64> {
        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => vec![dt.timestamp()],
            LocalResult::Ambiguous(first, second) => vec![first.timestamp(), second.timestamp()],
            LocalResult::None => self
                .tz
                .from_local_datetime(&(local + chrono::Duration::hours(1)))
                .earliest()
                .map(|dt| dt.timestamp())
                .into_iter()
                .collect(),
        }
    }
}
