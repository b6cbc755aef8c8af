//! Daily close rollup
//!
//! Tracks the open, high, low and close of the total portfolio value for
//! one trading day. The day ends at a fixed local hour; at that instant the
//! record is persisted and a new one opens at the previous close.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{EventHandler, HandlerError};
use crate::config::DailyCloseConfig;
use crate::events::{Event, EventType};
use crate::portfolio::Portfolio;
use crate::storage::Storage;
use crate::task::{Task, TaskContext, TaskError};

/// OHLC summary of one day, keyed by the date it closes on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

impl DailyClose {
    pub fn create(date: NaiveDate, value: Decimal) -> Self {
        Self {
            date,
            open: value,
            close: value,
            high: value,
            low: value,
        }
    }

    pub fn update(&mut self, value: Decimal) {
        self.close = value;
        self.high = self.high.max(value);
        self.low = self.low.min(value);
    }

    /// The record for `date`, opened at this record's close.
    pub fn next(&self, date: NaiveDate) -> Self {
        Self::create(date, self.close)
    }
}

/// When trading days end.
#[derive(Debug, Clone, Copy)]
pub struct CloseSchedule {
    tz: Tz,
    hour: u32,
}

impl CloseSchedule {
    pub fn new(tz: Tz, hour: u32) -> Self {
        Self {
            tz,
            hour: hour.min(23),
        }
    }

    /// Instant at which the day `date` closes. A close hour skipped by a
    /// DST jump moves one hour later.
    pub fn close_instant(&self, date: NaiveDate) -> DateTime<Utc> {
        let at = |hour: u32| {
            NaiveTime::from_hms_opt(hour, 0, 0)
                .and_then(|time| self.tz.from_local_datetime(&date.and_time(time)).earliest())
        };
        let local = at(self.hour)
            .or_else(|| at(self.hour + 1))
            .map(|dt| dt.with_timezone(&Utc));
        // Only reachable for a gap at 23:00; fall back to the UTC hour.
        local.unwrap_or_else(|| {
            date.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::hours(i64::from(self.hour))
        })
    }

    /// Date of the first close that has not happened yet at `now`.
    pub fn next_close_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.with_timezone(&self.tz).date_naive();
        if now < self.close_instant(today) {
            today
        } else {
            today.succ_opt().unwrap_or(today)
        }
    }
}

pub struct DailyCloseTask {
    ctx: TaskContext,
    schedule: CloseSchedule,
    poll_interval: Duration,
    record: Mutex<Option<DailyClose>>,
    storage: Arc<dyn Storage>,
}

impl DailyCloseTask {
    /// Create the task and subscribe it to `portfolio` valuations.
    pub fn new(
        portfolio: &Portfolio,
        storage: Arc<dyn Storage>,
        config: &DailyCloseConfig,
        tz: Tz,
    ) -> Arc<Self> {
        let task = Arc::new(Self {
            ctx: TaskContext::new("DailyClose"),
            schedule: CloseSchedule::new(tz, config.close_hour),
            poll_interval: config.poll_interval,
            record: Mutex::new(None),
            storage,
        });
        let handler: Arc<dyn EventHandler> = task.clone();
        portfolio.on(EventType::Portfolio, handler);
        task
    }

    pub fn schedule(&self) -> &CloseSchedule {
        &self.schedule
    }

    /// The day currently being tracked.
    pub fn record(&self) -> Option<DailyClose> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DailyClose>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold a total market value into the current day.
    pub fn observe(&self, value: Decimal, now: DateTime<Utc>) {
        let mut record = self.lock();
        match record.as_mut() {
            Some(day) => day.update(value),
            None => {
                let day = DailyClose::create(self.schedule.next_close_date(now), value);
                info!(date = %day.date, open = %day.open, "Opened first daily close");
                *record = Some(day);
            }
        }
    }

    /// Resume from the last persisted close unless a day is already being
    /// tracked. A persisted day that is not the upcoming one is replaced by
    /// a fresh day opened at its close. A failed read is counted and the
    /// day starts from the next observation instead.
    pub async fn load(&self, now: DateTime<Utc>) {
        if self.lock().is_some() {
            return;
        }
        let last = match self.storage.last_close().await {
            Ok(Some(last)) => last,
            Ok(None) => {
                debug!("No persisted daily close");
                return;
            }
            Err(err) => {
                self.ctx.stats().record_error();
                warn!(error = %err, "Failed to read last daily close");
                return;
            }
        };

        let upcoming = self.schedule.next_close_date(now);
        let resumed = if last.date == upcoming {
            info!(date = %last.date, "Resuming daily close");
            last
        } else {
            info!(stale = %last.date, date = %upcoming, "Persisted daily close is stale");
            last.next(upcoming)
        };

        let mut record = self.lock();
        if record.is_none() {
            *record = Some(resumed);
        }
    }

    /// Close the day if it is due, and return how long to wait before the
    /// next step.
    pub async fn step(&self, now: DateTime<Utc>) -> Duration {
        let finished = {
            let mut record = self.lock();
            let Some(day) = record.as_mut() else {
                debug!("No valuation yet, polling");
                return self.poll_interval;
            };
            if now < self.schedule.close_instant(day.date) {
                return self.until(day.date, now);
            }
            let successor = day.next(self.schedule.next_close_date(now));
            std::mem::replace(day, successor)
        };

        match self.storage.write_close(&finished).await {
            Ok(()) => {
                self.ctx.stats().record_message();
                info!(date = %finished.date, close = %finished.close, "Persisted daily close");
            }
            Err(err) => {
                self.ctx.stats().record_error();
                warn!(date = %finished.date, error = %err, "Failed to persist daily close");
            }
        }

        match self.record() {
            Some(day) => self.until(day.date, now),
            None => self.poll_interval,
        }
    }

    fn until(&self, date: NaiveDate, now: DateTime<Utc>) -> Duration {
        (self.schedule.close_instant(date) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[async_trait]
impl EventHandler for DailyCloseTask {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if let Event::Portfolio(snapshot) = event {
            self.observe(snapshot.market_value, Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl Task for DailyCloseTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.load(Utc::now()).await;
        loop {
            let wait = self.step(Utc::now()).await;
            debug!(wait_secs = wait.as_secs(), "Waiting for next daily close step");
            if !self.ctx.sleep(wait).await {
                return Ok(());
            }
        }
    }

    async fn stop(&self) {
        self.ctx.request_stop();
    }
}
