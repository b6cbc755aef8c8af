//! Bounded candle history of the total portfolio value
//!
//! Holds the last N buckets, oldest first. The last element is the active
//! bucket that accumulates ticks until its close instant; the run loop then
//! closes it, starts its successor, and republishes the whole chart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventHandler};
use crate::candles::{BucketClock, CandleStick};
use crate::config::HistoryConfig;
use crate::events::{Event, EventType};
use crate::storage::Storage;
use crate::task::{Task, TaskContext, TaskError};

struct HistoryState {
    candles: VecDeque<CandleStick>,
    /// Whether the last candle is still accumulating.
    has_active: bool,
}

pub struct History {
    ctx: TaskContext,
    bus: EventBus,
    clock: BucketClock,
    capacity: usize,
    state: Mutex<HistoryState>,
    storage: Arc<dyn Storage>,
}

impl History {
    pub fn new(config: &HistoryConfig, tz: Tz, storage: Arc<dyn Storage>) -> Self {
        let capacity = config.buffer.max(1);
        Self {
            ctx: TaskContext::new("History"),
            bus: EventBus::new(),
            clock: BucketClock::new(tz, config.period),
            capacity,
            state: Mutex::new(HistoryState {
                candles: VecDeque::with_capacity(capacity + 1),
                has_active: false,
            }),
            storage,
        }
    }

    pub fn on(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> bool {
        self.bus.subscribe(event_type, handler)
    }

    pub fn off(&self, event_type: EventType, handler: &Arc<dyn EventHandler>) -> bool {
        self.bus.unsubscribe(event_type, handler)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every retained bucket, oldest first, including the active one.
    pub fn candles(&self) -> Vec<CandleStick> {
        self.lock().candles.iter().cloned().collect()
    }

    pub fn active(&self) -> Option<CandleStick> {
        let state = self.lock();
        if state.has_active {
            state.candles.back().cloned()
        } else {
            None
        }
    }

    /// Install persisted history and open an active bucket from its last
    /// close.
    pub fn seed(&self, history: Vec<CandleStick>) {
        self.seed_at(history, Utc::now().timestamp());
    }

    /// [`Self::seed`] with an explicit current time (Unix seconds).
    pub fn seed_at(&self, history: Vec<CandleStick>, now: i64) {
        let mut state = self.lock();
        let skip = history.len().saturating_sub(self.capacity);
        state.candles = history.into_iter().skip(skip).collect();
        state.has_active = false;

        if let Some(last_close) = state.candles.back().map(|c| c.close) {
            let active = CandleStick::new(self.clock.next_boundary(now), last_close);
            state.candles.push_back(active);
            state.has_active = true;
            Self::truncate(&mut state.candles, self.capacity);
        }
        info!(buckets = state.candles.len(), "Seeded history");
    }

    /// Seed from the last `buffer` persisted buckets. A failed read is
    /// counted and leaves the history empty.
    pub async fn restore(&self) {
        match self.storage.history(self.capacity).await {
            Ok(candles) => self.seed(candles),
            Err(err) => {
                self.ctx.stats().record_error();
                warn!(error = %err, "Failed to load candle history, starting empty");
            }
        }
    }

    fn truncate(candles: &mut VecDeque<CandleStick>, capacity: usize) {
        while candles.len() > capacity {
            candles.pop_front();
        }
    }

    async fn emit(&self, event: Event) {
        let outcome = self.bus.publish(event).await;
        self.ctx.stats().record_errors(outcome.failed);
    }

    /// Record a new total value in the active bucket, opening one if needed.
    pub async fn tick(&self, value: Decimal) {
        let active = {
            let mut state = self.lock();
            if !state.has_active {
                let time = self.clock.next_boundary(Utc::now().timestamp());
                state.candles.push_back(CandleStick::new(time, value));
                state.has_active = true;
                Self::truncate(&mut state.candles, self.capacity);
            } else if let Some(last) = state.candles.back_mut() {
                last.tick(value);
            }
            state.candles.back().cloned()
        };
        if let Some(active) = active {
            self.emit(Event::ChartTick(active)).await;
        }
    }

    /// Finalize the active bucket and start its successor. No-op without an
    /// active bucket.
    pub async fn close_bucket(&self) {
        let (closed, chart) = {
            let mut state = self.lock();
            if !state.has_active {
                return;
            }
            let Some(closed) = state.candles.back().cloned() else {
                return;
            };
            state.candles.push_back(closed.next(&self.clock));
            Self::truncate(&mut state.candles, self.capacity);
            (closed, state.candles.iter().cloned().collect::<Vec<_>>())
        };

        debug!(time = closed.time, close = %closed.close, "Closed bucket");
        self.emit(Event::Close(closed.clone())).await;

        match self.storage.write_candlestick(&closed).await {
            Ok(()) => self.ctx.stats().record_message(),
            Err(err) => {
                self.ctx.stats().record_error();
                warn!(time = closed.time, error = %err, "Failed to persist candle");
            }
        }

        self.emit(Event::Chart(chart)).await;
    }

    /// Time until the active bucket closes, or until the next boundary.
    fn next_wait(&self) -> Duration {
        let now_ms = Utc::now().timestamp_millis();
        let target = match self.active() {
            Some(active) => active.time,
            None => self.clock.next_boundary(now_ms.div_euclid(1000)),
        };
        let wait_ms = target.saturating_mul(1000).saturating_sub(now_ms);
        Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0))
    }
}

#[async_trait]
impl Task for History {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn run(&self) -> Result<(), TaskError> {
        loop {
            let wait = self.next_wait();
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for bucket close");
            if !self.ctx.sleep(wait).await {
                return Ok(());
            }
            self.close_bucket().await;
        }
    }

    async fn stop(&self) {
        self.ctx.request_stop();
    }
}
