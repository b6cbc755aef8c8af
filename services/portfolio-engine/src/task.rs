//! Long-running units of work
//!
//! A [`Task`] runs until it is told to stop or until it fails. Every task
//! owns a [`TaskContext`] holding its name, its statistics, and the stop
//! signal shared between `run()` and `stop()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Errors that end a single `run()` of a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("feed error: {0}")]
    Feed(String),
}

/// Lifecycle states of a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Restarting,
    Stopped,
}

/// Monotonic per-task counters.
#[derive(Debug, Default)]
pub struct TaskStats {
    messages: AtomicU64,
    errors: AtomicU64,
    restarts: AtomicU64,
}

impl TaskStats {
    pub fn record_message(&self) {
        self.record_messages(1);
    }

    pub fn record_messages(&self, count: u64) {
        self.messages.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.record_errors(1);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TaskStats`], as sent in Status events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub errors: u64,
    pub restarts: u64,
}

/// Shared lifecycle state of one task.
pub struct TaskContext {
    name: String,
    stats: TaskStats,
    restart: AtomicBool,
    state: Mutex<TaskState>,
    stop_tx: watch::Sender<bool>,
}

impl TaskContext {
    pub fn new(name: impl Into<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            stats: TaskStats::default(),
            restart: AtomicBool::new(true),
            state: Mutex::new(TaskState::Idle),
            stop_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Whether the supervisor should run the task again when `run()` returns.
    pub fn restart_enabled(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    /// Disable restarts, then wake everything waiting on [`Self::sleep`].
    ///
    /// Returns `false` if a stop had already been requested.
    pub fn request_stop(&self) -> bool {
        let first = self.restart.swap(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
        first
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Sleep for `duration`, waking early on stop.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopping() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }
}

/// A long-running unit of work.
///
/// `run()` loops until stopped or until it fails; `stop()` must be
/// idempotent and safe to call while `run()` is executing.
#[async_trait]
pub trait Task: Send + Sync {
    fn context(&self) -> &TaskContext;

    async fn run(&self) -> Result<(), TaskError>;

    async fn stop(&self);

    fn name(&self) -> &str {
        self.context().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = TaskStats::default();
        stats.record_message();
        stats.record_messages(4);
        stats.record_error();
        stats.record_restart();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                messages: 5,
                errors: 1,
                restarts: 1
            }
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let ctx = TaskContext::new("test");
        assert!(ctx.restart_enabled());
        assert!(!ctx.is_stopping());

        assert!(ctx.request_stop());
        assert!(!ctx.request_stop());
        assert!(!ctx.restart_enabled());
        assert!(ctx.is_stopping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_wakes_on_stop() {
        let ctx = std::sync::Arc::new(TaskContext::new("sleeper"));
        let sleeper = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.sleep(Duration::from_secs(3600)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.request_stop();

        assert!(!sleeper.await.unwrap());
        // Already stopped: returns immediately without sleeping.
        assert!(!ctx.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_full_duration() {
        let ctx = TaskContext::new("sleeper");
        let start = tokio::time::Instant::now();
        assert!(ctx.sleep(Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
