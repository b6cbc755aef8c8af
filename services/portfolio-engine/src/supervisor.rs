//! Self-restarting task supervision
//!
//! Runs a [`Task`] in a loop: every completion or failure of `run()` is
//! followed by a restart until `stop()` disables restarts. Runs that end
//! faster than the minimum restart wait are followed by a sleep of that
//! length, so a task failing against an unavailable service does not spin.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::SupervisorConfig;
use crate::task::{Task, TaskState};

/// Owns the start/restart loop of one task.
pub struct Supervisor {
    task: Arc<dyn Task>,
    min_restart_wait: Duration,
}

impl Supervisor {
    pub fn new(task: Arc<dyn Task>, config: &SupervisorConfig) -> Self {
        Self {
            task,
            min_restart_wait: config.min_restart_wait,
        }
    }

    /// Run the task until it is stopped. Never propagates task failures.
    pub async fn start(&self) {
        let ctx = self.task.context();
        info!(task = ctx.name(), "Starting task");

        while ctx.restart_enabled() {
            ctx.set_state(TaskState::Running);
            let started = Instant::now();

            let failed = match AssertUnwindSafe(self.task.run()).catch_unwind().await {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    error!(task = ctx.name(), error = %err, "Task failed");
                    true
                }
                Err(panic) => {
                    error!(
                        task = ctx.name(),
                        panic = panic_message(panic.as_ref()),
                        "Task panicked"
                    );
                    true
                }
            };
            if failed {
                ctx.stats().record_error();
            }
            let elapsed = started.elapsed();

            if !ctx.restart_enabled() {
                break;
            }
            ctx.set_state(if failed {
                TaskState::Failed
            } else {
                TaskState::Completed
            });
            ctx.set_state(TaskState::Restarting);
            ctx.stats().record_restart();

            if elapsed < self.min_restart_wait {
                info!(
                    task = ctx.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    wait_ms = self.min_restart_wait.as_millis() as u64,
                    "Task ended early, delaying restart"
                );
                if !ctx.sleep(self.min_restart_wait).await {
                    break;
                }
            } else {
                info!(
                    task = ctx.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Restarting task"
                );
            }
        }

        ctx.set_state(TaskState::Stopped);
        info!(task = ctx.name(), "Task stopped");
    }

    /// Spawn [`Self::start`] onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.start().await })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails immediately on every run and records when each run started.
    struct Flaky {
        ctx: TaskContext,
        starts: Mutex<Vec<Instant>>,
        panic_on_run: bool,
    }

    impl Flaky {
        fn new(panic_on_run: bool) -> Arc<Self> {
            Arc::new(Self {
                ctx: TaskContext::new("flaky"),
                starts: Mutex::new(Vec::new()),
                panic_on_run,
            })
        }
    }

    #[async_trait]
    impl Task for Flaky {
        fn context(&self) -> &TaskContext {
            &self.ctx
        }

        async fn run(&self) -> Result<(), TaskError> {
            self.starts.lock().unwrap().push(Instant::now());
            if self.panic_on_run {
                panic!("boom");
            }
            Err(TaskError::Feed("connection refused".to_string()))
        }

        async fn stop(&self) {
            self.ctx.request_stop();
        }
    }

    /// Runs for a fixed time, then completes normally.
    struct Slow {
        ctx: TaskContext,
        runs: AtomicU32,
        run_for: Duration,
    }

    #[async_trait]
    impl Task for Slow {
        fn context(&self) -> &TaskContext {
            &self.ctx
        }

        async fn run(&self) -> Result<(), TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.ctx.sleep(self.run_for).await;
            Ok(())
        }

        async fn stop(&self) {
            self.ctx.request_stop();
        }
    }

    fn config(secs: u64) -> SupervisorConfig {
        SupervisorConfig {
            min_restart_wait: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_restarts_with_backoff() {
        let task = Flaky::new(false);
        let handle = Supervisor::new(task.clone(), &config(10)).spawn();

        tokio::time::sleep(Duration::from_secs(35)).await;
        task.stop().await;
        handle.await.unwrap();

        let starts = task.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 4); // t = 0, 10, 20, 30
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }

        let stats = task.ctx.stats().snapshot();
        assert_eq!(stats.errors, 4);
        // The fourth restart was counted before its backoff was cut short.
        assert_eq!(stats.restarts, 4);
        assert_eq!(task.ctx.state(), TaskState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_contained() {
        let task = Flaky::new(true);
        let handle = Supervisor::new(task.clone(), &config(5)).spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        task.stop().await;
        handle.await.unwrap();

        let stats = task.ctx.stats().snapshot();
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.restarts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_run_restarts_immediately() {
        let task = Arc::new(Slow {
            ctx: TaskContext::new("slow"),
            runs: AtomicU32::new(0),
            run_for: Duration::from_secs(60),
        });
        let handle = Supervisor::new(task.clone(), &config(10)).spawn();

        // Two full runs and part of the third.
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
        assert_eq!(task.ctx.stats().snapshot().restarts, 2);
        assert_eq!(task.ctx.stats().snapshot().errors, 0);

        task.stop().await;
        handle.await.unwrap();
        assert_eq!(task.ctx.stats().snapshot().restarts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_exits_with_restart_counted() {
        let task = Flaky::new(false);
        let handle = Supervisor::new(task.clone(), &config(3600)).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(task.ctx.state(), TaskState::Restarting);
        task.stop().await;
        task.stop().await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor must exit promptly")
            .unwrap();

        assert_eq!(task.starts.lock().unwrap().len(), 1);
        assert_eq!(task.ctx.stats().snapshot().restarts, 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(payload.as_ref()), "bad state");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
