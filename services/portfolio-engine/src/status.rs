//! Periodic task statistics
//!
//! Publishes a Status event on a fixed period with the counters of every
//! tracked task, whether or not they changed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{EventBus, EventHandler};
use crate::events::{Event, EventType};
use crate::task::{StatsSnapshot, Task, TaskContext, TaskError};

pub struct StatusReporter {
    ctx: TaskContext,
    bus: EventBus,
    interval: Duration,
    tasks: Mutex<Vec<Arc<dyn Task>>>,
}

impl StatusReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            ctx: TaskContext::new("Status"),
            bus: EventBus::new(),
            interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> bool {
        self.bus.subscribe(event_type, handler)
    }

    pub fn off(&self, event_type: EventType, handler: &Arc<dyn EventHandler>) -> bool {
        self.bus.unsubscribe(event_type, handler)
    }

    pub fn track(&self, task: Arc<dyn Task>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Current counters keyed by task name.
    pub fn collect(&self) -> BTreeMap<String, StatsSnapshot> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|task| (task.name().to_string(), task.context().stats().snapshot()))
            .collect()
    }

    pub async fn publish(&self) {
        let outcome = self.bus.publish(Event::Status(self.collect())).await;
        self.ctx.stats().record_message();
        self.ctx.stats().record_errors(outcome.failed);
    }
}

#[async_trait]
impl Task for StatusReporter {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn run(&self) -> Result<(), TaskError> {
        while self.ctx.sleep(self.interval).await {
            self.publish().await;
        }
        Ok(())
    }

    async fn stop(&self) {
        self.ctx.request_stop();
    }
}
