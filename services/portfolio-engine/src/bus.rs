//! Typed publish/subscribe
//!
//! Each stateful component owns an [`EventBus`] and exposes `on`/`off`
//! on top of it. Publishing runs every handler registered for the event
//! type, one after another; a handler that fails or panics is counted in
//! the returned [`PublishOutcome`] and does not stop the others.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::events::{Event, EventType};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked")]
    Panicked,
}

/// Receives published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapter turning a synchronous closure into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: u64,
    pub failed: u64,
}

/// Registry of handlers, keyed by event type.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<BTreeMap<EventType, Vec<Arc<dyn EventHandler>>>>,
}

/// Handler identity is the address of the shared allocation.
fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. Returns `false` if it was
    /// already registered.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = handlers.entry(event_type).or_default();
        if entry.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        entry.push(handler);
        true
    }

    /// Remove `handler` from `event_type`. Returns `false` if it was not
    /// registered.
    pub fn unsubscribe(&self, event_type: EventType, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|h| !same_handler(h, handler));
        before != entry.len()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler currently registered for its type.
    pub async fn publish(&self, event: Event) -> PublishOutcome {
        let event_type = event.event_type();
        // Release the lock before awaiting so handlers may (un)subscribe.
        let targets: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&event_type) {
                Some(list) => list.clone(),
                None => return PublishOutcome::default(),
            }
        };

        let mut outcome = PublishOutcome::default();
        for handler in targets {
            let result = AssertUnwindSafe(handler.handle(&event))
                .catch_unwind()
                .await
                .unwrap_or(Err(HandlerError::Panicked));
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(err) => {
                    warn!(event_type = event_type.as_str(), error = %err, "Event handler failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}
