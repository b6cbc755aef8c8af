//! Fan-out of engine events to live subscribers
//!
//! Flow: connect → receive Portfolio snapshot → receive Chart history →
//! receive incremental events until disconnect.
//!
//! Every subscriber is fed through a bounded outbound queue. Delivery never
//! blocks: a full or closed queue counts as one failed delivery for that
//! subscriber only. Membership is removed by the transport when the
//! connection ends, never by the hub itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{EventHandler, HandlerError};
use crate::config::HubConfig;
use crate::events::{Event, EventType};
use crate::portfolio::Portfolio;
use crate::task::{StatsSnapshot, TaskStats};

/// Unique subscriber identifier.
pub type ClientId = u64;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("subscriber is closed")]
    Closed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receiving end of the hub. Delivery must not block.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded channel, drained by the transport.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<String>,
}

impl ChannelSubscriber {
    /// Capacity is raised to 2 so the connect handshake always fits.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(2));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        self.tx.try_send(message.to_owned()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct BroadcastHub {
    portfolio: Arc<Portfolio>,
    config: HubConfig,
    members: Mutex<BTreeMap<ClientId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
    /// messages = delivered, errors = failed deliveries
    stats: TaskStats,
}

impl BroadcastHub {
    pub fn new(portfolio: Arc<Portfolio>, config: HubConfig) -> Self {
        Self {
            portfolio,
            config,
            members: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            stats: TaskStats::default(),
        }
    }

    /// Subscribe the hub to everything the portfolio and its history emit.
    pub fn attach(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = self.clone();
        for event_type in [EventType::Portfolio, EventType::Ticker, EventType::Index] {
            self.portfolio.on(event_type, handler.clone());
        }
        for event_type in [EventType::Chart, EventType::ChartTick] {
            self.portfolio.history().on(event_type, handler.clone());
        }
    }

    /// New bounded channel subscriber sized from the hub configuration.
    pub fn channel(&self) -> (Arc<ChannelSubscriber>, mpsc::Receiver<String>) {
        let (subscriber, rx) = ChannelSubscriber::new(self.config.queue_capacity);
        (Arc::new(subscriber), rx)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, Arc<dyn Subscriber>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register a subscriber after handing it the current snapshot and
    /// history. A subscriber that cannot take the handshake is not
    /// registered.
    pub fn connect(&self, subscriber: Arc<dyn Subscriber>) -> Result<ClientId, DeliveryError> {
        let mut members = self.lock();

        let snapshot = Event::Portfolio(self.portfolio.snapshot()).to_json()?;
        let chart = Event::Chart(self.portfolio.history().candles()).to_json()?;
        subscriber.deliver(&snapshot)?;
        subscriber.deliver(&chart)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        members.insert(id, subscriber);
        info!(client_id = id, clients = members.len(), "Subscriber connected");
        Ok(id)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn disconnect(&self, id: ClientId) -> bool {
        let mut members = self.lock();
        let removed = members.remove(&id).is_some();
        if removed {
            info!(client_id = id, clients = members.len(), "Subscriber disconnected");
        }
        removed
    }

    /// Deliver `event` to every member. Close events stay internal.
    pub fn broadcast(&self, event: &Event) -> Result<BroadcastReport, DeliveryError> {
        if event.event_type() == EventType::Close {
            return Ok(BroadcastReport::default());
        }
        let message = event.to_json()?;

        let members = self.lock();
        let mut report = BroadcastReport::default();
        for (id, member) in members.iter() {
            match member.deliver(&message) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(client_id = *id, error = %err, "Delivery failed");
                    report.failed += 1;
                }
            }
        }
        drop(members);

        self.stats.record_messages(report.delivered as u64);
        self.stats.record_errors(report.failed as u64);
        debug!(
            event_type = event.event_type().as_str(),
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast"
        );
        Ok(report)
    }
}

#[async_trait]
impl EventHandler for BroadcastHub {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.broadcast(event)
            .map(|_| ())
            .map_err(|err| HandlerError::Failed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::CandleStick;
    use crate::config::{HistoryConfig, PortfolioSettings};
    use crate::history::History;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;
    use types::asset::AssetClass;
    use types::position::Position;

    struct Broken;

    impl Subscriber for Broken {
        fn deliver(&self, _message: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    /// Accepts the handshake, then refuses everything.
    struct Flaky {
        accepted: AtomicU64,
    }

    impl Subscriber for Flaky {
        fn deliver(&self, _message: &str) -> Result<(), DeliveryError> {
            if self.accepted.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(())
            } else {
                Err(DeliveryError::QueueFull)
            }
        }
    }

    fn hub() -> Arc<BroadcastHub> {
        let history = Arc::new(History::new(
            &HistoryConfig::default(),
            chrono_tz::UTC,
            Arc::new(MemoryStore::new()),
        ));
        let positions = vec![Position::new(
            "X", "X", dec!(10), dec!(100), dec!(900), "NOK", AssetClass::Equity,
        )];
        let portfolio =
            Arc::new(Portfolio::new(positions, PortfolioSettings::default(), history).unwrap());
        Arc::new(BroadcastHub::new(portfolio, HubConfig::default()))
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    #[test]
    fn test_connect_sends_snapshot_then_chart() {
        let hub = hub();
        let (subscriber, mut rx) = hub.channel();
        hub.connect(subscriber).unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "portfolio");
        assert_eq!(messages[0]["data"]["market_value"], 1000.0);
        assert_eq!(messages[1]["type"], "chart");
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_failed_handshake_is_not_registered() {
        let hub = hub();
        assert!(matches!(
            hub.connect(Arc::new(Broken)),
            Err(DeliveryError::Closed)
        ));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_one_failing_member_does_not_block_others() {
        let hub = hub();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (subscriber, rx) = hub.channel();
            hub.connect(subscriber).unwrap();
            receivers.push(rx);
        }
        let flaky = hub
            .connect(Arc::new(Flaky {
                accepted: AtomicU64::new(0),
            }))
            .unwrap();

        let report = hub
            .broadcast(&Event::ChartTick(CandleStick::new(0, dec!(1))))
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 3, failed: 1 });
        assert_eq!(hub.stats().errors, 1);
        assert_eq!(hub.len(), 4);

        for rx in &mut receivers {
            let messages = drain(rx);
            assert_eq!(messages.last().unwrap()["type"], "chart_tick");
        }
        assert!(hub.disconnect(flaky));
        assert!(!hub.disconnect(flaky));
    }

    #[test]
    fn test_close_events_are_not_forwarded() {
        let hub = hub();
        let (subscriber, mut rx) = hub.channel();
        hub.connect(subscriber).unwrap();
        drain(&mut rx);

        let report = hub
            .broadcast(&Event::Close(CandleStick::new(0, dec!(1))))
            .unwrap();
        assert_eq!(report, BroadcastReport::default());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_full_queue_counts_as_failure() {
        let (subscriber, _rx) = ChannelSubscriber::new(0);
        subscriber.deliver("a").unwrap();
        subscriber.deliver("b").unwrap();
        assert!(matches!(subscriber.deliver("c"), Err(DeliveryError::QueueFull)));
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (subscriber, rx) = ChannelSubscriber::new(4);
        drop(rx);
        assert!(matches!(subscriber.deliver("a"), Err(DeliveryError::Closed)));
    }

    #[tokio::test]
    async fn test_attached_hub_receives_portfolio_flow() {
        let hub = hub();
        hub.attach();
        let (subscriber, mut rx) = hub.channel();
        hub.connect(subscriber).unwrap();
        drain(&mut rx);

        hub.portfolio.update([("X", dec!(110))], false).await;
        hub.portfolio.process_queue().await;

        let types: Vec<String> = drain(&mut rx)
            .iter()
            .map(|m| m["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["ticker", "portfolio", "chart_tick"]);
    }
}
