//! Portfolio aggregator
//!
//! Producers push `(ticker, price)` pairs onto a shared queue. The
//! aggregator's run loop drains the queue on a fixed period, keeps only the
//! latest price per ticker, applies the result to positions and exchange
//! rates, and publishes:
//! - one `Ticker` event per applied update,
//! - one `Portfolio` event per cycle that changed the valuation,
//! - the new total value to the candle history.
//!
//! Readers never see the mutable state. The latest [`PortfolioSnapshot`]
//! is published through a watch channel before any event of a cycle goes
//! out, so a reader that observes an event also observes its snapshot.
//! Batches are published one at a time: an immediate update that arrives
//! while a cycle is emitting waits until the cycle's last event is out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info};
use types::errors::ValuationError;
use types::forex::ExchangeRates;
use types::position::Position;

use crate::bus::{EventBus, EventHandler};
use crate::config::PortfolioSettings;
use crate::events::{Event, EventType, TickerUpdate};
use crate::history::History;
use crate::snapshot::{IndexQuote, PortfolioSnapshot};
use crate::task::{Task, TaskContext, TaskError};

/// A price observation waiting on the inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub ticker: String,
    pub price: Decimal,
}

impl PendingUpdate {
    pub fn new(ticker: impl Into<String>, price: Decimal) -> Self {
        Self {
            ticker: ticker.into(),
            price,
        }
    }
}

/// Collapse a drained queue to the last observation per ticker.
///
/// The result is ordered by the position of each ticker's last
/// observation in `updates`.
pub fn coalesce(updates: Vec<PendingUpdate>) -> Vec<PendingUpdate> {
    let mut latest: BTreeMap<String, (usize, Decimal)> = BTreeMap::new();
    for (sequence, update) in updates.into_iter().enumerate() {
        latest.insert(update.ticker, (sequence, update.price));
    }
    let mut ordered: Vec<(usize, PendingUpdate)> = latest
        .into_iter()
        .map(|(ticker, (sequence, price))| (sequence, PendingUpdate { ticker, price }))
        .collect();
    ordered.sort_by_key(|(sequence, _)| *sequence);
    ordered.into_iter().map(|(_, update)| update).collect()
}

struct PortfolioState {
    /// Configuration order
    positions: Vec<Position>,
    by_ticker: BTreeMap<String, usize>,
    rates: ExchangeRates,
    indices: BTreeMap<String, IndexQuote>,
    /// Currencies held by at least one position
    held_currencies: BTreeSet<String>,
}

impl PortfolioState {
    fn snapshot(&self, home_currency: &str) -> PortfolioSnapshot {
        PortfolioSnapshot::build(&self.positions, &self.rates, home_currency, &self.indices)
    }
}

/// Outcome of applying one batch to the state.
struct Applied {
    tickers: Vec<TickerUpdate>,
    affects_valuation: bool,
    snapshot: Option<Arc<PortfolioSnapshot>>,
}

pub struct Portfolio {
    ctx: TaskContext,
    bus: EventBus,
    settings: PortfolioSettings,
    state: Mutex<PortfolioState>,
    queue: Mutex<Vec<PendingUpdate>>,
    snapshot_tx: watch::Sender<Arc<PortfolioSnapshot>>,
    /// Held from applying a batch until its last event is out.
    publish_lock: tokio::sync::Mutex<()>,
    history: Arc<History>,
}

impl Portfolio {
    /// Build the aggregator. Tickers must be unique and every currency
    /// other than the home currency needs a tracked exchange rate.
    pub fn new(
        positions: Vec<Position>,
        settings: PortfolioSettings,
        history: Arc<History>,
    ) -> Result<Self, ValuationError> {
        let rates = ExchangeRates::new(settings.exchange_rates.iter().cloned());

        let mut by_ticker = BTreeMap::new();
        let mut held_currencies = BTreeSet::new();
        for (index, position) in positions.iter().enumerate() {
            if by_ticker.insert(position.ticker.clone(), index).is_some() {
                return Err(ValuationError::DuplicateTicker {
                    ticker: position.ticker.clone(),
                });
            }
            if rates.rate_for(&position.currency, &settings.home_currency).is_none() {
                return Err(ValuationError::UnknownCurrency {
                    ticker: position.ticker.clone(),
                    currency: position.currency.clone(),
                });
            }
            held_currencies.insert(position.currency.clone());
        }

        let state = PortfolioState {
            positions,
            by_ticker,
            rates,
            indices: BTreeMap::new(),
            held_currencies,
        };
        let (snapshot_tx, _) = watch::channel(Arc::new(state.snapshot(&settings.home_currency)));

        Ok(Self {
            ctx: TaskContext::new("Portfolio"),
            bus: EventBus::new(),
            settings,
            state: Mutex::new(state),
            queue: Mutex::new(Vec::new()),
            publish_lock: tokio::sync::Mutex::new(()),
            snapshot_tx,
            history,
        })
    }

    pub fn on(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> bool {
        self.bus.subscribe(event_type, handler)
    }

    pub fn off(&self, event_type: EventType, handler: &Arc<dyn EventHandler>) -> bool {
        self.bus.unsubscribe(event_type, handler)
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    /// Latest published valuation.
    pub fn snapshot(&self) -> Arc<PortfolioSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// `(ticker, market_price)` of every position, from the latest snapshot.
    pub fn position_prices(&self) -> Vec<(String, Decimal)> {
        self.snapshot()
            .positions
            .iter()
            .map(|p| (p.ticker.clone(), p.market_price))
            .collect()
    }

    /// Number of updates waiting for the next cycle.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_state(&self) -> MutexGuard<'_, PortfolioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<PendingUpdate>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit price observations.
    ///
    /// With `immediate` the pairs are applied before returning. Ticker
    /// events still go out, but neither a Portfolio event nor a history
    /// tick; collectors use this for their first observation.
    pub async fn update<I, S>(&self, pairs: I, immediate: bool)
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let updates: Vec<PendingUpdate> = pairs
            .into_iter()
            .map(|(ticker, price)| PendingUpdate::new(ticker, price))
            .collect();
        if immediate {
            self.process(updates, true).await;
        } else {
            self.lock_queue().extend(updates);
        }
    }

    /// Replace the quote of one index and publish the full index map.
    pub async fn update_index(
        &self,
        ticker: impl Into<String>,
        name: impl Into<String>,
        last: Decimal,
        change: Decimal,
        change_7d: Decimal,
    ) {
        let ticker = ticker.into();
        let _publishing = self.publish_lock.lock().await;
        let indices = {
            let mut state = self.lock_state();
            state.indices.insert(
                ticker.clone(),
                IndexQuote {
                    ticker,
                    name: name.into(),
                    last,
                    change,
                    change_7d,
                },
            );
            self.snapshot_tx
                .send_replace(Arc::new(state.snapshot(&self.settings.home_currency)));
            state.indices.clone()
        };
        self.emit(Event::Index(indices)).await;
        self.ctx.stats().record_message();
    }

    /// Drain the queue and apply the latest price per ticker.
    pub async fn process_queue(&self) {
        let drained = std::mem::take(&mut *self.lock_queue());
        if drained.is_empty() {
            return;
        }
        let received = drained.len();
        let updates = coalesce(drained);
        debug!(received, applied = updates.len(), "Processing queued updates");
        self.process(updates, false).await;
    }

    fn apply(&self, updates: Vec<PendingUpdate>) -> Applied {
        let mut state = self.lock_state();
        let mut tickers = Vec::new();
        let mut affects_valuation = false;

        for PendingUpdate { ticker, price } in updates {
            if let Some(rate) = state.rates.set_price(&ticker, price) {
                let quote = rate.quote();
                affects_valuation |= state.held_currencies.contains(&quote.name);
                tickers.push(TickerUpdate::Rate(quote));
                continue;
            }

            let Some(&index) = state.by_ticker.get(&ticker) else {
                debug!(ticker = %ticker, "Dropping update for untracked ticker");
                continue;
            };
            let fx = {
                let position = &state.positions[index];
                if position.market_price == price {
                    continue;
                }
                state
                    .rates
                    .rate_for(&position.currency, &self.settings.home_currency)
                    .unwrap_or(Decimal::ZERO)
            };
            let position = &mut state.positions[index];
            position.market_price = price;
            tickers.push(TickerUpdate::Position(position.valuation(fx)));
            affects_valuation = true;
        }

        let snapshot = if tickers.is_empty() {
            None
        } else {
            let snapshot = Arc::new(state.snapshot(&self.settings.home_currency));
            self.snapshot_tx.send_replace(snapshot.clone());
            Some(snapshot)
        };

        Applied {
            tickers,
            affects_valuation,
            snapshot,
        }
    }

    async fn process(&self, updates: Vec<PendingUpdate>, immediate: bool) {
        let _publishing = self.publish_lock.lock().await;
        let Applied {
            tickers,
            affects_valuation,
            snapshot,
        } = self.apply(updates);

        for ticker in tickers {
            self.emit(Event::Ticker(ticker)).await;
            self.ctx.stats().record_message();
        }

        if immediate || !affects_valuation {
            return;
        }
        if let Some(snapshot) = snapshot {
            let market_value = snapshot.market_value;
            self.emit(Event::Portfolio(snapshot)).await;
            self.ctx.stats().record_message();
            self.history.tick(market_value).await;
        }
    }

    async fn emit(&self, event: Event) {
        let outcome = self.bus.publish(event).await;
        self.ctx.stats().record_errors(outcome.failed);
    }
}

#[async_trait]
impl Task for Portfolio {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn run(&self) -> Result<(), TaskError> {
        info!(
            positions = self.lock_state().positions.len(),
            interval_ms = self.settings.processing_interval.as_millis() as u64,
            "Portfolio processing started"
        );
        while self.ctx.sleep(self.settings.processing_interval).await {
            self.process_queue().await;
        }
        Ok(())
    }

    async fn stop(&self) {
        self.ctx.request_stop();
    }
}
