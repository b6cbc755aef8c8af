//! Random-walk feed
//!
//! Moves the price of a randomly chosen position by up to
//! `max_step_bps` basis points, then pauses for a random time up to
//! `max_interval`. Useful for running the dashboard without market access.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{debug, error};
use types::numeric::round_money;

use crate::config::SimulatorConfig;
use crate::portfolio::Portfolio;
use crate::task::{Task, TaskContext, TaskError};

pub struct Simulator {
    ctx: TaskContext,
    portfolio: Arc<Portfolio>,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl Simulator {
    pub fn new(portfolio: Arc<Portfolio>, config: SimulatorConfig) -> Self {
        Self::with_rng(portfolio, config, StdRng::from_entropy())
    }

    /// Deterministic walk, for tests.
    pub fn seeded(portfolio: Arc<Portfolio>, config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(portfolio, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(portfolio: Arc<Portfolio>, config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            ctx: TaskContext::new("Simulator"),
            portfolio,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Next observation and the pause that follows it.
    fn next_tick(&self) -> (Option<(String, Decimal)>, Duration) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let max_ms = self.config.max_interval.as_millis() as u64;
        let pause = Duration::from_millis(rng.gen_range(0..=max_ms));

        let prices = self.portfolio.position_prices();
        if prices.is_empty() {
            return (None, pause);
        }
        let (ticker, last) = &prices[rng.gen_range(0..prices.len())];
        let bound = i64::from(self.config.max_step_bps);
        let step = Decimal::new(rng.gen_range(-bound..=bound), 4);
        let price = round_money(*last + *last * step);
        (Some((ticker.clone(), price)), pause)
    }
}

#[async_trait]
impl Task for Simulator {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn run(&self) -> Result<(), TaskError> {
        let mut first = true;
        loop {
            let (tick, pause) = self.next_tick();
            match tick {
                Some((ticker, price)) => {
                    debug!(ticker = %ticker, price = %price, "Simulated tick");
                    self.portfolio.update([(ticker, price)], first).await;
                    self.ctx.stats().record_message();
                    first = false;
                }
                None => error!(task = self.ctx.name(), "Cannot simulate, no positions in portfolio"),
            }
            if !self.ctx.sleep(pause).await {
                return Ok(());
            }
        }
    }

    async fn stop(&self) {
        self.ctx.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::config::{HistoryConfig, PortfolioSettings};
    use crate::events::{Event, EventType};
    use crate::history::History;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;
    use types::asset::AssetClass;
    use types::position::Position;

    fn portfolio(positions: Vec<Position>) -> Arc<Portfolio> {
        let history = Arc::new(History::new(
            &HistoryConfig::default(),
            chrono_tz::UTC,
            Arc::new(MemoryStore::new()),
        ));
        Arc::new(Portfolio::new(positions, PortfolioSettings::default(), history).unwrap())
    }

    fn position() -> Position {
        Position::new("X", "X", dec!(10), dec!(100), dec!(900), "NOK", AssetClass::Equity)
    }

    #[test]
    fn test_step_stays_within_bound() {
        let sim = Simulator::seeded(portfolio(vec![position()]), SimulatorConfig::default(), 7);
        for _ in 0..200 {
            let (tick, pause) = sim.next_tick();
            let (ticker, price) = tick.unwrap();
            assert_eq!(ticker, "X");
            assert!(price >= dec!(99) && price <= dec!(101));
            assert_eq!(price, price.round_dp(2));
            assert!(pause <= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_rest_are_queued() {
        let portfolio = portfolio(vec![position()]);
        let tickers = Arc::new(Mutex::new(0u32));
        let sink = tickers.clone();
        portfolio.on(
            EventType::Ticker,
            handler_fn(move |event| {
                assert!(matches!(event, Event::Ticker(_)));
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
        );

        let config = SimulatorConfig {
            max_interval: Duration::from_millis(100),
            max_step_bps: 100,
        };
        let sim = Arc::new(Simulator::seeded(portfolio.clone(), config, 42));
        let handle = {
            let sim = sim.clone();
            tokio::spawn(async move { sim.run().await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        sim.stop().await;
        handle.await.unwrap().unwrap();

        let sent = sim.ctx.stats().snapshot().messages;
        assert!(sent > 1);
        // Only the first observation bypassed the queue.
        assert!(*tickers.lock().unwrap() <= 1);
        assert_eq!(portfolio.pending() as u64, sent - 1);
        assert!(portfolio.history().active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_portfolio_keeps_running() {
        let portfolio = portfolio(Vec::new());
        let sim = Arc::new(Simulator::seeded(portfolio.clone(), SimulatorConfig::default(), 1));
        let handle = {
            let sim = sim.clone();
            tokio::spawn(async move { sim.run().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        sim.stop().await;
        handle.await.unwrap().unwrap();

        assert_eq!(sim.ctx.stats().snapshot().messages, 0);
        assert_eq!(portfolio.pending(), 0);
    }
}
