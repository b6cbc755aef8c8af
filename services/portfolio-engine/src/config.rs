//! Engine configuration
//!
//! Built once at startup and handed to each component constructor. Each
//! component takes only its own section.

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Deserialize;
use types::forex::ExchangeRate;
use types::position::Position;

/// Errors raised while loading configuration documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid portfolio document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration for every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timezone for candle boundaries and the daily close hour.
    pub timezone: Tz,
    pub portfolio: PortfolioSettings,
    pub history: HistoryConfig,
    pub daily_close: DailyCloseConfig,
    pub supervisor: SupervisorConfig,
    pub hub: HubConfig,
    pub simulator: SimulatorConfig,
    /// Period of the status push.
    pub status_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Oslo,
            portfolio: PortfolioSettings::default(),
            history: HistoryConfig::default(),
            daily_close: DailyCloseConfig::default(),
            supervisor: SupervisorConfig::default(),
            hub: HubConfig::default(),
            simulator: SimulatorConfig::default(),
            status_interval: Duration::from_secs(1),
        }
    }
}

/// Configuration for the portfolio aggregator.
#[derive(Debug, Clone)]
pub struct PortfolioSettings {
    /// Currency with an implicit exchange rate of 1.
    pub home_currency: String,
    /// Period of the queue drain cycle.
    pub processing_interval: Duration,
    /// Exchange rates tracked from startup, with initial prices.
    pub exchange_rates: Vec<ExchangeRate>,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            home_currency: "NOK".to_string(),
            processing_interval: Duration::from_millis(250),
            exchange_rates: vec![
                ExchangeRate::new("SEK", "SEK", Decimal::ONE),
                ExchangeRate::new("EUR", "EUR", Decimal::from(10)),
                ExchangeRate::new("USD", "USD", Decimal::new(85, 1)),
            ],
        }
    }
}

/// Configuration for the candle history.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Bucket length. Must divide a day evenly.
    pub period: Duration,
    /// Maximum number of buckets retained.
    pub buffer: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3600),
            buffer: 96,
        }
    }
}

/// Configuration for the daily close scheduler.
#[derive(Debug, Clone)]
pub struct DailyCloseConfig {
    /// Local hour of day at which the day is closed.
    pub close_hour: u32,
    /// Poll period while no valuation has been observed yet.
    pub poll_interval: Duration,
}

impl Default for DailyCloseConfig {
    fn default() -> Self {
        Self {
            close_hour: 18,
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for task supervision.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Runs shorter than this are followed by a sleep of the same length
    /// before the next restart.
    pub min_restart_wait: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_restart_wait: Duration::from_secs(10),
        }
    }
}

/// Configuration for the broadcast hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound messages buffered per subscriber before deliveries fail.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Configuration for the random-walk feed.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Upper bound of the random pause between ticks.
    pub max_interval: Duration,
    /// Largest move per tick, in basis points of the last price.
    pub max_step_bps: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_interval: Duration::from_secs(1),
            max_step_bps: 100,
        }
    }
}

/// Holdings document, `{"positions": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioFile {
    pub positions: Vec<Position>,
}

impl PortfolioFile {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }
}
