//! Event definitions
//!
//! Every event serializes to the subscriber wire format
//! `{"type": "<event type>", "data": <payload>}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use types::forex::RateQuote;
use types::position::PositionValuation;

use crate::candles::CandleStick;
use crate::snapshot::{IndexQuote, PortfolioSnapshot};
use crate::task::StatsSnapshot;

/// Event type discriminant, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Portfolio,
    Ticker,
    Index,
    Chart,
    ChartTick,
    Close,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Status => "status",
            EventType::Portfolio => "portfolio",
            EventType::Ticker => "ticker",
            EventType::Index => "index",
            EventType::Chart => "chart",
            EventType::ChartTick => "chart_tick",
            EventType::Close => "close",
        }
    }
}

/// Payload of a Ticker event: one position or one exchange rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TickerUpdate {
    Position(PositionValuation),
    Rate(RateQuote),
}

/// An immutable event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Task statistics keyed by task name
    Status(BTreeMap<String, StatsSnapshot>),
    Portfolio(Arc<PortfolioSnapshot>),
    Ticker(TickerUpdate),
    /// All index quotes keyed by ticker
    Index(BTreeMap<String, IndexQuote>),
    /// Full bounded history, oldest first
    Chart(Vec<CandleStick>),
    /// The active bucket after a tick
    ChartTick(CandleStick),
    /// A finalized bucket, for persistence
    Close(CandleStick),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Status(_) => EventType::Status,
            Event::Portfolio(_) => EventType::Portfolio,
            Event::Ticker(_) => EventType::Ticker,
            Event::Index(_) => EventType::Index,
            Event::Chart(_) => EventType::Chart,
            Event::ChartTick(_) => EventType::ChartTick,
            Event::Close(_) => EventType::Close,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
