//! Portfolio Engine
//!
//! Consumes price ticks from independent feeds and produces:
//! - A coalesced, single-writer portfolio valuation
//! - Hourly OHLC candles of the total portfolio value
//! - One persisted daily close per calendar day
//! - Live fan-out of every change to connected dashboard clients
//! - Per-task health statistics
//!
//! Every long-running piece is a [`task::Task`] run under a
//! [`supervisor::Supervisor`], which restarts it after failures.
//!
//! # Architecture
//!
//! ```text
//!  Collectors (feeds)
//!        │ update(pairs)
//!   ┌────▼─────┐
//!   │Portfolio │  ← drains queue every 250ms, last write wins
//!   └──┬────┬──┘
//!      │    │ tick(total)
//!      │ ┌──▼─────┐      ┌─────────┐
//!      │ │History │─────►│ Storage │
//!      │ └──┬─────┘      └────▲────┘
//!      │    │                 │
//!      │    │      ┌──────────┴──┐
//!      ├────┼─────►│ DailyClose  │
//!      │    │      └─────────────┘
//!   ┌──▼────▼───────────────────┐
//!   │      Broadcast Hub        │ ← also receives Status
//!   └───────────────────────────┘
//! ```

pub mod bus;
pub mod candles;
pub mod collectors;
pub mod config;
pub mod daily_close;
pub mod events;
pub mod history;
pub mod hub;
pub mod portfolio;
pub mod snapshot;
pub mod status;
pub mod storage;
pub mod supervisor;
pub mod task;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
