//! Holdings and their valuation
//!
//! A `Position` stores what was bought (volume, cost basis, currency) and
//! the last observed market price. Everything else is derived on demand
//! against an exchange rate supplied by the caller.

use crate::asset::AssetClass;
use crate::numeric::{percent_of, round_money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single holding, keyed by ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    pub ticker: String,
    pub volume: Decimal,
    #[serde(alias = "price")]
    pub market_price: Decimal,
    /// Total cost basis in the home currency
    pub cost: Decimal,
    pub currency: String,
    pub asset: AssetClass,
}

impl Position {
    pub fn new(
        name: impl Into<String>,
        ticker: impl Into<String>,
        volume: Decimal,
        market_price: Decimal,
        cost: Decimal,
        currency: impl Into<String>,
        asset: AssetClass,
    ) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            volume,
            market_price,
            cost,
            currency: currency.into(),
            asset,
        }
    }

    /// Market value in the home currency.
    ///
    /// `fx_rate` converts one unit of the position currency into the home
    /// currency (1.0 for holdings already in the home currency).
    pub fn market_value(&self, fx_rate: Decimal) -> Decimal {
        round_money(self.volume * self.market_price * fx_rate)
    }

    pub fn net_return(&self, fx_rate: Decimal) -> Decimal {
        round_money(self.market_value(fx_rate) - self.cost)
    }

    /// Return relative to cost basis; zero when there is no cost basis.
    pub fn net_return_percent(&self, fx_rate: Decimal) -> Decimal {
        round_money(percent_of(self.market_value(fx_rate) - self.cost, self.cost))
    }

    /// Serializable view of this position at the given exchange rate.
    pub fn valuation(&self, fx_rate: Decimal) -> PositionValuation {
        PositionValuation {
            name: self.name.clone(),
            ticker: self.ticker.clone(),
            volume: self.volume,
            cost: self.cost,
            market_price: self.market_price,
            market_value: self.market_value(fx_rate),
            net_return: self.net_return(fx_rate),
            net_return_percent: self.net_return_percent(fx_rate),
            asset: self.asset.label().to_string(),
            currency: self.currency.clone(),
            allocation: None,
        }
    }
}

/// Derived, read-only rendering of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub name: String,
    pub ticker: String,
    pub volume: Decimal,
    pub cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub net_return: Decimal,
    pub net_return_percent: Decimal,
    /// Asset class display label
    pub asset: String,
    pub currency: String,
    /// Share of total portfolio value, only set inside a full snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<Decimal>,
}
