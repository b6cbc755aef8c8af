//! Exchange rates
//!
//! Rates are quoted as home currency per unit of the foreign currency and
//! can be addressed either by display name (`"USD"`, what positions carry
//! in their `currency` field) or by feed ticker.

use crate::asset::AssetClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tracked exchange rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Display name, matched against `Position::currency`
    pub name: String,
    pub ticker: String,
    pub market_price: Decimal,
}

impl ExchangeRate {
    pub fn new(name: impl Into<String>, ticker: impl Into<String>, market_price: Decimal) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            market_price,
        }
    }

    /// Wire representation, tagged with the Forex asset class.
    pub fn quote(&self) -> RateQuote {
        RateQuote {
            name: self.name.clone(),
            ticker: self.ticker.clone(),
            market_price: self.market_price,
            asset: AssetClass::Forex.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub name: String,
    pub ticker: String,
    pub market_price: Decimal,
    pub asset: String,
}

/// Exchange rates indexed by name, with a secondary ticker index.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRates {
    rates: BTreeMap<String, ExchangeRate>,
    /// ticker -> name
    by_ticker: BTreeMap<String, String>,
}

impl ExchangeRates {
    pub fn new(rates: impl IntoIterator<Item = ExchangeRate>) -> Self {
        let mut this = Self::default();
        for rate in rates {
            this.by_ticker.insert(rate.ticker.clone(), rate.name.clone());
            this.rates.insert(rate.name.clone(), rate);
        }
        this
    }

    fn resolve<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.rates.contains_key(key) {
            Some(key)
        } else {
            self.by_ticker.get(key).map(String::as_str)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    /// Look up by display name first, then by ticker.
    pub fn get(&self, key: &str) -> Option<&ExchangeRate> {
        let name = self.resolve(key)?;
        self.rates.get(name)
    }

    /// Set the price of a tracked rate, returning the updated rate.
    pub fn set_price(&mut self, key: &str, market_price: Decimal) -> Option<&ExchangeRate> {
        let name = self.resolve(key)?.to_owned();
        let rate = self.rates.get_mut(&name)?;
        rate.market_price = market_price;
        Some(rate)
    }

    /// Conversion factor from `currency` to `home`.
    pub fn rate_for(&self, currency: &str, home: &str) -> Option<Decimal> {
        if currency == home {
            return Some(Decimal::ONE);
        }
        self.rates.get(currency).map(|r| r.market_price)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangeRate> {
        self.rates.values()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
