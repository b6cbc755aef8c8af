//! Asset classes
//!
//! Config files name asset classes by their upper-case identifier
//! (`INDEX_FUND`); snapshots and composition maps use the display label
//! (`Index Fund`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset class of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Cash,
    Equity,
    UnlistedEquity,
    /// Actively managed mutual fund
    Fund,
    IndexFund,
    Etf,
    IndexEtf,
    Forex,
}

impl AssetClass {
    /// Human readable label used on the wire.
    pub fn label(&self) -> &'static str {
        match self {
            AssetClass::Cash => "Cash",
            AssetClass::Equity => "Equity",
            AssetClass::UnlistedEquity => "Equity (Unlisted)",
            AssetClass::Fund => "Mutual Fund",
            AssetClass::IndexFund => "Index Fund",
            AssetClass::Etf => "ETF",
            AssetClass::IndexEtf => "Index ETF",
            AssetClass::Forex => "Forex",
        }
    }

    pub fn all() -> &'static [AssetClass] {
        &[
            AssetClass::Cash,
            AssetClass::Equity,
            AssetClass::UnlistedEquity,
            AssetClass::Fund,
            AssetClass::IndexFund,
            AssetClass::Etf,
            AssetClass::IndexEtf,
            AssetClass::Forex,
        ]
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
