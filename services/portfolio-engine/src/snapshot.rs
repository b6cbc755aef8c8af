//! Portfolio valuation snapshots
//!
//! A snapshot is a self-consistent rendering of the whole portfolio at one
//! instant: totals, per-position detail with allocation, and the asset
//! class composition. Snapshots are immutable once built and are shared
//! behind an `Arc`.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::forex::{ExchangeRates, RateQuote};
use types::numeric::{percent_of, round_dp, round_money, ALLOCATION_PRECISION};
use types::position::{Position, PositionValuation};

/// Latest quote of a market index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub ticker: String,
    pub name: String,
    pub last: Decimal,
    /// Daily change, percent
    pub change: Decimal,
    /// Seven day change, percent
    pub change_7d: Decimal,
}

/// Full valuation of the portfolio.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Total market value in the home currency, whole units
    pub market_value: Decimal,
    pub net_return: Decimal,
    pub net_return_percent: Decimal,
    /// Total cost basis, whole units
    pub cost: Decimal,
    pub positions: Vec<PositionValuation>,
    /// Exchange rates keyed by display name
    pub exchange_rates: BTreeMap<String, RateQuote>,
    /// Allocation percent keyed by asset class label
    pub composition: BTreeMap<String, Decimal>,
    pub indices: BTreeMap<String, IndexQuote>,
}

impl PortfolioSnapshot {
    /// Value `positions` against `rates`.
    ///
    /// Positions whose currency has no rate are valued at zero; the
    /// portfolio rejects such positions at construction.
    pub fn build<'a>(
        positions: impl IntoIterator<Item = &'a Position>,
        rates: &ExchangeRates,
        home_currency: &str,
        indices: &BTreeMap<String, IndexQuote>,
    ) -> Self {
        let mut valued: Vec<PositionValuation> = positions
            .into_iter()
            .map(|p| {
                let fx = rates
                    .rate_for(&p.currency, home_currency)
                    .unwrap_or(Decimal::ZERO);
                p.valuation(fx)
            })
            .collect();

        let cost = round_dp(valued.iter().map(|p| p.cost).sum(), 0);
        let market_value = round_dp(valued.iter().map(|p| p.market_value).sum(), 0);
        let net_return = market_value - cost;
        let denominator = if cost.is_zero() { Decimal::ONE } else { cost };
        let net_return_percent = round_money(percent_of(net_return, denominator));

        let mut composition: BTreeMap<String, Decimal> = BTreeMap::new();
        for position in &mut valued {
            let allocation = percent_of(position.market_value, market_value);
            position.allocation = Some(round_dp(allocation, ALLOCATION_PRECISION));
            *composition.entry(position.asset.clone()).or_default() += allocation;
        }
        for share in composition.values_mut() {
            *share = round_dp(*share, ALLOCATION_PRECISION);
        }

        Self {
            market_value,
            net_return,
            net_return_percent,
            cost,
            positions: valued,
            exchange_rates: rates
                .iter()
                .map(|r| (r.name.clone(), r.quote()))
                .collect(),
            composition,
            indices: indices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::asset::AssetClass;
    use types::forex::ExchangeRate;

    fn rates() -> ExchangeRates {
        ExchangeRates::new(vec![ExchangeRate::new("USD", "USDNOK", dec!(10))])
    }

    fn positions() -> Vec<Position> {
        vec![
            Position::new("Fund", "F", dec!(10), dec!(100), dec!(900), "NOK", AssetClass::Fund),
            Position::new("Stock", "S", dec!(5), dec!(20), dec!(1200), "USD", AssetClass::Equity),
            Position::new("Cash", "C", dec!(1), dec!(1000), dec!(1000), "NOK", AssetClass::Cash),
        ]
    }

    #[test]
    fn test_totals() {
        let snap = PortfolioSnapshot::build(&positions(), &rates(), "NOK", &BTreeMap::new());
        // 1000 + 5*20*10 + 1000
        assert_eq!(snap.market_value, dec!(3000));
        assert_eq!(snap.cost, dec!(3100));
        assert_eq!(snap.net_return, dec!(-100));
        assert_eq!(snap.net_return_percent, dec!(-3.23));
    }

    #[test]
    fn test_allocation_and_composition() {
        let snap = PortfolioSnapshot::build(&positions(), &rates(), "NOK", &BTreeMap::new());
        let allocations: Vec<Decimal> =
            snap.positions.iter().map(|p| p.allocation.unwrap()).collect();
        assert_eq!(allocations, vec![dec!(33.3), dec!(33.3), dec!(33.3)]);

        assert_eq!(snap.composition["Mutual Fund"], dec!(33.3));
        assert_eq!(snap.composition["Equity"], dec!(33.3));
        assert_eq!(snap.composition["Cash"], dec!(33.3));
        assert_eq!(snap.exchange_rates["USD"].ticker, "USDNOK");
    }

    #[test]
    fn test_composition_sums_unrounded_allocations() {
        let positions = vec![
            Position::new("A", "A", dec!(1), dec!(1), dec!(1), "NOK", AssetClass::Equity),
            Position::new("B", "B", dec!(1), dec!(1), dec!(1), "NOK", AssetClass::Equity),
            Position::new("C", "C", dec!(1), dec!(1), dec!(1), "NOK", AssetClass::Cash),
        ];
        let snap = PortfolioSnapshot::build(&positions, &rates(), "NOK", &BTreeMap::new());
        // 33.33.. + 33.33.. = 66.66.. -> 66.7, not 33.3 + 33.3
        assert_eq!(snap.composition["Equity"], dec!(66.7));
    }

    #[test]
    fn test_empty_portfolio() {
        let snap = PortfolioSnapshot::build(&[], &rates(), "NOK", &BTreeMap::new());
        assert_eq!(snap.market_value, Decimal::ZERO);
        assert_eq!(snap.net_return_percent, Decimal::ZERO);
        assert!(snap.composition.is_empty());
    }

    #[test]
    fn test_zero_value_allocation() {
        let positions = vec![Position::new(
            "Worthless", "W", dec!(10), Decimal::ZERO, dec!(50), "NOK", AssetClass::UnlistedEquity,
        )];
        let snap = PortfolioSnapshot::build(&positions, &rates(), "NOK", &BTreeMap::new());
        assert_eq!(snap.positions[0].allocation, Some(Decimal::ZERO));
        assert_eq!(snap.net_return_percent, dec!(-100.00));
    }
}
