//! Error types for portfolio construction
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while assembling a portfolio from its holdings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error("Duplicate ticker: {ticker}")]
    DuplicateTicker { ticker: String },

    #[error("Position {ticker} is held in {currency} which has no exchange rate")]
    UnknownCurrency { ticker: String, currency: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_currency_display() {
        let err = ValuationError::UnknownCurrency {
            ticker: "AAPL".to_string(),
            currency: "USD".to_string(),
        };
        assert!(err.to_string().contains("AAPL"));
        assert!(err.to_string().contains("USD"));
    }
}
