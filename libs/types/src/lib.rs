//! Types library for the portfolio valuation engine
//!
//! Domain types shared by the engine and the gateway: what a holding is,
//! how it is valued, and the currencies it can be denominated in.
//!
//! # Modules
//! - `asset`: Asset classes and their display labels
//! - `numeric`: Rounding rules for money and percentages
//! - `position`: Holdings and their derived valuation
//! - `forex`: Exchange rates, looked up by name or ticker
//! - `errors`: Error taxonomy

pub mod asset;
pub mod errors;
pub mod forex;
pub mod numeric;
pub mod position;
