//! Price feeds
//!
//! A collector is a [`Task`](crate::task::Task) that pushes observations
//! into [`Portfolio::update`](crate::portfolio::Portfolio::update). Its
//! first observation of every run is submitted with `immediate = true`,
//! which seeds prices without a Portfolio event or a history tick.

pub mod simulator;

pub use simulator::Simulator;
