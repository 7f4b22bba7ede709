//! Client for a token marketplace whose state lives on an external ledger.
//!
//! The ledger and the token contract are authoritative. This crate rebuilds
//! displayable views from their reads and drives the value-bearing
//! transactions against them. [`catalog`] and [`history`] reconstruct the buy
//! surface and an account's purchases, [`pricing`] and [`metadata`] resolve
//! the pieces each entry needs, [`orchestrator`] submits purchases, relists
//! and mints, and [`cache`] holds the last good views with their failure
//! state.
//!
//! Applications usually construct a [`session::MarketplaceSession`] from a
//! [`config::MarketplaceConfig`], a ledger transport from [`ledger`] and an
//! identity channel, then call into it.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod history;
pub mod ledger;
pub mod metadata;
pub mod orchestrator;
pub mod pricing;
pub mod session;
pub mod types;
pub mod units;
pub mod views;

pub use crate::errors::{FailureKind, MarketError, MarketResult};
pub use crate::session::{AccountWatcher, MarketplaceSession};
pub use crate::units::Amount;
