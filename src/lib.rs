//! Balance-funded Telegram Stars and Premium storefront.
//!
//! Users top up an internal balance through external payment gateways and
//! spend it on Stars or Premium, which are bought on Fragment and paid for
//! with TON from the service wallet.

pub mod api;
pub mod chains;
pub mod config;
pub mod conversation;
pub mod database;
pub mod delivery;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
