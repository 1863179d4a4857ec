//! TON wallet v4r2 support: the HTTP client and the signing hot wallet,
//! built on `tonlib-core`.

pub mod client;
pub mod config;
pub mod errors;
pub mod wallet;

pub use client::TonClient;
pub use config::TonConfig;
pub use errors::{TonError, TonResult};
pub use wallet::TonWallet;
