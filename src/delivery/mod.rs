//! Delivery platform integration (recipient lookup, purchase requests and
//! the on-chain payment intent).

pub mod errors;
pub mod fragment;
pub mod payload;
pub mod traits;

pub use errors::{FragmentError, FragmentResult};
pub use fragment::{FragmentClient, FragmentConfig};
pub use traits::{DeliveryPlatform, TransactionIntent};
