pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{GatewayRegistry, PaymentFactoryConfig};
pub use provider::PaymentGateway;
pub use types::{GatewayKind, Invoice, InvoiceRequest, SettlementMode, StatusQuery, WebhookEvent};
