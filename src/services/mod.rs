//! Services module for business logic and integrations

pub mod fulfillment;
pub mod notification;
pub mod pricing;
pub mod profit;
pub mod settlement;
pub mod topup;
pub mod webhook_processor;

pub use fulfillment::{
    FulfillmentEngine, FulfillmentError, PurchaseKind, PurchaseReceipt, PurchaseRequest,
};
pub use notification::{LogNotifier, OperatorAlert, OperatorAlerts, UserNotifier};
pub use pricing::{PricingService, Quote};
pub use profit::{ProfitEstimate, ProfitEstimator};
pub use settlement::{SettlementOutcome, SettlementService, SettlementSource};
pub use topup::{TopUpError, TopUpInvoice, TopUpRequest, TopUpService};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
