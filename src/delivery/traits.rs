use crate::delivery::errors::FragmentResult;
use crate::services::fulfillment::PurchaseKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the platform wants paid on-chain to complete a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub address: String,
    pub amount_nano: u64,
    /// Base64 message body; its text becomes the transfer comment
    pub payload: String,
}

/// A platform able to gift stars or premium to a chat user, paid in TON.
///
/// The three calls are made in order for one purchase; each step's output
/// feeds the next.
#[async_trait]
pub trait DeliveryPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Platform-side recipient id for `handle`.
    async fn resolve_recipient(&self, handle: &str, kind: &PurchaseKind) -> FragmentResult<String>;

    /// Opens a purchase request and returns its id.
    async fn init_request(
        &self,
        handle: &str,
        recipient: &str,
        kind: &PurchaseKind,
    ) -> FragmentResult<String>;

    async fn transaction_intent(
        &self,
        recipient: &str,
        request_id: &str,
        kind: &PurchaseKind,
    ) -> FragmentResult<TransactionIntent>;

    /// Whether the platform session cookies are still accepted.
    async fn check_session(&self) -> FragmentResult<bool>;
}
