use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    GatewayKind, Invoice, InvoiceRequest, SettlementMode, StatusQuery, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice>;

    /// `true` once the gateway reports the invoice as paid.
    async fn check_status(&self, query: StatusQuery) -> PaymentResult<bool>;

    fn kind(&self) -> GatewayKind;

    fn settlement_mode(&self) -> SettlementMode {
        self.kind().settlement_mode()
    }

    /// Push gateways override this; poll gateways have no webhook.
    fn verify_webhook(
        &self,
        _payload: &[u8],
        _signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        Err(PaymentError::NotConfigured {
            gateway: format!("{} webhook", self.kind()),
        })
    }

    fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
        Err(PaymentError::NotConfigured {
            gateway: format!("{} webhook", self.kind()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice> {
            Ok(Invoice {
                pay_url: format!("https://pay.example/{}", request.order_id),
                order_id: request.order_id,
                external_id: None,
            })
        }

        async fn check_status(&self, _query: StatusQuery) -> PaymentResult<bool> {
            Ok(true)
        }

        fn kind(&self) -> GatewayKind {
            GatewayKind::LolzTeam
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let invoice = gateway
            .create_invoice(InvoiceRequest {
                user_id: 1,
                amount: Decimal::from(100),
                order_id: "starbot-1-1234".to_string(),
            })
            .await
            .expect("invoice creation should succeed");
        assert_eq!(invoice.pay_url, "https://pay.example/starbot-1-1234");
        assert_eq!(gateway.settlement_mode(), SettlementMode::Poll);
    }

    #[test]
    fn poll_gateways_reject_webhooks_by_default() {
        let gateway = MockGateway;
        assert!(matches!(
            gateway.verify_webhook(b"{}", "sig"),
            Err(PaymentError::NotConfigured { .. })
        ));
    }
}
