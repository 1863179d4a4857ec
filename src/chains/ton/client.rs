//! HTTP access to the TON network: toncenter for balances, tonapi for the
//! wallet seqno and message submission.

use crate::chains::ton::config::TonConfig;
use crate::chains::ton::errors::{TonError, TonResult};
use crate::logging::mask_wallet_address;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TonClient {
    http_client: Client,
    config: TonConfig,
}

#[derive(Debug, Deserialize)]
struct ToncenterResponse {
    ok: bool,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeqnoResponse {
    seqno: u32,
}

/// toncenter reports balances as a decimal string, sometimes a number.
fn parse_nano(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Number(n) => n.as_u64(),
        _ => None,
    }
}

impl TonClient {
    pub fn new(config: TonConfig) -> TonResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("Starfund-Backend/1.0")
            .build()
            .map_err(|e| TonError::config_error(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            toncenter = %config.toncenter_url,
            tonapi = %config.tonapi_url,
            "TON client initialized"
        );

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &TonConfig {
        &self.config
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        request: RequestBuilder,
    ) -> TonResult<T> {
        let seconds = self.config.request_timeout.as_secs();
        let response = timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| TonError::TimeoutError { seconds })?
            .map_err(|e| TonError::network_error(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TonError::network_error(e.to_string()))?;

        if !status.is_success() {
            warn!(service, status = status.as_u16(), "TON API request failed");
            return Err(TonError::ApiError {
                service,
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            TonError::serialization_error(format!("Failed to parse {} response: {}", service, e))
        })
    }

    /// Balance of `address` in nanoton.
    pub async fn get_balance(&self, address: &str) -> TonResult<u64> {
        let url = format!(
            "{}/getAddressBalance",
            self.config.toncenter_url.trim_end_matches('/')
        );
        let mut request = self.http_client.get(&url).query(&[("address", address)]);
        if let Some(key) = &self.config.toncenter_api_key {
            request = request.header("X-API-Key", key);
        }

        let response: ToncenterResponse = self.send_json("toncenter", request).await?;
        if !response.ok {
            return Err(TonError::ApiError {
                service: "toncenter",
                status: 200,
                message: response
                    .error
                    .unwrap_or_else(|| "unknown toncenter error".to_string()),
            });
        }
        let balance = response
            .result
            .as_ref()
            .and_then(parse_nano)
            .ok_or_else(|| TonError::serialization_error("balance missing from response"))?;

        debug!(address = %mask_wallet_address(address), balance, "wallet balance fetched");
        Ok(balance)
    }

    pub async fn get_seqno(&self, address: &str) -> TonResult<u32> {
        let url = format!(
            "{}/v2/wallet/{}/seqno",
            self.config.tonapi_url.trim_end_matches('/'),
            address
        );
        let request = self.authorize(self.http_client.get(&url));
        let response: SeqnoResponse = self.send_json("tonapi", request).await?;
        Ok(response.seqno)
    }

    /// Broadcast a base64 bag of cells.
    pub async fn send_boc(&self, boc_base64: &str) -> TonResult<()> {
        let url = format!(
            "{}/v2/blockchain/message",
            self.config.tonapi_url.trim_end_matches('/')
        );
        let request = self
            .authorize(self.http_client.post(&url))
            .json(&serde_json::json!({ "boc": boc_base64 }));

        let seconds = self.config.request_timeout.as_secs();
        let response = timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| TonError::TimeoutError { seconds })?
            .map_err(|e| TonError::network_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TonError::ApiError {
                service: "tonapi",
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }
        Ok(())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.tonapi_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nano_balance_accepts_string_or_number() {
        assert_eq!(parse_nano(&serde_json::json!("1500000000")), Some(1_500_000_000));
        assert_eq!(parse_nano(&serde_json::json!(42)), Some(42));
        assert_eq!(parse_nano(&serde_json::json!("-1")), None);
        assert_eq!(parse_nano(&serde_json::json!(null)), None);
    }

    #[test]
    fn toncenter_error_body_deserializes() {
        let parsed: ToncenterResponse =
            serde_json::from_str(r#"{"ok":false,"error":"Incorrect address","code":416}"#).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error.as_deref(), Some("Incorrect address"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let client = TonClient::new(TonConfig {
            toncenter_url: "http://127.0.0.1:1".to_string(),
            ..TonConfig::default()
        })
        .unwrap();
        let err = client.get_balance("EQ").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
