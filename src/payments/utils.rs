use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub const ORDER_ID_PREFIX: &str = "starbot";

/// How a gateway call authenticates.
#[derive(Debug, Clone, Copy)]
pub enum GatewayAuth<'a> {
    /// Credentials travel in the body
    None,
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

enum Attempt<T> {
    Done(T),
    Retry(PaymentError, Option<Duration>),
    Fail(PaymentError),
}

/// 1s, 2s, 4s... capped at 30s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(5)).min(Duration::from_secs(30))
}

/// JSON-over-HTTP client shared by the gateways. 429, 5xx and transport
/// errors are retried up to `max_retries` times.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: &'static str,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(gateway: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize {} HTTP client: {}", gateway, e),
            })?;
        Ok(Self {
            client,
            gateway,
            max_retries,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: GatewayAuth<'_>,
    ) -> PaymentResult<T> {
        self.call(reqwest::Method::GET, url, auth, None).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: GatewayAuth<'_>,
        body: &JsonValue,
    ) -> PaymentResult<T> {
        self.call(reqwest::Method::POST, url, auth, Some(body)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: GatewayAuth<'_>,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let error = match self.attempt(method.clone(), url, auth, body).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry(error, _) if attempt >= self.max_retries => return Err(error),
                Attempt::Retry(error, wait) => {
                    tokio::time::sleep(wait.unwrap_or_else(|| backoff(attempt))).await;
                    error
                }
            };
            attempt += 1;
            warn!(gateway = self.gateway, attempt, error = %error, "retrying gateway call");
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: GatewayAuth<'_>,
        body: Option<&JsonValue>,
    ) -> Attempt<T> {
        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        request = match auth {
            GatewayAuth::None => request,
            GatewayAuth::Bearer(token) => request.bearer_auth(token),
            GatewayAuth::Header(name, value) => request.header(name, value),
        };
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry(
                    PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.gateway, e),
                    },
                    None,
                )
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return match serde_json::from_str::<T>(&text) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Fail(PaymentError::gateway(
                    self.gateway,
                    format!("invalid JSON response: {}", e),
                )),
            };
        }
        if status.as_u16() == 429 {
            return Attempt::Retry(
                PaymentError::RateLimitError {
                    message: format!("{} rate limit exceeded", self.gateway),
                    retry_after_seconds: retry_after,
                },
                retry_after.map(Duration::from_secs),
            );
        }

        let error = PaymentError::GatewayError {
            gateway: self.gateway.to_string(),
            message: format!("HTTP {}: {}", status, text),
            gateway_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        };
        if status.is_server_error() {
            Attempt::Retry(error, None)
        } else {
            Attempt::Fail(error)
        }
    }
}

/// HMAC-SHA256 of `payload` under a raw `key`, compared against a hex
/// signature in constant time.
pub fn verify_hmac_sha256_hex(payload: &[u8], key: &[u8], signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// `starbot-{unix_seconds}-{1000..9999}`
pub fn generate_order_id(unix_seconds: i64) -> String {
    let suffix = 1000 + (Uuid::new_v4().as_u128() % 9000) as u32;
    format!("{}-{}-{}", ORDER_ID_PREFIX, unix_seconds, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(9), Duration::from_secs(30));
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_sha256_accepts_matching_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let payload = br#"{"update_type":"invoice_paid"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"key").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha256_hex(payload, b"key", &signature));
        assert!(verify_hmac_sha256_hex(
            payload,
            b"key",
            &signature.to_uppercase()
        ));
        assert!(!verify_hmac_sha256_hex(payload, b"other", &signature));
        assert!(!verify_hmac_sha256_hex(payload, b"key", "not-a-valid-signature"));
    }

    #[test]
    fn order_ids_follow_the_pattern() {
        let re = regex::Regex::new(r"^starbot-1700000000-\d{4}$").unwrap();
        for _ in 0..50 {
            let id = generate_order_id(1_700_000_000);
            assert!(re.is_match(&id), "{}", id);
            let suffix: u32 = id.rsplit('-').next().unwrap().parse().unwrap();
            assert!((1000..=9999).contains(&suffix));
        }
    }
}
