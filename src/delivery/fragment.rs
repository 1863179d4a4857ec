//! Client for the Fragment web API used by the Telegram Stars and Premium
//! storefront. Calls mimic the mobile web app: form-encoded POSTs to
//! `/api?hash=…` carrying the logged-in session cookies.

use crate::delivery::errors::{FragmentError, FragmentResult};
use crate::delivery::traits::{DeliveryPlatform, TransactionIntent};
use crate::logging::{mask_token, mask_wallet_address};
use crate::services::fulfillment::PurchaseKind;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, REFERER};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
/// TON mainnet id as TON Connect reports it
const TON_CHAIN: &str = "-239";
const WALLET_FEATURES: &str = r#"["SendTransaction",{"name":"SendTransaction","maxMessages":255}]"#;

#[derive(Clone, Default)]
pub struct FragmentCookies {
    pub stel_ssid: String,
    pub stel_dt: String,
    pub stel_ton_token: String,
    pub stel_token: String,
}

impl FragmentCookies {
    pub fn header_value(&self) -> String {
        format!(
            "stel_ssid={}; stel_dt={}; stel_ton_token={}; stel_token={}",
            self.stel_ssid, self.stel_dt, self.stel_ton_token, self.stel_token
        )
    }
}

#[derive(Clone)]
pub struct FragmentConfig {
    pub base_url: String,
    pub api_hash: String,
    pub cookies: FragmentCookies,
    /// TON Connect account the platform links the purchase to
    pub wallet_address: String,
    pub wallet_state_init: String,
    pub public_key: String,
    pub request_timeout: Duration,
    pub session_timeout: Duration,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fragment.com".to_string(),
            api_hash: String::new(),
            cookies: FragmentCookies::default(),
            wallet_address: String::new(),
            wallet_state_init: String::new(),
            public_key: String::new(),
            request_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(10),
        }
    }
}

fn required(name: &str) -> FragmentResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| FragmentError::NotConfigured {
            message: format!("{} is not set", name),
        })
}

impl FragmentConfig {
    pub fn from_env() -> FragmentResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: std::env::var("FRAGMENT_BASE_URL").unwrap_or(defaults.base_url),
            api_hash: required("FRAGMENT_HASH")?,
            cookies: FragmentCookies {
                stel_ssid: required("STEL_SSID")?,
                stel_dt: required("STEL_DT")?,
                stel_ton_token: required("STEL_TON_TOKEN")?,
                stel_token: required("STEL_TOKEN")?,
            },
            wallet_address: required("FRAGMENT_ADDRES")?,
            wallet_state_init: required("FRAGMENT_WALLETS")?,
            public_key: required("FRAGMENT_PUBLICKEY")?,
            request_timeout: defaults.request_timeout,
            session_timeout: defaults.session_timeout,
        })
    }

    pub fn api_url(&self) -> String {
        format!("{}/api?hash={}", self.base_url.trim_end_matches('/'), self.api_hash)
    }
}

impl fmt::Debug for FragmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentConfig")
            .field("base_url", &self.base_url)
            .field("api_hash", &mask_token(&self.api_hash))
            .field("cookies", &"<redacted>")
            .field("wallet_address", &mask_wallet_address(&self.wallet_address))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Platform method names and referer paths differ per product.
struct Methods {
    search: &'static str,
    init: &'static str,
    link: &'static str,
}

fn methods(kind: &PurchaseKind) -> Methods {
    match kind {
        PurchaseKind::Stars { .. } => Methods {
            search: "searchStarsRecipient",
            init: "initBuyStarsRequest",
            link: "getBuyStarsLink",
        },
        PurchaseKind::Premium { .. } => Methods {
            search: "searchPremiumGiftRecipient",
            init: "initGiftPremiumRequest",
            link: "getGiftPremiumLink",
        },
    }
}

/// `ok: false` is a rejection; a missing `ok` counts as success.
fn ensure_ok(method: &'static str, body: &JsonValue) -> FragmentResult<()> {
    if body.get("ok").and_then(JsonValue::as_bool) == Some(false) {
        let message = body
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown error");
        return Err(FragmentError::rejected(method, message));
    }
    Ok(())
}

pub fn parse_recipient(handle: &str, body: &JsonValue) -> FragmentResult<String> {
    body.get("found")
        .and_then(|f| f.get("recipient"))
        .and_then(JsonValue::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FragmentError::RecipientNotFound {
            handle: handle.to_string(),
        })
}

pub fn parse_request_id(method: &'static str, body: &JsonValue) -> FragmentResult<String> {
    match body.get("req_id") {
        Some(JsonValue::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => Err(FragmentError::rejected(method, "req_id missing from response")),
    }
}

pub fn parse_intent(method: &'static str, body: &JsonValue) -> FragmentResult<TransactionIntent> {
    if body.get("ok").and_then(JsonValue::as_bool) != Some(true) {
        let message = body
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("transaction missing from response");
        return Err(FragmentError::rejected(method, message));
    }
    let message = body
        .get("transaction")
        .and_then(|t| t.get("messages"))
        .and_then(|m| m.get(0))
        .ok_or_else(|| FragmentError::rejected(method, "transaction missing from response"))?;

    let address = message
        .get("address")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| FragmentError::malformed("transaction address missing"))?;
    let amount_nano = match message.get("amount") {
        Some(JsonValue::String(s)) => s.trim().parse::<u64>().ok(),
        Some(JsonValue::Number(n)) => n.as_u64(),
        _ => None,
    }
    .ok_or_else(|| FragmentError::malformed("transaction amount missing or invalid"))?;
    let payload = message
        .get("payload")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| FragmentError::malformed("transaction payload missing"))?;

    Ok(TransactionIntent {
        address: address.to_string(),
        amount_nano,
        payload: payload.to_string(),
    })
}

pub struct FragmentClient {
    http_client: Client,
    config: FragmentConfig,
}

impl FragmentClient {
    pub fn new(config: FragmentConfig) -> FragmentResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert("Origin", HeaderValue::from_static("https://fragment.com"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        let cookie = HeaderValue::from_str(&config.cookies.header_value())
            .map_err(|_| FragmentError::NotConfigured {
                message: "session cookies contain invalid characters".to_string(),
            })?;
        headers.insert(COOKIE, cookie);

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| FragmentError::NotConfigured {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        info!(base_url = %config.base_url, "Fragment client initialized");
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn from_env() -> FragmentResult<Self> {
        Self::new(FragmentConfig::from_env()?)
    }

    fn page(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn call(
        &self,
        method: &'static str,
        referer: String,
        mut form: Vec<(&'static str, String)>,
    ) -> FragmentResult<JsonValue> {
        form.push(("method", method.to_string()));
        let request = self
            .http_client
            .post(self.config.api_url())
            .header(REFERER, referer)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .form(&form);

        let seconds = self.config.request_timeout.as_secs();
        let response = timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| FragmentError::network_error(format!("{} timed out after {}s", method, seconds)))?
            .map_err(|e| FragmentError::network_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(method, status = status.as_u16(), "Fragment request failed");
            return Err(FragmentError::HttpStatus {
                method,
                status: status.as_u16(),
            });
        }
        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| FragmentError::malformed(format!("{}: {}", method, e)))?;
        debug!(method, "Fragment call completed");
        Ok(body)
    }

    fn link_form(&self, request_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("address", self.config.wallet_address.clone()),
            ("chain", TON_CHAIN.to_string()),
            ("walletStateInit", self.config.wallet_state_init.clone()),
            ("publicKey", self.config.public_key.clone()),
            ("features", WALLET_FEATURES.to_string()),
            ("maxProtocolVersion", "2".to_string()),
            ("platform", "iphone".to_string()),
            ("appName", "Tonkeeper".to_string()),
            ("appVersion", "5.0.14".to_string()),
            ("transaction", "1".to_string()),
            ("id", request_id.to_string()),
            ("show_sender", "0".to_string()),
        ]
    }
}

#[async_trait]
impl DeliveryPlatform for FragmentClient {
    fn name(&self) -> &str {
        "fragment"
    }

    async fn resolve_recipient(&self, handle: &str, kind: &PurchaseKind) -> FragmentResult<String> {
        let method = methods(kind).search;
        let (referer, form) = match *kind {
            PurchaseKind::Stars { .. } => (self.page("/stars"), vec![("query", handle.to_string())]),
            PurchaseKind::Premium { months } => (
                self.page("/premium"),
                vec![("query", handle.to_string()), ("months", months.to_string())],
            ),
        };
        let body = self.call(method, referer, form).await?;
        ensure_ok(method, &body)?;
        parse_recipient(handle, &body)
    }

    async fn init_request(
        &self,
        handle: &str,
        recipient: &str,
        kind: &PurchaseKind,
    ) -> FragmentResult<String> {
        let method = methods(kind).init;
        let (referer, form) = match *kind {
            PurchaseKind::Stars { quantity } => (
                self.page(&format!("/stars/buy?query={}", handle)),
                vec![
                    ("recipient", recipient.to_string()),
                    ("quantity", quantity.to_string()),
                ],
            ),
            PurchaseKind::Premium { months } => (
                self.page(&format!("/premium/gift?query={}", handle)),
                vec![
                    ("recipient", recipient.to_string()),
                    ("months", months.to_string()),
                ],
            ),
        };
        let body = self.call(method, referer, form).await?;
        ensure_ok(method, &body)?;
        parse_request_id(method, &body)
    }

    async fn transaction_intent(
        &self,
        recipient: &str,
        request_id: &str,
        kind: &PurchaseKind,
    ) -> FragmentResult<TransactionIntent> {
        let method = methods(kind).link;
        let referer = match *kind {
            PurchaseKind::Stars { quantity } => self.page(&format!(
                "/stars/buy?recipient={}&quantity={}",
                recipient, quantity
            )),
            PurchaseKind::Premium { months } => self.page(&format!(
                "/premium/gift?recipient={}&months={}",
                recipient, months
            )),
        };
        let body = self.call(method, referer, self.link_form(request_id)).await?;
        parse_intent(method, &body)
    }

    async fn check_session(&self) -> FragmentResult<bool> {
        let request = self.http_client.get(self.page("/stars"));
        let response = timeout(self.config.session_timeout, request.send())
            .await
            .map_err(|_| FragmentError::network_error("session check timed out"))?
            .map_err(|e| FragmentError::network_error(e.to_string()))?;
        Ok(response.status().is_success() && !response.url().path().contains("login"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> FragmentClient {
        FragmentClient::new(FragmentConfig {
            api_hash: "abc123".to_string(),
            wallet_address: "0:ff".to_string(),
            wallet_state_init: "te6cc".to_string(),
            public_key: "pk".to_string(),
            ..FragmentConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn api_url_carries_hash() {
        assert_eq!(client().config.api_url(), "https://fragment.com/api?hash=abc123");
    }

    #[test]
    fn cookie_header_lists_all_session_cookies() {
        let cookies = FragmentCookies {
            stel_ssid: "a".into(),
            stel_dt: "-180".into(),
            stel_ton_token: "c".into(),
            stel_token: "d".into(),
        };
        assert_eq!(
            cookies.header_value(),
            "stel_ssid=a; stel_dt=-180; stel_ton_token=c; stel_token=d"
        );
    }

    #[test]
    fn missing_recipient_is_not_found() {
        let err = parse_recipient("ghost_user", &json!({"ok": true, "found": {}})).unwrap_err();
        assert!(err.is_recipient_not_found());
        assert_eq!(
            parse_recipient("alice", &json!({"found": {"recipient": "R123"}})).unwrap(),
            "R123"
        );
    }

    #[test]
    fn ok_false_is_a_rejection() {
        let err = ensure_ok("initBuyStarsRequest", &json!({"ok": false, "error": "Too many requests"}))
            .unwrap_err();
        assert!(matches!(err, FragmentError::Rejected { method: "initBuyStarsRequest", .. }));
        assert!(ensure_ok("x", &json!({"found": {}})).is_ok());
    }

    #[test]
    fn request_id_accepts_string_or_number() {
        assert_eq!(parse_request_id("m", &json!({"req_id": "q1"})).unwrap(), "q1");
        assert_eq!(parse_request_id("m", &json!({"req_id": 77})).unwrap(), "77");
        assert!(parse_request_id("m", &json!({})).is_err());
    }

    #[test]
    fn intent_is_read_from_first_message() {
        let body = json!({
            "ok": true,
            "transaction": {
                "validUntil": 1700000000,
                "messages": [
                    {"address": "EQBAjaOyi2wGWlk-EDkSabqqnF-MrrwMadnwqrurKpkla9nE", "amount": "2000000000", "payload": "te6ccg"}
                ]
            }
        });
        let intent = parse_intent("getBuyStarsLink", &body).unwrap();
        assert_eq!(intent.amount_nano, 2_000_000_000);
        assert_eq!(intent.payload, "te6ccg");
    }

    #[test]
    fn intent_without_transaction_is_rejected() {
        assert!(matches!(
            parse_intent("getGiftPremiumLink", &json!({"ok": false, "error": "expired"})),
            Err(FragmentError::Rejected { .. })
        ));
        assert!(matches!(
            parse_intent("getBuyStarsLink", &json!({"ok": true, "transaction": {"messages": [{"address": "a", "amount": "x", "payload": "p"}]}})),
            Err(FragmentError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn link_form_describes_the_wallet() {
        let form = client().link_form("req-9");
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("chain"), Some("-239"));
        assert_eq!(get("id"), Some("req-9"));
        assert_eq!(get("appName"), Some("Tonkeeper"));
        assert_eq!(get("walletStateInit"), Some("te6cc"));
    }

    #[test]
    fn debug_redacts_cookies() {
        let rendered = format!("{:?}", client().config);
        assert!(rendered.contains("<redacted>"));
    }
}
