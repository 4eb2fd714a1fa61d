//! Razorpay orders and webhook verification.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::PaymentConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Checks a hex HMAC-SHA256 of the raw request body. The comparison runs in constant time.
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Deserialize, Debug)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Deserialize, Debug, Default)]
pub struct WebhookPayload {
    pub payment: Option<PaymentWrapper>,
}

#[derive(Deserialize, Debug)]
pub struct PaymentWrapper {
    pub entity: PaymentEntity,
}

#[derive(Deserialize, Debug)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookAction {
    Captured { order_id: String, payment_id: String },
    Failed { order_id: String },
    Ignored,
}

impl WebhookEvent {
    pub fn action(&self) -> WebhookAction {
        let entity = self.payload.payment.as_ref().map(|p| &p.entity);
        let order_id = entity.and_then(|e| e.order_id.clone());

        match (self.event.as_str(), entity, order_id) {
            ("payment.captured", Some(entity), Some(order_id)) => WebhookAction::Captured {
                order_id,
                payment_id: entity.id.clone(),
            },
            ("payment.failed", Some(_), Some(order_id)) => WebhookAction::Failed { order_id },
            _ => WebhookAction::Ignored,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Creates payment orders with the gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: i64, receipt: &str) -> anyhow::Result<Order>;

    /// Public key handed to the checkout widget
    fn key_id(&self) -> &str;
}

pub struct RazorpayClient {
    http: reqwest::Client,
    api_base: String,
    key_id: String,
    key_secret: String,
    currency: String,
}

#[derive(Serialize)]
struct CreateOrder<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

impl RazorpayClient {
    pub fn new(config: &PaymentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            currency: config.currency.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(&self, amount: i64, receipt: &str) -> anyhow::Result<Order> {
        if self.key_id.is_empty() || self.key_secret.is_empty() {
            bail!("Razorpay API keys are not configured");
        }

        let response = self
            .http
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrder {
                amount,
                currency: &self.currency,
                receipt,
            })
            .send()
            .await
            .context("Razorpay unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Razorpay order creation failed with {status}: {text}");
        }

        let order: Order = response.json().await.context("malformed Razorpay order")?;
        log::info!("Created Razorpay order {} for {amount}", order.id);
        Ok(order)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_verification() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign(body, "whsec");

        assert!(verify_signature(body, &signature, "whsec"));
        assert!(!verify_signature(body, &signature, "other"));
        assert!(!verify_signature(b"{}", &signature, "whsec"));
        assert!(!verify_signature(body, "not-hex", "whsec"));
        assert!(!verify_signature(body, &signature, ""));
    }

    #[test]
    fn test_known_digest() {
        // RFC 4231 test case 2
        assert_eq!(
            sign(b"what do ya want for nothing?", "Jefe"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_webhook_actions() {
        let captured: WebhookEvent = serde_json::from_str(
            r#"{"event":"payment.captured","payload":{"payment":{"entity":
                {"id":"pay_1","order_id":"order_1","amount":9900}}}}"#,
        )
        .unwrap();
        assert_eq!(
            captured.action(),
            WebhookAction::Captured {
                order_id: "order_1".into(),
                payment_id: "pay_1".into()
            }
        );

        let failed: WebhookEvent = serde_json::from_str(
            r#"{"event":"payment.failed","payload":{"payment":{"entity":
                {"id":"pay_2","order_id":"order_2"}}}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.action(),
            WebhookAction::Failed {
                order_id: "order_2".into()
            }
        );

        let other: WebhookEvent = serde_json::from_str(r#"{"event":"order.paid"}"#).unwrap();
        assert_eq!(other.action(), WebhookAction::Ignored);
    }
}
