//! Stripe collaborators: checkout creation, customer-portal sessions,
//! webhook signature verification, and best-effort URL shortening.
//!
//! The core never initiates a charge; it only renders checkout/portal links
//! obtained here, and the payment flag is flipped by the webhook route. All
//! calls carry timeouts and surface failures as
//! [`BotError::ExternalService`], which the callers degrade to fallback
//! messages.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::errors::{BotError, BotResult};

type HmacSha256 = Hmac<Sha256>;

/// Payment/unsubscribe collaborator consumed by the router.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// A checkout URL for the paid plan, pre-tagged with the user id.
    async fn checkout_url(&self, user_id: &str) -> BotResult<String>;

    /// A management-portal URL for an existing Stripe customer.
    async fn portal_url(&self, customer_id: &str) -> BotResult<String>;
}

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const TINYURL_ENDPOINT: &str = "https://tinyurl.com/api-create.php";

/// Production Stripe implementation.
pub struct StripeBilling {
    secret_key: Option<String>,
    price_id: Option<String>,
    success_url: String,
    cancel_url: String,
    api_base: String,
    timeout: Duration,
}

impl StripeBilling {
    pub fn new(
        secret_key: Option<String>,
        price_id: Option<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            secret_key,
            price_id,
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            api_base: STRIPE_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    fn secret_key(&self) -> BotResult<&str> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| BotError::ExternalService("STRIPE_SECRET_KEY is not configured".into()))
    }

    fn client(&self) -> BotResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BotError::external("building http client", e))
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> BotResult<Value> {
        let key = self.secret_key()?;
        let response = self
            .client()?
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(key)
            .form(form)
            .send()
            .await
            .map_err(|e| BotError::external("stripe request", e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BotError::external("parsing stripe response", e))?;
        if !status.is_success() {
            return Err(BotError::ExternalService(format!(
                "stripe api error ({}): {}",
                status,
                payload
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown"),
            )));
        }
        Ok(payload)
    }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn checkout_url(&self, user_id: &str) -> BotResult<String> {
        let price_id = self
            .price_id
            .as_deref()
            .ok_or_else(|| BotError::ExternalService("STRIPE_PRICE_ID is not configured".into()))?;

        let form = vec![
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("metadata[userId]".to_string(), user_id.to_string()),
        ];
        let session = self.post_form("/v1/checkout/sessions", &form).await?;
        let url = session
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| BotError::ExternalService("checkout session had no url".into()))?;

        // Checkout URLs overflow what a chat bubble displays nicely;
        // shortening is best-effort.
        Ok(shorten_url(url).await)
    }

    async fn portal_url(&self, customer_id: &str) -> BotResult<String> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), self.success_url.clone()),
        ];
        let session = self.post_form("/v1/billing_portal/sessions", &form).await?;
        session
            .get("url")
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .ok_or_else(|| BotError::ExternalService("portal session had no url".into()))
    }
}

/// Shorten a URL via TinyURL, falling back to the original on any failure.
pub async fn shorten_url(long_url: &str) -> String {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(_) => return long_url.to_string(),
    };

    let result = client
        .post(TINYURL_ENDPOINT)
        .form(&[("url", long_url)])
        .send()
        .await;
    match result {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(short) if !short.trim().is_empty() => short.trim().to_string(),
            _ => long_url.to_string(),
        },
        Ok(resp) => {
            log::warn!("url shortener returned {}", resp.status());
            long_url.to_string()
        }
        Err(e) => {
            log::warn!("url shortener failed: {}", e);
            long_url.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Webhook verification & event payloads
// ---------------------------------------------------------------------------

/// Maximum accepted skew between the signature timestamp and now.
const SIGNATURE_TOLERANCE: Duration = Duration::from_secs(300);

/// Verify a `Stripe-Signature` header against the raw request body.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> BotResult<()> {
    verify_signature_at(payload, header, secret, chrono::Utc::now().timestamp())
}

fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> BotResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<String> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| BotError::InvalidInput("signature header missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(BotError::InvalidInput(
            "signature header missing v1 signature".into(),
        ));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE.as_secs() as i64 {
        return Err(BotError::InvalidInput("signature timestamp too old".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::ExternalService(format!("bad webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if candidates.iter().any(|c| constant_time_eq(c, &expected)) {
        Ok(())
    } else {
        Err(BotError::InvalidInput("signature mismatch".into()))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Minimal Stripe event envelope for the webhook route.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: StripeObject,
}

#[derive(Debug, Deserialize)]
pub struct StripeObject {
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeObject {
    /// The user id tagged onto the checkout session at creation time.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("userId").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, "whsec_test", 1_700_000_000);
        assert!(verify_signature_at(payload, &header, "whsec_test", 1_700_000_060).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = sign(payload, "whsec_a", 1_700_000_000);
        assert!(verify_signature_at(payload, &header, "whsec_b", 1_700_000_000).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign(b"{\"paid\":true}", "whsec_test", 1_700_000_000);
        assert!(
            verify_signature_at(b"{\"paid\":false}", &header, "whsec_test", 1_700_000_000)
                .is_err()
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = sign(payload, "whsec_test", 1_700_000_000);
        assert!(
            verify_signature_at(payload, &header, "whsec_test", 1_700_000_000 + 301).is_err()
        );
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(verify_signature_at(b"{}", "v1=abc", "whsec_test", 0).is_err());
        assert!(verify_signature_at(b"{}", "t=12", "whsec_test", 12).is_err());
        assert!(verify_signature_at(b"{}", "", "whsec_test", 0).is_err());
    }

    #[test]
    fn test_event_parsing() {
        let event: StripeEvent = serde_json::from_str(
            r#"{
                "type": "checkout.session.completed",
                "data": { "object": {
                    "customer": "cus_42",
                    "metadata": { "userId": "u1" }
                } }
            }"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.data.object.customer.as_deref(), Some("cus_42"));
        assert_eq!(event.data.object.user_id(), Some("u1"));
    }

    #[test]
    fn test_event_parsing_without_metadata() {
        let event: StripeEvent = serde_json::from_str(
            r#"{ "type": "invoice.paid", "data": { "object": {} } }"#,
        )
        .unwrap();
        assert_eq!(event.data.object.user_id(), None);
    }
}
