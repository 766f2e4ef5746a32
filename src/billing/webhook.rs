//! Billing provider webhooks.
//!
//! The provider signs the raw request body with HMAC-SHA256 using the
//! shared webhook secret and sends the hex digest in `X-Billing-Signature`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC of the body.
pub const SIGNATURE_HEADER: &str = "x-billing-signature";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature is not valid hex")]
    MalformedSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Verify `signature_hex` against the HMAC-SHA256 of `payload`.
///
/// The comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::NotConfigured);
    }
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() {
        return Err(WebhookError::MissingSignature);
    }
    let expected = hex::decode(signature_hex).map_err(|_| WebhookError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::NotConfigured)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureMismatch)
}

/// Hex HMAC-SHA256 of `payload`, as the provider computes it.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::NotConfigured)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Event types the server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEventKind {
    #[serde(rename = "subscription.activated")]
    SubscriptionActivated,
    #[serde(rename = "subscription.charged")]
    SubscriptionCharged,
    #[serde(rename = "subscription.pending")]
    SubscriptionPending,
    #[serde(rename = "subscription.halted")]
    SubscriptionHalted,
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled,
    #[serde(rename = "subscription.completed")]
    SubscriptionCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEventPayload {
    /// Provider-side subscription id.
    pub subscription_id: String,
    /// Provider-side plan id, present on activation and charge events.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Our user id, passed to the provider at checkout.
    #[serde(default)]
    pub customer_ref: Option<String>,
    /// End of the paid period, unix seconds.
    #[serde(default)]
    pub current_end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    pub event: ProviderEventKind,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
    pub payload: ProviderEventPayload,
}

impl ProviderEvent {
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.payload
            .current_end
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent, WebhookError> {
    Ok(serde_json::from_slice(payload)?)
}
