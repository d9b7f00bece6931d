//! Stripe subscription webhooks.
//!
//! The endpoint takes the raw request body: the signature covers the exact
//! bytes Stripe sent, so nothing may parse the body before [`verify_signature`].

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::rest::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum age of a signed timestamp, in seconds.
pub const SIGNATURE_TOLERANCE: i64 = 300;

// ── Signature verification ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing stripe signature or webhook secret")]
    Missing,
    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,
    #[error("No signatures found matching the expected signature for payload")]
    NoMatch,
    #[error("Timestamp outside the tolerance zone")]
    Stale,
}

/// Compute the hex HMAC-SHA256 Stripe expects for `payload` signed at `timestamp`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mac = signed_payload_mac(secret, timestamp, payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a complete `stripe-signature` header value.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={timestamp},v1={}", compute_signature(secret, timestamp, payload))
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Check a `stripe-signature` header against the raw payload. Any `v1`
/// entry may match; comparison is constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|expected| {
                signed_payload_mac(secret, timestamp, payload)
                    .verify_slice(&expected)
                    .is_ok()
            })
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::NoMatch);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE {
        return Err(SignatureError::Stale);
    }
    Ok(())
}

// ── Event model ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub items: SubscriptionItems,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionItems {
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Deserialize)]
pub struct Price {
    pub id: String,
}

/// Subscription lifecycle events that drive the entitlement flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Created,
    Updated,
    Deleted,
}

impl SubscriptionEvent {
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "customer.subscription.created" => Some(SubscriptionEvent::Created),
            "customer.subscription.updated" => Some(SubscriptionEvent::Updated),
            "customer.subscription.deleted" => Some(SubscriptionEvent::Deleted),
            _ => None,
        }
    }

    /// `(hasAccess, priceId)` this event leaves the admin with.
    pub fn entitlement(self, subscription: &Subscription) -> Result<(bool, Option<&str>), String> {
        let first_price = || {
            subscription
                .items
                .data
                .first()
                .map(|item| item.price.id.as_str())
                .ok_or_else(|| format!("Subscription {} has no line items", subscription.id))
        };
        match self {
            SubscriptionEvent::Created => Ok((true, Some(first_price()?))),
            SubscriptionEvent::Updated => {
                Ok((subscription.status == "active", Some(first_price()?)))
            }
            SubscriptionEvent::Deleted => Ok((false, None)),
        }
    }
}

// ── Customer lookup ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("billing API key is not configured")]
    NotConfigured,
    #[error("billing API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("billing API returned {status} for customer {customer}")]
    Status {
        status: reqwest::StatusCode,
        customer: String,
    },
}

/// Resolves a billing customer id to the email it was created with.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError>;
}

/// `CustomerDirectory` backed by the Stripe REST API.
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
}

#[derive(Deserialize)]
struct StripeCustomer {
    email: Option<String>,
    #[serde(default)]
    deleted: bool,
}

impl StripeClient {
    pub fn new(api_base: impl Into<String>, secret_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        }
    }
}

#[async_trait]
impl CustomerDirectory for StripeClient {
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError> {
        let key = self.secret_key.as_deref().ok_or(BillingError::NotConfigured)?;
        let response = self
            .http
            .get(format!("{}/v1/customers/{customer_id}", self.api_base))
            .bearer_auth(key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::Status {
                status: response.status(),
                customer: customer_id.to_string(),
            });
        }

        let customer: StripeCustomer = response.json().await?;
        if customer.deleted {
            return Ok(None);
        }
        Ok(customer.email.filter(|e| !e.is_empty()))
    }
}

// ── Webhook handler ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Rejected before any processing; never mutates state.
    #[error("Webhook Error: {0}")]
    Signature(String),

    #[error("{message}")]
    Processing { kind: String, message: String },
}

impl WebhookError {
    fn processing(kind: &str, message: impl Into<String>) -> Self {
        WebhookError::Processing {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            WebhookError::Signature(_) => {
                warn!(error = %self, "webhook rejected");
                (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
            }
            WebhookError::Processing { kind, message } => {
                warn!(event_type = %kind, error = %message, "webhook processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Webhook processing failed",
                        "message": message,
                        "type": kind,
                    })),
                )
                    .into_response()
            }
        }
    }
}

/// Verify the signature and decode the event envelope.
pub fn construct_event(
    payload: &[u8],
    header: Option<&str>,
    secret: Option<&str>,
    now: i64,
) -> Result<Event, WebhookError> {
    let (Some(header), Some(secret)) = (header, secret) else {
        return Err(WebhookError::Signature(SignatureError::Missing.to_string()));
    };
    verify_signature(payload, header, secret, now)
        .map_err(|e| WebhookError::Signature(e.to_string()))?;
    serde_json::from_slice(payload).map_err(|e| WebhookError::Signature(e.to_string()))
}

/// `POST /api/payments/webhook`
#[instrument(skip_all)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let event = construct_event(
        &body,
        signature,
        state.webhook_secret.as_deref(),
        Utc::now().timestamp(),
    )?;

    info!(event_id = %event.id, event_type = %event.kind, "webhook received");
    apply_event(&state, event).await?;
    Ok(Json(json!({ "received": true, "status": "success" })))
}

/// Apply a verified event to the admin's entitlement. Every branch is an
/// unconditional overwrite, so redelivery converges to the same state.
pub async fn apply_event(state: &AppState, event: Event) -> Result<(), WebhookError> {
    let kind = event.kind.as_str();
    let Some(change) = SubscriptionEvent::from_type(kind) else {
        return Err(WebhookError::processing(kind, format!("Unhandled event type: {kind}")));
    };

    let subscription: Subscription = serde_json::from_value(event.data.object)
        .map_err(|e| WebhookError::processing(kind, format!("Malformed subscription: {e}")))?;
    let (has_access, price_id) = change
        .entitlement(&subscription)
        .map_err(|message| WebhookError::processing(kind, message))?;

    let email = state
        .billing
        .customer_email(&subscription.customer)
        .await
        .map_err(|e| WebhookError::processing(kind, e.to_string()))?
        .ok_or_else(|| {
            WebhookError::processing(
                kind,
                format!(
                    "Customer has no email associated with subscription: {}",
                    subscription.id
                ),
            )
        })?;

    let updated = state
        .storage
        .set_entitlement(&email, has_access, price_id)
        .map_err(|e| WebhookError::processing(kind, e.to_string()))?;

    match updated {
        Some(admin) => {
            info!(
                admin_user_id = %admin.admin_user_id,
                has_access = admin.has_access,
                price_id = ?admin.price_id,
                "subscription state applied"
            );
            Ok(())
        }
        None => Err(WebhookError::processing(
            kind,
            format!("Failed to update admin user with email: {email}"),
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory customer directory for tests.
    #[derive(Default)]
    pub(crate) struct StaticCustomers(pub HashMap<String, Option<String>>);

    impl StaticCustomers {
        pub(crate) fn with(customer: &str, email: Option<&str>) -> Self {
            let mut map = HashMap::new();
            map.insert(customer.to_string(), email.map(str::to_string));
            Self(map)
        }
    }

    #[async_trait]
    impl CustomerDirectory for StaticCustomers {
        async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError> {
            Ok(self.0.get(customer_id).cloned().flatten())
        }
    }

    pub(crate) fn subscription_event(kind: &str, customer: &str, status: &str, price: &str) -> String {
        json!({
            "id": "evt_test",
            "type": kind,
            "data": { "object": {
                "id": "sub_test",
                "customer": customer,
                "status": status,
                "items": { "data": [ { "price": { "id": price } } ] }
            }}
        })
        .to_string()
    }

    const SECRET: &str = "whsec_test";

    #[test]
    fn signature_round_trip() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, 1_700_000_000, payload);
        assert_eq!(verify_signature(payload, &header, SECRET, 1_700_000_010), Ok(()));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let payload = b"{}";
        let good = compute_signature(SECRET, 100, payload);
        let header = format!("t=100,v1={},v0=abc,v1={good}", "00".repeat(32));
        assert_eq!(verify_signature(payload, &header, SECRET, 100), Ok(()));
    }

    #[test]
    fn tampered_payload_does_not_match() {
        let header = signature_header(SECRET, 100, b"{\"a\":1}");
        assert_eq!(
            verify_signature(b"{\"a\":2}", &header, SECRET, 100),
            Err(SignatureError::NoMatch)
        );
        assert_eq!(
            verify_signature(b"{\"a\":1}", &header, "whsec_other", 100),
            Err(SignatureError::NoMatch)
        );
    }

    #[test]
    fn stale_and_malformed_headers() {
        let header = signature_header(SECRET, 100, b"{}");
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 100 + SIGNATURE_TOLERANCE + 1),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_signature(b"{}", "v1=deadbeef", SECRET, 100),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(b"{}", "t=100", SECRET, 100),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn missing_secret_fails_closed() {
        let payload = subscription_event("customer.subscription.created", "cus_1", "active", "p");
        let header = signature_header(SECRET, 100, payload.as_bytes());
        let err = construct_event(payload.as_bytes(), Some(&header), None, 100).unwrap_err();
        assert!(matches!(err, WebhookError::Signature(_)));
    }

    #[test]
    fn updated_event_tracks_status() {
        let payload = subscription_event("customer.subscription.updated", "cus_1", "past_due", "price_a");
        let event: Event = serde_json::from_str(&payload).unwrap();
        let subscription: Subscription = serde_json::from_value(event.data.object).unwrap();

        let change = SubscriptionEvent::from_type(&event.kind).unwrap();
        assert_eq!(change.entitlement(&subscription), Ok((false, Some("price_a"))));
        assert_eq!(
            SubscriptionEvent::Deleted.entitlement(&subscription),
            Ok((false, None))
        );
        assert_eq!(SubscriptionEvent::from_type("invoice.paid"), None);
    }
}
