//! Payment endpoints
//!
//! - POST /api/payments/checkout - Open (or resume) a checkout
//! - GET /api/payments/status/{intent_id} - Poll a checkout
//! - POST /api/payments/webhook - Signed gateway notifications
//!
//! Webhooks carry a `Stripe-Signature` header of the form
//! `t=<unix>,v1=<hex hmac>[,v1=...]`; the HMAC-SHA256 covers `"{t}.{body}"`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use data_encoding::HEXLOWER_PERMISSIVE;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::api::middleware::{ApiError, AppState, AuthenticatedAccount};
use crate::models::CheckoutStatus;
use crate::services::GatewayEventKind;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Oldest accepted webhook timestamp, in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;
/// Accepted clock skew for timestamps from the future
const SIGNATURE_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature timestamp outside tolerance")]
    Stale,
    #[error("Signature mismatch")]
    Mismatch,
}

/// Verify a webhook signature header against the raw body.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;

    if now_unix - ts > SIGNATURE_TOLERANCE_SECS || ts - now_unix > SIGNATURE_FUTURE_SKEW_SECS {
        return Err(SignatureError::Stale);
    }

    for candidate in signatures {
        let Ok(expected) = HEXLOWER_PERMISSIVE.decode(candidate.as_bytes()) else {
            continue;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

/// Request body for opening a checkout
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub package_id: String,
    /// Where the gateway sends the browser back; defaults to the `Origin` header
    #[serde(default)]
    pub origin_url: Option<String>,
}

/// An open checkout plus the polling policy the client must follow
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub intent_id: String,
    pub checkout_url: String,
    pub status: CheckoutStatus,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Keep polling server-side under the retry policy
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub intent_id: String,
    pub status: CheckoutStatus,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckoutStatus>,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/webhook", post(webhook))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/status/{intent_id}", get(get_status))
}

/// POST /api/payments/checkout
async fn create_checkout(
    State(state): State<AppState>,
    auth: AuthenticatedAccount,
    headers: HeaderMap,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let origin = body
        .origin_url
        .filter(|o| !o.trim().is_empty())
        .or_else(|| {
            headers
                .get(header::ORIGIN)
                .and_then(|h| h.to_str().ok())
                .map(String::from)
        })
        .ok_or_else(|| ApiError::validation_error("origin_url is required"))?;

    let intent = state
        .access
        .initiate_upgrade(&auth.token, &body.package_id, &origin)
        .await?;
    let policy = state.access.retry_policy();

    Ok(Json(CheckoutResponse {
        intent_id: intent.id,
        checkout_url: intent.checkout_url,
        status: intent.status,
        poll_interval_ms: u64::try_from(policy.interval.as_millis()).unwrap_or(u64::MAX),
        max_attempts: policy.max_attempts,
    }))
}

/// GET /api/payments/status/{intent_id}
async fn get_status(
    State(state): State<AppState>,
    auth: AuthenticatedAccount,
    Path(intent_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = if query.wait {
        state.access.await_upgrade(&auth.token, &intent_id).await?
    } else {
        state.access.poll_upgrade(&auth.token, &intent_id).await?
    };

    Ok(Json(StatusResponse { intent_id, status }))
}

/// POST /api/payments/webhook
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if state.webhook_secret.is_empty() {
        tracing::warn!("webhook received but no signing secret is configured");
        return Err(ApiError::new(
            "GATEWAY_UNAVAILABLE",
            "Webhooks are not configured",
        ));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::new("MISSING_SIGNATURE", "Missing signature header"))?;

    verify_webhook_signature(
        &state.webhook_secret,
        &body,
        signature,
        state.clock.now().timestamp(),
    )
    .map_err(|e| match e {
        SignatureError::Malformed => ApiError::new("MISSING_SIGNATURE", e.to_string()),
        _ => {
            tracing::warn!(error = %e, "webhook signature rejected");
            ApiError::new("BAD_SIGNATURE", e.to_string())
        }
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation_error(format!("Invalid webhook payload: {}", e)))?;

    let Some(kind) = GatewayEventKind::from_event_type(&event.event_type) else {
        tracing::debug!(event_type = %event.event_type, "webhook event ignored");
        return Ok(Json(WebhookResponse {
            received: true,
            status: None,
        }));
    };

    let intent_id = event
        .data
        .object
        .id
        .ok_or_else(|| ApiError::validation_error("Webhook event has no session id"))?;

    let status = state
        .access
        .payments()
        .handle_gateway_event(&intent_id, kind)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        status,
    }))
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        data_encoding::HEXLOWER.encode(&mac.finalize().into_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_740_000_000;
    const PAYLOAD: &[u8] = b"{\"type\":\"checkout.session.completed\"}";

    #[test]
    fn test_valid_signature() {
        let header = sign_payload(SECRET, PAYLOAD, NOW);
        assert_eq!(verify_webhook_signature(SECRET, PAYLOAD, &header, NOW), Ok(()));
    }

    #[test]
    fn test_wrong_secret() {
        let header = sign_payload("wrong_secret", PAYLOAD, NOW);
        assert_eq!(
            verify_webhook_signature(SECRET, PAYLOAD, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_modified_payload() {
        let header = sign_payload(SECRET, PAYLOAD, NOW);
        assert_eq!(
            verify_webhook_signature(SECRET, b"{\"type\":\"other\"}", &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_and_future_timestamps_rejected() {
        let old = sign_payload(SECRET, PAYLOAD, NOW - 600);
        assert_eq!(
            verify_webhook_signature(SECRET, PAYLOAD, &old, NOW),
            Err(SignatureError::Stale)
        );

        let future = sign_payload(SECRET, PAYLOAD, NOW + 300);
        assert_eq!(
            verify_webhook_signature(SECRET, PAYLOAD, &future, NOW),
            Err(SignatureError::Stale)
        );

        let slight_skew = sign_payload(SECRET, PAYLOAD, NOW + 30);
        assert_eq!(verify_webhook_signature(SECRET, PAYLOAD, &slight_skew, NOW), Ok(()));
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "t=123", "v1=abcd", "t=abc,v1=abcd", "garbage"] {
            assert_eq!(
                verify_webhook_signature(SECRET, PAYLOAD, header, NOW),
                Err(SignatureError::Malformed),
                "{}",
                header
            );
        }
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let valid = sign_payload(SECRET, PAYLOAD, NOW);
        let v1 = valid.split_once(",v1=").unwrap().1;
        let header = format!("t={},v1=deadbeef,v1={}", NOW, v1);
        assert_eq!(verify_webhook_signature(SECRET, PAYLOAD, &header, NOW), Ok(()));
    }

    #[test]
    fn test_non_hex_signature_is_mismatch() {
        let header = format!("t={},v1=not-hex", NOW);
        assert_eq!(
            verify_webhook_signature(SECRET, PAYLOAD, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }
}
