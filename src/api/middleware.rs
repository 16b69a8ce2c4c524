//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope and the mapping from service errors
//! - Session token extraction and the authentication middleware

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::Account;
use crate::services::{AccessController, DynClock, ServiceError};

/// Name of the session cookie set on login and legacy exchange
pub const SESSION_COOKIE: &str = "session_token";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: crate::db::DynDatabasePool,
    pub access: Arc<AccessController>,
    pub clock: DynClock,
    /// Signing secret for gateway webhooks; empty disables the endpoint
    pub webhook_secret: Arc<String>,
}

/// Account resolved by `require_auth`, with the token it was resolved from
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub account: Account,
    pub token: String,
}

impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedAccount>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" | "INVALID_CREDENTIALS" | "EXCHANGE_FAILED" | "BAD_SIGNATURE" => {
                StatusCode::UNAUTHORIZED
            }
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "WEAK_PASSWORD" | "VERIFICATION_FAILED" | "UNKNOWN_PACKAGE"
            | "MISSING_SIGNATURE" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            "GATEWAY_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            "CONFIRMATION_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidCredentials => Self::new("INVALID_CREDENTIALS", message),
            ServiceError::SessionInvalid => Self::unauthorized(message),
            ServiceError::Forbidden(tier) => Self::with_details(
                "FORBIDDEN",
                message,
                serde_json::json!({ "required_tier": tier }),
            ),
            ServiceError::DuplicateAccount(field) => Self::with_details(
                "CONFLICT",
                message,
                serde_json::json!({ "field": field.to_string() }),
            ),
            ServiceError::WeakPassword { min_length } => Self::with_details(
                "WEAK_PASSWORD",
                message,
                serde_json::json!({ "min_length": min_length }),
            ),
            ServiceError::Validation(msg) => Self::validation_error(msg),
            ServiceError::ExchangeFailed(_) => Self::new("EXCHANGE_FAILED", message),
            ServiceError::VerificationFailed => Self::new("VERIFICATION_FAILED", message),
            ServiceError::RateLimited { retry_after_secs } => Self::with_details(
                "RATE_LIMIT",
                message,
                serde_json::json!({ "retry_after": retry_after_secs }),
            ),
            ServiceError::UnknownPackage(_) => Self::new("UNKNOWN_PACKAGE", message),
            ServiceError::IntentNotFound(_) => Self::not_found(message),
            ServiceError::ConfirmationTimedOut { attempts } => Self::with_details(
                "CONFIRMATION_TIMEOUT",
                message,
                serde_json::json!({ "attempts": attempts }),
            ),
            ServiceError::GatewayUnavailable(_) => Self::new("GATEWAY_UNAVAILABLE", message),
            ServiceError::InvariantViolation(_) | ServiceError::Internal(_) => {
                tracing::error!(error = %message, "request failed");
                Self::internal_error("Internal server error")
            }
        }
    }
}

/// Extract session token from request headers.
///
/// `Authorization: Bearer` wins over the session cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let account = state.access.resolve_session(&token).await?;

    request
        .extensions_mut()
        .insert(AuthenticatedAccount { account, token });
    Ok(next.run(request).await)
}
