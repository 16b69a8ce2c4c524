//! Authentication API endpoints
//!
//! - POST /api/auth/register - Account registration
//! - POST /api/auth/login - Credential login
//! - POST /api/auth/exchange - Legacy redirect exchange
//! - POST /api/auth/logout - Logout
//! - GET /api/auth/me - Current account
//! - POST /api/auth/verify-email/request - Mail a verification code
//! - POST /api/auth/verify-email/confirm - Confirm a verification code

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    extract_session_token, ApiError, AppState, AuthenticatedAccount, SESSION_COOKIE,
};
use crate::models::{Account, Session};
use crate::services::RegisterInput;

/// Request body for registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for the legacy redirect exchange
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    pub code: String,
}

/// Response for a successful login or exchange
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub account: AccountResponse,
    pub token: String,
    pub expires_at: String,
}

/// Account as seen by its owner
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub is_premium: bool,
    pub premium_since: Option<String>,
    pub trial_ends_at: Option<String>,
    pub created_at: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            email_verified: account.email_verified,
            is_premium: account.is_premium,
            premium_since: account.premium_since.map(|t| t.to_rfc3339()),
            trial_ends_at: account.trial_ends_at.map(|t| t.to_rfc3339()),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/exchange", post(exchange))
        .route("/logout", post(logout))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_account))
        .route("/verify-email/request", post(request_verification))
        .route("/verify-email/confirm", post(confirm_verification))
}

fn session_cookie(session: &Session) -> Result<HeaderValue, ApiError> {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        session.token,
        session.max_age_secs(session.issued_at)
    );
    HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::internal_error(format!("Invalid cookie value: {}", e)))
}

/// Login-style response: the session in the body and as a cookie
async fn session_response(
    state: &AppState,
    session: Session,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.access.resolve_session(&session.token).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&session)?);

    Ok((
        headers,
        Json(AuthResponse {
            account: account.into(),
            expires_at: session.expires_at.to_rfc3339(),
            token: session.token,
        }),
    ))
}

/// POST /api/auth/register - Account registration
///
/// Does not log the new account in.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .access
        .register(RegisterInput::new(body.username, body.email, body.password))
        .await?;

    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

/// POST /api/auth/login - Credential login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.access.login(&body.username, &body.password).await?;
    session_response(&state, session).await
}

/// POST /api/auth/exchange - Trade a legacy redirect id for a session
async fn exchange(
    State(state): State<AppState>,
    Json(body): Json<ExchangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .access
        .exchange_legacy_redirect(&body.session_id)
        .await?;
    session_response(&state, session).await
}

/// POST /api/auth/logout - Logout
///
/// Always succeeds and clears the cookie, even without a live session.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&headers) {
        state.access.logout(&token).await?;
    }

    let clear_cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&clear_cookie)
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
    );

    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/auth/me - Current account
async fn get_current_account(auth: AuthenticatedAccount) -> Json<AccountResponse> {
    Json(auth.account.into())
}

/// POST /api/auth/verify-email/request
async fn request_verification(
    State(state): State<AppState>,
    auth: AuthenticatedAccount,
) -> Result<StatusCode, ApiError> {
    state
        .access
        .request_email_verification(auth.account.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/auth/verify-email/confirm
async fn confirm_verification(
    State(state): State<AppState>,
    auth: AuthenticatedAccount,
    Json(body): Json<ConfirmEmailRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .access
        .confirm_email(auth.account.id, &body.code)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_session_cookie_attributes() {
        let issued_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let session = Session {
            token: "abc".to_string(),
            account_id: 1,
            issued_at,
            expires_at: issued_at + Duration::days(7),
        };

        let cookie = session_cookie(&session).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "session_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800"
        );
    }

    #[test]
    fn test_account_response_hides_password_hash() {
        let account = Account::new(
            "alice".to_string(),
            "a@x.com".to_string(),
            "$argon2id$secret".to_string(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            None,
        );
        let json = serde_json::to_string(&AccountResponse::from(account)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"email_verified\":false"));
    }
}
