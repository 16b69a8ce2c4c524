//! Entitlement and gated content endpoints
//!
//! - GET /api/entitlement - Snapshot for the caller (anonymous allowed)
//! - GET /api/quotes/{tier} - Market quotes for a tier
//! - GET /api/picks - Weekly picks at the caller's highest tier

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{extract_session_token, ApiError, AppState, AuthenticatedAccount};
use crate::gateway::Quote;
use crate::models::{EntitlementSnapshot, Tier};

#[derive(Debug, Serialize)]
pub struct QuotesResponse {
    pub tier: Tier,
    pub quotes: Vec<Quote>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/entitlement", get(get_entitlement))
        .route("/quotes/{tier}", get(get_quotes))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/picks", get(get_picks))
}

/// GET /api/entitlement
async fn get_entitlement(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EntitlementSnapshot>, ApiError> {
    let token = extract_session_token(&headers);
    let snapshot = state.access.current_entitlement(token.as_deref()).await?;
    Ok(Json(snapshot))
}

/// GET /api/quotes/{tier}
async fn get_quotes(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    headers: HeaderMap,
) -> Result<Json<QuotesResponse>, ApiError> {
    let tier: Tier = tier
        .parse()
        .map_err(|e: anyhow::Error| ApiError::validation_error(e.to_string()))?;

    let token = extract_session_token(&headers);
    let quotes = state.access.quotes(token.as_deref(), tier).await?;
    Ok(Json(QuotesResponse { tier, quotes }))
}

/// GET /api/picks
async fn get_picks(
    State(state): State<AppState>,
    auth: AuthenticatedAccount,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.access.weekly_picks(&auth.token).await?))
}
