//! Market data and weekly picks providers
//!
//! Content is opaque to the entitlement core; the provider only receives
//! the tier the caller was cleared for.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, status_error, transport_error, GatewayError};
use crate::models::Tier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    pub change_24h: f64,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_quotes(&self, tier: Tier) -> Result<Vec<Quote>, GatewayError>;
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Richer content for higher tiers, same shape either way
    async fn get_weekly_picks(&self, tier: Tier) -> Result<serde_json::Value, GatewayError>;
}

/// Proxies an upstream service exposing `/quotes` and `/picks`
pub struct HttpContentProvider {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpContentProvider {
    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        tier: Tier,
    ) -> Result<T, GatewayError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or(GatewayError::NotConfigured("content.base_url"))?;

        let response = self
            .client
            .get(format!("{}/{}", base, path))
            .query(&[("tier", tier.to_string())])
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        if !response.status().is_success() {
            return Err(status_error(path, response.status(), path));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed {} response: {}", path, e)))
    }
}

#[async_trait]
impl MarketDataProvider for HttpContentProvider {
    async fn get_quotes(&self, tier: Tier) -> Result<Vec<Quote>, GatewayError> {
        self.fetch("quotes", tier).await
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn get_weekly_picks(&self, tier: Tier) -> Result<serde_json::Value, GatewayError> {
        self.fetch("picks", tier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_tier_forwarded_upstream() {
        let app = Router::new()
            .route(
                "/quotes",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!([{
                        "symbol": if q.get("tier").map(String::as_str) == Some("premium") { "BTC" } else { "SPY" },
                        "price": 1.0,
                        "change_percent": 0.5,
                        "change_24h": 0.01
                    }]))
                }),
            )
            .route(
                "/picks",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({"tier": q.get("tier").cloned().unwrap_or_default()}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = HttpContentProvider::new(Some(format!("http://{}/", addr))).unwrap();

        let quotes = provider.get_quotes(Tier::Premium).await.unwrap();
        assert_eq!(quotes[0].symbol, "BTC");
        let quotes = provider.get_quotes(Tier::Free).await.unwrap();
        assert_eq!(quotes[0].symbol, "SPY");

        let picks = provider.get_weekly_picks(Tier::Trial).await.unwrap();
        assert_eq!(picks["tier"], "trial");
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let provider = HttpContentProvider::new(None).unwrap();
        assert_eq!(
            provider.get_quotes(Tier::Free).await.unwrap_err(),
            GatewayError::NotConfigured("content.base_url")
        );
    }
}
