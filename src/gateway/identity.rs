//! Legacy identity provider
//!
//! The legacy login flow redirects back with a one-time external session
//! id; the provider resolves it to identity claims.

use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, status_error, transport_error, GatewayError};

/// Identity asserted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityClaims {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait LegacyIdentityProvider: Send + Sync {
    async fn fetch_session_data(
        &self,
        external_session_id: &str,
    ) -> Result<IdentityClaims, GatewayError>;
}

/// Provider reached over HTTP with the id in an `X-Session-ID` header
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    session_data_url: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(session_data_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            session_data_url,
        })
    }
}

#[async_trait]
impl LegacyIdentityProvider for HttpIdentityProvider {
    async fn fetch_session_data(
        &self,
        external_session_id: &str,
    ) -> Result<IdentityClaims, GatewayError> {
        let url = self
            .session_data_url
            .as_deref()
            .ok_or(GatewayError::NotConfigured("legacy.session_data_url"))?;

        let response = self
            .client
            .get(url)
            .header("X-Session-ID", external_session_id)
            .send()
            .await
            .map_err(|e| transport_error("identity provider", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::UnknownReference(external_session_id.to_string()));
        }
        if !status.is_success() {
            return Err(status_error("identity provider", status, external_session_id));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(format!("malformed identity claims: {}", e)))
    }
}
