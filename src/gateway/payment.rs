//! Payment gateway
//!
//! `StripeCheckoutGateway` talks to the Checkout Sessions REST API with a
//! secret key. The gateway's view of a session is authoritative; we only
//! map it onto `CheckoutStatus`.

use async_trait::async_trait;
use serde::Deserialize;

use super::{http_client, status_error, transport_error, GatewayError};
use crate::config::PackageConfig;
use crate::models::CheckoutStatus;

/// A checkout session created at the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCheckout {
    /// Gateway session id, used as the intent id
    pub id: String,
    /// Hosted payment page
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout for `package` on behalf of `account_id`
    async fn create_checkout(
        &self,
        account_id: i64,
        package: &PackageConfig,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<GatewayCheckout, GatewayError>;

    /// Current status of a checkout session
    async fn get_status(&self, checkout_id: &str) -> Result<CheckoutStatus, GatewayError>;
}

pub struct StripeCheckoutGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

impl StripeCheckoutGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured("payment.secret_key"));
        }
        Ok(())
    }
}

/// Map a gateway session onto our status.
///
/// A completed session whose payment is still processing stays pending
/// until the gateway sends an async payment failure or the async payment
/// window runs out.
pub fn map_session_status(status: Option<&str>, payment_status: Option<&str>) -> CheckoutStatus {
    match (status, payment_status) {
        (_, Some("paid")) | (_, Some("no_payment_required")) => CheckoutStatus::Paid,
        (Some("expired"), _) => CheckoutStatus::Expired,
        _ => CheckoutStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutGateway {
    async fn create_checkout(
        &self,
        account_id: i64,
        package: &PackageConfig,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        self.ensure_configured()?;

        let account_id = account_id.to_string();
        let amount = package.amount_cents.to_string();
        let form = [
            ("mode", "payment"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("client_reference_id", account_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", package.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            ("line_items[0][price_data][product_data][name]", package.name.as_str()),
            ("metadata[account_id]", account_id.as_str()),
            ("metadata[package_id]", package.id.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error("create checkout", e))?;

        if !response.status().is_success() {
            return Err(status_error("create checkout", response.status(), &package.id));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed checkout response: {}", e)))?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::Rejected("checkout session has no url".to_string()))?;

        Ok(GatewayCheckout {
            id: session.id,
            url,
        })
    }

    async fn get_status(&self, checkout_id: &str) -> Result<CheckoutStatus, GatewayError> {
        self.ensure_configured()?;

        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, checkout_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| transport_error("checkout status", e))?;

        if !response.status().is_success() {
            return Err(status_error("checkout status", response.status(), checkout_id));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed status response: {}", e)))?;

        Ok(map_session_status(
            session.status.as_deref(),
            session.payment_status.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, routing::post, Json, Router};
    use serde_json::json;

    #[test]
    fn test_map_session_status() {
        assert_eq!(map_session_status(Some("open"), Some("unpaid")), CheckoutStatus::Pending);
        assert_eq!(map_session_status(Some("complete"), Some("paid")), CheckoutStatus::Paid);
        assert_eq!(map_session_status(Some("complete"), Some("unpaid")), CheckoutStatus::Pending);
        assert_eq!(map_session_status(Some("expired"), Some("unpaid")), CheckoutStatus::Expired);
        assert_eq!(map_session_status(None, None), CheckoutStatus::Pending);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn package() -> PackageConfig {
        PackageConfig {
            id: "premium_monthly".to_string(),
            name: "Premium Monthly".to_string(),
            amount_cents: 999,
            currency: "usd".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_poll_against_stub() {
        let app = Router::new()
            .route(
                "/v1/checkout/sessions",
                post(|body: String| async move {
                    assert!(body.contains("unit_amount%5D=999") || body.contains("unit_amount]=999"));
                    Json(json!({"id": "cs_test_1", "url": "https://checkout.example/cs_test_1"}))
                }),
            )
            .route(
                "/v1/checkout/sessions/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "cs_test_1" {
                        Ok(Json(json!({"id": id, "status": "complete", "payment_status": "paid"})))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            );
        let base = serve(app).await;
        let gateway = StripeCheckoutGateway::new(base, "sk_test").unwrap();

        let checkout = gateway
            .create_checkout(1, &package(), "http://app/payment-success", "http://app/")
            .await
            .unwrap();
        assert_eq!(checkout.id, "cs_test_1");
        assert_eq!(checkout.url, "https://checkout.example/cs_test_1");

        assert_eq!(gateway.get_status("cs_test_1").await.unwrap(), CheckoutStatus::Paid);
        assert_eq!(
            gateway.get_status("cs_missing").await.unwrap_err(),
            GatewayError::UnknownReference("cs_missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_unavailable() {
        let gateway = StripeCheckoutGateway::new("http://127.0.0.1:9", "sk_test").unwrap();
        assert!(matches!(
            gateway.get_status("cs_1").await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_secret_key() {
        let gateway = StripeCheckoutGateway::new("http://127.0.0.1:9", "").unwrap();
        assert_eq!(
            gateway.get_status("cs_1").await.unwrap_err(),
            GatewayError::NotConfigured("payment.secret_key")
        );
    }
}
