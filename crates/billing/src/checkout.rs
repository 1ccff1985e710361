//! Checkout initiation
//!
//! Asks the backend to create a hosted checkout session for a paid plan and
//! hands back the URL the caller must navigate to. Nothing else happens
//! client-side until the provider redirects back with a `session_id`.

use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::client::BillingApiClient;
use crate::error::{BillingError, BillingResult};
use crate::plans::Plan;

/// Where the caller must send the browser next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRedirect {
    pub plan: Plan,
    pub url: Url,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    url: String,
}

/// Creates checkout sessions
#[derive(Debug, Clone)]
pub struct CheckoutService {
    client: BillingApiClient,
}

impl CheckoutService {
    pub fn new(client: BillingApiClient) -> Self {
        Self { client }
    }

    /// `POST /api/billing/checkout?plan_id={id}`
    ///
    /// The free plan needs no checkout, so it returns `Ok(None)` without
    /// touching the network.
    pub async fn create_checkout(&self, plan: Plan) -> BillingResult<Option<CheckoutRedirect>> {
        if !plan.is_paid() {
            tracing::debug!(plan = %plan, "Free plan selected, skipping checkout");
            return Ok(None);
        }

        let mut url = self.client.endpoint(&["api", "billing", "checkout"])?;
        url.query_pairs_mut().append_pair("plan_id", plan.as_str());

        let mut request = self.client.post(url);
        if let Some(origin) = &self.client.config().frontend_origin {
            request = request.header(reqwest::header::ORIGIN, origin);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BillingError::Unauthorized);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(
                plan = %plan,
                status = status.as_u16(),
                detail = %detail,
                "Checkout session creation rejected"
            );
            return Err(BillingError::CheckoutFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let bytes = response.bytes().await?;
        let body: CheckoutResponse = serde_json::from_slice(&bytes)
            .map_err(|e| BillingError::InvalidResponse(e.to_string()))?;
        let redirect = Url::parse(&body.url)
            .map_err(|e| BillingError::CheckoutFailed(format!("invalid redirect url: {}", e)))?;

        tracing::info!(plan = %plan, "Checkout session created");

        Ok(Some(CheckoutRedirect {
            plan,
            url: redirect,
        }))
    }
}
