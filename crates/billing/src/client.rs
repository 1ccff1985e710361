//! HTTP client for the GR8 backend billing endpoints

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::reconcile::StatusSource;
use crate::status::{PaymentStatus, SessionId, StatusResponse};

/// Thin wrapper over `reqwest::Client` that knows the backend base URL
/// and attaches the session token to every request.
#[derive(Clone)]
pub struct BillingApiClient {
    http: Client,
    config: BillingConfig,
}

impl std::fmt::Debug for BillingApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingApiClient")
            .field("api_url", &self.config.api_url.as_str())
            .field("has_session_token", &self.config.session_token.is_some())
            .finish()
    }
}

impl BillingApiClient {
    pub fn new(config: BillingConfig) -> BillingResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Build `{api_url}/{segments...}`; each segment is percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> BillingResult<Url> {
        let mut url = self.config.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| BillingError::Config("GR8_API_URL cannot be used as a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.authorize(self.http.get(url))
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.authorize(self.http.post(url))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.session_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// `GET /api/billing/status/{session_id}`
    pub async fn get_status(&self, session_id: &SessionId) -> BillingResult<PaymentStatus> {
        let url = self.endpoint(&["api", "billing", "status", session_id.as_str()])?;
        let response = self.get(url).send().await?;
        let body: StatusResponse = read_json("billing/status", response).await?;
        let status = body.payment_status();

        tracing::debug!(
            session_id = %session_id,
            status = %status,
            "Fetched payment status"
        );

        Ok(status)
    }
}

#[async_trait]
impl StatusSource for BillingApiClient {
    async fn fetch_status(&self, session_id: &SessionId) -> BillingResult<PaymentStatus> {
        self.get_status(session_id).await
    }
}

/// Check the status code and decode a JSON body.
///
/// 401 maps to [`BillingError::Unauthorized`]; any other non-2xx maps to
/// [`BillingError::UnexpectedStatus`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    response: Response,
) -> BillingResult<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(BillingError::Unauthorized);
    }
    if !status.is_success() {
        return Err(BillingError::UnexpectedStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BillingError::InvalidResponse(e.to_string()))
}
