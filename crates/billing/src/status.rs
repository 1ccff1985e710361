//! Checkout session identifiers and payment status values

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BillingError, BillingResult};

/// Query parameter the checkout provider appends to the return URL
pub const SESSION_ID_PARAM: &str = "session_id";

/// Opaque checkout session identifier handed back by the payment provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Rejects empty and whitespace-only identifiers. Anything else is kept
    /// byte for byte.
    pub fn new(raw: impl Into<String>) -> BillingResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(BillingError::MissingSessionId);
        }
        Ok(Self(raw))
    }

    /// Extract `session_id` from a return URL such as
    /// `https://app.gr8.ai/billing/success?session_id=cs_test_123`.
    ///
    /// Returns `None` when the parameter is absent or empty.
    pub fn from_return_url(url: &Url) -> Option<Self> {
        url.query_pairs()
            .find(|(key, _)| key == SESSION_ID_PARAM)
            .and_then(|(_, value)| Self::new(value.into_owned()).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse an absolute `http(s)` return URL; anything else yields `None`
pub fn parse_return_url(raw: &str) -> Option<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Payment status reported by the billing status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    /// Any value the backend sends that we do not know; polled like `Pending`
    Unrecognized(String),
}

impl PaymentStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "pending" => PaymentStatus::Pending,
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            other => PaymentStatus::Unrecognized(other.to_string()),
        }
    }

    /// `completed` and `failed` end polling; everything else keeps it going
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Unrecognized(raw) => raw,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /api/billing/status/{session_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusResponse {
    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::from_wire(self.status.as_deref().unwrap_or_default())
    }
}
