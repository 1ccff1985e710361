//! Billing error types

use thiserror::Error;

/// Result alias used throughout the billing crate
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors raised while talking to the billing backend
#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The HTTP exchange did not complete (connect, timeout, body read)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status code
    #[error("Unexpected response from {endpoint}: HTTP {status}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    /// The backend rejected the session token
    #[error("Session expired or unauthorized")]
    Unauthorized,

    /// The response body was not the expected shape
    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    /// Checkout session creation was refused by the backend
    #[error("Failed to create checkout session: {0}")]
    CheckoutFailed(String),

    /// Unknown plan identifier supplied by a caller
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// Session identifier was empty
    #[error("Missing checkout session identifier")]
    MissingSessionId,

    /// URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BillingError {
    /// Whether the error means the backend could not be reached or
    /// did not produce a usable answer.
    ///
    /// The reconciliation poller treats every such error as fatal for the
    /// current run and never retries it.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BillingError::Transport(_)
                | BillingError::UnexpectedStatus { .. }
                | BillingError::Unauthorized
                | BillingError::InvalidResponse(_)
        )
    }

    /// Short, user-facing description
    pub fn user_message(&self) -> &'static str {
        match self {
            BillingError::Unauthorized => "Your session has expired. Please log in again.",
            BillingError::CheckoutFailed(_) => "Failed to create checkout session",
            BillingError::UnknownPlan(_) => "That plan is not available.",
            _ if self.is_transport() => "We could not reach the billing service.",
            _ => "An error occurred processing your request.",
        }
    }
}
