//! Billing client configuration
//!
//! Values come from environment variables. The binary loads a `.env` file
//! first, so local development only needs `GR8_API_URL`.

use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use url::Url;

use crate::error::{BillingError, BillingResult};

/// Default number of status queries per checkout session
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay between status queries
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default per-request timeout for backend calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Polling budget for one reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum status queries before giving up with `timed_out`
    pub max_attempts: u32,
    /// Delay between two consecutive queries
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> BillingResult<Self> {
        if max_attempts == 0 {
            return Err(BillingError::Config(
                "poll max attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Delays between status queries; one per non-terminal response
    pub fn schedule(&self) -> impl Iterator<Item = Duration> {
        FixedInterval::new(self.interval).take(self.max_attempts as usize)
    }
}

/// Configuration for talking to the GR8 backend
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Backend base URL, e.g. `https://api.gr8.ai`
    pub api_url: Url,
    /// Bearer session token (`gr8_session_token`), if logged in
    pub session_token: Option<String>,
    /// Origin sent with checkout requests so the backend can build return URLs
    pub frontend_origin: Option<String>,
    /// Status polling budget
    pub poll: PollPolicy,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl BillingConfig {
    /// Build a config with defaults for everything but the base URL
    pub fn new(api_url: &str) -> BillingResult<Self> {
        Ok(Self {
            api_url: Url::parse(api_url)?,
            session_token: None,
            frontend_origin: None,
            poll: PollPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Load configuration from environment variables
    ///
    /// - `GR8_API_URL` (required)
    /// - `GR8_SESSION_TOKEN`
    /// - `GR8_FRONTEND_ORIGIN`
    /// - `GR8_POLL_MAX_ATTEMPTS` (default 5)
    /// - `GR8_POLL_INTERVAL_MS` (default 2000)
    /// - `GR8_REQUEST_TIMEOUT_SECS` (default 15)
    pub fn from_env() -> BillingResult<Self> {
        let api_url = std::env::var("GR8_API_URL")
            .map_err(|_| BillingError::Config("GR8_API_URL not set".to_string()))?;

        let mut config = Self::new(&api_url)?;
        config.session_token = non_empty_var("GR8_SESSION_TOKEN");
        config.frontend_origin = non_empty_var("GR8_FRONTEND_ORIGIN");

        let max_attempts = parse_var("GR8_POLL_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let interval_ms = parse_var("GR8_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        config.poll = PollPolicy::new(max_attempts, Duration::from_millis(interval_ms))?;

        let timeout_secs = parse_var("GR8_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        config.request_timeout = Duration::from_secs(timeout_secs);

        Ok(config)
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_frontend_origin(mut self, origin: impl Into<String>) -> Self {
        self.frontend_origin = Some(origin.into());
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> BillingResult<T> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| BillingError::Config(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(default),
    }
}
