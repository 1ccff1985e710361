// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! GR8 Billing Module
//!
//! Client side of the GR8 billing flow: plan selection, hosted checkout, and
//! confirming the payment once the provider redirects back.
//!
//! ## Features
//!
//! - **Plans**: Catalog with prices and per-plan limits
//! - **Checkout**: Create a hosted checkout session and get the redirect URL
//! - **Reconciliation**: Poll the payment status after the redirect until it settles
//! - **Account**: Read the current plan and monthly usage
//! - **Presentation**: Titles, messages, and actions for each reconciliation state

pub mod checkout;
pub mod client;
pub mod config;
pub mod error;
pub mod plans;
pub mod presentation;
pub mod reconcile;
pub mod slot;
pub mod status;
pub mod usage;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

// Checkout
pub use checkout::{CheckoutRedirect, CheckoutService};

// Client
pub use client::BillingApiClient;

// Config
pub use config::{BillingConfig, PollPolicy};

// Error
pub use error::{BillingError, BillingResult};

// Plans
pub use plans::{LimitKind, Plan, PlanLimits};

// Presentation
pub use presentation::{PageAction, Presentation};

// Reconciliation
pub use reconcile::{
    CancelToken, PageResult, Progress, ReconcileMachine, ReconcileState, Reconciler,
    ReconciliationOutcome, ReconciliationReport, RunEnd, StatusSource, Step, BILLING_PAGE,
};
pub use slot::{ReconcileSlot, RunHandle};

// Status
pub use status::{PaymentStatus, SessionId};

// Usage
pub use usage::{AccountService, AccountSnapshot, PlanListing, UsageSnapshot};

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub account: AccountService,
    pub checkout: CheckoutService,
    pub client: Arc<BillingApiClient>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::new(BillingConfig::from_env()?)
    }

    /// Create a new billing service with explicit config
    pub fn new(config: BillingConfig) -> BillingResult<Self> {
        let client = BillingApiClient::new(config)?;

        Ok(Self {
            account: AccountService::new(client.clone()),
            checkout: CheckoutService::new(client.clone()),
            client: Arc::new(client),
        })
    }

    /// Reconciler backed by the status endpoint, using the configured poll policy
    pub fn reconciler(&self) -> Reconciler<BillingApiClient> {
        Reconciler::new(Arc::clone(&self.client), self.client.config().poll)
    }

    /// Fresh slot for one billing-success page instance
    pub fn reconcile_slot(&self) -> ReconcileSlot<BillingApiClient> {
        ReconcileSlot::new(self.reconciler())
    }
}
