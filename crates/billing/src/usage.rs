//! Plan and usage lookups
//!
//! Read-only view of the user's current plan and monthly usage counters.
//! After a successful reconciliation the caller re-reads the plan from here
//! instead of trusting anything in the status response.

use serde::{Deserialize, Serialize};

use crate::client::{read_json, BillingApiClient};
use crate::error::BillingResult;
use crate::plans::{LimitKind, Plan};

/// Usage counters for the current calendar month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default)]
    pub ai_interactions: u32,
    #[serde(default)]
    pub chatbot_messages: u32,
}

/// Plan plus usage for the logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub email: Option<String>,
    pub plan: Plan,
    pub usage: UsageSnapshot,
}

impl AccountSnapshot {
    /// Remaining AI interactions this month before the plan limit
    pub fn ai_interactions_remaining(&self) -> u32 {
        self.plan
            .limits()
            .get(LimitKind::AiInteractions)
            .saturating_sub(self.usage.ai_interactions)
    }

    pub fn can_use_ai(&self) -> bool {
        self.plan
            .within_limit(LimitKind::AiInteractions, self.usage.ai_interactions)
    }
}

/// Entry of `GET /api/billing/plans`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlanListing {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    user: MeUser,
    #[serde(default)]
    usage: Option<UsageSnapshot>,
}

#[derive(Debug, Deserialize)]
struct MeUser {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    plan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlansResponse {
    #[serde(default)]
    plans: Vec<PlanListing>,
}

/// Reads account and plan information from the backend
#[derive(Debug, Clone)]
pub struct AccountService {
    client: BillingApiClient,
}

impl AccountService {
    pub fn new(client: BillingApiClient) -> Self {
        Self { client }
    }

    /// `GET /api/auth/me`
    pub async fn current_account(&self) -> BillingResult<AccountSnapshot> {
        let url = self.client.endpoint(&["api", "auth", "me"])?;
        let response = self.client.get(url).send().await?;
        let body: MeResponse = read_json("auth/me", response).await?;

        let account = AccountSnapshot {
            email: body.user.email,
            plan: Plan::from_backend(body.user.plan.as_deref()),
            usage: body.usage.unwrap_or_default(),
        };

        tracing::debug!(
            plan = %account.plan,
            ai_interactions = account.usage.ai_interactions,
            "Loaded account snapshot"
        );

        Ok(account)
    }

    /// `GET /api/billing/plans`
    pub async fn list_plans(&self) -> BillingResult<Vec<PlanListing>> {
        let url = self.client.endpoint(&["api", "billing", "plans"])?;
        let response = self.client.get(url).send().await?;
        let body: PlansResponse = read_json("billing/plans", response).await?;
        Ok(body.plans)
    }
}
