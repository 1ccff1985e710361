//! Plan catalog and limits
//!
//! Mirrors the limits the backend enforces when users add websites,
//! automations, or consume AI interactions.

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Pro,
}

/// Resource a plan limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Websites,
    Automations,
    AiInteractions,
}

/// Per-plan limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub websites: u32,
    pub automations: u32,
    /// Per calendar month
    pub ai_interactions: u32,
}

impl PlanLimits {
    pub fn get(&self, kind: LimitKind) -> u32 {
        match kind {
            LimitKind::Websites => self.websites,
            LimitKind::Automations => self.automations,
            LimitKind::AiInteractions => self.ai_interactions,
        }
    }
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Starter, Plan::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
        }
    }

    /// Lenient parse used for values coming back from the backend.
    /// Anything unrecognized (or missing) is treated as the free plan.
    pub fn from_backend(s: Option<&str>) -> Self {
        s.and_then(|s| s.parse().ok()).unwrap_or_default()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Starter => "Starter",
            Plan::Pro => "Pro",
        }
    }

    /// Monthly price in whole US dollars
    pub fn monthly_price_usd(&self) -> u32 {
        match self {
            Plan::Free => 0,
            Plan::Starter => 29,
            Plan::Pro => 99,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.monthly_price_usd() > 0
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                websites: 1,
                automations: 3,
                ai_interactions: 100,
            },
            Plan::Starter => PlanLimits {
                websites: 3,
                automations: 10,
                ai_interactions: 1000,
            },
            Plan::Pro => PlanLimits {
                websites: 10,
                automations: 9999,
                ai_interactions: 10000,
            },
        }
    }

    /// True while `current` is still below the plan's limit for `kind`
    pub fn within_limit(&self, kind: LimitKind, current: u32) -> bool {
        current < self.limits().get(kind)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            other => Err(BillingError::UnknownPlan(other.to_string())),
        }
    }
}
