//! User-facing copy for each reconciliation state

use serde::Serialize;

use crate::reconcile::{Progress, ReconcileState};

/// Follow-up the page offers in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    GoToDashboard,
    BackToBilling,
    Refresh,
}

impl PageAction {
    pub fn label(&self) -> &'static str {
        match self {
            PageAction::GoToDashboard => "Go to Dashboard",
            PageAction::BackToBilling => "Back to Billing",
            PageAction::Refresh => "Refresh",
        }
    }

    /// Navigation target; `None` means reload the current page
    pub fn target(&self) -> Option<&'static str> {
        match self {
            PageAction::GoToDashboard => Some("/dashboard"),
            PageAction::BackToBilling => Some("/billing"),
            PageAction::Refresh => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presentation {
    pub state: ReconcileState,
    pub title: &'static str,
    pub message: String,
    pub actions: Vec<PageAction>,
}

impl Presentation {
    pub fn for_progress(progress: &Progress) -> Self {
        let (title, message, actions) = match progress.state {
            ReconcileState::Checking => (
                "Processing Payment...",
                format!(
                    "Verifying your payment... (Attempt {}/{})",
                    (progress.attempt + 1).min(progress.max_attempts),
                    progress.max_attempts
                ),
                vec![],
            ),
            ReconcileState::Success => (
                "Payment Successful!",
                "Your subscription has been activated. You now have access to premium features!"
                    .to_string(),
                vec![PageAction::GoToDashboard],
            ),
            ReconcileState::Failed => (
                "Payment Failed",
                "Payment was not successful. Please try again or contact support.".to_string(),
                vec![PageAction::BackToBilling],
            ),
            ReconcileState::TimedOut => (
                "Payment Processing",
                "Payment is still processing. Check your email for confirmation, or refresh this page."
                    .to_string(),
                vec![PageAction::Refresh, PageAction::BackToBilling],
            ),
            ReconcileState::Error => (
                "Something Went Wrong",
                "We encountered an error checking your payment. Please contact support if payment was deducted."
                    .to_string(),
                vec![PageAction::BackToBilling],
            ),
        };

        Self {
            state: progress.state,
            title,
            message,
            actions,
        }
    }

    /// Toast shown once when the payment is confirmed
    pub fn confirmation(&self) -> Option<&'static str> {
        (self.state == ReconcileState::Success)
            .then_some("Payment successful! Your plan has been upgraded.")
    }
}
