//! Payment Reconciliation
//!
//! After the checkout provider redirects the user back with a `session_id`,
//! the payment may still be settling (webhook delay). This module polls the
//! billing status endpoint until the payment is confirmed, fails, or the poll
//! budget runs out.
//!
//! ## State machine
//!
//! ```text
//!                 pending / unknown (attempt += 1, wait)
//!                 ┌───────┐
//!                 ▼       │
//!  start ──▶ ┌──────────┐─┘   completed   ┌─────────┐
//!            │ checking │──────────────────▶│ success │
//!            └──────────┘                   └─────────┘
//!             │   │   │      failed         ┌────────┐
//!             │   │   └────────────────────▶│ failed │
//!             │   │                         └────────┘
//!             │   │  attempt >= max         ┌───────────┐
//!             │   └────────────────────────▶│ timed_out │
//!             │                             └───────────┘
//!             │      transport failure      ┌───────┐
//!             └────────────────────────────▶│ error │
//!                                           └───────┘
//! ```
//!
//! Every state but `checking` is terminal. Transport failures are never
//! retried, and `timed_out` says nothing about whether the payment failed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::PollPolicy;
use crate::error::BillingResult;
use crate::status::{PaymentStatus, SessionId};

/// Where to send the user when the return URL carries no session id
pub const BILLING_PAGE: &str = "/billing";

/// Source of payment status for a checkout session.
///
/// Implemented by [`crate::client::BillingApiClient`]; tests supply scripted
/// sources.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, session_id: &SessionId) -> BillingResult<PaymentStatus>;
}

/// Presentation state of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Checking,
    Success,
    Failed,
    TimedOut,
    Error,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReconcileState::Checking)
    }

    pub fn outcome(&self) -> Option<ReconciliationOutcome> {
        match self {
            ReconcileState::Checking => None,
            ReconcileState::Success => Some(ReconciliationOutcome::Success),
            ReconcileState::Failed => Some(ReconciliationOutcome::PaymentFailed),
            ReconcileState::TimedOut => Some(ReconciliationOutcome::TimedOut),
            ReconcileState::Error => Some(ReconciliationOutcome::TransportError),
        }
    }
}

impl std::fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReconcileState::Checking => "checking",
            ReconcileState::Success => "success",
            ReconcileState::Failed => "failed",
            ReconcileState::TimedOut => "timed_out",
            ReconcileState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Terminal result of a reconciliation run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Success,
    PaymentFailed,
    TimedOut,
    TransportError,
}

impl From<ReconciliationOutcome> for ReconcileState {
    fn from(outcome: ReconciliationOutcome) -> Self {
        match outcome {
            ReconciliationOutcome::Success => ReconcileState::Success,
            ReconciliationOutcome::PaymentFailed => ReconcileState::Failed,
            ReconciliationOutcome::TimedOut => ReconcileState::TimedOut,
            ReconciliationOutcome::TransportError => ReconcileState::Error,
        }
    }
}

/// Snapshot published after every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Non-terminal status responses seen so far (0-based attempt ordinal)
    pub attempt: u32,
    pub max_attempts: u32,
    pub state: ReconcileState,
}

/// What the loop should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Issue a status query now
    Query,
    /// Sleep one poll interval, then re-check the budget
    Wait,
    /// Stop; nothing more will be queried
    Done(ReconciliationOutcome),
}

/// Pure reconciliation state machine: an attempt counter and a state flag.
///
/// Holds no timers and does no I/O so the retry cap and terminal-state rules
/// can be tested on their own.
#[derive(Debug, Clone)]
pub struct ReconcileMachine {
    attempt: u32,
    max_attempts: u32,
    state: ReconcileState,
}

impl ReconcileMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            state: ReconcileState::Checking,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        Progress {
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            state: self.state,
        }
    }

    /// Budget check before each query
    pub fn next_step(&mut self) -> Step {
        if let Some(outcome) = self.state.outcome() {
            return Step::Done(outcome);
        }
        if self.attempt >= self.max_attempts {
            self.state = ReconcileState::TimedOut;
            return Step::Done(ReconciliationOutcome::TimedOut);
        }
        Step::Query
    }

    /// Apply a well-formed status response
    pub fn on_status(&mut self, status: &PaymentStatus) -> Step {
        if let Some(outcome) = self.state.outcome() {
            return Step::Done(outcome);
        }
        match status {
            PaymentStatus::Completed => {
                self.state = ReconcileState::Success;
                Step::Done(ReconciliationOutcome::Success)
            }
            PaymentStatus::Failed => {
                self.state = ReconcileState::Failed;
                Step::Done(ReconciliationOutcome::PaymentFailed)
            }
            PaymentStatus::Pending | PaymentStatus::Unrecognized(_) => {
                self.attempt += 1;
                Step::Wait
            }
        }
    }

    /// The status query could not be completed
    pub fn on_transport_error(&mut self) -> Step {
        if let Some(outcome) = self.state.outcome() {
            return Step::Done(outcome);
        }
        self.state = ReconcileState::Error;
        Step::Done(ReconciliationOutcome::TransportError)
    }
}

/// Cancellation flag shared between a run and whoever owns it.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Summary of a run that reached a terminal state
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub session_id: SessionId,
    pub outcome: ReconciliationOutcome,
    /// Status queries actually issued
    pub queries: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Last transport error, when the outcome is `TransportError`
    pub error: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub finished_at: OffsetDateTime,
}

impl ReconciliationReport {
    pub fn state(&self) -> ReconcileState {
        self.outcome.into()
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunEnd {
    Finished(ReconciliationReport),
    /// Cancelled before reaching a terminal state; nothing was concluded
    Cancelled { session_id: SessionId, queries: u32 },
}

impl RunEnd {
    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            RunEnd::Finished(report) => Some(report),
            RunEnd::Cancelled { .. } => None,
        }
    }

    pub fn queries(&self) -> u32 {
        match self {
            RunEnd::Finished(report) => report.queries,
            RunEnd::Cancelled { queries, .. } => *queries,
        }
    }
}

/// Result of handling a billing-success page visit
#[derive(Debug, Clone)]
pub enum PageResult {
    /// No session id: go to the plan selection page without any network call
    Redirect { to: &'static str },
    Completed(RunEnd),
}

/// Drives a [`ReconcileMachine`] against a [`StatusSource`]
pub struct Reconciler<S> {
    source: Arc<S>,
    policy: PollPolicy,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            policy: self.policy,
        }
    }
}

impl<S: StatusSource> Reconciler<S> {
    pub fn new(source: Arc<S>, policy: PollPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Entry point for a return from checkout.
    ///
    /// `session_id` is the raw query value; a missing or blank value yields a
    /// redirect to [`BILLING_PAGE`] and no status query.
    pub async fn handle_return(
        &self,
        session_id: Option<&str>,
        cancel: &CancelToken,
        progress: &watch::Sender<Progress>,
    ) -> PageResult {
        let Some(session_id) = session_id.and_then(|raw| SessionId::new(raw).ok()) else {
            tracing::debug!("No checkout session id on return, redirecting to billing");
            return PageResult::Redirect { to: BILLING_PAGE };
        };

        PageResult::Completed(self.reconcile(&session_id, cancel, progress).await)
    }

    /// Poll until terminal, budget exhausted, or cancelled.
    ///
    /// Progress is published on `progress` after each transition. A cancelled
    /// run publishes nothing further and issues no more queries.
    pub async fn reconcile(
        &self,
        session_id: &SessionId,
        cancel: &CancelToken,
        progress: &watch::Sender<Progress>,
    ) -> RunEnd {
        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        let mut machine = ReconcileMachine::new(self.policy.max_attempts);
        let mut delays = self.policy.schedule();
        let mut queries = 0u32;
        let mut last_error = None;

        progress.send_replace(machine.progress());

        tracing::info!(
            run_id = %run_id,
            session_id = %session_id,
            max_attempts = self.policy.max_attempts,
            "Starting payment reconciliation"
        );

        let outcome = loop {
            if cancel.is_cancelled() {
                return self.cancelled(run_id, session_id, queries);
            }

            match machine.next_step() {
                Step::Done(outcome) => break outcome,
                Step::Query | Step::Wait => {}
            }

            queries += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.cancelled(run_id, session_id, queries);
                }
                fetched = self.source.fetch_status(session_id) => fetched,
            };

            let step = match fetched {
                Ok(status) => {
                    tracing::debug!(
                        run_id = %run_id,
                        session_id = %session_id,
                        attempt = machine.attempt(),
                        status = %status,
                        "Payment status received"
                    );
                    machine.on_status(&status)
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %run_id,
                        session_id = %session_id,
                        attempt = machine.attempt(),
                        error = %e,
                        "Payment status query failed"
                    );
                    last_error = Some(e.to_string());
                    machine.on_transport_error()
                }
            };

            progress.send_replace(machine.progress());

            match step {
                Step::Done(outcome) => break outcome,
                Step::Query => {}
                Step::Wait => {
                    let delay = delays.next().unwrap_or(self.policy.interval);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.cancelled(run_id, session_id, queries);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        // Budget exhaustion is decided in next_step, so publish the final state.
        progress.send_replace(machine.progress());

        let report = ReconciliationReport {
            run_id,
            session_id: session_id.clone(),
            outcome,
            queries,
            attempt: machine.attempt(),
            max_attempts: self.policy.max_attempts,
            error: last_error,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        };

        match outcome {
            ReconciliationOutcome::Success => tracing::info!(
                run_id = %run_id,
                session_id = %session_id,
                queries,
                "Payment confirmed"
            ),
            ReconciliationOutcome::PaymentFailed => tracing::info!(
                run_id = %run_id,
                session_id = %session_id,
                queries,
                "Payment reported as failed"
            ),
            ReconciliationOutcome::TimedOut => tracing::warn!(
                run_id = %run_id,
                session_id = %session_id,
                queries,
                "Payment still pending after poll budget"
            ),
            ReconciliationOutcome::TransportError => tracing::error!(
                run_id = %run_id,
                session_id = %session_id,
                queries,
                error = report.error.as_deref().unwrap_or_default(),
                "Could not reach billing status service"
            ),
        }

        RunEnd::Finished(report)
    }

    fn cancelled(&self, run_id: Uuid, session_id: &SessionId, queries: u32) -> RunEnd {
        tracing::debug!(
            run_id = %run_id,
            session_id = %session_id,
            queries,
            "Payment reconciliation cancelled"
        );
        RunEnd::Cancelled {
            session_id: session_id.clone(),
            queries,
        }
    }
}
