// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Payment Reconciliation
//!
//! Tests termination and retry-cap behaviour of:
//! - Status polling sequences (REC-P01 to REC-P09)
//! - Cancellation and slot ownership (REC-C01 to REC-C07)
//! - End-to-end against an HTTP backend (REC-H01 to REC-H03)

#[cfg(test)]
mod support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::error::{BillingError, BillingResult};
    use crate::reconcile::StatusSource;
    use crate::status::{PaymentStatus, SessionId};

    pub enum Scripted {
        Status(&'static str),
        Unreachable,
    }

    /// Replays a fixed sequence of responses, then answers `pending` forever
    pub struct ScriptedSource {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn statuses(statuses: &[&'static str]) -> Self {
            Self::new(statuses.iter().map(|&s| Scripted::Status(s)).collect())
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, _session_id: &SessionId) -> BillingResult<PaymentStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Status(raw)) => Ok(PaymentStatus::from_wire(raw)),
                Some(Scripted::Unreachable) => Err(BillingError::UnexpectedStatus {
                    endpoint: "billing/status".to_string(),
                    status: 503,
                }),
                None => Ok(PaymentStatus::Pending),
            }
        }
    }

    /// Never answers; `started` fires once a query is in flight
    #[derive(Default)]
    pub struct StalledSource {
        pub started: Notify,
        calls: AtomicU32,
    }

    impl StalledSource {
        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for StalledSource {
        async fn fetch_status(&self, _session_id: &SessionId) -> BillingResult<PaymentStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            std::future::pending().await
        }
    }

    pub struct PanickingSource;

    #[async_trait]
    impl StatusSource for PanickingSource {
        async fn fetch_status(&self, _session_id: &SessionId) -> BillingResult<PaymentStatus> {
            panic!("status decoder blew up")
        }
    }
}

#[cfg(test)]
mod polling_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::support::{Scripted, ScriptedSource};
    use crate::config::PollPolicy;
    use crate::reconcile::*;
    use crate::status::SessionId;

    fn progress_channel() -> (watch::Sender<Progress>, watch::Receiver<Progress>) {
        watch::channel(Progress {
            attempt: 0,
            max_attempts: 5,
            state: ReconcileState::Checking,
        })
    }

    async fn run(source: &Arc<ScriptedSource>, policy: PollPolicy) -> (RunEnd, Progress) {
        let reconciler = Reconciler::new(Arc::clone(source), policy);
        let (tx, rx) = progress_channel();
        let end = reconciler
            .reconcile(&SessionId::new("cs_test_1").unwrap(), &CancelToken::new(), &tx)
            .await;
        let last = *rx.borrow();
        (end, last)
    }

    fn outcome(end: &RunEnd) -> ReconciliationOutcome {
        end.report().expect("run should finish").outcome
    }

    // =========================================================================
    // REC-P01: First query completed - exactly one query, success
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_completed_on_first_query() {
        let source = Arc::new(ScriptedSource::statuses(&["completed"]));
        let (end, last) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::Success);
        assert_eq!(source.calls(), 1);
        assert_eq!(end.queries(), 1);
        assert_eq!(last.state, ReconcileState::Success);
        assert_eq!(last.attempt, 0);
    }

    // =========================================================================
    // REC-P02: pending, pending, completed - three queries, success
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_pending_then_completed() {
        let source = Arc::new(ScriptedSource::statuses(&[
            "pending",
            "pending",
            "completed",
        ]));
        let (end, last) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::Success);
        assert_eq!(source.calls(), 3);
        assert_eq!(last.attempt, 2);
        assert_eq!(last.state, ReconcileState::Success);
    }

    // =========================================================================
    // REC-P03: Five pending - timed out, no sixth query
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_all_pending_times_out() {
        let source = Arc::new(ScriptedSource::statuses(&[
            "pending", "pending", "pending", "pending", "pending",
        ]));
        let (end, last) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::TimedOut);
        assert_eq!(source.calls(), 5, "Must not issue a sixth query");
        assert_eq!(last.state, ReconcileState::TimedOut);
        assert_eq!(last.attempt, 5);
    }

    // =========================================================================
    // REC-P04: failed - stop immediately
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_failed_stops_immediately() {
        let source = Arc::new(ScriptedSource::statuses(&["failed", "completed"]));
        let (end, last) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::PaymentFailed);
        assert_eq!(source.calls(), 1);
        assert_eq!(last.state, ReconcileState::Failed);
    }

    // =========================================================================
    // REC-P05: failed after pending - stops at that attempt
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_failed_after_pending() {
        let source = Arc::new(ScriptedSource::statuses(&["pending", "failed", "completed"]));
        let (end, _) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::PaymentFailed);
        assert_eq!(source.calls(), 2);
    }

    // =========================================================================
    // REC-P06: Transport failure on first query - error, no retry
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_not_retried() {
        let source = Arc::new(ScriptedSource::new(vec![
            Scripted::Unreachable,
            Scripted::Status("completed"),
        ]));
        let (end, last) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::TransportError);
        assert_eq!(source.calls(), 1);
        assert_eq!(last.state, ReconcileState::Error);
        assert!(end.report().unwrap().error.is_some());
    }

    // =========================================================================
    // REC-P07: Unrecognized status keeps polling like pending
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_status_keeps_polling() {
        let source = Arc::new(ScriptedSource::statuses(&["open", "processing", "completed"]));
        let (end, _) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::Success);
        assert_eq!(source.calls(), 3);
    }

    // =========================================================================
    // REC-P08: Queries are spaced by the poll interval
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_queries_spaced_by_interval() {
        let source = Arc::new(ScriptedSource::statuses(&[]));
        let started = tokio::time::Instant::now();
        let (end, _) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_budget() {
        let source = Arc::new(ScriptedSource::statuses(&[]));
        let policy = PollPolicy::new(2, Duration::from_millis(100)).unwrap();
        let (end, last) = run(&source, policy).await;

        assert_eq!(outcome(&end), ReconciliationOutcome::TimedOut);
        assert_eq!(source.calls(), 2);
        assert_eq!(last.max_attempts, 2);
    }

    #[tokio::test]
    async fn test_missing_session_redirects_without_queries() {
        let source = Arc::new(ScriptedSource::statuses(&["completed"]));
        let reconciler = Reconciler::new(Arc::clone(&source), PollPolicy::default());
        let (tx, _rx) = progress_channel();
        let cancel = CancelToken::new();

        for raw in [None, Some(""), Some("   ")] {
            let result = reconciler.handle_return(raw, &cancel, &tx).await;
            assert!(matches!(result, PageResult::Redirect { to: BILLING_PAGE }));
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_after_terminal_state() {
        let source = Arc::new(ScriptedSource::statuses(&["completed", "completed"]));
        let (first, _) = run(&source, PollPolicy::default()).await;
        let (second, _) = run(&source, PollPolicy::default()).await;

        assert_eq!(outcome(&first), ReconciliationOutcome::Success);
        assert_eq!(outcome(&second), ReconciliationOutcome::Success);
        assert_eq!(source.calls(), 2);
    }

    // =========================================================================
    // REC-P09: Progress reports every attempt in order, then the terminal state
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_progress_sequence_in_order() {
        let source = Arc::new(ScriptedSource::statuses(&[
            "pending",
            "pending",
            "completed",
        ]));
        let reconciler = Reconciler::new(Arc::clone(&source), PollPolicy::default());
        let (tx, mut rx) = progress_channel();

        let handle = tokio::spawn(async move {
            reconciler
                .reconcile(&SessionId::new("cs_test_1").unwrap(), &CancelToken::new(), &tx)
                .await
        });

        let mut seen = vec![*rx.borrow_and_update()];
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            if seen.last() != Some(&current) {
                seen.push(current);
            }
        }

        let observed: Vec<(u32, ReconcileState)> =
            seen.iter().map(|p| (p.attempt, p.state)).collect();
        assert_eq!(
            observed,
            vec![
                (0, ReconcileState::Checking),
                (1, ReconcileState::Checking),
                (2, ReconcileState::Checking),
                (2, ReconcileState::Success),
            ]
        );
        assert_eq!(outcome(&handle.await.unwrap()), ReconciliationOutcome::Success);
    }
}

#[cfg(test)]
mod cancellation_tests {
    use std::sync::Arc;

    use tokio::sync::watch;

    use super::support::{PanickingSource, ScriptedSource, StalledSource};
    use crate::config::PollPolicy;
    use crate::reconcile::*;
    use crate::slot::ReconcileSlot;
    use crate::status::SessionId;

    // =========================================================================
    // REC-C01: Cancel during the wait - no further queries
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let source = Arc::new(ScriptedSource::statuses(&["pending", "completed"]));
        let reconciler = Reconciler::new(Arc::clone(&source), PollPolicy::default());
        let cancel = CancelToken::new();
        let (tx, mut rx) = watch::channel(Progress {
            attempt: 0,
            max_attempts: 5,
            state: ReconcileState::Checking,
        });

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            reconciler
                .reconcile(&SessionId::new("cs_test_1").unwrap(), &run_cancel, &tx)
                .await
        });

        rx.wait_for(|p| p.attempt == 1).await.unwrap();
        cancel.cancel();

        let end = handle.await.unwrap();
        assert!(matches!(end, RunEnd::Cancelled { queries: 1, .. }));
        assert_eq!(source.calls(), 1);
    }

    // =========================================================================
    // REC-C02: Already-cancelled token - no queries at all
    // =========================================================================
    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = Arc::new(ScriptedSource::statuses(&["completed"]));
        let reconciler = Reconciler::new(Arc::clone(&source), PollPolicy::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let (tx, rx) = watch::channel(Progress {
            attempt: 0,
            max_attempts: 5,
            state: ReconcileState::Checking,
        });

        let end = reconciler
            .reconcile(&SessionId::new("cs_test_1").unwrap(), &cancel, &tx)
            .await;

        assert!(matches!(end, RunEnd::Cancelled { queries: 0, .. }));
        assert_eq!(source.calls(), 0);
        assert_eq!(rx.borrow().state, ReconcileState::Checking);
    }

    // =========================================================================
    // REC-C03: Restart on the same slot cancels the previous run
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_run() {
        let source = Arc::new(ScriptedSource::statuses(&["pending", "completed"]));
        let mut slot = ReconcileSlot::new(Reconciler::new(
            Arc::clone(&source),
            PollPolicy::default(),
        ));

        let first = slot.start(SessionId::new("cs_test_1").unwrap());
        first
            .progress()
            .wait_for(|p| p.attempt == 1)
            .await
            .unwrap();

        let second = slot.start(SessionId::new("cs_test_1").unwrap());

        let first_end = first.finished().await;
        let second_end = second.finished().await;

        assert!(matches!(first_end, RunEnd::Cancelled { .. }));
        assert_eq!(
            second_end.report().unwrap().outcome,
            ReconciliationOutcome::Success
        );
        assert_eq!(source.calls(), 2);
    }

    // =========================================================================
    // REC-C04: Dropping the slot cancels the active run
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_drop_slot_cancels_run() {
        let source = Arc::new(ScriptedSource::statuses(&[]));
        let mut slot = ReconcileSlot::new(Reconciler::new(
            Arc::clone(&source),
            PollPolicy::default(),
        ));

        let handle = slot.start(SessionId::new("cs_test_1").unwrap());
        handle
            .progress()
            .wait_for(|p| p.attempt == 1)
            .await
            .unwrap();
        assert!(slot.has_active());
        drop(slot);

        let end = handle.finished().await;
        assert!(matches!(end, RunEnd::Cancelled { queries: 1, .. }));
        assert_eq!(source.calls(), 1);
    }

    // =========================================================================
    // REC-C05: A run that reaches a terminal state leaves the slot idle
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_slot_idle_after_terminal_state() {
        let source = Arc::new(ScriptedSource::statuses(&["completed"]));
        let mut slot = ReconcileSlot::new(Reconciler::new(
            Arc::clone(&source),
            PollPolicy::default(),
        ));

        let handle = slot.start(SessionId::new("cs_test_1").unwrap());
        assert!(slot.has_active());

        let end = handle.finished().await;
        assert_eq!(
            end.report().unwrap().outcome,
            ReconciliationOutcome::Success
        );
        assert!(!slot.has_active());

        slot.start(SessionId::new("cs_test_2").unwrap());
        assert!(slot.has_active());
        slot.cancel();
        assert!(!slot.has_active());
    }

    // =========================================================================
    // REC-C06: Cancel while a query is in flight - no terminal state published
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_during_in_flight_query() {
        let source = Arc::new(StalledSource::default());
        let reconciler = Reconciler::new(Arc::clone(&source), PollPolicy::default());
        let cancel = CancelToken::new();
        let (tx, rx) = watch::channel(Progress {
            attempt: 0,
            max_attempts: 5,
            state: ReconcileState::Checking,
        });

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            reconciler
                .reconcile(&SessionId::new("cs_test_1").unwrap(), &run_cancel, &tx)
                .await
        });

        source.started.notified().await;
        cancel.cancel();

        let end = handle.await.unwrap();
        assert!(matches!(end, RunEnd::Cancelled { queries: 1, .. }));
        assert_eq!(source.calls(), 1);
        assert_eq!(
            *rx.borrow(),
            Progress {
                attempt: 0,
                max_attempts: 5,
                state: ReconcileState::Checking,
            }
        );
    }

    // =========================================================================
    // REC-C07: A panic inside the run reaches the caller, not a cancellation
    // =========================================================================
    #[tokio::test]
    #[should_panic(expected = "status decoder blew up")]
    async fn test_panicking_run_is_not_reported_cancelled() {
        let mut slot = ReconcileSlot::new(Reconciler::new(
            Arc::new(PanickingSource),
            PollPolicy::default(),
        ));

        let end = slot.start(SessionId::new("cs_test_1").unwrap()).finished().await;
        panic!("run ended without panicking: {:?}", end.queries());
    }
}

#[cfg(test)]
mod http_tests {
    use std::time::Duration;

    use crate::config::{BillingConfig, PollPolicy};
    use crate::reconcile::*;
    use crate::BillingService;

    fn service_for(server: &mockito::Server, max_attempts: u32) -> BillingService {
        let config = BillingConfig::new(&server.url())
            .unwrap()
            .with_poll(PollPolicy::new(max_attempts, Duration::from_millis(10)).unwrap());
        BillingService::new(config).unwrap()
    }

    // =========================================================================
    // REC-H01: Completed over HTTP - one request
    // =========================================================================
    #[tokio::test]
    async fn test_http_completed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/billing/status/cs_live_9")
            .with_status(200)
            .with_body(r#"{"status":"completed"}"#)
            .expect(1)
            .create_async()
            .await;

        let service = service_for(&server, 5);
        let mut slot = service.reconcile_slot();
        let end = slot
            .start(crate::SessionId::new("cs_live_9").unwrap())
            .finished()
            .await;

        assert_eq!(
            end.report().unwrap().outcome,
            ReconciliationOutcome::Success
        );
        mock.assert_async().await;
    }

    // =========================================================================
    // REC-H02: Pending over HTTP - exactly max_attempts requests
    // =========================================================================
    #[tokio::test]
    async fn test_http_pending_exhausts_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/billing/status/cs_live_9")
            .with_status(200)
            .with_body(r#"{"status":"pending"}"#)
            .expect(3)
            .create_async()
            .await;

        let service = service_for(&server, 3);
        let end = service
            .reconcile_slot()
            .start(crate::SessionId::new("cs_live_9").unwrap())
            .finished()
            .await;

        assert_eq!(
            end.report().unwrap().outcome,
            ReconciliationOutcome::TimedOut
        );
        mock.assert_async().await;
    }

    // =========================================================================
    // REC-H03: Server error - error state after a single request
    // =========================================================================
    #[tokio::test]
    async fn test_http_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/billing/status/cs_live_9")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;

        let service = service_for(&server, 5);
        let reconciler = service.reconciler();
        let (tx, _rx) = tokio::sync::watch::channel(Progress {
            attempt: 0,
            max_attempts: 5,
            state: ReconcileState::Checking,
        });
        let result = reconciler
            .handle_return(Some("cs_live_9"), &CancelToken::new(), &tx)
            .await;

        let PageResult::Completed(end) = result else {
            panic!("expected a completed run");
        };
        assert_eq!(
            end.report().unwrap().outcome,
            ReconciliationOutcome::TransportError
        );
        mock.assert_async().await;
    }
}
