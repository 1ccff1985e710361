//! Single active reconciliation per page instance
//!
//! A billing-success page owns one [`ReconcileSlot`]. Starting a run cancels
//! whatever run the slot was driving before (a manual refresh), and dropping
//! the slot cancels the active run (navigating away), so no orphaned timer
//! can publish a late terminal state.

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::reconcile::{CancelToken, Progress, ReconcileState, Reconciler, RunEnd, StatusSource};
use crate::status::SessionId;

/// Handle to a run spawned by a [`ReconcileSlot`]
pub struct RunHandle {
    session_id: SessionId,
    progress: watch::Receiver<Progress>,
    join: JoinHandle<RunEnd>,
}

impl RunHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Live progress; `changed()` fires on every transition
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Wait for the run to end. A panic inside the run is resumed on the
    /// caller; an aborted task is reported as cancelled.
    pub async fn finished(self) -> RunEnd {
        let session_id = self.session_id;
        match self.join.await {
            Ok(end) => end,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Reconciliation task aborted");
                RunEnd::Cancelled {
                    session_id,
                    queries: 0,
                }
            }
        }
    }
}

struct ActiveRun {
    generation: u64,
    cancel: CancelToken,
    task: AbortHandle,
}

/// Owner of at most one active reconciliation
pub struct ReconcileSlot<S> {
    reconciler: Reconciler<S>,
    active: Option<ActiveRun>,
    generation: u64,
}

impl<S> ReconcileSlot<S>
where
    S: StatusSource + 'static,
{
    pub fn new(reconciler: Reconciler<S>) -> Self {
        Self {
            reconciler,
            active: None,
            generation: 0,
        }
    }

    /// Spawn a reconciliation for `session_id`, cancelling any previous run
    pub fn start(&mut self, session_id: SessionId) -> RunHandle {
        self.cancel();

        self.generation += 1;
        let cancel = CancelToken::new();
        let (tx, rx) = watch::channel(Progress {
            attempt: 0,
            max_attempts: self.reconciler.policy().max_attempts,
            state: ReconcileState::Checking,
        });

        let reconciler = self.reconciler.clone();
        let run_cancel = cancel.clone();
        let run_session = session_id.clone();
        let join = tokio::spawn(async move {
            reconciler.reconcile(&run_session, &run_cancel, &tx).await
        });

        tracing::debug!(
            session_id = %session_id,
            generation = self.generation,
            "Reconciliation started"
        );

        self.active = Some(ActiveRun {
            generation: self.generation,
            cancel,
            task: join.abort_handle(),
        });

        RunHandle {
            session_id,
            progress: rx,
            join,
        }
    }

    /// Cancel the active run, if any
    pub fn cancel(&mut self) {
        if let Some(run) = self.active.take() {
            tracing::debug!(generation = run.generation, "Cancelling active reconciliation");
            run.cancel.cancel();
        }
    }

    /// True while the current run is neither cancelled nor ended
    pub fn has_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.cancel.is_cancelled() && !run.task.is_finished())
    }
}

impl<S> Drop for ReconcileSlot<S> {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            run.cancel.cancel();
        }
    }
}
