//! REST reconciliation: the periodic appointment and live queue polls, and
//! the on-demand refetches push handlers ask for.
//!
//! Every fetch takes a [`FetchTicket`](crate::core_state::FetchTicket) before
//! the request goes out. A response that lands after a newer write to the
//! same topic is dropped instead of applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::api::{ClientError, QueueApi};
use crate::clock::Clock;
use crate::core_state::{CoreError, CoreState, Toast};
use crate::models::AppointmentStatus;
use crate::storage::{LocalStore, KEY_REMINDERS};
use crate::task::BackgroundTask;

pub struct Reconciler<A> {
    state: Arc<CoreState>,
    api: Arc<A>,
    store: LocalStore,
    clock: Arc<dyn Clock>,
    failing: AtomicBool,
}

impl<A: QueueApi> Reconciler<A> {
    pub fn new(state: Arc<CoreState>, api: Arc<A>, store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            api,
            store,
            clock,
            failing: AtomicBool::new(false),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Refetch the appointment list. `Ok(false)` when the response was stale.
    pub async fn refresh_appointments(&self) -> Result<bool, ClientError> {
        let ticket = self.state.begin_fetch()?;
        let appointments = self.api.list_appointments().await?;
        let count = appointments.len();
        let applied = self.state.replace_appointments(ticket, appointments)?;
        if applied {
            tracing::debug!(count, "Appointments refreshed");
        } else {
            tracing::debug!("Dropped stale appointment list");
        }
        Ok(applied)
    }

    /// Refetch one appointment's live queue position.
    ///
    /// A snapshot reporting COMPLETED completes the appointment locally
    /// instead of being stored. An appointment without a queue entry yet
    /// (404) is not an error.
    pub async fn refresh_live_queue(&self, appointment_id: &str) -> Result<(), ClientError> {
        let ticket = self.state.begin_fetch()?;
        let snapshot = match self.api.live_queue(appointment_id).await {
            Ok(snapshot) => snapshot,
            Err(ClientError::Status { status: 404, .. }) => {
                tracing::debug!(appointment_id, "No live queue entry yet");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if snapshot.status == AppointmentStatus::Completed {
            tracing::info!(appointment_id, "Live queue reports consultation completed");
            if self.state.complete_locally(appointment_id)? > 0 {
                self.persist_reminders()?;
            }
            return Ok(());
        }

        if !self.state.replace_live_queue(ticket, appointment_id, snapshot)? {
            tracing::debug!(appointment_id, "Dropped stale live queue snapshot");
        }
        Ok(())
    }

    /// Refresh every appointment whose queue is worth watching: active ones
    /// scheduled today, plus anything already checked in or in progress.
    pub async fn refresh_live_queues(&self) -> Result<(), ClientError> {
        let today = self.clock.today();
        let ids: Vec<String> = self
            .state
            .snapshot()?
            .active_appointments()
            .filter(|a| {
                a.local_date() == today
                    || matches!(a.status, AppointmentStatus::CheckedIn | AppointmentStatus::InProgress)
            })
            .map(|a| a.id.clone())
            .collect();

        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.refresh_live_queue(&id).await {
                if matches!(e, ClientError::Core(_)) {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn persist_reminders(&self) -> Result<(), CoreError> {
        let reminders = self.state.snapshot()?.reminders;
        self.store.save(KEY_REMINDERS, &reminders);
        Ok(())
    }

    /// Log a background fetch result. The first failure in a run toasts;
    /// repeats only log until a fetch succeeds again. Returns false once
    /// the session is closed.
    pub fn report(&self, what: &'static str, result: Result<(), ClientError>) -> bool {
        match result {
            Ok(()) => {
                if self.failing.swap(false, Ordering::SeqCst) {
                    tracing::info!(what, "Backend reachable again");
                }
                true
            }
            Err(ClientError::Core(CoreError::Closed)) => false,
            Err(e) => {
                if self.failing.swap(true, Ordering::SeqCst) {
                    tracing::debug!(what, code = e.code(), error = %e, "Refresh still failing");
                } else {
                    tracing::warn!(what, code = e.code(), error = %e, "Refresh failed");
                    self.state.toast(Toast::error(e.user_message()));
                }
                true
            }
        }
    }
}

/// Poll the appointment list every `period`, starting immediately.
pub fn spawn_appointment_poller<A: QueueApi>(reconciler: Arc<Reconciler<A>>, period: Duration) -> BackgroundTask {
    BackgroundTask::spawn("appointment-poller", move |mut shutdown| async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let result = reconciler.refresh_appointments().await.map(|_| ());
                    if !reconciler.report("appointments", result) {
                        break;
                    }
                }
            }
        }
    })
}

/// Poll live queue positions every `period`, starting immediately.
pub fn spawn_live_queue_poller<A: QueueApi>(reconciler: Arc<Reconciler<A>>, period: Duration) -> BackgroundTask {
    BackgroundTask::spawn("live-queue-poller", move |mut shutdown| async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let result = reconciler.refresh_live_queues().await;
                    if !reconciler.report("live queue", result) {
                        break;
                    }
                }
            }
        }
    })
}
