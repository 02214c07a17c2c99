//! One patient session: owns the state, the background tasks and the user
//! actions the queue views expose.
//!
//! Startup restores banners and reminders from local storage, starts both
//! pollers and, when the stored token names a user, opens the push channel.
//! Push events are applied as they arrive; the refetches they ask for are
//! coalesced and run by a separate task so a slow backend never holds up the
//! next event.
//! [`QueueSession::shutdown`] (or dropping the session) closes the state
//! first, so nothing in flight can write after teardown, then stops every
//! task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::api::{ClientError, HttpQueueApi, QueueApi};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::core_state::{BannerKind, BannerState, CoreError, CoreState, QueueState, Toast, UiEvent};
use crate::countdown::CountdownTask;
use crate::models::{
    Appointment, BookingRequest, DoctorBreakState, DoctorDelayState, EmergencyAlertState, Expiring,
    PeakHourCheck, Reminder,
};
use crate::poller::{spawn_appointment_poller, spawn_live_queue_poller, Reconciler};
use crate::presentation::Dashboard;
use crate::push::{self, ConnectionStatus, Effect, PushConnection, PushMessage};
use crate::storage::{LocalStore, KEY_DOCTOR_BREAK, KEY_DOCTOR_DELAY, KEY_EMERGENCY, KEY_REMINDERS};
use crate::task::BackgroundTask;
use crate::token::{decode_user_id, user_room};

/// Push events buffered between the socket and the dispatcher.
const PUSH_BUFFER: usize = 64;

const ACTION_TOAST: std::time::Duration = std::time::Duration::from_secs(4);

/// Shared by the session handle and its background tasks.
struct SessionCore<A> {
    state: Arc<CoreState>,
    reconciler: Arc<Reconciler<A>>,
    store: LocalStore,
    clock: Arc<dyn Clock>,
    countdowns: Mutex<HashMap<BannerKind, CountdownTask>>,
    refresh_tx: mpsc::UnboundedSender<Refresh>,
}

/// A refetch requested by a push event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Refresh {
    Appointments,
    LiveQueue(String),
}

/// Refetches drained from the queue in one go, duplicates folded.
#[derive(Debug, Default)]
struct RefreshBatch {
    appointments: bool,
    live_queue: Vec<String>,
}

impl RefreshBatch {
    fn add(&mut self, refresh: Refresh) {
        match refresh {
            Refresh::Appointments => self.appointments = true,
            Refresh::LiveQueue(id) => {
                if !self.live_queue.contains(&id) {
                    self.live_queue.push(id);
                }
            }
        }
    }

    /// Returns false once the session is closed.
    async fn run<A: QueueApi>(self, reconciler: &Reconciler<A>) -> bool {
        let appointments = async {
            if self.appointments {
                Some(reconciler.refresh_appointments().await.map(|_| ()))
            } else {
                None
            }
        };
        let live_queue = join_all(self.live_queue.iter().map(|id| reconciler.refresh_live_queue(id)));
        let (appointments, live_queue) = tokio::join!(appointments, live_queue);

        let mut open = appointments.map_or(true, |result| reconciler.report("appointments", result));
        for result in live_queue {
            open &= reconciler.report("live queue", result);
        }
        open
    }
}

fn spawn_refresher<A: QueueApi>(
    reconciler: Arc<Reconciler<A>>,
    mut rx: mpsc::UnboundedReceiver<Refresh>,
) -> BackgroundTask {
    BackgroundTask::spawn("push-refresher", move |mut shutdown| async move {
        loop {
            let first = tokio::select! {
                _ = &mut shutdown => break,
                next = rx.recv() => match next {
                    Some(refresh) => refresh,
                    None => break,
                },
            };
            let mut batch = RefreshBatch::default();
            batch.add(first);
            while let Ok(more) = rx.try_recv() {
                batch.add(more);
            }
            if !batch.run(&reconciler).await {
                break;
            }
        }
    })
}

impl<A: QueueApi> SessionCore<A> {
    fn restore(&self) -> Result<(), CoreError> {
        let now = self.clock.now();
        self.restore_banner::<DoctorBreakState>(KEY_DOCTOR_BREAK, now, BannerState::DoctorBreak)?;
        self.restore_banner::<DoctorDelayState>(KEY_DOCTOR_DELAY, now, BannerState::DoctorDelay)?;
        self.restore_banner::<EmergencyAlertState>(KEY_EMERGENCY, now, BannerState::Emergency)?;

        if let Some(reminders) = self.store.load::<Vec<Reminder>>(KEY_REMINDERS) {
            tracing::debug!(count = reminders.len(), "Restored reminders");
            self.state.restore_reminders(reminders)?;
        }
        Ok(())
    }

    fn restore_banner<T>(
        &self,
        key: &str,
        now: chrono::DateTime<chrono::Utc>,
        wrap: fn(T) -> BannerState,
    ) -> Result<(), CoreError>
    where
        T: DeserializeOwned + Expiring,
    {
        let Some(stored) = self.store.load_ephemeral::<T>(key, now) else {
            return Ok(());
        };
        let banner = wrap(stored);
        let kind = banner.kind();
        tracing::info!(%kind, end = %banner.end_time(), "Restored banner");
        self.state.set_banner(banner)?;
        self.arm_countdown(kind)
    }

    /// Start (or restart) the countdown for whatever the slot now holds.
    fn arm_countdown(&self, kind: BannerKind) -> Result<(), CoreError> {
        let Some(end_time) = self.state.banner_end(kind)? else {
            return Ok(());
        };
        let mut countdowns = self.countdowns.lock().map_err(|_| CoreError::LockPoisoned)?;
        if let Some(existing) = countdowns.get(&kind) {
            if existing.end_time() == end_time && !existing.is_finished() {
                return Ok(());
            }
        }
        let task = CountdownTask::spawn(
            kind,
            end_time,
            self.state.clone(),
            self.store.clone(),
            self.clock.clone(),
        );
        countdowns.insert(kind, task);
        Ok(())
    }

    fn persist_banner(&self, kind: BannerKind) -> Result<(), CoreError> {
        let snapshot = self.state.snapshot()?;
        let key = kind.storage_key();
        match kind {
            BannerKind::DoctorBreak => match &snapshot.doctor_break {
                Some(banner) => self.store.save(key, banner),
                None => self.store.clear(key),
            },
            BannerKind::DoctorDelay => match &snapshot.doctor_delay {
                Some(banner) => self.store.save(key, banner),
                None => self.store.clear(key),
            },
            BannerKind::Emergency => match &snapshot.emergency {
                Some(banner) => self.store.save(key, banner),
                None => self.store.clear(key),
            },
        }
        Ok(())
    }

    /// Queue a refetch for the refresher task.
    fn request_refresh(&self, refresh: Refresh) -> Result<(), CoreError> {
        self.refresh_tx.send(refresh).map_err(|_| CoreError::Closed)
    }

    /// Run the follow-ups of one push event in order. Refetches are only
    /// queued. Returns false once the session is closed.
    fn execute(&self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            let result = match effect {
                Effect::RefreshAppointments => self.request_refresh(Refresh::Appointments),
                Effect::RefreshLiveQueue(id) => self.request_refresh(Refresh::LiveQueue(id)),
                Effect::PersistReminders => self.reconciler.persist_reminders(),
                Effect::PersistBanner(kind) => self.persist_banner(kind),
                Effect::ArmCountdown(kind) => self.arm_countdown(kind),
                Effect::Toast(toast) => {
                    self.state.toast(toast);
                    Ok(())
                }
            };
            match result {
                Ok(()) => {}
                Err(CoreError::Closed) => return false,
                Err(e) => tracing::warn!(error = %e, "Push follow-up failed"),
            }
        }
        true
    }

    fn handle_push(&self, message: PushMessage, reconnected: bool) -> bool {
        match message {
            PushMessage::Event(event) => match push::apply(&self.state, event, self.clock.now()) {
                Ok(effects) => self.execute(effects),
                Err(CoreError::Closed) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "Push event dropped");
                    true
                }
            },
            // Catch up on anything sent while the socket was down.
            PushMessage::Status(ConnectionStatus::Connected) if reconnected => {
                self.execute(vec![Effect::RefreshAppointments])
            }
            PushMessage::Status(ConnectionStatus::Connected) => true,
            PushMessage::Status(ConnectionStatus::Disconnected) => true,
            PushMessage::Status(ConnectionStatus::GaveUp) => {
                let message = ClientError::Socket("retries exhausted".into()).user_message();
                self.state.toast(Toast::error(message));
                true
            }
        }
    }

    fn stop_countdowns(&self) {
        match self.countdowns.lock() {
            Ok(mut countdowns) => countdowns.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

fn spawn_dispatcher<A: QueueApi>(core: Arc<SessionCore<A>>, mut rx: mpsc::Receiver<PushMessage>) -> BackgroundTask {
    BackgroundTask::spawn("push-dispatcher", move |mut shutdown| async move {
        let mut connected_before = false;
        loop {
            let message = tokio::select! {
                _ = &mut shutdown => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let reconnected = connected_before;
            if message == PushMessage::Status(ConnectionStatus::Connected) {
                connected_before = true;
            }
            if !core.handle_push(message, reconnected) {
                break;
            }
        }
    })
}

/// A running patient session.
pub struct QueueSession<A: QueueApi = HttpQueueApi> {
    core: Arc<SessionCore<A>>,
    user_id: Option<String>,
    tasks: Mutex<Vec<BackgroundTask>>,
    push: Mutex<Option<PushConnection>>,
}

impl<A: QueueApi> QueueSession<A> {
    /// Restore local state and start the background tasks. Must be called
    /// from within a tokio runtime.
    ///
    /// Without a usable `token` the session runs on polling alone.
    pub fn start(config: &ClientConfig, api: A, clock: Arc<dyn Clock>, token: Option<&str>) -> Result<Self, ClientError> {
        let state = Arc::new(CoreState::new());
        let store = LocalStore::new(&config.storage_dir);
        let reconciler = Arc::new(Reconciler::new(state.clone(), Arc::new(api), store.clone(), clock.clone()));
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            state,
            reconciler: reconciler.clone(),
            store,
            clock,
            countdowns: Mutex::new(HashMap::new()),
            refresh_tx,
        });
        core.restore()?;

        let mut tasks = vec![
            spawn_appointment_poller(reconciler.clone(), config.appointment_poll_interval),
            spawn_live_queue_poller(reconciler.clone(), config.live_queue_poll_interval),
            spawn_refresher(reconciler, refresh_rx),
        ];

        let user_id = match token.map(decode_user_id) {
            Some(Ok(id)) => Some(id),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Token unusable for push channel, polling only");
                None
            }
            None => {
                tracing::info!("No session token, polling only");
                None
            }
        };

        let push = user_id.as_deref().map(|id| {
            let (tx, rx) = mpsc::channel(PUSH_BUFFER);
            tasks.push(spawn_dispatcher(core.clone(), rx));
            PushConnection::spawn(config.socket_url.clone(), user_room(id), config.reconnect.clone(), tx)
        });

        tracing::info!(user_id = user_id.as_deref().unwrap_or("-"), "Queue session started");
        Ok(Self {
            core,
            user_id,
            tasks: Mutex::new(tasks),
            push: Mutex::new(push),
        })
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.core.state.subscribe()
    }

    pub fn snapshot(&self) -> Result<QueueState, ClientError> {
        Ok(self.core.state.snapshot()?)
    }

    pub fn dashboard(&self) -> Result<Dashboard, ClientError> {
        let snapshot = self.core.state.snapshot()?;
        let clock = &self.core.clock;
        Ok(Dashboard::build(&snapshot, clock.today(), clock.now()))
    }

    /// Refetch appointments and live queue positions now.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.core.reconciler.refresh_appointments().await?;
        self.core.reconciler.refresh_live_queues().await
    }

    pub async fn book(&self, request: &BookingRequest) -> Result<Appointment, ClientError> {
        let created = match self.core.reconciler.api().book_appointment(request).await {
            Ok(created) => created,
            Err(e) => return Err(self.surface(e)),
        };
        self.core.state.toast(Toast::info("Appointment booked.", ACTION_TOAST));
        let result = self.core.reconciler.refresh_appointments().await.map(|_| ());
        self.core.reconciler.report("appointments", result);
        Ok(created)
    }

    /// Cancel on the backend, then drop the appointment and its reminders
    /// locally before the confirming refetch.
    pub async fn cancel(&self, appointment_id: &str, reason: Option<&str>) -> Result<(), ClientError> {
        if let Err(e) = self
            .core
            .reconciler
            .api()
            .cancel_appointment(appointment_id, reason)
            .await
        {
            return Err(self.surface(e));
        }

        if self.core.state.remove_appointment(appointment_id)? > 0 {
            self.core.reconciler.persist_reminders()?;
        }
        self.core.state.toast(Toast::info("Appointment cancelled.", ACTION_TOAST));

        let result = self.core.reconciler.refresh_appointments().await.map(|_| ());
        self.core.reconciler.report("appointments", result);
        Ok(())
    }

    /// Mark the consultation finished on the backend, then complete it
    /// locally (tentatively) until the confirming refetch lands.
    pub async fn complete(&self, appointment_id: &str) -> Result<(), ClientError> {
        if let Err(e) = self.core.reconciler.api().complete_appointment(appointment_id).await {
            return Err(self.surface(e));
        }

        if self.core.state.complete_locally(appointment_id)? > 0 {
            self.core.reconciler.persist_reminders()?;
        }
        self.core.state.toast(Toast::info("Consultation completed.", ACTION_TOAST));

        let result = self.core.reconciler.refresh_appointments().await.map(|_| ());
        self.core.reconciler.report("appointments", result);
        Ok(())
    }

    pub async fn check_peak_hours(&self, hospital_id: &str, date: NaiveDate) -> Result<PeakHourCheck, ClientError> {
        self.core
            .reconciler
            .api()
            .check_peak_hours(hospital_id, date)
            .await
            .map_err(|e| self.surface(e))
    }

    /// `tel:` link for the hospital of `appointment_id`, if it has a number.
    pub fn call_hospital(&self, appointment_id: &str) -> Result<Option<String>, ClientError> {
        let snapshot = self.core.state.snapshot()?;
        Ok(snapshot
            .appointment(appointment_id)
            .and_then(|a| a.hospital.call_link()))
    }

    pub fn mark_reminder_read(&self, id: Uuid) -> Result<bool, ClientError> {
        let changed = self.core.state.mark_reminder_read(id)?;
        if changed {
            self.core.reconciler.persist_reminders()?;
        }
        Ok(changed)
    }

    pub fn mark_notifications_read(&self) -> Result<(), ClientError> {
        Ok(self.core.state.mark_notifications_read()?)
    }

    /// Close the state and stop every task. Idempotent.
    pub fn shutdown(&self) {
        if self.core.state.is_closed() {
            return;
        }
        self.core.state.close();

        let push = match self.push.lock() {
            Ok(mut push) => push.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(push);
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        drop(tasks);
        self.core.stop_countdowns();
        tracing::info!("Queue session stopped");
    }

    /// Report a user-action failure as a toast and hand it back.
    fn surface(&self, error: ClientError) -> ClientError {
        tracing::warn!(code = error.code(), error = %error, "Action failed");
        self.core.state.toast(Toast::error(error.user_message()));
        error
    }
}

impl<A: QueueApi> Drop for QueueSession<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
