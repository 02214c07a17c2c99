//! Single typed state container for one patient session.
//!
//! `CoreState` holds every slot the queue views read from: the three
//! availability banners (doctor break, doctor delay, emergency), the
//! appointment list, per-appointment live queue snapshots, notifications and
//! reminders. Push handlers, pollers and countdown tasks all write here; the
//! presentation layer reads immutable snapshots.
//!
//! Writes are stamped with a monotonic sequence per [`Topic`]. Polls take a
//! [`FetchTicket`] before their request. A poll's own write stamps the topic
//! with its ticket, not a fresh sequence, so its response is applied unless a
//! push or local write, or a poll issued later, already landed on that topic.
//!
//! After [`CoreState::close`] every write is refused and no events are
//! emitted, which is what keeps in-flight work from touching a torn-down
//! session.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentStatus, DoctorBreakState, DoctorDelayState, EmergencyAlertState,
    Expiring, LiveQueueSnapshot, Notification, Reminder,
};
use crate::storage;

/// Notifications kept for the drawer, newest first.
const NOTIFICATION_CAPACITY: usize = 50;

/// UI event fan-out buffer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ═══════════════════════════════════════════════════════════
// Slots, topics, UI events
// ═══════════════════════════════════════════════════════════

/// The three countdown banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerKind {
    DoctorBreak,
    DoctorDelay,
    Emergency,
}

impl BannerKind {
    pub const ALL: [BannerKind; 3] = [Self::DoctorBreak, Self::DoctorDelay, Self::Emergency];

    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::DoctorBreak => storage::KEY_DOCTOR_BREAK,
            Self::DoctorDelay => storage::KEY_DOCTOR_DELAY,
            Self::Emergency => storage::KEY_EMERGENCY,
        }
    }
}

impl std::fmt::Display for BannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DoctorBreak => write!(f, "Doctor break"),
            Self::DoctorDelay => write!(f, "Doctor delay"),
            Self::Emergency => write!(f, "Emergency"),
        }
    }
}

/// A banner slot value, one variant per [`BannerKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum BannerState {
    DoctorBreak(DoctorBreakState),
    DoctorDelay(DoctorDelayState),
    Emergency(EmergencyAlertState),
}

impl BannerState {
    pub fn kind(&self) -> BannerKind {
        match self {
            Self::DoctorBreak(_) => BannerKind::DoctorBreak,
            Self::DoctorDelay(_) => BannerKind::DoctorDelay,
            Self::Emergency(_) => BannerKind::Emergency,
        }
    }

    fn expiring(&self) -> &dyn Expiring {
        match self {
            Self::DoctorBreak(s) => s,
            Self::DoctorDelay(s) => s,
            Self::Emergency(s) => s,
        }
    }

    pub fn hospital_id(&self) -> &str {
        self.expiring().hospital_id()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.expiring().start_time()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.expiring().end_time()
    }
}

/// What changed. Also the unit of staleness tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "topic", content = "key", rename_all = "snake_case")]
pub enum Topic {
    Appointments,
    LiveQueue(String),
    Banner(BannerKind),
    Notifications,
    Reminders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// Transient message for the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    #[serde(serialize_with = "duration_ms::serialize")]
    pub duration: Duration,
}

impl Toast {
    pub fn info(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            level: ToastLevel::Info,
            message: message.into(),
            duration,
        }
    }

    pub fn warning(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            level: ToastLevel::Warning,
            message: message.into(),
            duration,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Error,
            message: message.into(),
            duration: Duration::from_secs(5),
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Everything observers of a session can see happen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Toast(Toast),
    Changed(Topic),
    Countdown {
        kind: BannerKind,
        remaining_seconds: u64,
    },
}

// ═══════════════════════════════════════════════════════════
// QueueState: plain data, cloned into snapshots
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    pub doctor_break: Option<DoctorBreakState>,
    pub doctor_delay: Option<DoctorDelayState>,
    pub emergency: Option<EmergencyAlertState>,
    pub appointments: Vec<Appointment>,
    pub live_queue: HashMap<String, LiveQueueSnapshot>,
    pub notifications: Vec<Notification>,
    pub reminders: Vec<Reminder>,
}

impl QueueState {
    pub fn banner(&self, kind: BannerKind) -> Option<BannerState> {
        match kind {
            BannerKind::DoctorBreak => self.doctor_break.clone().map(BannerState::DoctorBreak),
            BannerKind::DoctorDelay => self.doctor_delay.clone().map(BannerState::DoctorDelay),
            BannerKind::Emergency => self.emergency.clone().map(BannerState::Emergency),
        }
    }

    pub fn set_banner(&mut self, banner: BannerState) {
        match banner {
            BannerState::DoctorBreak(s) => self.doctor_break = Some(s),
            BannerState::DoctorDelay(s) => self.doctor_delay = Some(s),
            BannerState::Emergency(s) => self.emergency = Some(s),
        }
    }

    fn take_banner(&mut self, kind: BannerKind) -> bool {
        match kind {
            BannerKind::DoctorBreak => self.doctor_break.take().is_some(),
            BannerKind::DoctorDelay => self.doctor_delay.take().is_some(),
            BannerKind::Emergency => self.emergency.take().is_some(),
        }
    }

    /// Appointments that have not reached a terminal status.
    pub fn active_appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter().filter(|a| a.is_active())
    }

    /// Relevance gate: does the user hold an active appointment at this hospital?
    pub fn is_affected(&self, hospital_id: &str) -> bool {
        self.active_appointments()
            .any(|a| a.hospital_id() == hospital_id)
    }

    /// Banner gate: an active appointment at this hospital on `today`.
    pub fn has_appointment_today_at(&self, hospital_id: &str, today: NaiveDate) -> bool {
        self.active_appointments()
            .any(|a| a.hospital_id() == hospital_id && a.local_date() == today)
    }

    pub fn appointment(&self, id: &str) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn unread_reminders(&self) -> usize {
        self.reminders.iter().filter(|r| !r.read).count()
    }

    /// Drop every reminder tied to `appointment_id`. Returns how many went.
    pub fn prune_reminders(&mut self, appointment_id: &str) -> usize {
        let before = self.reminders.len();
        self.reminders.retain(|r| !r.concerns(appointment_id));
        before - self.reminders.len()
    }

    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.insert(0, notification);
        self.notifications.truncate(NOTIFICATION_CAPACITY);
    }

    /// Optimistically flip an appointment to COMPLETED ahead of the
    /// authoritative list refresh. Returns false if the id is unknown.
    pub fn mark_completed_tentatively(&mut self, appointment_id: &str) -> bool {
        match self.appointments.iter_mut().find(|a| a.id == appointment_id) {
            Some(appt) => {
                if appt.status != AppointmentStatus::Completed {
                    appt.status = AppointmentStatus::Completed;
                    appt.tentative = true;
                }
                true
            }
            None => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

/// Issued before a poll request; checked when its response lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    data: QueueState,
    seq: u64,
    marks: HashMap<Topic, u64>,
}

impl Inner {
    fn stamp(&mut self, topic: Topic) {
        self.seq += 1;
        self.marks.insert(topic, self.seq);
    }

    fn stamp_polled(&mut self, topic: Topic, ticket: FetchTicket) {
        let mark = self.marks.entry(topic).or_default();
        *mark = (*mark).max(ticket.seq);
    }

    fn is_fresh(&self, topic: &Topic, ticket: FetchTicket) -> bool {
        self.marks.get(topic).map_or(true, |&mark| mark < ticket.seq)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Session closed")]
    Closed,
}

pub struct CoreState {
    inner: RwLock<Inner>,
    closed: AtomicBool,
    events: broadcast::Sender<UiEvent>,
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            closed: AtomicBool::new(false),
            events,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Refuse all further writes and events.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Read path ───────────────────────────────────────────

    pub fn snapshot(&self) -> Result<QueueState, CoreError> {
        let guard = self.inner.read().map_err(|_| CoreError::LockPoisoned)?;
        Ok(guard.data.clone())
    }

    /// End time of a banner slot, if one is set.
    pub fn banner_end(&self, kind: BannerKind) -> Result<Option<DateTime<Utc>>, CoreError> {
        let guard = self.inner.read().map_err(|_| CoreError::LockPoisoned)?;
        Ok(guard.data.banner(kind).map(|b| b.end_time()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: UiEvent) {
        if self.is_closed() {
            return;
        }
        // No receivers is fine: nobody is rendering.
        let _ = self.events.send(event);
    }

    pub fn toast(&self, toast: Toast) {
        self.emit(UiEvent::Toast(toast));
    }

    // ── Write path ──────────────────────────────────────────

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, CoreError> {
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        let guard = self.inner.write().map_err(|_| CoreError::LockPoisoned)?;
        // Re-check under the lock: close() may have raced the acquire.
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        Ok(guard)
    }

    fn notify(&self, topics: Vec<Topic>) {
        for topic in topics {
            self.emit(UiEvent::Changed(topic));
        }
    }

    /// Run `f` under one write lock. Topics the closure marks are stamped
    /// and announced once the lock is released.
    pub fn update<R>(&self, f: impl FnOnce(&mut StateWrite<'_>) -> R) -> Result<R, CoreError> {
        let mut guard = self.write()?;
        let mut write = StateWrite {
            inner: &mut *guard,
            touched: Vec::new(),
        };
        let result = f(&mut write);
        let touched = std::mem::take(&mut write.touched);
        drop(guard);
        self.notify(touched);
        Ok(result)
    }

    pub fn begin_fetch(&self) -> Result<FetchTicket, CoreError> {
        let mut guard = self.write()?;
        guard.seq += 1;
        Ok(FetchTicket { seq: guard.seq })
    }

    /// Replace the appointment list from a poll. Returns false when a push
    /// or local write, or a later-issued poll, landed after `ticket`.
    pub fn replace_appointments(
        &self,
        ticket: FetchTicket,
        appointments: Vec<Appointment>,
    ) -> Result<bool, CoreError> {
        self.update(|w| {
            if !w.is_fresh(&Topic::Appointments, ticket) {
                return false;
            }
            let live: Vec<String> = appointments.iter().map(|a| a.id.clone()).collect();
            w.appointments = appointments;
            w.live_queue.retain(|id, _| live.contains(id));
            w.touch_polled(Topic::Appointments, ticket);
            true
        })
    }

    /// Replace one appointment's live queue snapshot from a poll.
    pub fn replace_live_queue(
        &self,
        ticket: FetchTicket,
        appointment_id: &str,
        snapshot: LiveQueueSnapshot,
    ) -> Result<bool, CoreError> {
        self.update(|w| {
            let topic = Topic::LiveQueue(appointment_id.to_string());
            if !w.is_fresh(&topic, ticket) {
                return false;
            }
            w.live_queue.insert(appointment_id.to_string(), snapshot);
            w.touch_polled(topic, ticket);
            true
        })
    }

    /// Local completion: drop the live queue entry and related reminders,
    /// and flip the appointment to a tentative COMPLETED.
    pub fn complete_locally(&self, appointment_id: &str) -> Result<usize, CoreError> {
        self.update(|w| w.complete_locally(appointment_id))
    }

    pub fn set_banner(&self, banner: BannerState) -> Result<(), CoreError> {
        self.update(|w| {
            let kind = banner.kind();
            w.set_banner(banner);
            w.touch(Topic::Banner(kind));
        })
    }

    /// Clear a banner slot, but only if it still ends at `end_time`.
    /// A slot re-armed by a newer event is left alone.
    pub fn clear_banner_if(
        &self,
        kind: BannerKind,
        end_time: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        self.update(|w| {
            let matches = w.banner(kind).is_some_and(|b| b.end_time() == end_time);
            if matches && w.take_banner(kind) {
                w.touch(Topic::Banner(kind));
                true
            } else {
                false
            }
        })
    }

    /// Drop an appointment together with its live queue entry and reminders.
    /// Returns how many reminders went.
    pub fn remove_appointment(&self, appointment_id: &str) -> Result<usize, CoreError> {
        self.update(|w| {
            let before = w.appointments.len();
            w.appointments.retain(|a| a.id != appointment_id);
            if w.appointments.len() != before {
                w.live_queue.remove(appointment_id);
                w.touch(Topic::Appointments);
                w.touch(Topic::LiveQueue(appointment_id.to_string()));
            }
            let pruned = w.prune_reminders(appointment_id);
            if pruned > 0 {
                w.touch(Topic::Reminders);
            }
            pruned
        })
    }

    pub fn mark_reminder_read(&self, id: Uuid) -> Result<bool, CoreError> {
        self.update(|w| {
            let Some(reminder) = w.reminders.iter_mut().find(|r| r.id == id) else {
                return false;
            };
            reminder.read = true;
            w.touch(Topic::Reminders);
            true
        })
    }

    pub fn mark_notifications_read(&self) -> Result<(), CoreError> {
        self.update(|w| {
            for n in w.notifications.iter_mut() {
                n.read = true;
            }
            w.touch(Topic::Notifications);
        })
    }

    /// Seed reminders restored from local storage (no staleness stamp).
    pub fn restore_reminders(&self, reminders: Vec<Reminder>) -> Result<(), CoreError> {
        self.update(|w| {
            w.reminders = reminders;
            w.touch(Topic::Reminders);
        })
    }
}

/// Mutable view handed to [`CoreState::update`] closures.
pub struct StateWrite<'a> {
    inner: &'a mut Inner,
    touched: Vec<Topic>,
}

impl StateWrite<'_> {
    /// Record a write to `topic`: stamps its sequence and queues a
    /// `Changed` event.
    pub fn touch(&mut self, topic: Topic) {
        self.inner.stamp(topic.clone());
        if !self.touched.contains(&topic) {
            self.touched.push(topic);
        }
    }

    /// Record a poll's write to `topic`. Later-issued tickets stay fresh.
    pub fn touch_polled(&mut self, topic: Topic, ticket: FetchTicket) {
        self.inner.stamp_polled(topic.clone(), ticket);
        if !self.touched.contains(&topic) {
            self.touched.push(topic);
        }
    }

    pub fn is_fresh(&self, topic: &Topic, ticket: FetchTicket) -> bool {
        self.inner.is_fresh(topic, ticket)
    }

    pub fn complete_locally(&mut self, appointment_id: &str) -> usize {
        let had_snapshot = self.inner.data.live_queue.remove(appointment_id).is_some();
        if had_snapshot {
            self.touch(Topic::LiveQueue(appointment_id.to_string()));
        }
        if self.inner.data.mark_completed_tentatively(appointment_id) {
            self.touch(Topic::Appointments);
        }
        let pruned = self.inner.data.prune_reminders(appointment_id);
        if pruned > 0 {
            self.touch(Topic::Reminders);
        }
        pruned
    }
}

impl Deref for StateWrite<'_> {
    type Target = QueueState;

    fn deref(&self) -> &QueueState {
        &self.inner.data
    }
}

impl DerefMut for StateWrite<'_> {
    fn deref_mut(&mut self) -> &mut QueueState {
        &mut self.inner.data
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
