//! Applies push events to [`CoreState`].
//!
//! Each event is applied under one state write, so observers never see half
//! of a handler's changes. Anything that needs I/O (REST refetches, local
//! storage, countdown tasks, toasts) comes back as an [`Effect`] for the
//! session to execute after the write.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::events::{NotificationPayload, PushEvent, QueueUpdate, ReminderPayload};
use crate::core_state::{BannerKind, BannerState, CoreError, CoreState, StateWrite, Toast, Topic};
use crate::countdown::{format_countdown, remaining_seconds};
use crate::models::{Notification, Reminder};

const NOTIFICATION_TOAST: Duration = Duration::from_secs(4);
const REMINDER_TOAST: Duration = Duration::from_secs(8);
const QUEUE_TOAST: Duration = Duration::from_secs(6);

/// Follow-up work produced by a push event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RefreshAppointments,
    RefreshLiveQueue(String),
    PersistReminders,
    PersistBanner(BannerKind),
    ArmCountdown(BannerKind),
    Toast(Toast),
}

/// Apply `event` received at `now`.
pub fn apply(state: &CoreState, event: PushEvent, now: DateTime<Utc>) -> Result<Vec<Effect>, CoreError> {
    let name = event.name();
    let hospital = match &event {
        PushEvent::QueueUpdated(update) => update.hospital_id().map(str::to_string),
        _ => None,
    };
    let effects = state.update(|w| match event {
        PushEvent::Notification(payload) => on_notification(w, payload, now),
        PushEvent::Reminder(payload) => on_reminder(w, payload, now),
        PushEvent::QueueUpdated(update) => on_queue_update(w, update, now),
    })?;
    tracing::debug!(
        event = name,
        hospital = hospital.as_deref().unwrap_or("-"),
        effects = effects.len(),
        "Push event applied"
    );
    Ok(effects)
}

fn on_notification(w: &mut StateWrite<'_>, payload: NotificationPayload, now: DateTime<Utc>) -> Vec<Effect> {
    let mut effects = vec![Effect::Toast(Toast::info(payload.message.clone(), NOTIFICATION_TOAST))];

    if payload.reports_completion() {
        if let Some(appointment_id) = payload.appointment_id.as_deref() {
            if w.complete_locally(appointment_id) > 0 {
                effects.push(Effect::PersistReminders);
            }
        }
    }
    if payload.status.is_some() {
        effects.push(Effect::RefreshAppointments);
    }

    w.push_notification(Notification {
        id: Uuid::new_v4(),
        message: payload.message,
        appointment_id: payload.appointment_id,
        status: payload.status,
        timestamp: now,
        read: false,
    });
    w.touch(Topic::Notifications);
    effects
}

fn on_reminder(w: &mut StateWrite<'_>, payload: ReminderPayload, now: DateTime<Utc>) -> Vec<Effect> {
    let toast = Toast::info(payload.message.clone(), REMINDER_TOAST);
    w.reminders.insert(
        0,
        Reminder {
            id: Uuid::new_v4(),
            appointment_id: payload.appointment_id,
            message: payload.message,
            timestamp: now,
            read: false,
            queue_position: payload.queue_position,
            distance_km: payload.distance_km,
            travel_time_minutes: payload.travel_time_minutes,
        },
    );
    w.touch(Topic::Reminders);
    vec![Effect::PersistReminders, Effect::Toast(toast)]
}

fn on_queue_update(w: &mut StateWrite<'_>, update: QueueUpdate, now: DateTime<Utc>) -> Vec<Effect> {
    match update {
        QueueUpdate::DoctorBreak(u) => {
            let state = u.into_state(now);
            let message = state.message.clone().unwrap_or_else(|| {
                format!(
                    "Your doctor is on a short break. Consultations resume in {}.",
                    format_countdown(u64::from(state.break_duration_minutes) * 60)
                )
            });
            arm_banner(w, BannerState::DoctorBreak(state), now, message)
        }
        QueueUpdate::DelayBroadcast(u) => {
            let state = u.into_state(now);
            let message = match state.reason.as_deref() {
                Some(reason) => format!("Your doctor is running {} minutes late: {reason}", state.delay_minutes),
                None => format!("Your doctor is running {} minutes late.", state.delay_minutes),
            };
            arm_banner(w, BannerState::DoctorDelay(state), now, message)
        }
        QueueUpdate::EmergencyInserted(u) => {
            let state = u.into_state(now);
            let message = format!(
                "An emergency case is being attended. Expect about {} extra minutes.",
                state.estimated_duration_minutes
            );
            arm_banner(w, BannerState::Emergency(state), now, message)
        }
        QueueUpdate::ConsultationEnded(u) => {
            let refreshes = live_queue_refreshes(w, &u.hospital_id);
            if refreshes.is_empty() {
                return Vec::new();
            }
            let mut effects = refreshes;
            effects.push(Effect::RefreshAppointments);
            effects.push(Effect::Toast(Toast::info("The queue just moved forward.", QUEUE_TOAST)));
            effects
        }
        QueueUpdate::WalkInAdded(u) => {
            let mut effects = live_queue_refreshes(w, &u.hospital_id);
            if !effects.is_empty() {
                effects.push(Effect::RefreshAppointments);
            }
            effects
        }
        QueueUpdate::Unknown => {
            tracing::debug!("Ignoring unhandled queue update type");
            Vec::new()
        }
    }
}

/// Store a banner and arm its countdown. The toast and refetch only happen
/// for users with an active appointment at that hospital.
fn arm_banner(w: &mut StateWrite<'_>, banner: BannerState, now: DateTime<Utc>, message: String) -> Vec<Effect> {
    let kind = banner.kind();
    if remaining_seconds(banner.end_time(), now) == 0 {
        tracing::debug!(%kind, end = %banner.end_time(), "Dropping banner that already ended");
        return Vec::new();
    }

    let affected = w.is_affected(banner.hospital_id());
    w.set_banner(banner);
    w.touch(Topic::Banner(kind));

    let mut effects = vec![Effect::PersistBanner(kind), Effect::ArmCountdown(kind)];
    if affected {
        effects.push(Effect::Toast(Toast::warning(message, QUEUE_TOAST)));
        effects.push(Effect::RefreshAppointments);
    }
    effects
}

fn live_queue_refreshes(w: &StateWrite<'_>, hospital_id: &str) -> Vec<Effect> {
    w.active_appointments()
        .filter(|a| a.hospital_id() == hospital_id)
        .map(|a| Effect::RefreshLiveQueue(a.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::tests::{appointment, at, reminder, snapshot};
    use crate::core_state::UiEvent;
    use crate::models::AppointmentStatus;
    use serde_json::json;

    fn event(name: &str, data: serde_json::Value) -> PushEvent {
        let text = json!({ "event": name, "data": data }).to_string();
        PushEvent::parse(&text).unwrap().unwrap()
    }

    fn with_appointments(list: Vec<crate::models::Appointment>) -> CoreState {
        let core = CoreState::new();
        let ticket = core.begin_fetch().unwrap();
        core.replace_appointments(ticket, list).unwrap();
        core
    }

    fn has_toast(effects: &[Effect]) -> bool {
        effects.iter().any(|e| matches!(e, Effect::Toast(_)))
    }

    #[test]
    fn break_for_affected_user_toasts_and_arms() {
        let core = with_appointments(vec![appointment("a1", "h1", AppointmentStatus::Confirmed, at(0))]);
        let effects = apply(
            &core,
            event("queueUpdated", json!({"type": "DOCTOR_BREAK", "hospitalId": "h1", "breakDurationMinutes": 15})),
            at(0),
        )
        .unwrap();

        let snap = core.snapshot().unwrap();
        assert_eq!(snap.doctor_break.unwrap().end_time, at(900));
        assert!(effects.contains(&Effect::PersistBanner(BannerKind::DoctorBreak)));
        assert!(effects.contains(&Effect::ArmCountdown(BannerKind::DoctorBreak)));
        assert!(effects.contains(&Effect::RefreshAppointments));
        assert!(has_toast(&effects));
    }

    #[test]
    fn emergency_for_other_hospital_is_stored_silently() {
        let core = with_appointments(vec![appointment("a1", "h1", AppointmentStatus::Confirmed, at(0))]);
        let effects = apply(
            &core,
            event(
                "queueUpdated",
                json!({"type": "EMERGENCY_INSERTED", "hospitalId": "h2", "estimatedDuration": 30}),
            ),
            at(0),
        )
        .unwrap();

        assert!(core.snapshot().unwrap().emergency.is_some());
        assert!(!has_toast(&effects));
        assert!(!effects.contains(&Effect::RefreshAppointments));
        assert!(effects.contains(&Effect::ArmCountdown(BannerKind::Emergency)));
    }

    #[test]
    fn banner_that_already_ended_is_dropped() {
        let core = CoreState::new();
        let effects = apply(
            &core,
            event(
                "queueUpdated",
                json!({
                    "type": "DELAY_BROADCAST",
                    "hospitalId": "h1",
                    "delayMinutes": 10,
                    "endTime": "2020-01-01T00:00:00Z"
                }),
            ),
            at(0),
        )
        .unwrap();
        assert!(effects.is_empty());
        assert!(core.snapshot().unwrap().doctor_delay.is_none());
    }

    #[test]
    fn completion_notification_prunes_in_one_write() {
        let core = with_appointments(vec![appointment("a1", "h1", AppointmentStatus::InProgress, at(0))]);
        let t = core.begin_fetch().unwrap();
        core.replace_live_queue(t, "a1", snapshot(0)).unwrap();
        core.update(|w| w.reminders = vec![reminder("a1"), reminder("other")]).unwrap();

        let mut rx = core.subscribe();
        let effects = apply(
            &core,
            event(
                "notification",
                json!({"message": "Consultation complete", "apptId": "a1", "status": "COMPLETED"}),
            ),
            at(5),
        )
        .unwrap();

        let snap = core.snapshot().unwrap();
        assert!(snap.live_queue.is_empty());
        assert_eq!(snap.reminders.len(), 1);
        assert_eq!(snap.notifications.len(), 1);
        let appt = snap.appointment("a1").unwrap();
        assert_eq!(appt.status, AppointmentStatus::Completed);
        assert!(appt.tentative);
        assert!(effects.contains(&Effect::PersistReminders));
        assert!(effects.contains(&Effect::RefreshAppointments));

        // All change events arrive after the single write: the first one
        // observed already sees the final state.
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, UiEvent::Changed(_)));
        assert_eq!(core.snapshot().unwrap(), snap);
    }

    #[test]
    fn plain_notification_only_toasts() {
        let core = CoreState::new();
        let effects = apply(&core, event("notification", json!({"message": "Welcome"})), at(0)).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(has_toast(&effects));
        assert_eq!(core.snapshot().unwrap().unread_notifications(), 1);
    }

    #[test]
    fn reminder_is_stored_newest_first() {
        let core = CoreState::new();
        core.update(|w| w.reminders = vec![reminder("a0")]).unwrap();
        let effects = apply(
            &core,
            event("reminder", json!({"message": "Leave now", "apptId": "a1", "queuePosition": 3})),
            at(10),
        )
        .unwrap();

        let snap = core.snapshot().unwrap();
        assert_eq!(snap.reminders.len(), 2);
        assert_eq!(snap.reminders[0].message, "Leave now");
        assert_eq!(snap.reminders[0].timestamp, at(10));
        assert_eq!(effects[0], Effect::PersistReminders);
        let Effect::Toast(toast) = &effects[1] else {
            panic!("expected toast");
        };
        assert_eq!(toast.duration, REMINDER_TOAST);
    }

    #[test]
    fn consultation_ended_refreshes_affected_live_queues() {
        let core = with_appointments(vec![
            appointment("a1", "h1", AppointmentStatus::CheckedIn, at(0)),
            appointment("a2", "h1", AppointmentStatus::Completed, at(0)),
            appointment("a3", "h2", AppointmentStatus::Confirmed, at(0)),
        ]);
        let effects = apply(
            &core,
            event("queueUpdated", json!({"type": "CONSULTATION_ENDED", "hospitalId": "h1"})),
            at(0),
        )
        .unwrap();
        assert_eq!(effects[0], Effect::RefreshLiveQueue("a1".into()));
        assert!(effects.contains(&Effect::RefreshAppointments));
        assert!(!effects.contains(&Effect::RefreshLiveQueue("a2".into())));
        assert!(!effects.contains(&Effect::RefreshLiveQueue("a3".into())));
    }

    #[test]
    fn walk_in_elsewhere_is_a_no_op() {
        let core = with_appointments(vec![appointment("a1", "h1", AppointmentStatus::CheckedIn, at(0))]);
        let effects = apply(
            &core,
            event("queueUpdated", json!({"type": "WALK_IN_ADDED", "hospitalId": "h9"})),
            at(0),
        )
        .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn unknown_queue_update_leaves_state_untouched() {
        let core = with_appointments(vec![appointment("a1", "h1", AppointmentStatus::CheckedIn, at(0))]);
        let before = core.snapshot().unwrap();
        let mut rx = core.subscribe();

        let effects = apply(
            &core,
            event("queueUpdated", json!({"type": "ROOM_CHANGED", "hospitalId": "h1", "room": "B2"})),
            at(0),
        )
        .unwrap();

        assert!(effects.is_empty());
        assert_eq!(core.snapshot().unwrap(), before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_state_rejects_events() {
        let core = CoreState::new();
        core.close();
        let result = apply(&core, event("notification", json!({"message": "late"})), at(0));
        assert!(matches!(result, Err(CoreError::Closed)));
    }
}
