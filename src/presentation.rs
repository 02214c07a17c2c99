//! View models derived from a [`QueueState`] snapshot.
//!
//! Pure functions of state, the local date and the current time. Nothing here
//! mutates or fetches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::core_state::{BannerKind, BannerState, QueueState};
use crate::countdown::{format_countdown, progress_percent, remaining_seconds};
use crate::models::{AppointmentStatus, LiveQueueSnapshot};

/// How close the patient is to being seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Nobody ahead.
    Next,
    /// One or two ahead.
    Almost,
    /// Three to five ahead.
    Soon,
}

impl Urgency {
    pub fn from_patients_ahead(ahead: u32) -> Option<Self> {
        match ahead {
            0 => Some(Self::Next),
            1..=2 => Some(Self::Almost),
            3..=5 => Some(Self::Soon),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Next => "You're next! Please be ready outside the consultation room.",
            Self::Almost => "Almost your turn. Please stay close to the waiting area.",
            Self::Soon => "Your turn is coming up soon. Start heading to the clinic.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerView {
    pub kind: BannerKind,
    pub hospital_id: String,
    pub title: String,
    pub detail: String,
    pub remaining_seconds: u64,
    pub progress_percent: u8,
    pub countdown_label: String,
}

/// The banner for `kind`, if it is active and the patient has an active
/// appointment at that hospital today.
pub fn banner_view(state: &QueueState, kind: BannerKind, today: NaiveDate, now: DateTime<Utc>) -> Option<BannerView> {
    let banner = state.banner(kind)?;
    let remaining = remaining_seconds(banner.end_time(), now);
    if remaining == 0 || !state.has_appointment_today_at(banner.hospital_id(), today) {
        return None;
    }

    let (title, detail) = match &banner {
        BannerState::DoctorBreak(b) => (
            "Doctor on a short break".to_string(),
            b.message
                .clone()
                .unwrap_or_else(|| format!("Consultations pause for {} minutes.", b.break_duration_minutes)),
        ),
        BannerState::DoctorDelay(d) => (
            "Doctor running late".to_string(),
            match d.reason.as_deref() {
                Some(reason) => format!("Delayed by {} minutes: {reason}", d.delay_minutes),
                None => format!("Delayed by {} minutes.", d.delay_minutes),
            },
        ),
        BannerState::Emergency(e) => (
            "Emergency case in progress".to_string(),
            format!(
                "Estimated {} minutes. {} patients affected.",
                e.estimated_duration_minutes, e.affected_patients
            ),
        ),
    };

    Some(BannerView {
        kind,
        hospital_id: banner.hospital_id().to_string(),
        title,
        detail,
        remaining_seconds: remaining,
        progress_percent: progress_percent(banner.start_time(), banner.end_time(), now),
        countdown_label: format_countdown(remaining),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusView {
    pub appointment_id: String,
    pub hospital_name: String,
    /// `tel:` link behind the "call hospital" action.
    pub call_link: Option<String>,
    pub doctor_name: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub status: AppointmentStatus,
    /// Status still awaiting confirmation from the backend.
    pub tentative: bool,
    pub queue_number: Option<u32>,
    pub patients_ahead: Option<u32>,
    pub estimated_wait_minutes: Option<u32>,
    pub current_serving: Option<u32>,
    pub urgency: Option<Urgency>,
    pub urgency_message: Option<&'static str>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub banners: Vec<BannerView>,
    /// Today's active appointments, earliest first.
    pub today: Vec<QueueStatusView>,
    /// Active appointments on later dates, earliest first.
    pub upcoming: Vec<QueueStatusView>,
    pub unread_notifications: usize,
    pub unread_reminders: usize,
}

impl Dashboard {
    pub fn build(state: &QueueState, today: NaiveDate, now: DateTime<Utc>) -> Self {
        let banners = BannerKind::ALL
            .iter()
            .filter_map(|&kind| banner_view(state, kind, today, now))
            .collect();

        let mut active: Vec<_> = state.active_appointments().collect();
        active.sort_by_key(|a| (a.scheduled_for, a.queue_number));

        let mut today_views = Vec::new();
        let mut upcoming = Vec::new();
        for appt in active {
            let date = appt.local_date();
            if date < today {
                continue;
            }
            let view = queue_status(appt, state.live_queue.get(&appt.id));
            if date == today {
                today_views.push(view);
            } else {
                upcoming.push(view);
            }
        }

        Self {
            banners,
            today: today_views,
            upcoming,
            unread_notifications: state.unread_notifications(),
            unread_reminders: state.unread_reminders(),
        }
    }
}

fn queue_status(appt: &crate::models::Appointment, live: Option<&LiveQueueSnapshot>) -> QueueStatusView {
    let urgency = live.and_then(|s| Urgency::from_patients_ahead(s.patients_ahead));
    QueueStatusView {
        appointment_id: appt.id.clone(),
        hospital_name: appt.hospital.name.clone().unwrap_or_else(|| appt.hospital.id.clone()),
        call_link: appt.hospital.call_link(),
        doctor_name: appt.doctor.as_ref().and_then(|d| d.name.clone()),
        scheduled_for: appt.scheduled_for,
        status: appt.status,
        tentative: appt.tentative,
        queue_number: appt.queue_number,
        patients_ahead: live.map(|s| s.patients_ahead),
        estimated_wait_minutes: live.map(|s| s.estimated_wait_minutes),
        current_serving: live.and_then(|s| s.current_serving),
        urgency,
        urgency_message: urgency.map(|u| u.message()),
        message: live.and_then(|s| s.message.clone()),
    }
}
