//! Push channel wire frames.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! The server sends `notification`, `reminder` and `queueUpdated`; the client
//! only ever sends `join`. Unknown event names are not errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    resolve_window, AppointmentStatus, DoctorBreakState, DoctorDelayState, EmergencyAlertState,
};

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A server → client event the queue client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Notification(NotificationPayload),
    Reminder(ReminderPayload),
    QueueUpdated(QueueUpdate),
}

impl PushEvent {
    /// Parse one text frame. `Ok(None)` for events this client does not
    /// handle.
    pub fn parse(text: &str) -> Result<Option<PushEvent>, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let event = match envelope.event.as_str() {
            "notification" => PushEvent::Notification(serde_json::from_value(envelope.data)?),
            "reminder" => PushEvent::Reminder(serde_json::from_value(envelope.data)?),
            "queueUpdated" => PushEvent::QueueUpdated(serde_json::from_value(envelope.data)?),
            other => {
                tracing::debug!(event = other, "Ignoring unhandled push event");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Notification(_) => "notification",
            Self::Reminder(_) => "reminder",
            Self::QueueUpdated(_) => "queueUpdated",
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Subscribe to a room, e.g. `user_<id>`.
    Join(String),
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub message: String,
    #[serde(default, alias = "apptId")]
    pub appointment_id: Option<String>,
    /// Appointment status the notification reports, e.g. `COMPLETED`.
    #[serde(default)]
    pub status: Option<String>,
}

impl NotificationPayload {
    /// The reported status, if it names one the client knows. Case is
    /// ignored; anything else is only kept as text on the notification.
    pub fn appointment_status(&self) -> Option<AppointmentStatus> {
        let raw = self.status.as_deref()?;
        match raw.to_ascii_uppercase().parse() {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!(error = %e, "Unrecognised notification status");
                None
            }
        }
    }

    pub fn reports_completion(&self) -> bool {
        self.appointment_status() == Some(AppointmentStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub message: String,
    #[serde(default, alias = "apptId")]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default, alias = "distance")]
    pub distance_km: Option<f64>,
    #[serde(default, alias = "travelTime")]
    pub travel_time_minutes: Option<u32>,
}

/// Payload of `queueUpdated`, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueUpdate {
    DoctorBreak(DoctorBreakUpdate),
    EmergencyInserted(EmergencyUpdate),
    DelayBroadcast(DelayUpdate),
    ConsultationEnded(ConsultationEndedUpdate),
    WalkInAdded(WalkInUpdate),
    #[serde(other)]
    Unknown,
}

impl QueueUpdate {
    pub fn hospital_id(&self) -> Option<&str> {
        match self {
            Self::DoctorBreak(u) => Some(&u.hospital_id),
            Self::EmergencyInserted(u) => Some(&u.hospital_id),
            Self::DelayBroadcast(u) => Some(&u.hospital_id),
            Self::ConsultationEnded(u) => Some(&u.hospital_id),
            Self::WalkInAdded(u) => Some(&u.hospital_id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorBreakUpdate {
    pub hospital_id: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(alias = "duration", alias = "breakDuration")]
    pub break_duration_minutes: u32,
    #[serde(default, alias = "breakStartTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "breakEndTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl DoctorBreakUpdate {
    pub fn into_state(self, received_at: DateTime<Utc>) -> DoctorBreakState {
        let (start_time, end_time) = resolve_window(
            self.start_time,
            self.end_time,
            self.break_duration_minutes,
            received_at,
        );
        DoctorBreakState {
            hospital_id: self.hospital_id,
            doctor_id: self.doctor_id,
            break_duration_minutes: self.break_duration_minutes,
            start_time,
            end_time,
            message: self.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayUpdate {
    pub hospital_id: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(alias = "delay")]
    pub delay_minutes: u32,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl DelayUpdate {
    pub fn into_state(self, received_at: DateTime<Utc>) -> DoctorDelayState {
        let (start_time, end_time) =
            resolve_window(self.start_time, self.end_time, self.delay_minutes, received_at);
        DoctorDelayState {
            hospital_id: self.hospital_id,
            doctor_id: self.doctor_id,
            delay_minutes: self.delay_minutes,
            reason: self.reason,
            start_time,
            end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyUpdate {
    pub hospital_id: String,
    #[serde(alias = "estimatedDuration")]
    pub estimated_duration_minutes: u32,
    #[serde(default, alias = "affectedPatientsCount")]
    pub affected_patients: u32,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl EmergencyUpdate {
    pub fn into_state(self, received_at: DateTime<Utc>) -> EmergencyAlertState {
        let (start_time, end_time) = resolve_window(
            self.start_time,
            self.end_time,
            self.estimated_duration_minutes,
            received_at,
        );
        EmergencyAlertState {
            hospital_id: self.hospital_id,
            estimated_duration_minutes: self.estimated_duration_minutes,
            affected_patients: self.affected_patients,
            start_time,
            end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationEndedUpdate {
    pub hospital_id: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default, alias = "nextQueueNumber")]
    pub current_serving: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkInUpdate {
    pub hospital_id: String,
    #[serde(default)]
    pub queue_number: Option<u32>,
}
