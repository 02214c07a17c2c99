use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Time to leave" style nudge tied to an appointment. Persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    #[serde(default, alias = "apptId")]
    pub appointment_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub travel_time_minutes: Option<u32>,
}

/// Server notification kept in memory for the notification drawer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Reminder {
    pub fn concerns(&self, appointment_id: &str) -> bool {
        self.appointment_id.as_deref() == Some(appointment_id)
    }
}
