use serde::{Deserialize, Serialize};

use super::enums::AppointmentStatus;

/// Where one appointment stands in today's queue.
///
/// Always replaced as a whole; fields are never merged across fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQueueSnapshot {
    #[serde(default)]
    pub patients_ahead: u32,
    #[serde(default, alias = "estimatedWaitTime")]
    pub estimated_wait_minutes: u32,
    #[serde(default, alias = "currentlyServing")]
    pub current_serving: Option<u32>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub message: Option<String>,
}
