use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ephemeral state with a hard end. Active only while `end_time > now`.
pub trait Expiring {
    fn hospital_id(&self) -> &str;
    fn start_time(&self) -> DateTime<Utc>;
    fn end_time(&self) -> DateTime<Utc>;

    fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time() > now
    }
}

/// Doctor on a break at a hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorBreakState {
    pub hospital_id: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    pub break_duration_minutes: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Running late: every consultation at the hospital shifts by `delay_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorDelayState {
    pub hospital_id: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    pub delay_minutes: u32,
    #[serde(default)]
    pub reason: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// An emergency patient was inserted ahead of the regular queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlertState {
    pub hospital_id: String,
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub affected_patients: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

macro_rules! impl_expiring {
    ($($ty:ty),+) => {
        $(impl Expiring for $ty {
            fn hospital_id(&self) -> &str {
                &self.hospital_id
            }
            fn start_time(&self) -> DateTime<Utc> {
                self.start_time
            }
            fn end_time(&self) -> DateTime<Utc> {
                self.end_time
            }
        })+
    };
}

impl_expiring!(DoctorBreakState, DoctorDelayState, EmergencyAlertState);

/// Resolve the window of an event that may omit its start or end.
///
/// Missing start falls back to `received_at`; missing end to
/// `start + minutes`.
pub fn resolve_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    minutes: u32,
    received_at: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start.unwrap_or(received_at);
    let end = end.unwrap_or_else(|| start + Duration::minutes(i64::from(minutes)));
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_772_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn active_strictly_before_end() {
        let state = DoctorBreakState {
            hospital_id: "h1".into(),
            doctor_id: None,
            break_duration_minutes: 15,
            start_time: at(0),
            end_time: at(900),
            message: None,
        };
        assert!(state.is_active_at(at(899)));
        assert!(!state.is_active_at(at(900)));
        assert!(!state.is_active_at(at(1000)));
    }

    #[test]
    fn window_falls_back_to_duration() {
        let (start, end) = resolve_window(None, None, 10, at(0));
        assert_eq!(start, at(0));
        assert_eq!(end, at(600));

        let (start, end) = resolve_window(Some(at(-60)), None, 10, at(0));
        assert_eq!(start, at(-60));
        assert_eq!(end, at(540));

        let (_, end) = resolve_window(None, Some(at(120)), 10, at(0));
        assert_eq!(end, at(120));
    }

    #[test]
    fn delay_state_storage_shape() {
        let state = DoctorDelayState {
            hospital_id: "h1".into(),
            doctor_id: Some("d1".into()),
            delay_minutes: 20,
            reason: Some("Surgery overran".into()),
            start_time: at(0),
            end_time: at(1200),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["hospitalId"], "h1");
        assert_eq!(json["delayMinutes"], 20);
        let back: DoctorDelayState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
