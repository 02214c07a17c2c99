use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AppointmentStatus, AppointmentType};

/// Reference to a hospital or doctor.
///
/// The backend sends either a bare id or a populated document
/// (`{ "_id": "...", "name": "..." }`); both collapse into this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RefRepr")]
pub struct EntityRef {
    pub id: String,
    pub name: Option<String>,
    /// Contact number, when the backend populates it (hospitals only).
    pub phone: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            phone: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            phone: None,
        }
    }

    /// `tel:` link for the contact number, whitespace and dashes stripped.
    pub fn call_link(&self) -> Option<String> {
        let phone = self.phone.as_deref()?;
        let digits: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if digits.is_empty() {
            None
        } else {
            Some(format!("tel:{digits}"))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RefRepr {
    Id(String),
    Populated {
        #[serde(alias = "_id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, alias = "phoneNumber", alias = "contactNumber")]
        phone: Option<String>,
    },
}

impl From<RefRepr> for EntityRef {
    fn from(repr: RefRepr) -> Self {
        match repr {
            RefRepr::Id(id) => Self::new(id),
            RefRepr::Populated { id, name, phone } => Self { id, name, phone },
        }
    }
}

/// One booked appointment as the patient sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "hospitalId")]
    pub hospital: EntityRef,
    #[serde(default, alias = "doctorId")]
    pub doctor: Option<EntityRef>,
    #[serde(alias = "appointmentDate")]
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub time_slot: Option<String>,
    pub status: AppointmentStatus,
    /// Assigned by the backend; `None` until the booking is accepted.
    #[serde(default)]
    pub queue_number: Option<u32>,
    #[serde(default, alias = "type")]
    pub appointment_type: AppointmentType,
    /// Set when the client corrected the status locally ahead of the
    /// authoritative list refresh.
    #[serde(skip)]
    pub tentative: bool,
}

impl Appointment {
    pub fn hospital_id(&self) -> &str {
        &self.hospital.id
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Calendar day of the appointment in the machine's local time zone.
    pub fn local_date(&self) -> NaiveDate {
        local_date(self.scheduled_for)
    }
}

/// Local calendar day for a UTC instant.
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// Body of `POST /appointments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub hospital_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    pub appointment_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    /// Book on behalf of a registered family member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_member_id: Option<String>,
}

/// Response of `GET /appointments/peak-hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakHourCheck {
    pub is_peak_hour: bool,
    #[serde(default)]
    pub expected_wait_minutes: Option<u32>,
    #[serde(default)]
    pub suggested_time_slots: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_and_populated_refs() {
        let json = r#"{
            "_id": "a1",
            "hospital": {"_id": "h1", "name": "City General"},
            "doctor": "d9",
            "appointmentDate": "2026-03-02T09:30:00Z",
            "status": "CONFIRMED",
            "queueNumber": 12,
            "appointmentType": "FOLLOW_UP"
        }"#;
        let appt: Appointment = serde_json::from_str(json).unwrap();
        assert_eq!(appt.id, "a1");
        assert_eq!(appt.hospital, EntityRef::named("h1", "City General"));
        assert_eq!(appt.doctor, Some(EntityRef::new("d9")));
        assert_eq!(appt.queue_number, Some(12));
        assert_eq!(appt.appointment_type, AppointmentType::FollowUp);
        assert!(!appt.tentative);
    }

    #[test]
    fn hospital_phone_becomes_call_link() {
        let hospital: EntityRef =
            serde_json::from_str(r#"{"_id": "h1", "name": "City General", "phoneNumber": "+91 98450-12345"}"#)
                .unwrap();
        assert_eq!(hospital.call_link().as_deref(), Some("tel:+919845012345"));
        assert_eq!(EntityRef::new("h1").call_link(), None);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "id": "a2",
            "hospitalId": "h2",
            "scheduledFor": "2026-03-02T09:30:00Z",
            "status": "PENDING"
        }"#;
        let appt: Appointment = serde_json::from_str(json).unwrap();
        assert_eq!(appt.hospital_id(), "h2");
        assert_eq!(appt.queue_number, None);
        assert_eq!(appt.appointment_type, AppointmentType::Regular);
        assert!(appt.doctor.is_none());
    }

    #[test]
    fn tentative_flag_never_comes_from_the_wire() {
        let json = r#"{
            "id": "a3", "hospital": "h1",
            "appointmentDate": "2026-03-02T09:30:00Z",
            "status": "COMPLETED", "tentative": true
        }"#;
        let appt: Appointment = serde_json::from_str(json).unwrap();
        assert!(!appt.tentative);
    }

    #[test]
    fn booking_request_uses_wire_names() {
        let req = BookingRequest {
            hospital_id: "h1".into(),
            doctor_id: None,
            appointment_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            time_slot: Some("10:00".into()),
            appointment_type: AppointmentType::Regular,
            symptoms: None,
            family_member_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["hospitalId"], "h1");
        assert_eq!(json["appointmentDate"], "2026-03-02");
        assert_eq!(json["type"], "REGULAR");
        assert!(json.get("doctorId").is_none());
    }
}
