use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::slot::Slot;
use super::status::BookingStatus;

/// What a booking occupies. The host calendar is a single implicit resource;
/// meeting rooms are partitioned by room id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "room_id", rename_all = "kebab-case")]
pub enum Resource {
    HostCalendar,
    MeetingRoom(String),
}

impl Resource {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Resource::HostCalendar => "host-calendar",
            Resource::MeetingRoom(_) => "meeting-room",
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Resource::HostCalendar => None,
            Resource::MeetingRoom(id) => Some(id),
        }
    }

    pub fn from_parts(kind: &str, room_id: Option<String>) -> Option<Self> {
        match (kind, room_id) {
            ("host-calendar", _) => Some(Resource::HostCalendar),
            ("meeting-room", Some(id)) => Some(Resource::MeetingRoom(id)),
            _ => None,
        }
    }

    pub fn kind(&self) -> BookingKind {
        match self {
            Resource::HostCalendar => BookingKind::Appointment,
            Resource::MeetingRoom(_) => BookingKind::Meeting,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::HostCalendar => f.write_str("host-calendar"),
            Resource::MeetingRoom(id) => write!(f, "meeting-room:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Appointment,
    Meeting,
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingKind::Appointment => f.write_str("appointment"),
            BookingKind::Meeting => f.write_str("meeting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub resource: Resource,
    pub requester_name: String,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub contact_phone: Option<String>,
    pub purpose: Option<String>,
    pub notes: String,
    pub slot: Option<Slot>,
    pub status: BookingStatus,
    pub protocol: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postponed_to: Option<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postponement_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_reschedule_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ended_at: Option<NaiveDateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn kind(&self) -> BookingKind {
        self.resource.kind()
    }

    /// Title when present, otherwise the requester.
    pub fn subject(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.requester_name)
    }

    /// Notes only ever grow: each marker lands on its own line.
    pub fn append_note(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(line);
    }
}

/// A creation request. Everything the caller controls; ids, timestamps and
/// workflow metadata are filled in by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct NewBooking {
    pub resource: Option<Resource>,
    pub requester_name: String,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub contact_phone: Option<String>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
    pub slot: Option<Slot>,
    pub protocol: bool,
    pub approved: bool,
    pub approved_by: Option<String>,
}

impl NewBooking {
    /// Copies the subject and contact data of an existing booking.
    pub fn from_subject(original: &Booking) -> Self {
        Self {
            resource: Some(original.resource.clone()),
            requester_name: original.requester_name.clone(),
            organization: original.organization.clone(),
            title: original.title.clone(),
            contact_phone: original.contact_phone.clone(),
            purpose: original.purpose.clone(),
            notes: None,
            slot: None,
            protocol: original.protocol,
            approved: false,
            approved_by: original.approved_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_wire_format() {
        let room = Resource::MeetingRoom("room-1".to_string());
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json, serde_json::json!({"type": "meeting-room", "room_id": "room-1"}));

        let host: Resource = serde_json::from_str(r#"{"type":"host-calendar"}"#).unwrap();
        assert_eq!(host, Resource::HostCalendar);
        assert_eq!(host.kind(), BookingKind::Appointment);
        assert_eq!(room.kind(), BookingKind::Meeting);
    }

    #[test]
    fn test_resource_from_parts() {
        assert_eq!(
            Resource::from_parts("meeting-room", Some("r".into())),
            Some(Resource::MeetingRoom("r".into()))
        );
        assert_eq!(Resource::from_parts("meeting-room", None), None);
        assert_eq!(
            Resource::from_parts("host-calendar", None),
            Some(Resource::HostCalendar)
        );
        assert_eq!(Resource::from_parts("garage", None), None);
    }
}
