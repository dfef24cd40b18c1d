use std::fmt;

use serde::{Deserialize, Serialize};

use super::booking::BookingKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingApproval,
    Approved,
    ApprovedWaitingDate,
    OnHold,
    DelegatedToSubordinate,
    DelegatedToUnit,
    Rejected,
    RescheduledByHost,
    RescheduleRequestedByVisitor,
    WaitingRoom,
    InMeeting,
    Completed,
    NoShow,
    Postponed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 15] = [
        BookingStatus::PendingApproval,
        BookingStatus::Approved,
        BookingStatus::ApprovedWaitingDate,
        BookingStatus::OnHold,
        BookingStatus::DelegatedToSubordinate,
        BookingStatus::DelegatedToUnit,
        BookingStatus::Rejected,
        BookingStatus::RescheduledByHost,
        BookingStatus::RescheduleRequestedByVisitor,
        BookingStatus::WaitingRoom,
        BookingStatus::InMeeting,
        BookingStatus::Completed,
        BookingStatus::NoShow,
        BookingStatus::Postponed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::Approved => "approved",
            BookingStatus::ApprovedWaitingDate => "approved_waiting_date",
            BookingStatus::OnHold => "on_hold",
            BookingStatus::DelegatedToSubordinate => "delegated_to_subordinate",
            BookingStatus::DelegatedToUnit => "delegated_to_unit",
            BookingStatus::Rejected => "rejected",
            BookingStatus::RescheduledByHost => "rescheduled_by_host",
            BookingStatus::RescheduleRequestedByVisitor => "reschedule_requested_by_visitor",
            BookingStatus::WaitingRoom => "waiting_room",
            BookingStatus::InMeeting => "in_meeting",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
            BookingStatus::Postponed => "postponed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Terminal bookings accept no further transitions. Superseded bookings
    /// (rescheduled by the host, postponed meetings) are terminal too.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Rejected
                | BookingStatus::NoShow
                | BookingStatus::RescheduledByHost
                | BookingStatus::Postponed
                | BookingStatus::Cancelled
        )
    }

    /// Whether a booking in this status still occupies its slot.
    pub fn blocks_slot(&self) -> bool {
        !self.is_terminal()
    }

    pub fn applies_to(&self, kind: BookingKind) -> bool {
        match kind {
            BookingKind::Appointment => {
                !matches!(self, BookingStatus::Postponed | BookingStatus::Cancelled)
            }
            BookingKind::Meeting => matches!(
                self,
                BookingStatus::PendingApproval
                    | BookingStatus::Approved
                    | BookingStatus::Rejected
                    | BookingStatus::Postponed
                    | BookingStatus::Cancelled
                    | BookingStatus::Completed
            ),
        }
    }

    /// The status a superseded booking is closed with when it is postponed.
    pub fn postponed_for(kind: BookingKind) -> Self {
        match kind {
            BookingKind::Appointment => BookingStatus::RescheduledByHost,
            BookingKind::Meeting => BookingStatus::Postponed,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
