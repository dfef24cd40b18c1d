use serde::{Deserialize, Serialize};

/// One entry of a booking's append-only history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookingEvent {
    pub id: i64,
    pub booking_id: String,
    pub kind: String,
    pub detail: String,
    pub created_at: String,
}

/// Reference record handed to the instruction system when a request is
/// delegated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub subject: String,
    pub origin_booking_id: String,
    pub target: String,
    pub note: String,
}
