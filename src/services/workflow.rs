//! Multi-step workflows built on single transitions: postponing a booking
//! into a linked replacement, and delegating a request to someone else.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, InstructionRecord, NewBooking, Slot};
use crate::services::booking::{self, CreateOptions, Created, TransitionOutcome};
use crate::services::state_machine::TransitionRequest;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct PostponeRequest {
    pub reason: String,
    pub slot: Slot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegateRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Delegate to a unit rather than a subordinate.
    #[serde(default)]
    pub unit: bool,
}

/// Closes the booking as postponed and opens an approved replacement at the
/// new slot. Both happen in one transaction or not at all.
pub fn postpone(
    conn: &mut Connection,
    id: &str,
    request: &PostponeRequest,
    now: NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    // the resource, and with it the kind, never changes after creation
    let kind = booking::get_booking(conn, id)?.kind();
    let transition = TransitionRequest::new(BookingStatus::postponed_for(kind))
        .reason(&request.reason)
        .slot(request.slot);
    booking::transition(conn, id, &transition, now)
}

/// Creates the replacement for a booking that was just closed as postponed.
/// Must run inside the caller's write transaction.
pub(crate) fn spawn_replacement(
    conn: &Connection,
    original: &Booking,
    slot: Slot,
    now: NaiveDateTime,
) -> Result<Created, AppError> {
    let mut new = NewBooking::from_subject(original);
    new.slot = Some(slot);
    new.approved = true;

    let mut replacement = booking::prepare(new, now)?;
    replacement.supersedes = Some(original.id.clone());
    let from = original
        .slot
        .map(|s| s.starts_at().format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unscheduled".to_string());
    replacement.append_note(&format!("[POSTPONED FROM] {from} (booking {})", original.id));

    booking::insert_checked(conn, replacement, CreateOptions::default(), now)
}

pub(crate) fn instruction_for(
    booking: &Booking,
    target: &str,
    reason: Option<&str>,
) -> InstructionRecord {
    InstructionRecord {
        subject: booking.subject().to_string(),
        origin_booking_id: booking.id.clone(),
        target: target.to_string(),
        note: reason
            .or(booking.purpose.as_deref())
            .unwrap_or_default()
            .to_string(),
    }
}

/// Runs a transition and, once it is committed, hands any resulting
/// instruction to the configured sink. A sink failure is reported on the
/// outcome and leaves the committed transition in place.
pub async fn transition_and_notify(
    state: &AppState,
    id: &str,
    request: TransitionRequest,
    now: NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    let mut outcome = {
        let mut conn = state.conn()?;
        booking::transition(&mut conn, id, &request, now)?
    };

    if let Some(record) = &outcome.instruction {
        match state.instructions.submit(record).await {
            Ok(()) => {
                tracing::info!(booking_id = %id, target = %record.target, "instruction submitted");
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(
                    booking_id = %id,
                    target = %record.target,
                    error = %message,
                    "instruction submission failed"
                );
                outcome.instruction_error = Some(message);
            }
        }
    }

    Ok(outcome)
}

pub async fn delegate(
    state: &AppState,
    id: &str,
    request: &DelegateRequest,
    now: NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    let to = if request.unit {
        BookingStatus::DelegatedToUnit
    } else {
        BookingStatus::DelegatedToSubordinate
    };
    let mut transition = TransitionRequest::new(to).target(&request.target);
    transition.payload.reason = request.reason.clone();
    transition_and_notify(state, id, transition, now).await
}
