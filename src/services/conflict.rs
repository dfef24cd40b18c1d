use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, Resource, Slot};
use crate::services::state_machine::{self, TransitionRequest};

/// First live booking on `resource` whose span overlaps `slot`, in start order.
pub fn first_conflict<'a>(
    candidates: &'a [Booking],
    resource: &Resource,
    slot: &Slot,
    exclude_id: Option<&str>,
) -> Option<&'a Booking> {
    candidates.iter().find(|b| {
        b.resource == *resource
            && b.status.blocks_slot()
            && Some(b.id.as_str()) != exclude_id
            && b.slot.as_ref().is_some_and(|existing| existing.overlaps(slot))
    })
}

/// Looks up the day's bookings for the resource and reports the first one
/// blocking `slot`. `exclude_id` lets an edit in place ignore its own row.
pub fn find_conflict(
    conn: &Connection,
    resource: &Resource,
    slot: &Slot,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Booking>> {
    let same_day = queries::find_bookings(conn, resource, slot.date, slot.date)?;
    Ok(first_conflict(&same_day, resource, slot, exclude_id).cloned())
}

/// The protocol booking asking to take a contested room slot.
#[derive(Debug, Clone, Copy)]
pub struct Displacer<'a> {
    pub booking_id: &'a str,
    pub subject: &'a str,
}

pub fn can_displace(resource: &Resource, blocking: &Booking) -> bool {
    matches!(resource, Resource::MeetingRoom(_)) && !blocking.protocol
}

/// Makes sure `slot` is free on `resource`. Without a displacer the first
/// blocking booking is reported as a conflict. With one, every ordinary
/// booking in the way on a meeting room is cancelled, naming the displacer in
/// the reason; another protocol booking still blocks. Returns the displaced
/// bookings as committed.
///
/// Must run inside the caller's write transaction.
pub fn claim_slot(
    conn: &Connection,
    resource: &Resource,
    slot: &Slot,
    exclude_id: Option<&str>,
    displacer: Option<Displacer<'_>>,
    now: NaiveDateTime,
) -> Result<Vec<Booking>, AppError> {
    let mut displaced = vec![];

    loop {
        let Some(blocking) = find_conflict(conn, resource, slot, exclude_id)? else {
            return Ok(displaced);
        };

        let displacer = match displacer {
            Some(d) if can_displace(resource, &blocking) => d,
            _ => {
                tracing::info!(
                    resource = %resource,
                    slot = %slot.label(),
                    blocking_id = %blocking.id,
                    "slot conflict"
                );
                return Err(AppError::Conflict(Box::new(blocking)));
            }
        };

        let reason = format!(
            "displaced by protocol booking {} ({})",
            displacer.booking_id, displacer.subject
        );
        let request = TransitionRequest::new(BookingStatus::Cancelled).reason(&reason);
        let decision = state_machine::decide(&blocking, &request, now)?;
        let cancelled = state_machine::apply(&blocking, &decision, now);

        if !queries::update_booking(conn, &cancelled)? {
            return Err(AppError::booking_not_found(&cancelled.id));
        }
        queries::insert_event(conn, &cancelled.id, "displaced", &reason, &now)?;

        tracing::warn!(
            booking_id = %cancelled.id,
            displaced_by = displacer.booking_id,
            slot = %slot.label(),
            "booking cancelled by protocol displacement"
        );
        displaced.push(cancelled);
    }
}
