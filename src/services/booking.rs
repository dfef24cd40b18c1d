//! Orchestration of booking commands. Every check-then-commit runs inside an
//! IMMEDIATE transaction, so the conflict read and the write it guards are
//! atomic with respect to every other writer on the same database file.

use chrono::NaiveDateTime;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use crate::db::queries::{self, BookingFilter};
use crate::errors::AppError;
use crate::models::{
    Booking, BookingEvent, BookingStatus, InstructionRecord, NewBooking, RecurrenceRule, Resource,
    Slot,
};
use crate::services::conflict::{self, Displacer};
use crate::services::recurrence;
use crate::services::state_machine::{self, FollowUp, TransitionError, TransitionRequest};
use crate::services::visit::VisitMetrics;
use crate::services::workflow;

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Lets a protocol booking cancel the ordinary room bookings in its way.
    pub confirm_displacement: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub booking: Booking,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub displaced: Vec<Booking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub booking: Booking,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub displaced: Vec<Booking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Booking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<InstructionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccurrenceFailure {
    pub index: usize,
    pub slot: Slot,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_booking_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringOutcome {
    pub series_id: String,
    pub created: Vec<Booking>,
    pub failed: Vec<OccurrenceFailure>,
    /// The occurrence ceiling ended the series before the rule did.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub conflict: Option<Booking>,
    pub displaceable: bool,
}

fn in_immediate_tx<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> Result<T, AppError>,
) -> Result<T, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Validates a creation request and turns it into an unsaved booking.
pub(crate) fn prepare(new: NewBooking, now: NaiveDateTime) -> Result<Booking, AppError> {
    let requester_name = new.requester_name.trim().to_string();
    if requester_name.is_empty() {
        return Err(AppError::Validation("requester_name is required".to_string()));
    }
    let resource = new
        .resource
        .ok_or_else(|| AppError::Validation("resource is required".to_string()))?;
    if new.approved && new.slot.is_none() {
        return Err(TransitionError::MissingField("slot").into());
    }

    let status = if new.approved {
        BookingStatus::Approved
    } else {
        BookingStatus::PendingApproval
    };

    Ok(Booking {
        id: Uuid::new_v4().to_string(),
        resource,
        requester_name,
        organization: new.organization,
        title: new.title,
        contact_phone: new.contact_phone,
        purpose: new.purpose,
        notes: new.notes.unwrap_or_default(),
        slot: new.slot,
        status,
        protocol: new.protocol,
        rejection_reason: None,
        delegation_target: None,
        delegation_reason: None,
        postponed_to: None,
        postponement_reason: None,
        approved_by: new.approved_by.filter(|_| new.approved),
        cancellation_reason: None,
        visitor_reschedule_reason: None,
        outcome: None,
        arrived_at: None,
        session_started_at: None,
        session_ended_at: None,
        supersedes: None,
        superseded_by: None,
        series_id: None,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn ensure_resource(conn: &Connection, resource: &Resource) -> Result<(), AppError> {
    if let Resource::MeetingRoom(room_id) = resource {
        if queries::get_room(conn, room_id)?.is_none() {
            return Err(AppError::NotFound(format!("room {room_id}")));
        }
    }
    Ok(())
}

/// Claims the booking's slot and stores it. Must run inside the caller's
/// write transaction.
pub(crate) fn insert_checked(
    conn: &Connection,
    booking: Booking,
    options: CreateOptions,
    now: NaiveDateTime,
) -> Result<Created, AppError> {
    ensure_resource(conn, &booking.resource)?;

    let mut displaced = vec![];
    if let Some(slot) = &booking.slot {
        let subject = booking.subject();
        let displacer = (booking.protocol && options.confirm_displacement).then(|| Displacer {
            booking_id: &booking.id,
            subject,
        });
        displaced = conflict::claim_slot(conn, &booking.resource, slot, None, displacer, now)?;
    }

    queries::insert_booking(conn, &booking)?;
    let detail = match &booking.supersedes {
        Some(original) => format!("status {}, replaces {original}", booking.status),
        None => format!("status {}", booking.status),
    };
    queries::insert_event(conn, &booking.id, "created", &detail, &now)?;

    Ok(Created { booking, displaced })
}

pub fn create_booking(
    conn: &mut Connection,
    new: NewBooking,
    options: CreateOptions,
    now: NaiveDateTime,
) -> Result<Created, AppError> {
    let booking = prepare(new, now)?;
    let created = in_immediate_tx(conn, |tx| insert_checked(tx, booking, options, now))?;

    tracing::info!(
        booking_id = %created.booking.id,
        resource = %created.booking.resource,
        status = %created.booking.status,
        displaced = created.displaced.len(),
        "booking created"
    );
    Ok(created)
}

/// Expands the rule and creates each occurrence in its own transaction.
/// An occurrence that fails is reported and the rest still go ahead.
pub fn create_recurring(
    conn: &mut Connection,
    new: NewBooking,
    rule: &RecurrenceRule,
    options: CreateOptions,
    ceiling: u32,
    now: NaiveDateTime,
) -> Result<RecurringOutcome, AppError> {
    let base = new.slot.ok_or(TransitionError::MissingField("slot"))?;
    let slots = recurrence::expand(base, rule, ceiling)?;
    let truncated = recurrence::cut_by_ceiling(&base, rule, ceiling);
    // surface request-level mistakes once instead of per occurrence
    let template = prepare(new.clone(), now)?;
    ensure_resource(conn, &template.resource)?;

    let series_id = Uuid::new_v4().to_string();
    let mut created = vec![];
    let mut failed = vec![];

    for (index, slot) in slots.into_iter().enumerate() {
        let mut booking = prepare(
            NewBooking {
                slot: Some(slot),
                ..new.clone()
            },
            now,
        )?;
        booking.series_id = Some(series_id.clone());

        match in_immediate_tx(conn, |tx| insert_checked(tx, booking, options, now)) {
            Ok(done) => created.push(done.booking),
            Err(err) => {
                tracing::warn!(
                    series_id = %series_id,
                    index,
                    slot = %slot.label(),
                    error = %err,
                    "occurrence not created"
                );
                let blocking_booking_id = match &err {
                    AppError::Conflict(blocking) => Some(blocking.id.clone()),
                    _ => None,
                };
                failed.push(OccurrenceFailure {
                    index,
                    slot,
                    error: err.to_string(),
                    blocking_booking_id,
                });
            }
        }
    }

    tracing::info!(
        series_id = %series_id,
        created = created.len(),
        failed = failed.len(),
        truncated,
        frequency = rule.frequency.as_str(),
        "recurring booking expanded"
    );
    if truncated {
        tracing::warn!(series_id = %series_id, ceiling, "recurring series cut at the occurrence ceiling");
    }
    Ok(RecurringOutcome {
        series_id,
        created,
        failed,
        truncated,
    })
}

/// Applies one status transition. A postponement closes the booking and
/// opens its replacement in the same transaction; if the rollback of a
/// failed postponement cannot be confirmed the caller gets a partial-failure
/// error naming the original.
pub fn transition(
    conn: &mut Connection,
    id: &str,
    request: &TransitionRequest,
    now: NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match transition_in_tx(&tx, id, request, now) {
        Ok(outcome) => {
            tx.commit()?;
            tracing::info!(
                booking_id = %id,
                status = %outcome.booking.status,
                replacement_id = outcome.replacement.as_ref().map(|b| b.id.as_str()),
                "transition applied"
            );
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(
                    booking_id = %id,
                    error = %err,
                    rollback_error = %rollback_err,
                    "rollback failed after refused transition"
                );
                return Err(AppError::PartialFailure {
                    original_id: id.to_string(),
                    detail: format!("{err}; rollback failed: {rollback_err}"),
                });
            }
            Err(err)
        }
    }
}

pub(crate) fn transition_in_tx(
    conn: &Connection,
    id: &str,
    request: &TransitionRequest,
    now: NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    let booking =
        queries::get_booking_by_id(conn, id)?.ok_or_else(|| AppError::booking_not_found(id))?;
    let decision = state_machine::decide(&booking, request, now)?;

    for follow_up in &decision.follow_ups {
        if let FollowUp::CheckSlot(slot) = follow_up {
            conflict::claim_slot(conn, &booking.resource, slot, Some(&booking.id), None, now)?;
        }
    }

    let mut updated = state_machine::apply(&booking, &decision, now);
    if !queries::update_booking(conn, &updated)? {
        return Err(AppError::booking_not_found(id));
    }
    let detail = match &decision.note {
        Some(note) => format!("{} -> {}: {note}", decision.from, decision.to),
        None => format!("{} -> {}", decision.from, decision.to),
    };
    queries::insert_event(conn, id, "transition", &detail, &now)?;

    let mut outcome = TransitionOutcome {
        booking: updated.clone(),
        displaced: vec![],
        replacement: None,
        instruction: None,
        instruction_error: None,
    };

    for follow_up in &decision.follow_ups {
        match follow_up {
            FollowUp::CheckSlot(_) => {}
            FollowUp::SpawnReplacement { slot, .. } => {
                // the original is already closed, so its old span no longer blocks
                let created = workflow::spawn_replacement(conn, &updated, *slot, now)?;
                updated.superseded_by = Some(created.booking.id.clone());
                if !queries::update_booking(conn, &updated)? {
                    return Err(AppError::booking_not_found(id));
                }
                queries::insert_event(
                    conn,
                    id,
                    "postponed",
                    &format!("replaced by {}", created.booking.id),
                    &now,
                )?;
                outcome.booking = updated.clone();
                outcome.displaced.extend(created.displaced);
                outcome.replacement = Some(created.booking);
            }
            FollowUp::Instruct { target, reason } => {
                outcome.instruction =
                    Some(workflow::instruction_for(&updated, target, reason.as_deref()));
                queries::insert_event(conn, id, "delegated", target, &now)?;
            }
        }
    }

    Ok(outcome)
}

pub fn get_booking(conn: &Connection, id: &str) -> Result<Booking, AppError> {
    queries::get_booking_by_id(conn, id)?.ok_or_else(|| AppError::booking_not_found(id))
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> Result<Vec<Booking>, AppError> {
    Ok(queries::list_bookings(conn, filter)?)
}

pub fn delete_booking(conn: &mut Connection, id: &str) -> Result<(), AppError> {
    in_immediate_tx(conn, |tx| {
        if !queries::delete_booking(tx, id)? {
            return Err(AppError::booking_not_found(id));
        }
        Ok(())
    })?;
    tracing::info!(booking_id = %id, "booking deleted");
    Ok(())
}

pub fn history(conn: &Connection, id: &str) -> Result<Vec<BookingEvent>, AppError> {
    get_booking(conn, id)?;
    Ok(queries::get_events(conn, id)?)
}

pub fn visit_metrics(conn: &Connection, id: &str) -> Result<VisitMetrics, AppError> {
    Ok(VisitMetrics::of(&get_booking(conn, id)?))
}

/// Dry-run of the conflict detector for a prospective slot.
pub fn check_conflict(
    conn: &Connection,
    resource: &Resource,
    slot: &Slot,
    exclude_id: Option<&str>,
) -> Result<ConflictReport, AppError> {
    ensure_resource(conn, resource)?;
    let blocking = conflict::find_conflict(conn, resource, slot, exclude_id)?;
    let displaceable = blocking
        .as_ref()
        .is_some_and(|b| conflict::can_displace(resource, b));
    Ok(ConflictReport {
        conflict: blocking,
        displaceable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Frequency, Room};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn now() -> NaiveDateTime {
        dt("2024-02-20 08:00")
    }

    fn slot(date: &str, start: &str, end: &str) -> Slot {
        Slot::parse(date, start, Some(end), 0).unwrap()
    }

    fn room() -> Resource {
        Resource::MeetingRoom("room-1".to_string())
    }

    fn setup_db() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        queries::insert_room(
            &conn,
            &Room {
                id: "room-1".to_string(),
                name: "Council room".to_string(),
                capacity: Some(20),
                equipment: vec!["projector".to_string()],
                location: Some("2nd floor".to_string()),
            },
        )
        .unwrap();
        conn
    }

    fn request(resource: Resource, title: &str, slot: Option<Slot>) -> NewBooking {
        NewBooking {
            resource: Some(resource),
            requester_name: "Hasan Yilmaz".to_string(),
            title: Some(title.to_string()),
            slot,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_pending_booking() {
        let mut conn = setup_db();
        let created = create_booking(
            &mut conn,
            request(room(), "Budget review", Some(slot("2024-03-01", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        assert_eq!(created.booking.status, BookingStatus::PendingApproval);
        let stored = get_booking(&conn, &created.booking.id).unwrap();
        assert_eq!(stored, created.booking);
        let events = history(&conn, &created.booking.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "created");
    }

    #[test]
    fn test_create_validates_input() {
        let mut conn = setup_db();
        let blank = NewBooking {
            requester_name: "   ".to_string(),
            ..request(room(), "x", None)
        };
        assert!(matches!(
            create_booking(&mut conn, blank, CreateOptions::default(), now()),
            Err(AppError::Validation(_))
        ));

        let approved_without_slot = NewBooking {
            approved: true,
            ..request(Resource::HostCalendar, "x", None)
        };
        assert!(matches!(
            create_booking(&mut conn, approved_without_slot, CreateOptions::default(), now()),
            Err(AppError::Transition(TransitionError::MissingField("slot")))
        ));

        let unknown_room = request(
            Resource::MeetingRoom("nowhere".to_string()),
            "x",
            Some(slot("2024-03-01", "10:00", "11:00")),
        );
        assert!(matches!(
            create_booking(&mut conn, unknown_room, CreateOptions::default(), now()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_overlap_is_refused_adjacent_is_not() {
        let mut conn = setup_db();
        let first = create_booking(
            &mut conn,
            request(room(), "A", Some(slot("2024-03-01", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        let err = create_booking(
            &mut conn,
            request(room(), "B", Some(slot("2024-03-01", "10:30", "11:30"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(&err, AppError::Conflict(b) if b.id == first.booking.id));

        create_booking(
            &mut conn,
            request(room(), "C", Some(slot("2024-03-01", "11:00", "12:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();
    }

    #[test]
    fn test_unscheduled_requests_never_conflict() {
        let mut conn = setup_db();
        for title in ["first", "second"] {
            create_booking(
                &mut conn,
                request(Resource::HostCalendar, title, None),
                CreateOptions::default(),
                now(),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_reject_frees_the_slot() {
        let mut conn = setup_db();
        let a = create_booking(
            &mut conn,
            request(room(), "A", Some(slot("2024-03-01", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        transition(
            &mut conn,
            &a.booking.id,
            &TransitionRequest::new(BookingStatus::Rejected).reason("room under repair"),
            now(),
        )
        .unwrap();

        let b = create_booking(
            &mut conn,
            request(room(), "B", Some(slot("2024-03-01", "10:30", "11:30"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();
        assert_eq!(b.booking.status, BookingStatus::PendingApproval);
    }

    #[test]
    fn test_approve_with_new_slot_checks_conflicts() {
        let mut conn = setup_db();
        create_booking(
            &mut conn,
            request(Resource::HostCalendar, "A", Some(slot("2024-03-04", "10:00", "10:30"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();
        let undated = create_booking(
            &mut conn,
            request(Resource::HostCalendar, "B", None),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        let err = transition(
            &mut conn,
            &undated.booking.id,
            &TransitionRequest::new(BookingStatus::Approved).slot(slot("2024-03-04", "10:15", "10:45")),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let unchanged = get_booking(&conn, &undated.booking.id).unwrap();
        assert_eq!(unchanged.status, BookingStatus::PendingApproval);
        assert!(unchanged.slot.is_none());

        let approved = transition(
            &mut conn,
            &undated.booking.id,
            &TransitionRequest::new(BookingStatus::Approved).slot(slot("2024-03-04", "10:30", "11:00")),
            now(),
        )
        .unwrap();
        assert_eq!(approved.booking.status, BookingStatus::Approved);
    }

    #[test]
    fn test_moving_within_own_slot_is_not_a_conflict() {
        let mut conn = setup_db();
        let a = create_booking(
            &mut conn,
            request(Resource::HostCalendar, "A", Some(slot("2024-03-04", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();
        transition(
            &mut conn,
            &a.booking.id,
            &TransitionRequest::new(BookingStatus::Approved).slot(slot("2024-03-04", "10:30", "11:30")),
            now(),
        )
        .unwrap();
    }

    #[test]
    fn test_protocol_displacement_requires_confirmation() {
        let mut conn = setup_db();
        let ordinary = create_booking(
            &mut conn,
            request(room(), "Weekly sync", Some(slot("2024-03-01", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        let vip = NewBooking {
            protocol: true,
            ..request(room(), "Minister visit", Some(slot("2024-03-01", "10:30", "11:30")))
        };
        assert!(matches!(
            create_booking(&mut conn, vip.clone(), CreateOptions::default(), now()),
            Err(AppError::Conflict(_))
        ));

        let created = create_booking(
            &mut conn,
            vip,
            CreateOptions {
                confirm_displacement: true,
            },
            now(),
        )
        .unwrap();
        assert_eq!(created.displaced.len(), 1);
        let cancelled = get_booking(&conn, &ordinary.booking.id).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(cancelled
            .cancellation_reason
            .unwrap()
            .contains(&created.booking.id));
    }

    #[test]
    fn test_recurring_collects_failures() {
        let mut conn = setup_db();
        let taken = create_booking(
            &mut conn,
            request(room(), "Taken", Some(slot("2024-03-11", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        let rule = RecurrenceRule {
            frequency: Frequency::Weekly,
            until: None,
            count: Some(4),
        };
        let outcome = create_recurring(
            &mut conn,
            request(room(), "Standup", Some(slot("2024-03-04", "10:00", "10:30"))),
            &rule,
            CreateOptions::default(),
            366,
            now(),
        )
        .unwrap();

        assert_eq!(outcome.created.len(), 3);
        assert!(!outcome.truncated);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].index, 1);
        assert_eq!(
            outcome.failed[0].blocking_booking_id.as_deref(),
            Some(taken.booking.id.as_str())
        );
        assert!(outcome
            .created
            .iter()
            .all(|b| b.series_id.as_deref() == Some(outcome.series_id.as_str())));

        let series = list_bookings(
            &conn,
            &BookingFilter {
                series_id: Some(outcome.series_id.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_recurring_reports_ceiling_cut() {
        let mut conn = setup_db();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            until: Some(chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()),
            count: None,
        };
        let outcome = create_recurring(
            &mut conn,
            request(room(), "Daily check-in", Some(slot("2024-03-04", "08:00", "08:15"))),
            &rule,
            CreateOptions::default(),
            3,
            now(),
        )
        .unwrap();

        assert_eq!(outcome.created.len(), 3);
        assert!(outcome.truncated);
    }

    #[test]
    fn test_recurring_requires_slot_and_bound() {
        let mut conn = setup_db();
        let unbounded = RecurrenceRule {
            frequency: Frequency::Daily,
            until: None,
            count: None,
        };
        assert!(matches!(
            create_recurring(
                &mut conn,
                request(room(), "x", Some(slot("2024-03-04", "10:00", "10:30"))),
                &unbounded,
                CreateOptions::default(),
                366,
                now(),
            ),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            create_recurring(
                &mut conn,
                request(room(), "x", None),
                &RecurrenceRule {
                    count: Some(2),
                    ..unbounded
                },
                CreateOptions::default(),
                366,
                now(),
            ),
            Err(AppError::Transition(TransitionError::MissingField("slot")))
        ));
    }

    #[test]
    fn test_delete_and_missing() {
        let mut conn = setup_db();
        let a = create_booking(
            &mut conn,
            request(Resource::HostCalendar, "A", None),
            CreateOptions::default(),
            now(),
        )
        .unwrap();
        delete_booking(&mut conn, &a.booking.id).unwrap();
        assert!(matches!(get_booking(&conn, &a.booking.id), Err(AppError::NotFound(_))));
        assert!(matches!(
            delete_booking(&mut conn, &a.booking.id),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            transition(
                &mut conn,
                "missing",
                &TransitionRequest::new(BookingStatus::OnHold),
                now()
            ),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_check_conflict_reports_displaceability() {
        let mut conn = setup_db();
        create_booking(
            &mut conn,
            request(room(), "A", Some(slot("2024-03-01", "10:00", "11:00"))),
            CreateOptions::default(),
            now(),
        )
        .unwrap();

        let report = check_conflict(&conn, &room(), &slot("2024-03-01", "10:30", "11:30"), None).unwrap();
        assert!(report.conflict.is_some());
        assert!(report.displaceable);

        let free = check_conflict(&conn, &room(), &slot("2024-03-01", "11:00", "11:30"), None).unwrap();
        assert!(free.conflict.is_none());
        assert!(!free.displaceable);
    }
}
