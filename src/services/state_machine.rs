//! Status transitions as a pure decision over (current booking, target
//! status, payload). `decide` never touches storage; the orchestrator in
//! `services::booking` commits the resulting `Decision` and runs its
//! follow-ups.

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::models::{Booking, BookingKind, BookingStatus, Slot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("booking is {0} and accepts no further transitions")]
    Terminal(BookingStatus),

    #[error("cannot move from {from} to {to}")]
    NotAllowed {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("status {status} does not apply to {kind} bookings")]
    WrongKind {
        status: BookingStatus,
        kind: BookingKind,
    },

    #[error("visit timestamps out of order: {0}")]
    VisitOrder(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransitionPayload {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub slot: Option<Slot>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Wall-clock time of a visit stamp; defaults to the request time.
    #[serde(default)]
    pub at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub to: BookingStatus,
    pub payload: TransitionPayload,
}

impl TransitionRequest {
    pub fn new(to: BookingStatus) -> Self {
        Self {
            to,
            payload: TransitionPayload::default(),
        }
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.payload.reason = Some(reason.to_string());
        self
    }

    pub fn slot(mut self, slot: Slot) -> Self {
        self.payload.slot = Some(slot);
        self
    }

    pub fn target(mut self, target: &str) -> Self {
        self.payload.target = Some(target.to_string());
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        self.payload.note = Some(note.to_string());
        self
    }

    pub fn at(mut self, at: NaiveDateTime) -> Self {
        self.payload.at = Some(at);
        self
    }
}

/// A field mutation the transition requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Slot(Slot),
    ApprovedBy(String),
    RejectionReason(String),
    Delegation { target: String, reason: Option<String> },
    Postponement { slot: Slot, reason: String },
    CancellationReason(String),
    VisitorRescheduleReason(String),
    Outcome(String),
    Arrived(NaiveDateTime),
    SessionStarted(NaiveDateTime),
    SessionEnded(NaiveDateTime),
}

/// Work the orchestrator must do alongside committing the decision.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// The new slot must clear the conflict detector in the same transaction.
    CheckSlot(Slot),
    /// Open the linked replacement booking.
    SpawnReplacement { slot: Slot, reason: String },
    /// Hand a reference record to the instruction system.
    Instruct {
        target: String,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub changes: Vec<Change>,
    pub note: Option<String>,
    pub follow_ups: Vec<FollowUp>,
}

pub fn decide(
    booking: &Booking,
    request: &TransitionRequest,
    now: NaiveDateTime,
) -> Result<Decision, TransitionError> {
    let from = booking.status;
    let to = request.to;
    let kind = booking.kind();
    let payload = &request.payload;

    if from.is_terminal() {
        return Err(TransitionError::Terminal(from));
    }
    if !to.applies_to(kind) {
        return Err(TransitionError::WrongKind { status: to, kind });
    }

    let not_allowed = TransitionError::NotAllowed { from, to };
    match (from, to) {
        (_, BookingStatus::PendingApproval) => return Err(not_allowed),
        (BookingStatus::WaitingRoom, BookingStatus::InMeeting | BookingStatus::NoShow) => {}
        (BookingStatus::WaitingRoom, _) => return Err(not_allowed),
        (BookingStatus::InMeeting, BookingStatus::Completed) => {}
        (BookingStatus::InMeeting, _) => return Err(not_allowed),
        _ => {}
    }

    let mut changes = vec![];
    let mut follow_ups = vec![];
    let extra = non_blank(&payload.note);

    let note = match to {
        BookingStatus::PendingApproval => return Err(not_allowed),

        BookingStatus::Approved => {
            let slot = match payload.slot {
                Some(slot) => {
                    changes.push(Change::Slot(slot));
                    follow_ups.push(FollowUp::CheckSlot(slot));
                    slot
                }
                None => booking.slot.ok_or(TransitionError::MissingField("slot"))?,
            };
            match non_blank(&payload.approved_by) {
                Some(by) => {
                    changes.push(Change::ApprovedBy(by.clone()));
                    format!("[APPROVED] {} by {by}", slot.label())
                }
                None => format!("[APPROVED] {}", slot.label()),
            }
        }

        BookingStatus::ApprovedWaitingDate => with_extra("[APPROVED - DATE PENDING]", &extra),

        BookingStatus::OnHold => with_extra("[ON HOLD]", &extra),

        BookingStatus::DelegatedToSubordinate | BookingStatus::DelegatedToUnit => {
            let target = required(&payload.target, "target")?;
            let reason = non_blank(&payload.reason);
            changes.push(Change::Delegation {
                target: target.clone(),
                reason: reason.clone(),
            });
            follow_ups.push(FollowUp::Instruct {
                target: target.clone(),
                reason: reason.clone(),
            });
            match reason {
                Some(reason) => format!("[DELEGATED] -> {target}: {reason}"),
                None => format!("[DELEGATED] -> {target}"),
            }
        }

        BookingStatus::Rejected => {
            let reason = required(&payload.reason, "reason")?;
            changes.push(Change::RejectionReason(reason.clone()));
            format!("[REJECTED] {reason}")
        }

        BookingStatus::RescheduledByHost | BookingStatus::Postponed => {
            let reason = required(&payload.reason, "reason")?;
            let slot = payload.slot.ok_or(TransitionError::MissingField("slot"))?;
            changes.push(Change::Postponement {
                slot,
                reason: reason.clone(),
            });
            follow_ups.push(FollowUp::SpawnReplacement {
                slot,
                reason: reason.clone(),
            });
            format!("[POSTPONED] {reason}; new slot: {}", slot.label())
        }

        BookingStatus::RescheduleRequestedByVisitor => {
            let reason = required(&payload.reason, "reason")?;
            changes.push(Change::VisitorRescheduleReason(reason.clone()));
            format!("[VISITOR RESCHEDULE REQUEST] {reason}")
        }

        BookingStatus::WaitingRoom => {
            if from != BookingStatus::Approved {
                return Err(not_allowed);
            }
            let at = payload.at.unwrap_or(now);
            changes.push(Change::Arrived(at));
            format!("[ARRIVED] {}", at.format("%Y-%m-%d %H:%M"))
        }

        BookingStatus::InMeeting => {
            if from != BookingStatus::WaitingRoom {
                return Err(not_allowed);
            }
            let at = payload.at.unwrap_or(now);
            let arrived = booking
                .arrived_at
                .ok_or_else(|| TransitionError::VisitOrder("arrival not recorded".to_string()))?;
            if at < arrived {
                return Err(TransitionError::VisitOrder(format!(
                    "session start {} precedes arrival {}",
                    at.format("%H:%M"),
                    arrived.format("%H:%M")
                )));
            }
            changes.push(Change::SessionStarted(at));
            format!("[IN SESSION] {}", at.format("%H:%M"))
        }

        BookingStatus::Completed => {
            match kind {
                BookingKind::Appointment => {
                    if from != BookingStatus::InMeeting {
                        return Err(not_allowed);
                    }
                    let at = payload.at.unwrap_or(now);
                    let started = booking.session_started_at.ok_or_else(|| {
                        TransitionError::VisitOrder("session start not recorded".to_string())
                    })?;
                    if at < started {
                        return Err(TransitionError::VisitOrder(format!(
                            "session end {} precedes session start {}",
                            at.format("%H:%M"),
                            started.format("%H:%M")
                        )));
                    }
                    changes.push(Change::SessionEnded(at));
                }
                BookingKind::Meeting => {
                    if from != BookingStatus::Approved {
                        return Err(not_allowed);
                    }
                }
            }
            if let Some(outcome) = &extra {
                changes.push(Change::Outcome(outcome.clone()));
            }
            with_extra("[COMPLETED]", &extra)
        }

        BookingStatus::NoShow => {
            if !matches!(from, BookingStatus::Approved | BookingStatus::WaitingRoom) {
                return Err(not_allowed);
            }
            with_extra("[NO-SHOW]", &extra)
        }

        BookingStatus::Cancelled => {
            let reason = required(&payload.reason, "reason")?;
            changes.push(Change::CancellationReason(reason.clone()));
            format!("[CANCELLED] {reason}")
        }
    };

    Ok(Decision {
        from,
        to,
        changes,
        note: Some(note),
        follow_ups,
    })
}

/// Materializes a decision on a copy of the booking.
pub fn apply(booking: &Booking, decision: &Decision, now: NaiveDateTime) -> Booking {
    let mut next = booking.clone();
    next.status = decision.to;

    for change in &decision.changes {
        match change {
            Change::Slot(slot) => next.slot = Some(*slot),
            Change::ApprovedBy(by) => next.approved_by = Some(by.clone()),
            Change::RejectionReason(reason) => next.rejection_reason = Some(reason.clone()),
            Change::Delegation { target, reason } => {
                next.delegation_target = Some(target.clone());
                next.delegation_reason = reason.clone();
            }
            Change::Postponement { slot, reason } => {
                next.postponed_to = Some(*slot);
                next.postponement_reason = Some(reason.clone());
            }
            Change::CancellationReason(reason) => next.cancellation_reason = Some(reason.clone()),
            Change::VisitorRescheduleReason(reason) => {
                next.visitor_reschedule_reason = Some(reason.clone())
            }
            Change::Outcome(outcome) => next.outcome = Some(outcome.clone()),
            Change::Arrived(at) => next.arrived_at = Some(*at),
            Change::SessionStarted(at) => next.session_started_at = Some(*at),
            Change::SessionEnded(at) => next.session_ended_at = Some(*at),
        }
    }

    if let Some(note) = &decision.note {
        next.append_note(note);
    }
    next.updated_at = now;
    next
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, TransitionError> {
    non_blank(value).ok_or(TransitionError::MissingField(field))
}

fn with_extra(marker: &str, extra: &Option<String>) -> String {
    match extra {
        Some(text) => format!("{marker} {text}"),
        None => marker.to_string(),
    }
}
