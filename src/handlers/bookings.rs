use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDateTime;
use serde::Deserialize;

use super::now;
use crate::db::queries::BookingFilter;
use crate::errors::AppError;
use crate::models::slot::{parse_date, parse_time};
use crate::models::{
    Booking, BookingEvent, BookingStatus, NewBooking, RecurrenceRule, Resource, Slot, SlotError,
};
use crate::services::booking::{
    self, ConflictReport, CreateOptions, Created, RecurringOutcome, TransitionOutcome,
};
use crate::services::state_machine::{TransitionPayload, TransitionRequest};
use crate::services::visit::VisitMetrics;
use crate::services::workflow::{self, DelegateRequest, PostponeRequest};
use crate::state::AppState;

/// Wire form of a slot. `end` wins over `duration_minutes`; with neither the
/// configured default duration applies.
#[derive(Debug, Deserialize)]
pub struct SlotRequest {
    pub date: String,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

impl SlotRequest {
    pub fn to_slot(&self, default_duration: i64) -> Result<Slot, SlotError> {
        Slot::parse(
            &self.date,
            &self.start,
            self.end.as_deref(),
            self.duration_minutes.unwrap_or(default_duration),
        )
    }
}

fn optional_slot(
    slot: &Option<SlotRequest>,
    default_duration: i64,
) -> Result<Option<Slot>, SlotError> {
    slot.as_ref().map(|s| s.to_slot(default_duration)).transpose()
}

// POST /api/bookings
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub resource: Resource,
    #[serde(default)]
    pub requester_name: String,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub contact_phone: Option<String>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
    pub slot: Option<SlotRequest>,
    #[serde(default)]
    pub protocol: bool,
    #[serde(default)]
    pub approved: bool,
    pub approved_by: Option<String>,
    #[serde(default)]
    pub confirm_displacement: bool,
}

impl CreateBookingRequest {
    fn into_parts(self, default_duration: i64) -> Result<(NewBooking, CreateOptions), AppError> {
        let slot = optional_slot(&self.slot, default_duration)?;
        let options = CreateOptions {
            confirm_displacement: self.confirm_displacement,
        };
        let new = NewBooking {
            resource: Some(self.resource),
            requester_name: self.requester_name,
            organization: self.organization,
            title: self.title,
            contact_phone: self.contact_phone,
            purpose: self.purpose,
            notes: self.notes,
            slot,
            protocol: self.protocol,
            approved: self.approved,
            approved_by: self.approved_by,
        };
        Ok((new, options))
    }
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let (new, options) = body.into_parts(state.config.default_duration_minutes)?;
    let created = {
        let mut conn = state.conn()?;
        booking::create_booking(&mut conn, new, options, now())?
    };
    Ok((StatusCode::CREATED, Json(created)))
}

// POST /api/bookings/recurring
#[derive(Debug, Deserialize)]
pub struct RecurringBookingRequest {
    #[serde(flatten)]
    pub booking: CreateBookingRequest,
    pub recurrence: RecurrenceRule,
}

pub async fn create_recurring(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecurringBookingRequest>,
) -> Result<(StatusCode, Json<RecurringOutcome>), AppError> {
    let (new, options) = body
        .booking
        .into_parts(state.config.default_duration_minutes)?;
    let outcome = {
        let mut conn = state.conn()?;
        booking::create_recurring(
            &mut conn,
            new,
            &body.recurrence,
            options,
            state.config.max_recurrence_occurrences,
            now(),
        )?
    };
    Ok((StatusCode::CREATED, Json(outcome)))
}

// POST /api/bookings/conflicts
#[derive(Debug, Deserialize)]
pub struct ConflictCheckRequest {
    pub resource: Resource,
    pub slot: SlotRequest,
    pub exclude_id: Option<String>,
}

pub async fn check_conflict(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConflictCheckRequest>,
) -> Result<Json<ConflictReport>, AppError> {
    let slot = body.slot.to_slot(state.config.default_duration_minutes)?;
    let conn = state.conn()?;
    let report = booking::check_conflict(&conn, &body.resource, &slot, body.exclude_id.as_deref())?;
    Ok(Json(report))
}

// GET /api/bookings
#[derive(Debug, Default, Deserialize)]
pub struct BookingsQuery {
    pub resource: Option<String>,
    pub room_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub series_id: Option<String>,
    pub limit: Option<i64>,
}

impl BookingsQuery {
    fn to_filter(&self) -> Result<BookingFilter, AppError> {
        let resource = match (self.resource.as_deref(), &self.room_id) {
            (None | Some("meeting-room"), Some(room_id)) => {
                Some(Resource::MeetingRoom(room_id.clone()))
            }
            (Some("host-calendar"), None) => Some(Resource::HostCalendar),
            (None, None) => None,
            (Some("meeting-room"), None) => {
                return Err(AppError::Validation(
                    "room_id is required for meeting-room".to_string(),
                ))
            }
            (Some(other), _) => {
                return Err(AppError::Validation(format!(
                    "invalid resource filter: {other}"
                )))
            }
        };
        let status = match self.status.as_deref() {
            Some(s) => Some(
                BookingStatus::parse(s)
                    .ok_or_else(|| AppError::Validation(format!("unknown status: {s}")))?,
            ),
            None => None,
        };

        Ok(BookingFilter {
            resource,
            from: self.from.as_deref().map(parse_date).transpose()?,
            to: self.to.as_deref().map(parse_date).transpose()?,
            status,
            series_id: self.series_id.clone(),
            limit: self.limit,
        })
    }
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let filter = query.to_filter()?;
    let conn = state.conn()?;
    Ok(Json(booking::list_bookings(&conn, &filter)?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let conn = state.conn()?;
    Ok(Json(booking::get_booking(&conn, &id)?))
}

// DELETE /api/bookings/:id
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.conn()?;
    booking::delete_booking(&mut conn, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/bookings/:id/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookingEvent>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(booking::history(&conn, &id)?))
}

// GET /api/bookings/:id/visit
pub async fn get_visit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VisitMetrics>, AppError> {
    let conn = state.conn()?;
    Ok(Json(booking::visit_metrics(&conn, &id)?))
}

// POST /api/bookings/:id/transition
#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub to: String,
    pub reason: Option<String>,
    pub slot: Option<SlotRequest>,
    pub target: Option<String>,
    pub approved_by: Option<String>,
    pub note: Option<String>,
    pub at: Option<NaiveDateTime>,
}

pub async fn transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let to = BookingStatus::parse(&body.to)
        .ok_or_else(|| AppError::Validation(format!("unknown status: {}", body.to)))?;
    if matches!(to, BookingStatus::RescheduledByHost | BookingStatus::Postponed) {
        return Err(AppError::Validation(format!(
            "{to} is set through POST /api/bookings/{id}/postpone"
        )));
    }
    let request = TransitionRequest {
        to,
        payload: TransitionPayload {
            reason: body.reason,
            slot: optional_slot(&body.slot, state.config.default_duration_minutes)?,
            target: body.target,
            approved_by: body.approved_by,
            note: body.note,
            at: body.at,
        },
    };
    let outcome = workflow::transition_and_notify(&state, &id, request, now()).await?;
    Ok(Json(outcome))
}

// POST /api/bookings/:id/postpone
#[derive(Debug, Deserialize)]
pub struct PostponeBody {
    #[serde(default)]
    pub reason: String,
    pub slot: SlotRequest,
}

pub async fn postpone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PostponeBody>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let request = PostponeRequest {
        reason: body.reason,
        slot: body.slot.to_slot(state.config.default_duration_minutes)?,
    };
    let mut conn = state.conn()?;
    Ok(Json(workflow::postpone(&mut conn, &id, &request, now())?))
}

// POST /api/bookings/:id/delegate
pub async fn delegate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DelegateRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let outcome = workflow::delegate(&state, &id, &body, now()).await?;
    Ok(Json(outcome))
}

// POST /api/bookings/:id/{arrive,start,finish,no-show}
#[derive(Debug, Default, Deserialize)]
pub struct VisitStampBody {
    /// `HH:MM` on today's date, or a full `YYYY-MM-DDTHH:MM:SS` timestamp.
    pub at: Option<String>,
    pub note: Option<String>,
}

impl VisitStampBody {
    fn request(self, to: BookingStatus, today: NaiveDateTime) -> Result<TransitionRequest, AppError> {
        let at = match self.at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
                Ok(at) => at,
                Err(_) => today.date().and_time(parse_time(raw)?),
            }),
        };
        let mut request = TransitionRequest::new(to);
        request.payload.at = at;
        request.payload.note = self.note;
        Ok(request)
    }
}

async fn stamp_visit(
    state: Arc<AppState>,
    id: String,
    to: BookingStatus,
    body: Option<Json<VisitStampBody>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let at = now();
    let request = body.request(to, at)?;
    let outcome = {
        let mut conn = state.conn()?;
        booking::transition(&mut conn, &id, &request, at)?
    };
    Ok(Json(outcome))
}

pub async fn arrive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<VisitStampBody>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    stamp_visit(state, id, BookingStatus::WaitingRoom, body).await
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<VisitStampBody>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    stamp_visit(state, id, BookingStatus::InMeeting, body).await
}

pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<VisitStampBody>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    stamp_visit(state, id, BookingStatus::Completed, body).await
}

pub async fn no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<VisitStampBody>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    stamp_visit(state, id, BookingStatus::NoShow, body).await
}
