use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::db::queries::{self, BookingFilter};
use crate::errors::AppError;
use crate::models::slot::parse_date;
use crate::models::Resource;
use crate::services::calendar::{generate_feed, generate_ics};
use crate::state::AppState;

const FEED_LIMIT: i64 = 500;

// GET /calendar/:booking_id
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let booking_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);

    let booking = {
        let conn = state.conn()?;
        queries::get_booking_by_id(&conn, booking_id)?
            .ok_or_else(|| AppError::booking_not_found(booking_id))?
    };
    let ics = generate_ics(&booking)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} has no scheduled slot")))?;
    let disposition = format!("attachment; filename=\"booking-{booking_id}.ics\"");

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (header::CONTENT_DISPOSITION, disposition.as_str()),
        ],
        ics,
    )
        .into_response())
}

// GET /calendar/feed.ics
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub room_id: Option<String>,
    pub from: Option<String>,
}

pub async fn calendar_feed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    let resource = match query.room_id {
        Some(room_id) => Resource::MeetingRoom(room_id),
        None => Resource::HostCalendar,
    };
    let filter = BookingFilter {
        resource: Some(resource),
        from: query.from.as_deref().map(parse_date).transpose()?,
        limit: Some(FEED_LIMIT),
        ..Default::default()
    };

    let bookings = {
        let conn = state.conn()?;
        queries::list_bookings(&conn, &filter)?
    };

    Ok((
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        generate_feed(&bookings),
    )
        .into_response())
}
