pub mod bookings;
pub mod calendar;
pub mod health;
pub mod rooms;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDateTime;

use crate::state::AppState;

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/:id", get(rooms::get_room))
        .route(
            "/api/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/api/bookings/recurring", post(bookings::create_recurring))
        .route("/api/bookings/conflicts", post(bookings::check_conflict))
        .route(
            "/api/bookings/:id",
            get(bookings::get_booking).delete(bookings::delete_booking),
        )
        .route("/api/bookings/:id/history", get(bookings::get_history))
        .route("/api/bookings/:id/visit", get(bookings::get_visit))
        .route("/api/bookings/:id/transition", post(bookings::transition))
        .route("/api/bookings/:id/postpone", post(bookings::postpone))
        .route("/api/bookings/:id/delegate", post(bookings::delegate))
        .route("/api/bookings/:id/arrive", post(bookings::arrive))
        .route("/api/bookings/:id/start", post(bookings::start_session))
        .route("/api/bookings/:id/finish", post(bookings::end_session))
        .route("/api/bookings/:id/no-show", post(bookings::no_show))
        .route("/calendar/feed.ics", get(calendar::calendar_feed))
        .route("/calendar/:booking_id", get(calendar::download_ics))
        .with_state(state)
}
