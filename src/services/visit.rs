use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::models::Booking;

/// Durations derived from a booking's visit stamps, in whole minutes. A span
/// with a missing boundary is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisitMetrics {
    pub arrival_date: Option<NaiveDate>,
    pub wait_minutes: Option<i64>,
    pub session_minutes: Option<i64>,
    pub total_minutes: Option<i64>,
}

impl VisitMetrics {
    pub fn of(booking: &Booking) -> Self {
        let arrived = booking.arrived_at;
        let started = booking.session_started_at;
        let ended = booking.session_ended_at;
        Self {
            arrival_date: arrived.map(|at| at.date()),
            wait_minutes: minutes_between(arrived, started),
            session_minutes: minutes_between(started, ended),
            total_minutes: minutes_between(arrived, ended),
        }
    }
}

fn minutes_between(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Option<i64> {
    Some((to? - from?).num_minutes())
}
