use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use crate::models::{
    Booking, BookingEvent, BookingStatus, InstructionRecord, Resource, Room, Slot,
};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, resource_kind, room_id, requester_name, organization, title, \
    contact_phone, purpose, notes, date, start_time, end_time, status, protocol, \
    rejection_reason, delegation_target, delegation_reason, postponed_to_date, \
    postponed_to_start, postponed_to_end, postponement_reason, approved_by, \
    cancellation_reason, visitor_reschedule_reason, outcome, arrived_at, \
    session_started_at, session_ended_at, supersedes, superseded_by, series_id, \
    created_at, updated_at";

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    let (date, start, end) = slot_columns(booking.slot.as_ref());
    let (pp_date, pp_start, pp_end) = slot_columns(booking.postponed_to.as_ref());

    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
             ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, \
             ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33)"
        ),
        params![
            booking.id,
            booking.resource.kind_str(),
            booking.resource.room_id(),
            booking.requester_name,
            booking.organization,
            booking.title,
            booking.contact_phone,
            booking.purpose,
            booking.notes,
            date,
            start,
            end,
            booking.status.as_str(),
            booking.protocol,
            booking.rejection_reason,
            booking.delegation_target,
            booking.delegation_reason,
            pp_date,
            pp_start,
            pp_end,
            booking.postponement_reason,
            booking.approved_by,
            booking.cancellation_reason,
            booking.visitor_reschedule_reason,
            booking.outcome,
            fmt_datetime(booking.arrived_at),
            fmt_datetime(booking.session_started_at),
            fmt_datetime(booking.session_ended_at),
            booking.supersedes,
            booking.superseded_by,
            booking.series_id,
            booking.created_at.format(DATETIME_FMT).to_string(),
            booking.updated_at.format(DATETIME_FMT).to_string(),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column of an existing booking. Returns `false` when the
/// row no longer exists.
pub fn update_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let (date, start, end) = slot_columns(booking.slot.as_ref());
    let (pp_date, pp_start, pp_end) = slot_columns(booking.postponed_to.as_ref());

    let count = conn.execute(
        "UPDATE bookings SET
           requester_name = ?2, organization = ?3, title = ?4, contact_phone = ?5,
           purpose = ?6, notes = ?7, date = ?8, start_time = ?9, end_time = ?10,
           status = ?11, protocol = ?12, rejection_reason = ?13, delegation_target = ?14,
           delegation_reason = ?15, postponed_to_date = ?16, postponed_to_start = ?17,
           postponed_to_end = ?18, postponement_reason = ?19, approved_by = ?20,
           cancellation_reason = ?21, visitor_reschedule_reason = ?22, outcome = ?23,
           arrived_at = ?24, session_started_at = ?25, session_ended_at = ?26,
           supersedes = ?27, superseded_by = ?28, series_id = ?29, updated_at = ?30
         WHERE id = ?1",
        params![
            booking.id,
            booking.requester_name,
            booking.organization,
            booking.title,
            booking.contact_phone,
            booking.purpose,
            booking.notes,
            date,
            start,
            end,
            booking.status.as_str(),
            booking.protocol,
            booking.rejection_reason,
            booking.delegation_target,
            booking.delegation_reason,
            pp_date,
            pp_start,
            pp_end,
            booking.postponement_reason,
            booking.approved_by,
            booking.cancellation_reason,
            booking.visitor_reschedule_reason,
            booking.outcome,
            fmt_datetime(booking.arrived_at),
            fmt_datetime(booking.session_started_at),
            fmt_datetime(booking.session_ended_at),
            booking.supersedes,
            booking.superseded_by,
            booking.series_id,
            booking.updated_at.format(DATETIME_FMT).to_string(),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Scheduled bookings on one resource between two dates (inclusive), in start
/// order. Bookings without a slot are never returned.
pub fn find_bookings(
    conn: &Connection,
    resource: &Resource,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE resource_kind = ?1 AND COALESCE(room_id, '') = COALESCE(?2, '')
           AND date IS NOT NULL AND date >= ?3 AND date <= ?4
         ORDER BY date ASC, start_time ASC, created_at ASC"
    ))?;

    let rows = stmt.query_map(
        params![
            resource.kind_str(),
            resource.room_id(),
            from.format(DATE_FMT).to_string(),
            to.format(DATE_FMT).to_string(),
        ],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub resource: Option<Resource>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub series_id: Option<String>,
    pub limit: Option<i64>,
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> anyhow::Result<Vec<Booking>> {
    let mut clauses: Vec<String> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(resource) = &filter.resource {
        values.push(Box::new(resource.kind_str()));
        clauses.push(format!("resource_kind = ?{}", values.len()));
        if let Some(room_id) = resource.room_id() {
            values.push(Box::new(room_id.to_string()));
            clauses.push(format!("room_id = ?{}", values.len()));
        }
    }
    if let Some(from) = filter.from {
        values.push(Box::new(from.format(DATE_FMT).to_string()));
        clauses.push(format!("date >= ?{}", values.len()));
    }
    if let Some(to) = filter.to {
        values.push(Box::new(to.format(DATE_FMT).to_string()));
        clauses.push(format!("date <= ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(Box::new(status.as_str()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(series_id) = &filter.series_id {
        values.push(Box::new(series_id.clone()));
        clauses.push(format!("series_id = ?{}", values.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    values.push(Box::new(filter.limit.unwrap_or(100)));
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings {where_sql}
         ORDER BY date IS NULL, date ASC, start_time ASC, created_at ASC LIMIT ?{}",
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn delete_booking(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

fn parse_booking_row(row: &Row) -> anyhow::Result<Booking> {
    let kind: String = row.get("resource_kind")?;
    let room_id: Option<String> = row.get("room_id")?;
    let resource = Resource::from_parts(&kind, room_id)
        .ok_or_else(|| anyhow!("unknown resource kind: {kind}"))?;
    let status_str: String = row.get("status")?;
    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown booking status: {status_str}"))?;

    Ok(Booking {
        id: row.get("id")?,
        resource,
        requester_name: row.get("requester_name")?,
        organization: row.get("organization")?,
        title: row.get("title")?,
        contact_phone: row.get("contact_phone")?,
        purpose: row.get("purpose")?,
        notes: row.get("notes")?,
        slot: parse_slot(row.get("date")?, row.get("start_time")?, row.get("end_time")?)?,
        status,
        protocol: row.get("protocol")?,
        rejection_reason: row.get("rejection_reason")?,
        delegation_target: row.get("delegation_target")?,
        delegation_reason: row.get("delegation_reason")?,
        postponed_to: parse_slot(
            row.get("postponed_to_date")?,
            row.get("postponed_to_start")?,
            row.get("postponed_to_end")?,
        )?,
        postponement_reason: row.get("postponement_reason")?,
        approved_by: row.get("approved_by")?,
        cancellation_reason: row.get("cancellation_reason")?,
        visitor_reschedule_reason: row.get("visitor_reschedule_reason")?,
        outcome: row.get("outcome")?,
        arrived_at: parse_optional_datetime(row.get("arrived_at")?)?,
        session_started_at: parse_optional_datetime(row.get("session_started_at")?)?,
        session_ended_at: parse_optional_datetime(row.get("session_ended_at")?)?,
        supersedes: row.get("supersedes")?,
        superseded_by: row.get("superseded_by")?,
        series_id: row.get("series_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?)?,
    })
}

fn slot_columns(slot: Option<&Slot>) -> (Option<String>, Option<String>, Option<String>) {
    match slot {
        Some(s) => (
            Some(s.date.format(DATE_FMT).to_string()),
            Some(s.start.format(TIME_FMT).to_string()),
            Some(s.end.format(TIME_FMT).to_string()),
        ),
        None => (None, None, None),
    }
}

fn parse_slot(
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> anyhow::Result<Option<Slot>> {
    let (Some(date), Some(start), Some(end)) = (date, start, end) else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&date, DATE_FMT)
        .with_context(|| format!("bad stored date: {date}"))?;
    let start = NaiveTime::parse_from_str(&start, TIME_FMT)
        .with_context(|| format!("bad stored start time: {start}"))?;
    let end = NaiveTime::parse_from_str(&end, TIME_FMT)
        .with_context(|| format!("bad stored end time: {end}"))?;
    Ok(Some(Slot::new(date, start, end)?))
}

fn fmt_datetime(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|v| v.format(DATETIME_FMT).to_string())
}

fn parse_datetime(value: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FMT)
        .with_context(|| format!("bad stored timestamp: {value}"))
}

fn parse_optional_datetime(value: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    value.as_deref().map(parse_datetime).transpose()
}

// ── Booking Events ──

pub fn insert_event(
    conn: &Connection,
    booking_id: &str,
    kind: &str,
    detail: &str,
    at: &NaiveDateTime,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO booking_events (booking_id, kind, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![booking_id, kind, detail, at.format(DATETIME_FMT).to_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_events(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<BookingEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, kind, detail, created_at
         FROM booking_events WHERE booking_id = ?1
         ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![booking_id], |row| {
        Ok(BookingEvent {
            id: row.get(0)?,
            booking_id: row.get(1)?,
            kind: row.get(2)?,
            detail: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut events = vec![];
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ── Rooms ──

pub fn insert_room(conn: &Connection, room: &Room) -> anyhow::Result<()> {
    let equipment = serde_json::to_string(&room.equipment)?;
    conn.execute(
        "INSERT INTO rooms (id, name, capacity, equipment, location) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![room.id, room.name, room.capacity, equipment, room.location],
    )?;
    Ok(())
}

pub fn get_room(conn: &Connection, id: &str) -> anyhow::Result<Option<Room>> {
    let result = conn.query_row(
        "SELECT id, name, capacity, equipment, location FROM rooms WHERE id = ?1",
        params![id],
        |row| Ok(parse_room_row(row)),
    );

    match result {
        Ok(room) => Ok(Some(room?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_rooms(conn: &Connection) -> anyhow::Result<Vec<Room>> {
    let mut stmt =
        conn.prepare("SELECT id, name, capacity, equipment, location FROM rooms ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| Ok(parse_room_row(row)))?;

    let mut rooms = vec![];
    for row in rows {
        rooms.push(row??);
    }
    Ok(rooms)
}

fn parse_room_row(row: &Row) -> anyhow::Result<Room> {
    let equipment: String = row.get(3)?;
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        capacity: row.get(2)?,
        equipment: serde_json::from_str(&equipment).context("bad stored equipment list")?,
        location: row.get(4)?,
    })
}

// ── Instructions ──

pub fn insert_instruction(conn: &Connection, record: &InstructionRecord) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO instructions (origin_booking_id, subject, target, note) VALUES (?1, ?2, ?3, ?4)",
        params![record.origin_booking_id, record.subject, record.target, record.note],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_instructions_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<InstructionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT subject, origin_booking_id, target, note FROM instructions
         WHERE origin_booking_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok(InstructionRecord {
            subject: row.get(0)?,
            origin_booking_id: row.get(1)?,
            target: row.get(2)?,
            note: row.get(3)?,
        })
    })?;

    let mut records = vec![];
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn booking(id: &str, resource: Resource, slot: Option<Slot>) -> Booking {
        let now = dt("2024-02-20 08:00");
        Booking {
            id: id.to_string(),
            resource,
            requester_name: "Ayşe Demir".to_string(),
            organization: Some("Municipality".to_string()),
            title: Some("Budget review".to_string()),
            contact_phone: None,
            purpose: None,
            notes: String::new(),
            slot,
            status: BookingStatus::Approved,
            protocol: false,
            rejection_reason: None,
            delegation_target: None,
            delegation_reason: None,
            postponed_to: None,
            postponement_reason: None,
            approved_by: None,
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
        }
    }

    fn room(id: &str) -> Room {
        Room {
            id: id.to_string(),
            name: format!("Room {id}"),
            capacity: Some(12),
            equipment: vec!["projector".to_string()],
            location: Some("2nd floor".to_string()),
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = setup_db();
        let slot = Slot::parse("2024-03-01", "10:00", Some("11:00"), 0).unwrap();
        let mut b = booking("b-1", Resource::HostCalendar, Some(slot));
        b.arrived_at = Some(dt("2024-03-01 09:55"));
        b.notes = "first\nsecond".to_string();
        insert_booking(&conn, &b).unwrap();

        let loaded = get_booking_by_id(&conn, "b-1").unwrap().unwrap();
        assert_eq!(loaded, b);
        assert!(get_booking_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_find_is_scoped_by_resource_and_dates() {
        let conn = setup_db();
        insert_room(&conn, &room("r1")).unwrap();
        insert_room(&conn, &room("r2")).unwrap();
        let r1 = Resource::MeetingRoom("r1".to_string());
        let r2 = Resource::MeetingRoom("r2".to_string());

        let s = |d: &str, a: &str| Slot::parse(d, a, None, 60).unwrap();
        insert_booking(&conn, &booking("a", r1.clone(), Some(s("2024-03-01", "14:00")))).unwrap();
        insert_booking(&conn, &booking("b", r1.clone(), Some(s("2024-03-01", "09:00")))).unwrap();
        insert_booking(&conn, &booking("c", r2.clone(), Some(s("2024-03-01", "09:00")))).unwrap();
        insert_booking(&conn, &booking("d", r1.clone(), Some(s("2024-03-02", "09:00")))).unwrap();
        insert_booking(&conn, &booking("e", Resource::HostCalendar, Some(s("2024-03-01", "09:00")))).unwrap();
        insert_booking(&conn, &booking("f", r1.clone(), None)).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let found = find_bookings(&conn, &r1, day, day).unwrap();
        let ids: Vec<_> = found.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let host = find_bookings(&conn, &Resource::HostCalendar, day, day).unwrap();
        assert_eq!(host.len(), 1);
        assert_eq!(host[0].id, "e");
    }

    #[test]
    fn test_update_and_delete() {
        let conn = setup_db();
        let mut b = booking("b-1", Resource::HostCalendar, None);
        insert_booking(&conn, &b).unwrap();

        b.status = BookingStatus::Rejected;
        b.rejection_reason = Some("no capacity".to_string());
        assert!(update_booking(&conn, &b).unwrap());
        let loaded = get_booking_by_id(&conn, "b-1").unwrap().unwrap();
        assert_eq!(loaded.status, BookingStatus::Rejected);
        assert_eq!(loaded.rejection_reason.as_deref(), Some("no capacity"));

        insert_event(&conn, "b-1", "created", "x", &dt("2024-02-20 08:00")).unwrap();
        assert!(delete_booking(&conn, "b-1").unwrap());
        assert!(!delete_booking(&conn, "b-1").unwrap());
        assert!(!update_booking(&conn, &b).unwrap());
        assert!(get_events(&conn, "b-1").unwrap().is_empty());
    }

    #[test]
    fn test_list_bookings_filters() {
        let conn = setup_db();
        let s = |d: &str| Slot::parse(d, "10:00", None, 30).unwrap();
        let mut rejected = booking("x", Resource::HostCalendar, Some(s("2024-03-02")));
        rejected.status = BookingStatus::Rejected;
        insert_booking(&conn, &booking("w", Resource::HostCalendar, Some(s("2024-03-01")))).unwrap();
        insert_booking(&conn, &rejected).unwrap();
        insert_booking(&conn, &booking("y", Resource::HostCalendar, Some(s("2024-04-01")))).unwrap();

        let march = list_bookings(
            &conn,
            &BookingFilter {
                from: NaiveDate::from_ymd_opt(2024, 3, 1),
                to: NaiveDate::from_ymd_opt(2024, 3, 31),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(march.len(), 2);

        let only_rejected = list_bookings(
            &conn,
            &BookingFilter {
                status: Some(BookingStatus::Rejected),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(only_rejected.len(), 1);
        assert_eq!(only_rejected[0].id, "x");

        let limited = list_bookings(
            &conn,
            &BookingFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited[0].id, "w");
    }

    #[test]
    fn test_rooms_and_instructions() {
        let conn = setup_db();
        insert_room(&conn, &room("b")).unwrap();
        insert_room(&conn, &room("a")).unwrap();
        assert!(insert_room(&conn, &room("a")).is_err());

        let rooms = list_rooms(&conn).unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, "a");
        assert_eq!(get_room(&conn, "b").unwrap().unwrap().equipment, vec!["projector"]);
        assert!(get_room(&conn, "zzz").unwrap().is_none());

        let record = InstructionRecord {
            subject: "Budget review".to_string(),
            origin_booking_id: "b-9".to_string(),
            target: "Deputy".to_string(),
            note: "please handle".to_string(),
        };
        insert_instruction(&conn, &record).unwrap();
        assert_eq!(get_instructions_for_booking(&conn, "b-9").unwrap(), vec![record]);
    }
}
