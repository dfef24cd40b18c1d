use crate::models::Booking;

const ICS_STAMP: &str = "%Y%m%dT%H%M%S";

/// Single-event calendar for one booking. Unscheduled bookings have no event.
pub fn generate_ics(booking: &Booking) -> Option<String> {
    let event = vevent(booking)?;
    Some(wrap_calendar(&event))
}

/// Calendar feed of every scheduled booking in `bookings`.
pub fn generate_feed(bookings: &[Booking]) -> String {
    let events: String = bookings.iter().filter_map(vevent).collect();
    wrap_calendar(&events)
}

fn wrap_calendar(events: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Randevu//Booking Orchestrator//EN\r\n\
         {events}\
         END:VCALENDAR\r\n"
    )
}

fn vevent(booking: &Booking) -> Option<String> {
    let slot = booking.slot?;
    let dtstart = slot.starts_at().format(ICS_STAMP);
    let dtend = slot.ends_at().format(ICS_STAMP);
    let dtstamp = booking.updated_at.format(ICS_STAMP);
    let uid = format!("{}@randevu", booking.id);
    let summary = escape_text(booking.subject());
    let description = escape_text(&booking.notes);
    let status = if booking.status.blocks_slot() {
        "CONFIRMED"
    } else {
        "CANCELLED"
    };

    let mut event = format!(
        "BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         STATUS:{status}\r\n"
    );
    if let Some(room_id) = booking.resource.room_id() {
        event.push_str(&format!("LOCATION:{}\r\n", escape_text(room_id)));
    }
    if !description.is_empty() {
        event.push_str(&format!("DESCRIPTION:{description}\r\n"));
    }
    event.push_str("END:VEVENT\r\n");
    Some(event)
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}
