use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("end time must be after start time")]
    EndNotAfterStart,

    #[error("slot must end on the day it starts")]
    CrossesMidnight,

    #[error("slot times must be whole minutes")]
    SubMinute,

    #[error("duration must be positive")]
    NonPositiveDuration,

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),
}

/// A booked span on one calendar day. End is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SlotFields")]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

#[derive(Deserialize)]
struct SlotFields {
    date: NaiveDate,
    #[serde(with = "hhmm")]
    start: NaiveTime,
    #[serde(with = "hhmm")]
    end: NaiveTime,
}

impl TryFrom<SlotFields> for Slot {
    type Error = SlotError;

    fn try_from(fields: SlotFields) -> Result<Self, SlotError> {
        Slot::new(fields.date, fields.start, fields.end)
    }
}

impl Slot {
    /// Times are stored at minute precision, so seconds are refused rather
    /// than silently dropped.
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Result<Self, SlotError> {
        if !whole_minute(start) || !whole_minute(end) {
            return Err(SlotError::SubMinute);
        }
        if end <= start {
            return Err(SlotError::EndNotAfterStart);
        }
        Ok(Self { date, start, end })
    }

    pub fn with_duration(
        date: NaiveDate,
        start: NaiveTime,
        duration_minutes: i64,
    ) -> Result<Self, SlotError> {
        if duration_minutes <= 0 {
            return Err(SlotError::NonPositiveDuration);
        }
        let end = date.and_time(start) + Duration::minutes(duration_minutes);
        if end.date() != date {
            return Err(SlotError::CrossesMidnight);
        }
        Slot::new(date, start, end.time())
    }

    /// Parses `YYYY-MM-DD` and `HH:MM` (or `HH:MM:SS`) strings. When `end` is
    /// missing the slot runs for `duration_minutes`.
    pub fn parse(
        date: &str,
        start: &str,
        end: Option<&str>,
        duration_minutes: i64,
    ) -> Result<Self, SlotError> {
        let date = parse_date(date)?;
        let start = parse_time(start)?;
        match end {
            Some(end) => Slot::new(date, start, parse_time(end)?),
            None => Slot::with_duration(date, start, duration_minutes),
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Same day and the half-open spans intersect: the other span's start
    /// falls inside ours, our start falls inside theirs, or one contains the
    /// other. Touching spans do not overlap.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }

    /// Same times of day on another date.
    pub fn on(&self, date: NaiveDate) -> Slot {
        Slot {
            date,
            start: self.start,
            end: self.end,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} {}-{}",
            self.date.format("%Y-%m-%d"),
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

fn whole_minute(time: NaiveTime) -> bool {
    time.second() == 0 && time.nanosecond() == 0
}

pub fn parse_date(s: &str) -> Result<NaiveDate, SlotError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| SlotError::InvalidDate(s.to_string()))
}

pub fn parse_time(s: &str) -> Result<NaiveTime, SlotError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| SlotError::InvalidTime(s.to_string()))
}

pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(date: &str, start: &str, end: &str) -> Slot {
        Slot::parse(date, start, Some(end), 0).unwrap()
    }

    #[test]
    fn test_end_must_follow_start() {
        assert_eq!(
            Slot::parse("2024-03-01", "10:00", Some("10:00"), 0),
            Err(SlotError::EndNotAfterStart)
        );
        assert_eq!(
            Slot::parse("2024-03-01", "11:00", Some("10:00"), 0),
            Err(SlotError::EndNotAfterStart)
        );
    }

    #[test]
    fn test_duration_fallback() {
        let s = Slot::parse("2024-03-01", "09:30", None, 45).unwrap();
        assert_eq!(s.end, NaiveTime::from_hms_opt(10, 15, 0).unwrap());
        assert_eq!(s.duration_minutes(), 45);
    }

    #[test]
    fn test_duration_cannot_cross_midnight() {
        assert_eq!(
            Slot::parse("2024-03-01", "23:30", None, 60),
            Err(SlotError::CrossesMidnight)
        );
        assert_eq!(
            Slot::parse("2024-03-01", "10:00", None, 0),
            Err(SlotError::NonPositiveDuration)
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            Slot::parse("2024-13-01", "10:00", Some("11:00"), 0),
            Err(SlotError::InvalidDate(_))
        ));
        assert!(matches!(
            Slot::parse("2024-03-01", "25:00", Some("11:00"), 0),
            Err(SlotError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_seconds_must_be_zero() {
        assert_eq!(
            Slot::parse("2024-03-01", "10:00:10", Some("10:00:50"), 0),
            Err(SlotError::SubMinute)
        );
        assert_eq!(
            Slot::parse("2024-03-01", "10:00:30", None, 30),
            Err(SlotError::SubMinute)
        );
        assert_eq!(
            Slot::parse("2024-03-01", "10:00:00", Some("10:30:00"), 0),
            Ok(slot("2024-03-01", "10:00", "10:30"))
        );
    }

    #[test]
    fn test_overlap_cases() {
        let existing = slot("2024-03-01", "10:00", "11:00");
        // start inside
        assert!(slot("2024-03-01", "10:30", "11:30").overlaps(&existing));
        // end inside
        assert!(slot("2024-03-01", "09:30", "10:15").overlaps(&existing));
        // containment both ways
        assert!(slot("2024-03-01", "09:00", "12:00").overlaps(&existing));
        assert!(slot("2024-03-01", "10:15", "10:45").overlaps(&existing));
        // adjacency
        assert!(!slot("2024-03-01", "11:00", "12:00").overlaps(&existing));
        assert!(!slot("2024-03-01", "09:00", "10:00").overlaps(&existing));
        // other day
        assert!(!slot("2024-03-02", "10:00", "11:00").overlaps(&existing));
    }

    #[test]
    fn test_serde_uses_hour_minute() {
        let s = slot("2024-03-01", "09:05", "09:50");
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["start"], "09:05");
        assert_eq!(json["end"], "09:50");
        assert_eq!(json["date"], "2024-03-01");

        let back: Slot = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);

        let reversed = serde_json::json!({"date": "2024-03-01", "start": "10:00", "end": "09:00"});
        assert!(serde_json::from_value::<Slot>(reversed).is_err());
        let seconds = serde_json::json!({"date": "2024-03-01", "start": "10:00:10", "end": "10:30"});
        assert!(serde_json::from_value::<Slot>(seconds).is_err());
    }
}
