pub mod booking;
pub mod event;
pub mod recurrence;
pub mod room;
pub mod slot;
pub mod status;

pub use booking::{Booking, BookingKind, NewBooking, Resource};
pub use event::{BookingEvent, InstructionRecord};
pub use recurrence::{Frequency, RecurrenceRule};
pub use room::Room;
pub use slot::{Slot, SlotError};
pub use status::BookingStatus;
