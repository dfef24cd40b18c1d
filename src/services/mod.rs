pub mod booking;
pub mod calendar;
pub mod conflict;
pub mod instructions;
pub mod recurrence;
pub mod state_machine;
pub mod visit;
pub mod workflow;
