pub mod availability;
pub mod booking;
pub mod calendar;
pub mod notifications;
pub mod payments;
pub mod policy;
pub mod reminders;
