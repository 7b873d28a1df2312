pub mod appointment;
pub mod business;
pub mod policy;
pub mod service;
pub mod slot;

pub use appointment::{Appointment, AppointmentStatus, CancelReason, FeeEntry, FeeReason, Reminder};
pub use business::{Business, DayHours, WorkingHours};
pub use policy::{FeeType, Policy, PolicyKind, PolicySnapshot};
pub use service::{Service, ServiceSnapshot};
pub use slot::{BlockedTime, Slot};
