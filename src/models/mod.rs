//! Client-side data model: appointments, doctor availability slots,
//! live queue snapshots, reminders and notifications.
//!
//! Nothing here is a record of truth. Every type mirrors what the backend
//! sends (camelCase on the wire, `_id` accepted for `id`) plus the few
//! client-only fields the queue views need.

pub mod alert;
pub mod appointment;
pub mod enums;
pub mod queue;
pub mod reminder;

pub use alert::*;
pub use appointment::*;
pub use enums::*;
pub use queue::*;
pub use reminder::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
