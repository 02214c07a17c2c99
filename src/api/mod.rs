//! REST side of the backend: appointments, live queue position and
//! peak-hour checks.
//!
//! `QueueApi` is the seam the pollers and push handlers depend on;
//! `HttpQueueApi` is the reqwest implementation.

pub mod client;
pub mod error;

pub use client::{HttpQueueApi, QueueApi};
pub use error::ClientError;
