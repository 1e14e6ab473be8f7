//! Core types shared across the crate.
//!
//! - [`id`]: identifiers (`NodeId`, `EventId`, `Event`, `WorkItemId`) and `Time`
//! - [`cancel`]: cancellation reasons and well-known fault codes

pub mod cancel;
pub mod id;

pub use cancel::{faults, CancelReason};
pub use id::{Event, EventId, Generation, NodeId, Time, WorkItemId};
