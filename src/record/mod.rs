//! Internal records for runtime entities.

pub mod operation;

pub use operation::{AtomicOperationState, OperationState};
