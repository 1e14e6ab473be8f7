//! Optrack: completion tracking and cancellation for distributed operations.
//!
//! # Overview
//!
//! An operation is a unit of asynchronous work (a copy, a kernel launch, a
//! reduction) whose completion is signalled by triggering a finish event.
//! Optrack owns the part of a runtime that sits between "work was issued"
//! and "the finish event fired": the lifecycle state machine, the join over
//! asynchronous sub-work, cancellation, and the node-wide table that lets any
//! thread or any node find an operation by its finish event.
//!
//! # Core Guarantees
//!
//! - **Exactly one trigger**: every operation triggers its finish event once,
//!   whichever of completion, cancellation or termination gets there first
//! - **Cancel before start always wins**: a pending or ready operation that is
//!   cancelled never runs
//! - **Join before complete**: an operation completes only after its owner and
//!   every registered work item have reported
//! - **Bounded table**: table entries disappear when their finish event fires
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, timestamps and cancellation reasons
//! - [`record`]: Lifecycle state cell
//! - [`operation`]: Operations, operation kinds and async work items
//! - [`event`]: Interface to the event subsystem, plus an in-process table
//! - [`profiling`]: Profiling requests and measurements
//! - [`runtime`]: Operation table and its configuration
//! - [`remote`]: Cross-node control messages and transport
//! - [`lab`]: In-memory network for multi-node tests
//! - [`util`]: Deterministic hashing and sharding
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod event;
pub mod lab;
pub mod operation;
pub mod profiling;
pub mod record;
pub mod remote;
pub mod runtime;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use event::{EventPoll, EventSubsystem, EventWaiter, LocalEventTable};
pub use operation::{
    AsyncWorkItem, NamedOperation, Operation, OperationBuilder, OperationKind, RemoteWriteFence,
    WaitIntervalId, WorkItemHandle,
};
pub use record::OperationState;
pub use remote::{CancelOperationMessage, OperationMessage, OperationTransport};
pub use runtime::{CancelOutcome, OperationTable, OperationTableConfig, OperationTableMetrics};
pub use types::{faults, CancelReason, Event, EventId, NodeId, Time};
