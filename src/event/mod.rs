//! Interface to the event subsystem.
//!
//! Completion events are owned by an external subsystem. This crate only
//! needs to trigger them (once per operation) and to register waiters that
//! run when a given generation fires. [`LocalEventTable`] is an in-process
//! implementation used by single-node deployments and tests.

use crate::types::Event;
use core::fmt;
use std::sync::Arc;

pub mod local;

pub use local::LocalEventTable;

/// Callback registered on an event generation.
///
/// `event_triggered` is invoked exactly once, from whichever thread triggers
/// the event, or immediately from `register_waiter` if the generation has
/// already fired. Implementations must not assume any lock is held.
pub trait EventWaiter: Send + Sync {
    /// Called when the awaited generation fires.
    fn event_triggered(&self, poisoned: bool);

    /// Returns the event this waiter is registered on.
    fn finish_event(&self) -> Event;

    /// Writes a short description for diagnostics.
    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl fmt::Debug for dyn EventWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f)
    }
}

/// What the event subsystem knows about a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPoll {
    /// Not triggered yet.
    Pending,
    /// Triggered, with its poison flag.
    Triggered {
        /// Whether the trigger propagated failure.
        poisoned: bool,
    },
}

/// The operations this crate consumes from the event subsystem.
pub trait EventSubsystem: Send + Sync {
    /// Triggers `event`, waking every waiter registered on that generation.
    fn trigger(&self, event: Event, poisoned: bool);

    /// Registers `waiter` on `event`.
    ///
    /// If the generation has already triggered, the waiter runs before this
    /// call returns.
    fn register_waiter(&self, event: Event, waiter: Arc<dyn EventWaiter>);

    /// Returns the trigger state of `event`.
    fn poll(&self, event: Event) -> EventPoll;
}
