//! Identifier types for operations, events and nodes.
//!
//! Events are generation-counted: an [`EventId`] names a reusable event slot
//! and an [`Event`] pairs it with the generation a particular trigger refers
//! to. Operations are bound to one `Event` for their whole lifetime.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static WORK_ITEM_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier for a node in the cluster.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node identifier from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw node number.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identity of a reusable event slot.
///
/// The creator node is part of the identity so that requests for events with
/// no local bookkeeping can be routed to the node that owns them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    creator: NodeId,
    index: u64,
}

impl EventId {
    /// Creates an event identifier.
    #[must_use]
    pub const fn new(creator: NodeId, index: u64) -> Self {
        Self { creator, index }
    }

    /// Returns the node that created the event.
    #[must_use]
    pub const fn creator(self) -> NodeId {
        self.creator
    }

    /// Returns the slot index on the creator node.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.index
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({}:{})", self.creator.0, self.index)
    }
}

/// Generation counter of an event slot.
pub type Generation = u32;

/// A specific generation of an event.
///
/// This is the handle that gets triggered, waited on, and used as the key of
/// the operation table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    generation: Generation,
}

impl Event {
    /// Size of the fixed wire encoding produced by [`Event::to_bytes`].
    pub const ENCODED_LEN: usize = 16;

    /// Creates an event handle for the given slot and generation.
    #[must_use]
    pub const fn new(id: EventId, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// Returns the event slot.
    #[must_use]
    pub const fn id(self) -> EventId {
        self.id
    }

    /// Returns the generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Returns the node that created the event.
    #[must_use]
    pub const fn creator(self) -> NodeId {
        self.id.creator
    }

    /// Encodes the event as little-endian `creator | index | generation`.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.id.creator.0.to_le_bytes());
        out[4..12].copy_from_slice(&self.id.index.to_le_bytes());
        out[12..16].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    /// Decodes an event previously written by [`Event::to_bytes`].
    ///
    /// Returns `None` if `bytes` is shorter than [`Event::ENCODED_LEN`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::ENCODED_LEN)?;
        let creator = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let index = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
        let generation = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        Some(Self::new(
            EventId::new(NodeId::new(creator), index),
            generation,
        ))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event({}:{}/{})",
            self.id.creator.0, self.id.index, self.generation
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e{}:{}/{}",
            self.id.creator.0, self.id.index, self.generation
        )
    }
}

/// Identifier of an async work item within its operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItemId(u64);

impl WorkItemId {
    /// Allocates a fresh, process-unique work item id.
    #[must_use]
    pub fn next() -> Self {
        Self(WORK_ITEM_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkItemId({})", self.0)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// A timestamp in nanoseconds since the process-wide clock origin.
///
/// `Time::ZERO` doubles as "not recorded" in profiling timelines.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time(u64);

impl Time {
    /// The zero instant, also used for "never recorded".
    pub const ZERO: Self = Self(0);

    /// Returns the current time.
    ///
    /// Never returns [`Time::ZERO`], so a recorded timestamp is always
    /// distinguishable from an unset one.
    #[must_use]
    pub fn now() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        let nanos = u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Self(nanos.max(1))
    }

    /// Creates a time from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the time as nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns true if this timestamp was never recorded.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Returns the duration between two times in nanoseconds.
    ///
    /// Returns 0 if `self` is before `earlier`.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}
