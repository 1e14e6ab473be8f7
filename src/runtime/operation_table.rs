//! Sharded table of in-flight operations, keyed by finish event.
//!
//! The table answers one question for the rest of the node: given a finish
//! event, where is the operation that will trigger it? Entries are either
//! local (an [`Operation`] this node runs) or remote (the node that runs it).
//! Cancellation and priority changes are routed through it.
//!
//! Every entry is removed by a waiter registered on its finish event, so the
//! table never outlives the work it tracks. For local entries the table holds
//! a counted reference that the waiter releases.
//!
//! # Locking
//!
//! Each shard is a separate mutex. A shard lock is held only while reading
//! or mutating that shard's map; operation hooks, event registration and
//! transport sends all run after it is released.

use crate::error::{Error, Result};
use crate::event::{EventSubsystem, EventWaiter};
use crate::operation::Operation;
use crate::remote::{
    CancelOperationMessage, OperationMessage, OperationTransport, SetPriorityMessage,
};
use crate::runtime::config::OperationTableConfig;
use crate::types::{faults, Event, NodeId};
use crate::util::{shard_for, DetHashMap};
use core::fmt;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Where the operation behind an entry runs.
enum Target {
    Local(Arc<Operation>),
    Remote(NodeId),
    /// Cancellation arrived before the operation was registered.
    Placeholder,
}

struct TableEntry {
    target: Target,
    /// Reason of a cancellation that could not be delivered yet.
    pending_cancellation: Option<Vec<u8>>,
}

#[derive(Default)]
struct Shard {
    entries: DetHashMap<Event, TableEntry>,
}

/// Result of routing a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The local operation received the request.
    Delivered {
        /// What the operation's `attempt_cancellation` returned.
        accepted: bool,
    },
    /// The request was sent to another node.
    Forwarded(NodeId),
    /// The operation is not known yet; the request is parked until it registers.
    Deferred,
}

/// Point-in-time counters for an [`OperationTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTableMetrics {
    /// Local operations registered.
    pub local_registrations: u64,
    /// Remote operations registered.
    pub remote_registrations: u64,
    /// Cancellations handed to a local operation.
    pub cancellations_delivered: u64,
    /// Cancellations sent to another node.
    pub cancellations_forwarded: u64,
    /// Cancellations parked for an unknown event.
    pub cancellations_deferred: u64,
    /// Entries removed after their finish event fired.
    pub cleanups: u64,
}

#[derive(Debug, Default)]
struct Counters {
    local_registrations: AtomicU64,
    remote_registrations: AtomicU64,
    cancellations_delivered: AtomicU64,
    cancellations_forwarded: AtomicU64,
    cancellations_deferred: AtomicU64,
    cleanups: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OperationTableMetrics {
        OperationTableMetrics {
            local_registrations: self.local_registrations.load(Ordering::Relaxed),
            remote_registrations: self.remote_registrations.load(Ordering::Relaxed),
            cancellations_delivered: self.cancellations_delivered.load(Ordering::Relaxed),
            cancellations_forwarded: self.cancellations_forwarded.load(Ordering::Relaxed),
            cancellations_deferred: self.cancellations_deferred.load(Ordering::Relaxed),
            cleanups: self.cleanups.load(Ordering::Relaxed),
        }
    }
}

enum Registration {
    /// `register` is false when a placeholder already has a cleaner.
    Added {
        register: bool,
        pending: Option<Vec<u8>>,
    },
    Duplicate,
}

/// What to do once the shard lock is released.
enum CancelAction {
    Local(Arc<Operation>),
    Send(NodeId),
    Park { register: bool },
}

/// Removes an entry when its finish event fires.
struct TableCleaner {
    table: Weak<OperationTable>,
    event: Event,
}

impl EventWaiter for TableCleaner {
    fn event_triggered(&self, poisoned: bool) {
        if let Some(table) = self.table.upgrade() {
            table.remove_entry(self.event, poisoned);
        }
    }

    fn finish_event(&self) -> Event {
        self.event
    }

    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation table cleaner for {}", self.event)
    }
}

/// Sharded map from finish event to operation location.
pub struct OperationTable {
    this: Weak<Self>,
    local_node: NodeId,
    config: OperationTableConfig,
    events: Arc<dyn EventSubsystem>,
    transport: Arc<dyn OperationTransport>,
    shards: Box<[Mutex<Shard>]>,
    counters: Counters,
}

impl OperationTable {
    /// Creates an empty table for the node `transport` sends from.
    #[must_use]
    pub fn new(
        mut config: OperationTableConfig,
        events: Arc<dyn EventSubsystem>,
        transport: Arc<dyn OperationTransport>,
    ) -> Arc<Self> {
        config.normalize();
        let shards = (0..config.shard_count)
            .map(|_| Mutex::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            local_node: transport.local_node(),
            config,
            events,
            transport,
            shards,
            counters: Counters::default(),
        })
    }

    /// Returns the node this table belongs to.
    #[must_use]
    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> &OperationTableConfig {
        &self.config
    }

    /// Returns the number of tracked entries, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `event` has an entry.
    #[must_use]
    pub fn contains(&self, event: Event) -> bool {
        self.shard(event).lock().entries.contains_key(&event)
    }

    /// Returns the counters accumulated so far.
    #[must_use]
    pub fn metrics(&self) -> OperationTableMetrics {
        self.counters.snapshot()
    }

    fn shard(&self, event: Event) -> &Mutex<Shard> {
        &self.shards[shard_for(&event, self.shards.len())]
    }

    fn register_cleaner(&self, event: Event) {
        let waiter = Arc::new(TableCleaner {
            table: self.this.clone(),
            event,
        });
        self.events.register_waiter(event, waiter);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Tracks a locally executed operation until its finish event fires.
    ///
    /// The table takes its own counted reference. A cancellation that
    /// arrived before registration is applied now.
    pub fn add_local_operation(&self, op: &Arc<Operation>) -> Result<()> {
        let event = op.finish_event();
        op.add_reference();
        let registration = {
            let mut shard = self.shard(event).lock();
            Self::fill_entry(&mut shard, event, Target::Local(Arc::clone(op)))
        };
        let Registration::Added { register, pending } = registration else {
            op.remove_reference();
            warn!(%event, "operation registered twice");
            return Err(Error::invalid_transition(format!("{event} already tracked")));
        };
        Counters::bump(&self.counters.local_registrations);
        trace!(%event, "local operation registered");

        if register {
            self.register_cleaner(event);
        }
        if let Some(reason) = pending {
            debug!(%event, "applying deferred cancellation");
            Counters::bump(&self.counters.cancellations_delivered);
            op.attempt_cancellation(faults::CANCELLED, &reason);
        }
        Ok(())
    }

    /// Records that the operation completing `event` runs on `node`.
    pub fn add_remote_operation(&self, event: Event, node: NodeId) -> Result<()> {
        let registration = {
            let mut shard = self.shard(event).lock();
            Self::fill_entry(&mut shard, event, Target::Remote(node))
        };
        let Registration::Added { register, pending } = registration else {
            warn!(%event, %node, "operation registered twice");
            return Err(Error::invalid_transition(format!("{event} already tracked")));
        };
        Counters::bump(&self.counters.remote_registrations);
        trace!(%event, %node, "remote operation registered");

        if register {
            self.register_cleaner(event);
        }
        if let Some(reason) = pending {
            debug!(%event, %node, "forwarding deferred cancellation");
            self.send_cancel(node, event, reason)?;
        }
        Ok(())
    }

    /// Inserts `target`, or fills a placeholder left by an early cancellation.
    fn fill_entry(shard: &mut Shard, event: Event, target: Target) -> Registration {
        match shard.entries.entry(event) {
            Entry::Vacant(slot) => {
                slot.insert(TableEntry {
                    target,
                    pending_cancellation: None,
                });
                Registration::Added {
                    register: true,
                    pending: None,
                }
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if !matches!(entry.target, Target::Placeholder) {
                    return Registration::Duplicate;
                }
                entry.target = target;
                Registration::Added {
                    register: false,
                    pending: entry.pending_cancellation.take(),
                }
            }
        }
    }

    fn remove_entry(&self, event: Event, poisoned: bool) {
        let removed = self.shard(event).lock().entries.remove(&event);
        let Some(entry) = removed else {
            return;
        };
        Counters::bump(&self.counters.cleanups);
        trace!(%event, poisoned, "operation table entry removed");
        if let Target::Local(op) = entry.target {
            op.remove_reference();
        }
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Requests cancellation of the operation completing `event`.
    ///
    /// A local operation receives the request directly. A remote one gets a
    /// [`CancelOperationMessage`]. For an unknown event created on another
    /// node the request is forwarded to that node when
    /// `forward_unknown_remote` is set; otherwise it is parked until the
    /// operation registers.
    pub fn request_cancellation(&self, event: Event, reason: &[u8]) -> Result<CancelOutcome> {
        self.route_cancellation(event, reason, true)
    }

    /// Like [`request_cancellation`](Self::request_cancellation), but never
    /// forwards an unknown event again.
    pub(crate) fn request_cancellation_from_remote(
        &self,
        event: Event,
        reason: &[u8],
    ) -> Result<CancelOutcome> {
        self.route_cancellation(event, reason, false)
    }

    fn route_cancellation(
        &self,
        event: Event,
        reason: &[u8],
        may_forward: bool,
    ) -> Result<CancelOutcome> {
        let action = {
            let mut shard = self.shard(event).lock();
            match shard.entries.get_mut(&event) {
                Some(entry) => match &entry.target {
                    Target::Local(op) => {
                        // Keeps the operation alive even if its cleaner runs concurrently.
                        op.add_reference();
                        CancelAction::Local(Arc::clone(op))
                    }
                    Target::Remote(node) => CancelAction::Send(*node),
                    Target::Placeholder => {
                        if entry.pending_cancellation.is_none() {
                            entry.pending_cancellation = Some(reason.to_vec());
                        }
                        CancelAction::Park { register: false }
                    }
                },
                None => {
                    let creator = event.creator();
                    if may_forward && creator != self.local_node && self.config.forward_unknown_remote
                    {
                        CancelAction::Send(creator)
                    } else {
                        shard.entries.insert(
                            event,
                            TableEntry {
                                target: Target::Placeholder,
                                pending_cancellation: Some(reason.to_vec()),
                            },
                        );
                        CancelAction::Park { register: true }
                    }
                }
            }
        };

        match action {
            CancelAction::Local(op) => {
                let accepted = op.attempt_cancellation(faults::CANCELLED, reason);
                op.remove_reference();
                Counters::bump(&self.counters.cancellations_delivered);
                debug!(%event, accepted, "cancellation delivered");
                Ok(CancelOutcome::Delivered { accepted })
            }
            CancelAction::Send(node) => {
                self.send_cancel(node, event, reason.to_vec())?;
                Ok(CancelOutcome::Forwarded(node))
            }
            CancelAction::Park { register } => {
                Counters::bump(&self.counters.cancellations_deferred);
                debug!(%event, "cancellation deferred until operation registers");
                if register {
                    self.register_cleaner(event);
                }
                Ok(CancelOutcome::Deferred)
            }
        }
    }

    fn send_cancel(&self, node: NodeId, event: Event, reason: Vec<u8>) -> Result<()> {
        let message = OperationMessage::Cancel(CancelOperationMessage {
            finish_event: event,
        });
        if let Err(err) = self.transport.send(node, message, reason) {
            warn!(%event, %node, error = %err, "failed to forward cancellation");
            return Err(err);
        }
        Counters::bump(&self.counters.cancellations_forwarded);
        debug!(%event, %node, "cancellation forwarded");
        Ok(())
    }

    // =========================================================================
    // Priority
    // =========================================================================

    /// Changes the priority of the operation completing `event`.
    ///
    /// Returns false if the event is unknown; priority changes are not
    /// deferred.
    pub fn set_priority(&self, event: Event, priority: i32) -> Result<bool> {
        let target = {
            let shard = self.shard(event).lock();
            match shard.entries.get(&event).map(|e| &e.target) {
                Some(Target::Local(op)) => {
                    op.add_reference();
                    Some(Ok(Arc::clone(op)))
                }
                Some(Target::Remote(node)) => Some(Err(*node)),
                Some(Target::Placeholder) | None => None,
            }
        };
        match target {
            Some(Ok(op)) => {
                op.set_priority(priority);
                op.remove_reference();
                Ok(true)
            }
            Some(Err(node)) => {
                let message = OperationMessage::SetPriority(SetPriorityMessage {
                    finish_event: event,
                    priority,
                });
                self.transport.send(node, message, Vec::new())?;
                trace!(%event, %node, priority, "priority change forwarded");
                Ok(true)
            }
            None => {
                trace!(%event, priority, "priority change for unknown operation dropped");
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Writes one line per tracked entry, shard by shard.
    pub fn print_operations(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "operation table on {}:", self.local_node)?;
        for (index, shard) in self.shards.iter().enumerate() {
            let snapshot: Vec<(Event, EntrySnapshot)> = shard
                .lock()
                .entries
                .iter()
                .map(|(event, entry)| (*event, EntrySnapshot::of(entry)))
                .collect();
            if snapshot.is_empty() {
                continue;
            }
            writeln!(out, "  shard {index}:")?;
            for (event, entry) in snapshot {
                match entry {
                    EntrySnapshot::Local(op) => writeln!(out, "    local {op}")?,
                    EntrySnapshot::Remote(node) => writeln!(out, "    remote {event} on {node}")?,
                    EntrySnapshot::Placeholder { pending } => {
                        writeln!(out, "    placeholder {event} pending_cancel={pending}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

enum EntrySnapshot {
    Local(Arc<Operation>),
    Remote(NodeId),
    Placeholder { pending: bool },
}

impl EntrySnapshot {
    fn of(entry: &TableEntry) -> Self {
        match &entry.target {
            Target::Local(op) => Self::Local(Arc::clone(op)),
            Target::Remote(node) => Self::Remote(*node),
            Target::Placeholder => Self::Placeholder {
                pending: entry.pending_cancellation.is_some(),
            },
        }
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTable")
            .field("local_node", &self.local_node)
            .field("shards", &self.shards.len())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
