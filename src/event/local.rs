//! In-process generation-counted event table.
//!
//! Each event slot remembers the latest generation that fired and the poison
//! flag of every fired generation it has seen. Waiters are parked per
//! generation and invoked outside the table lock.

use super::{EventPoll, EventSubsystem, EventWaiter};
use crate::types::{Event, EventId, Generation, NodeId};
use crate::util::DetHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

type WaiterList = SmallVec<[Arc<dyn EventWaiter>; 2]>;

#[derive(Default)]
struct EventSlot {
    /// Poison flag per fired generation.
    fired: BTreeMap<Generation, bool>,
    /// Number of trigger calls per generation, duplicates included.
    trigger_calls: BTreeMap<Generation, usize>,
    waiters: BTreeMap<Generation, WaiterList>,
}

/// Event subsystem backed by a single mutex-protected map.
pub struct LocalEventTable {
    node: NodeId,
    next_index: AtomicU64,
    slots: Mutex<DetHashMap<EventId, EventSlot>>,
}

impl LocalEventTable {
    /// Creates an event table whose new events are created on `node`.
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            next_index: AtomicU64::new(1),
            slots: Mutex::new(DetHashMap::default()),
        }
    }

    /// Returns the node this table creates events for.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Allocates a fresh event slot and returns its first generation.
    pub fn create_event(&self) -> Event {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let id = EventId::new(self.node, index);
        self.slots.lock().insert(id, EventSlot::default());
        Event::new(id, 1)
    }

    /// Returns the next generation of an existing event slot.
    ///
    /// This models event reuse: the returned handle shares the slot with
    /// `event` but is a distinct completion target.
    #[must_use]
    pub fn next_generation(&self, event: Event) -> Event {
        Event::new(event.id(), event.generation() + 1)
    }

    /// Returns how many times `trigger` was called for `event`.
    #[must_use]
    pub fn trigger_count(&self, event: Event) -> usize {
        self.slots
            .lock()
            .get(&event.id())
            .and_then(|slot| slot.trigger_calls.get(&event.generation()).copied())
            .unwrap_or(0)
    }

    /// Returns the number of waiters still parked on `event`.
    #[must_use]
    pub fn waiter_count(&self, event: Event) -> usize {
        self.slots
            .lock()
            .get(&event.id())
            .and_then(|slot| slot.waiters.get(&event.generation()).map(SmallVec::len))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for LocalEventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventTable")
            .field("node", &self.node)
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

impl EventSubsystem for LocalEventTable {
    fn trigger(&self, event: Event, poisoned: bool) {
        let waiters = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(event.id()).or_default();
            *slot.trigger_calls.entry(event.generation()).or_insert(0) += 1;
            if slot.fired.contains_key(&event.generation()) {
                warn!(%event, "event triggered more than once");
                return;
            }
            slot.fired.insert(event.generation(), poisoned);
            slot.waiters.remove(&event.generation()).unwrap_or_default()
        };

        trace!(%event, poisoned, waiters = waiters.len(), "event triggered");
        for waiter in waiters {
            waiter.event_triggered(poisoned);
        }
    }

    fn register_waiter(&self, event: Event, waiter: Arc<dyn EventWaiter>) {
        let fired = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(event.id()).or_default();
            match slot.fired.get(&event.generation()) {
                Some(&poisoned) => Some(poisoned),
                None => {
                    slot.waiters
                        .entry(event.generation())
                        .or_default()
                        .push(Arc::clone(&waiter));
                    None
                }
            }
        };

        if let Some(poisoned) = fired {
            waiter.event_triggered(poisoned);
        }
    }

    fn poll(&self, event: Event) -> EventPoll {
        self.slots
            .lock()
            .get(&event.id())
            .and_then(|slot| slot.fired.get(&event.generation()).copied())
            .map_or(EventPoll::Pending, |poisoned| EventPoll::Triggered { poisoned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::AtomicUsize;

    struct CountingWaiter {
        event: Event,
        calls: AtomicUsize,
        poisoned: AtomicUsize,
    }

    impl CountingWaiter {
        fn new(event: Event) -> Arc<Self> {
            Arc::new(Self {
                event,
                calls: AtomicUsize::new(0),
                poisoned: AtomicUsize::new(0),
            })
        }
    }

    impl EventWaiter for CountingWaiter {
        fn event_triggered(&self, poisoned: bool) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if poisoned {
                self.poisoned.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn finish_event(&self) -> Event {
            self.event
        }

        fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "counting waiter on {}", self.event)
        }
    }

    #[test]
    fn waiter_runs_on_trigger() {
        let table = LocalEventTable::new(NodeId::new(0));
        let event = table.create_event();
        let waiter = CountingWaiter::new(event);
        table.register_waiter(event, waiter.clone());

        assert_eq!(table.poll(event), EventPoll::Pending);
        assert_eq!(table.waiter_count(event), 1);

        table.trigger(event, true);
        assert_eq!(waiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(waiter.poisoned.load(Ordering::SeqCst), 1);
        assert_eq!(table.poll(event), EventPoll::Triggered { poisoned: true });
        assert_eq!(table.waiter_count(event), 0);
    }

    #[test]
    fn late_waiter_runs_immediately() {
        let table = LocalEventTable::new(NodeId::new(0));
        let event = table.create_event();
        table.trigger(event, false);

        let waiter = CountingWaiter::new(event);
        table.register_waiter(event, waiter.clone());
        assert_eq!(waiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(waiter.poisoned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_trigger_is_counted_but_ignored() {
        let table = LocalEventTable::new(NodeId::new(0));
        let event = table.create_event();
        let waiter = CountingWaiter::new(event);
        table.register_waiter(event, waiter.clone());

        table.trigger(event, false);
        table.trigger(event, true);
        assert_eq!(table.trigger_count(event), 2);
        assert_eq!(waiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.poll(event), EventPoll::Triggered { poisoned: false });
    }

    #[test]
    fn generations_are_independent() {
        let table = LocalEventTable::new(NodeId::new(0));
        let first = table.create_event();
        let second = table.next_generation(first);
        let waiter = CountingWaiter::new(second);
        table.register_waiter(second, waiter.clone());

        table.trigger(first, false);
        assert_eq!(waiter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(table.poll(second), EventPoll::Pending);

        table.trigger(second, false);
        assert_eq!(waiter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn created_events_belong_to_node() {
        let table = LocalEventTable::new(NodeId::new(5));
        let a = table.create_event();
        let b = table.create_event();
        assert_eq!(a.creator(), NodeId::new(5));
        assert_ne!(a.id(), b.id());
    }
}
