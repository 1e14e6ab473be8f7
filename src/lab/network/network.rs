//! In-memory message network.

use crate::error::{Error, Result};
use crate::remote::{self, OperationMessage, OperationTransport};
use crate::runtime::OperationTable;
use crate::types::NodeId;
use crate::util::DetHashMap;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// An encoded message in flight.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sending node.
    pub src: NodeId,
    /// Receiving node.
    pub dst: NodeId,
    /// Encoded message frame.
    pub frame: Vec<u8>,
}

/// Network metrics for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkMetrics {
    /// Frames accepted for sending.
    pub packets_sent: u64,
    /// Frames handed to a table.
    pub packets_delivered: u64,
    /// Frames discarded because the receiver was gone or crashed.
    pub packets_dropped: u64,
    /// Frames that failed to decode or dispatch.
    pub decode_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    decode_errors: AtomicU64,
}

/// Shared FIFO connecting the operation tables of several in-process nodes.
///
/// Sends only enqueue; nothing is delivered until [`deliver_pending`]
/// runs, which lets tests interleave remote traffic with local actions.
///
/// [`deliver_pending`]: MemoryNetwork::deliver_pending
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    queue: SegQueue<Envelope>,
    tables: Mutex<DetHashMap<NodeId, Weak<OperationTable>>>,
    crashed: Mutex<BTreeSet<NodeId>>,
    counters: Counters,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a transport that sends from `node`.
    #[must_use]
    pub fn endpoint(self: &Arc<Self>, node: NodeId) -> Arc<MemoryEndpoint> {
        Arc::new(MemoryEndpoint {
            node,
            network: Arc::clone(self),
        })
    }

    /// Routes frames addressed to `node` into `table`.
    pub fn attach(&self, node: NodeId, table: &Arc<OperationTable>) {
        self.tables.lock().insert(node, Arc::downgrade(table));
    }

    /// Marks `node` as crashed: sends to it fail and queued frames are dropped.
    pub fn crash(&self, node: NodeId) {
        self.crashed.lock().insert(node);
    }

    /// Clears the crash flag for `node`.
    pub fn restart(&self, node: NodeId) {
        self.crashed.lock().remove(&node);
    }

    fn is_crashed(&self, node: NodeId) -> bool {
        self.crashed.lock().contains(&node)
    }

    /// Returns the number of queued frames.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> NetworkMetrics {
        NetworkMetrics {
            packets_sent: self.counters.sent.load(Ordering::Relaxed),
            packets_delivered: self.counters.delivered.load(Ordering::Relaxed),
            packets_dropped: self.counters.dropped.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self, envelope: Envelope) -> Result<()> {
        if self.is_crashed(envelope.dst) {
            return Err(Error::node_unavailable(envelope.dst));
        }
        if !self.tables.lock().contains_key(&envelope.dst) {
            return Err(Error::routing_failed(envelope.dst));
        }
        trace!(src = %envelope.src, dst = %envelope.dst, len = envelope.frame.len(), "frame queued");
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        self.queue.push(envelope);
        Ok(())
    }

    /// Delivers queued frames until the queue is empty, including frames
    /// sent while delivering. Returns the number delivered.
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(envelope) = self.queue.pop() {
            if self.deliver(envelope) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, envelope: Envelope) -> bool {
        let table = if self.is_crashed(envelope.dst) {
            None
        } else {
            self.tables
                .lock()
                .get(&envelope.dst)
                .and_then(Weak::upgrade)
        };
        let Some(table) = table else {
            warn!(src = %envelope.src, dst = %envelope.dst, "no live table for frame; dropped");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let result = remote::decode(&envelope.frame)
            .map_err(Error::from)
            .and_then(|(message, payload)| {
                remote::dispatch(&table, envelope.src, &message, &payload)
            });
        match result {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(src = %envelope.src, dst = %envelope.dst, error = %err, "frame rejected");
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Queues a raw frame, bypassing encoding. Used to exercise decode failures.
    pub fn inject_raw(&self, src: NodeId, dst: NodeId, frame: Vec<u8>) -> Result<()> {
        self.enqueue(Envelope { src, dst, frame })
    }
}

/// A node's sending side of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    node: NodeId,
    network: Arc<MemoryNetwork>,
}

impl MemoryEndpoint {
    /// Returns the network this endpoint belongs to.
    #[must_use]
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }
}

impl OperationTransport for MemoryEndpoint {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn send(&self, target: NodeId, message: OperationMessage, payload: Vec<u8>) -> Result<()> {
        let frame = remote::encode(&message, &payload)?;
        self.network.enqueue(Envelope {
            src: self.node,
            dst: target,
            frame,
        })
    }
}
