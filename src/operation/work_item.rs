//! Asynchronous sub-work attached to an operation.
//!
//! An operation may start work that outlives its own execution (a device
//! stream, a batch of remote writes). Each such piece is registered as an
//! [`AsyncWorkItem`] and reported through the returned [`WorkItemHandle`].
//! The operation does not complete until every handle has reported.

use super::Operation;
use crate::types::{faults, NodeId, WorkItemId};
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// One outstanding piece of asynchronous work owned by an operation.
pub trait AsyncWorkItem: Send + Sync + 'static {
    /// Asks the work to stop early. Implementations may ignore the request;
    /// the item must still report completion through its handle.
    fn request_cancellation(&self);

    /// Writes a short description for diagnostics.
    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Operation-side bookkeeping for a registered item.
pub(crate) struct WorkItemSlot {
    pub(crate) id: WorkItemId,
    pub(crate) item: Box<dyn AsyncWorkItem>,
    pub(crate) finished: AtomicBool,
    pub(crate) gpu_started: AtomicBool,
}

impl WorkItemSlot {
    pub(crate) fn new(item: Box<dyn AsyncWorkItem>) -> Self {
        Self {
            id: WorkItemId::next(),
            item,
            finished: AtomicBool::new(false),
            gpu_started: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl fmt::Display for WorkItemSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.id)?;
        self.item.print(f)?;
        if self.is_finished() {
            f.write_str(" (finished)")?;
        }
        Ok(())
    }
}

/// Completion handle for a registered [`AsyncWorkItem`].
///
/// The handle holds a counted reference on its operation and may be moved to
/// any thread. [`WorkItemHandle::mark_finished`] consumes it, so each item
/// reports exactly once. Dropping a handle without reporting counts the item
/// as failed.
pub struct WorkItemHandle {
    op: Arc<Operation>,
    slot: Arc<WorkItemSlot>,
    reported: bool,
}

impl WorkItemHandle {
    pub(crate) fn new(op: Arc<Operation>, slot: Arc<WorkItemSlot>) -> Self {
        Self {
            op,
            slot,
            reported: false,
        }
    }

    /// Returns the item's identifier.
    #[must_use]
    pub fn id(&self) -> WorkItemId {
        self.slot.id
    }

    /// Returns the owning operation.
    #[must_use]
    pub fn operation(&self) -> &Arc<Operation> {
        &self.op
    }

    /// Records that the item's device-side work has begun.
    pub fn mark_gpu_task_start(&self) {
        self.slot.gpu_started.store(true, Ordering::Release);
        self.op.update_gpu_start();
    }

    /// Reports the item's completion.
    pub fn mark_finished(mut self, successful: bool) {
        self.report(successful);
    }

    fn report(&mut self, successful: bool) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.slot.finished.store(true, Ordering::Release);
        trace!(
            item = %self.slot.id,
            finish_event = %self.op.finish_event(),
            successful,
            "work item finished"
        );
        self.op.work_item_finished(&self.slot, successful);
        self.op.remove_reference();
    }
}

impl Drop for WorkItemHandle {
    fn drop(&mut self) {
        if !self.reported {
            warn!(
                item = %self.slot.id,
                finish_event = %self.op.finish_event(),
                code = faults::WORK_ITEM_LEAKED,
                "work item handle dropped without reporting; counting as failed"
            );
            self.report(false);
        }
    }
}

impl fmt::Debug for WorkItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItemHandle")
            .field("id", &self.slot.id)
            .field("finish_event", &self.op.finish_event())
            .field("reported", &self.reported)
            .finish()
    }
}

/// Outstanding one-sided writes to another node's memory.
///
/// The owning operation may not complete until the target acknowledges the
/// writes. Writes already in flight cannot be recalled, so cancellation is
/// ignored and the fence completes when the acknowledgment arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteWriteFence {
    target: NodeId,
    sequence_id: u32,
}

impl RemoteWriteFence {
    /// Creates a fence for the writes of `sequence_id` sent to `target`.
    #[must_use]
    pub const fn new(target: NodeId, sequence_id: u32) -> Self {
        Self {
            target,
            sequence_id,
        }
    }

    /// Returns the node the writes went to.
    #[must_use]
    pub const fn target(&self) -> NodeId {
        self.target
    }

    /// Returns the write sequence being fenced.
    #[must_use]
    pub const fn sequence_id(&self) -> u32 {
        self.sequence_id
    }
}

impl AsyncWorkItem for RemoteWriteFence {
    fn request_cancellation(&self) {
        trace!(
            target = %self.target,
            sequence_id = self.sequence_id,
            "remote write fence ignores cancellation"
        );
    }

    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteWriteFence({}, seq {})", self.target, self.sequence_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPoll, EventSubsystem, LocalEventTable};
    use crate::operation::{NamedOperation, Operation};
    use crate::test_utils::init_test_logging;

    fn running_op(events: &Arc<LocalEventTable>) -> Arc<Operation> {
        let op = Operation::builder(events.create_event(), events.clone())
            .build(NamedOperation::new("copy"));
        assert!(op.mark_ready());
        assert!(op.mark_started());
        op
    }

    #[test]
    fn dropped_handle_counts_as_failure() {
        init_test_logging();
        let events = Arc::new(LocalEventTable::new(NodeId::new(0)));
        let op = running_op(&events);
        let handle = op
            .add_async_work_item(RemoteWriteFence::new(NodeId::new(1), 9))
            .expect("add item");
        assert!(op.mark_finished(true));
        assert_eq!(events.poll(op.finish_event()), EventPoll::Pending);

        drop(handle);
        assert_eq!(op.failed_work_items(), 1);
        assert_eq!(
            events.poll(op.finish_event()),
            EventPoll::Triggered { poisoned: true }
        );
    }

    #[test]
    fn handle_holds_operation_reference() {
        init_test_logging();
        let events = Arc::new(LocalEventTable::new(NodeId::new(0)));
        let op = running_op(&events);
        assert_eq!(op.reference_count(), 1);

        let handle = op
            .add_async_work_item(RemoteWriteFence::new(NodeId::new(2), 1))
            .expect("add item");
        assert_eq!(op.reference_count(), 2);

        handle.mark_finished(true);
        assert_eq!(op.reference_count(), 1);
    }

    #[test]
    fn fence_describes_itself() {
        let fence = RemoteWriteFence::new(NodeId::new(4), 17);
        struct Show(RemoteWriteFence);
        impl fmt::Display for Show {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.print(f)
            }
        }
        assert_eq!(Show(fence).to_string(), "RemoteWriteFence(n4, seq 17)");
        assert_eq!(fence.target(), NodeId::new(4));
        assert_eq!(fence.sequence_id(), 17);
    }
}
