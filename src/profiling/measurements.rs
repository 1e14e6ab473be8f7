//! Measurement records collected for each operation.

use crate::types::{Event, Time};
use serde::{Deserialize, Serialize};

/// Which measurement a profiling request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Final status and error information.
    OperationStatus,
    /// Host-side timeline.
    OperationTimeline,
    /// Device-side timeline reported by work items.
    OperationTimelineGpu,
    /// Intervals spent waiting on events.
    OperationEventWaits,
}

/// Result code carried by [`OperationStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StatusResult {
    /// Created, preconditions not yet satisfied.
    #[default]
    Waiting,
    /// Ready to run.
    Ready,
    /// Executing.
    Running,
    /// Cancellation requested while running.
    InterruptRequested,
    /// Torn down abnormally.
    TerminatedEarly,
    /// Cancelled before it ran.
    Cancelled,
    /// Finished without errors.
    CompletedSuccessfully,
    /// Finished with errors.
    CompletedWithErrors,
}

impl StatusResult {
    /// Returns true for results that end the operation.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::TerminatedEarly
                | Self::Cancelled
                | Self::CompletedSuccessfully
                | Self::CompletedWithErrors
        )
    }
}

/// Final status of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Result code.
    pub result: StatusResult,
    /// Error code, zero on success.
    pub error_code: i32,
    /// Opaque error details (cancellation reason, poisoned event, ...).
    pub error_details: Vec<u8>,
}

/// Host-side timestamps of an operation. Unset entries are [`Time::ZERO`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationTimeline {
    /// Operation constructed.
    pub create_time: Time,
    /// `mark_ready` succeeded.
    pub ready_time: Time,
    /// `mark_started` succeeded.
    pub start_time: Time,
    /// Owner called `mark_finished`.
    pub end_time: Time,
    /// Completion event triggered.
    pub complete_time: Time,
}

/// Device-side execution window, widened by every work item that reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationTimelineGpu {
    /// Earliest device start.
    pub start_time: Time,
    /// Latest device end.
    pub end_time: Time,
}

impl OperationTimelineGpu {
    /// Records a device start, keeping the earliest.
    pub fn record_start(&mut self, at: Time) {
        if self.start_time.is_unset() || at < self.start_time {
            self.start_time = at;
        }
    }

    /// Records a device end, keeping the latest.
    pub fn record_end(&mut self, at: Time) {
        if at > self.end_time {
            self.end_time = at;
        }
    }
}

/// One interval an operation spent blocked on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitInterval {
    /// The event waited on.
    pub wait_event: Event,
    /// Wait began.
    pub wait_start: Time,
    /// Event fired.
    pub wait_ready: Time,
    /// Waiter resumed.
    pub wait_end: Time,
}

/// Event-wait intervals of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationEventWaits {
    /// Recorded intervals in creation order.
    pub intervals: Vec<WaitInterval>,
}

/// A single measurement, tagged with its kind on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Measurement {
    /// See [`OperationStatus`].
    OperationStatus(OperationStatus),
    /// See [`OperationTimeline`].
    OperationTimeline(OperationTimeline),
    /// See [`OperationTimelineGpu`].
    OperationTimelineGpu(OperationTimelineGpu),
    /// See [`OperationEventWaits`].
    OperationEventWaits(OperationEventWaits),
}

impl Measurement {
    /// Returns the kind of this measurement.
    #[must_use]
    pub const fn kind(&self) -> MeasurementKind {
        match self {
            Self::OperationStatus(_) => MeasurementKind::OperationStatus,
            Self::OperationTimeline(_) => MeasurementKind::OperationTimeline,
            Self::OperationTimelineGpu(_) => MeasurementKind::OperationTimelineGpu,
            Self::OperationEventWaits(_) => MeasurementKind::OperationEventWaits,
        }
    }
}
