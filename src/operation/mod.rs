//! Tracked operations.
//!
//! An [`Operation`] is a unit of asynchronous work (a copy, a task launch, a
//! barrier) identified by the event it triggers when it completes. Several
//! threads touch an operation concurrently: the owner drives it through
//! [`Operation::mark_ready`], [`Operation::mark_started`] and
//! [`Operation::mark_finished`], while cancellation and priority changes may
//! arrive from any thread through the operation table.
//!
//! # Arbitration
//!
//! The lifecycle state lives in a single atomic cell. A cancellation that
//! reaches an operation before it starts wins by moving the cell straight to
//! `FinishedFailure`; the owner's next transition then fails and it backs off.
//! Once running, cancellation only sets a flag and asks the kind-specific
//! hook (and any outstanding work items) to stop early.
//!
//! Early cancellation, a poisoned precondition and termination decide the
//! outcome on the spot but do not trigger the event themselves. They record
//! the status and give up the owner's join token; the trigger still waits
//! for every outstanding work item.
//!
//! # Join
//!
//! Completion waits for the owner's `mark_finished` and for every registered
//! [`AsyncWorkItem`]. The join counter starts at one (the owner's token) and
//! is incremented per work item; whoever brings it to zero completes the
//! operation. A separate completion latch guarantees the finish event is
//! triggered exactly once, whichever path gets there first.
//!
//! # Lifetime
//!
//! Memory is held by `Arc`, but the logical lifetime is an explicit counted
//! reference (starting at one, owned by the creator). Every subsystem that
//! needs the operation to outlive its own call holds one. The 1 → 0 release
//! runs the single teardown path, which drops outstanding work item slots
//! and profiling state.

use crate::error::{Error, Result};
use crate::event::EventSubsystem;
use crate::profiling::{
    Measurement, MeasurementCollection, MeasurementKind, NullProfilingSink, OperationEventWaits,
    OperationStatus, OperationTimeline, OperationTimelineGpu, ProfilingRequestSet, ProfilingSink,
    StatusResult, WaitInterval,
};
use crate::record::{AtomicOperationState, OperationState};
use crate::types::{faults, CancelReason, Event, Time};
use core::fmt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub mod work_item;

pub use work_item::{AsyncWorkItem, RemoteWriteFence, WorkItemHandle};

use work_item::WorkItemSlot;

/// Kind-specific behavior of an operation.
///
/// The base [`Operation`] owns the state machine; implementations of this
/// trait supply the parts that depend on what the operation actually does.
pub trait OperationKind: Send + Sync + 'static {
    /// Writes a short description of the operation for diagnostics.
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    /// Attempts to interrupt a running operation.
    ///
    /// Returns true if the interruption was accepted. The owner still
    /// reports completion through [`Operation::mark_finished`].
    fn cancel_running(&self, op: &Operation, reason: &CancelReason) -> bool {
        let _ = (op, reason);
        false
    }

    /// Applies a new scheduling priority. Kinds without a priority ignore it.
    fn set_priority(&self, op: &Operation, priority: i32) {
        let _ = (op, priority);
    }

    /// Runs once when the last reference is released.
    fn on_destroy(&self, op: &Operation) {
        let _ = op;
    }
}

/// An [`OperationKind`] with no kind-specific behavior beyond a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedOperation {
    name: &'static str,
}

impl NamedOperation {
    /// Creates a kind described as `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl OperationKind for NamedOperation {
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Index of a wait interval recorded by [`Operation::create_wait_interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitIntervalId(usize);

#[derive(Debug, Default)]
struct ProfilingState {
    requests: ProfilingRequestSet,
    measurements: MeasurementCollection,
    status: OperationStatus,
    timeline: OperationTimeline,
    timeline_gpu: OperationTimelineGpu,
    waits: OperationEventWaits,
}

impl ProfilingState {
    fn set_result(&mut self, result: StatusResult) {
        if !self.status.result.is_final() {
            self.status.result = result;
        }
    }

    fn reconstruct(&mut self) {
        self.measurements.clear();
        if self.requests.wants(MeasurementKind::OperationStatus) {
            self.measurements
                .insert(Measurement::OperationStatus(self.status.clone()));
        }
        if self.requests.wants(MeasurementKind::OperationTimeline) {
            self.measurements
                .insert(Measurement::OperationTimeline(self.timeline));
        }
        if self.requests.wants(MeasurementKind::OperationTimelineGpu) {
            self.measurements
                .insert(Measurement::OperationTimelineGpu(self.timeline_gpu));
        }
        if self.requests.wants(MeasurementKind::OperationEventWaits) {
            self.measurements
                .insert(Measurement::OperationEventWaits(self.waits.clone()));
        }
    }
}

/// Builder for [`Operation`].
pub struct OperationBuilder {
    finish_event: Event,
    events: Arc<dyn EventSubsystem>,
    requests: ProfilingRequestSet,
    sink: Arc<dyn ProfilingSink>,
}

impl OperationBuilder {
    /// Attaches profiling requests and the sink their responses go to.
    #[must_use]
    pub fn profiling(mut self, requests: ProfilingRequestSet, sink: Arc<dyn ProfilingSink>) -> Self {
        self.requests = requests;
        self.sink = sink;
        self
    }

    /// Creates the operation in `Pending` with one reference held by the caller.
    #[must_use]
    pub fn build(self, kind: impl OperationKind) -> Arc<Operation> {
        let wants_event_waits = self.requests.wants(MeasurementKind::OperationEventWaits);
        let profiling = ProfilingState {
            requests: self.requests,
            timeline: OperationTimeline {
                create_time: Time::now(),
                ..OperationTimeline::default()
            },
            ..ProfilingState::default()
        };
        let op = Arc::new(Operation {
            finish_event: self.finish_event,
            events: self.events,
            sink: self.sink,
            kind: Box::new(kind),
            state: AtomicOperationState::new(OperationState::Pending),
            refcount: AtomicUsize::new(1),
            destroyed: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            cancel_reason: Mutex::new(None),
            join_count: AtomicUsize::new(1),
            finish_requested: AtomicBool::new(false),
            finished_ok: AtomicBool::new(false),
            failed_work_items: AtomicUsize::new(0),
            completion_started: AtomicBool::new(false),
            work_items: Mutex::new(SmallVec::new()),
            forced: Mutex::new(None),
            wants_event_waits: AtomicBool::new(wants_event_waits),
            profiling: Mutex::new(profiling),
        });
        trace!(finish_event = %op.finish_event, "operation created");
        op
    }
}

impl fmt::Debug for OperationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBuilder")
            .field("finish_event", &self.finish_event)
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

/// A tracked unit of asynchronous work.
pub struct Operation {
    finish_event: Event,
    events: Arc<dyn EventSubsystem>,
    sink: Arc<dyn ProfilingSink>,
    kind: Box<dyn OperationKind>,

    state: AtomicOperationState,
    refcount: AtomicUsize,
    destroyed: AtomicBool,

    cancel_requested: AtomicBool,
    /// Written before `cancel_requested` is set; the first reason wins.
    cancel_reason: Mutex<Option<CancelReason>>,

    /// Owner token plus one per unreported work item.
    join_count: AtomicUsize,
    finish_requested: AtomicBool,
    finished_ok: AtomicBool,
    failed_work_items: AtomicUsize,
    completion_started: AtomicBool,
    work_items: Mutex<SmallVec<[Arc<WorkItemSlot>; 4]>>,
    /// Status decided outside the join; wins over the owner's result.
    forced: Mutex<Option<OperationStatus>>,

    wants_event_waits: AtomicBool,
    profiling: Mutex<ProfilingState>,
}

impl Operation {
    /// Starts building an operation that triggers `finish_event` on `events`.
    #[must_use]
    pub fn builder(finish_event: Event, events: Arc<dyn EventSubsystem>) -> OperationBuilder {
        OperationBuilder {
            finish_event,
            events,
            requests: ProfilingRequestSet::new(),
            sink: Arc::new(NullProfilingSink),
        }
    }

    /// Returns the event triggered on completion.
    #[must_use]
    pub fn finish_event(&self) -> Event {
        self.finish_event
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.state.load()
    }

    /// Returns true once cancellation has been requested, even if it had no effect.
    #[must_use]
    pub fn cancellation_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Returns the first recorded cancellation reason.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason.lock().clone()
    }

    /// Returns true once the finish event has been (or is being) triggered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion_started.load(Ordering::Acquire)
    }

    /// Returns true once the last reference has been released.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Returns the current reference count.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Returns the number of work items that have not reported yet.
    #[must_use]
    pub fn pending_work_items(&self) -> usize {
        let owner = usize::from(!self.finish_requested.load(Ordering::Acquire));
        self.join_count.load(Ordering::Acquire).saturating_sub(owner)
    }

    /// Returns the number of work items that reported failure.
    #[must_use]
    pub fn failed_work_items(&self) -> usize {
        self.failed_work_items.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the status measurement.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.profiling.lock().status.clone()
    }

    /// Returns a snapshot of the host timeline.
    #[must_use]
    pub fn timeline(&self) -> OperationTimeline {
        self.profiling.lock().timeline
    }

    /// Returns a snapshot of the device timeline.
    #[must_use]
    pub fn timeline_gpu(&self) -> OperationTimelineGpu {
        self.profiling.lock().timeline_gpu
    }

    /// Returns a snapshot of the recorded event waits.
    #[must_use]
    pub fn event_waits(&self) -> OperationEventWaits {
        self.profiling.lock().waits.clone()
    }

    /// Returns the measurements rebuilt at the last reconstruction.
    #[must_use]
    pub fn measurements(&self) -> MeasurementCollection {
        self.profiling.lock().measurements.clone()
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Takes an additional counted reference.
    pub fn add_reference(&self) {
        let prev = self.refcount.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            warn!(finish_event = %self.finish_event, "reference taken on destroyed operation");
        }
    }

    /// Releases a counted reference.
    ///
    /// Returns true if this was the last one, in which case the operation
    /// has been torn down.
    pub fn remove_reference(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        match prev {
            0 => {
                // Undo the wrap so later diagnostics stay sensible.
                self.refcount.store(0, Ordering::Release);
                warn!(finish_event = %self.finish_event, "reference released on destroyed operation");
                false
            }
            1 => {
                self.destroy();
                true
            }
            _ => false,
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.is_complete() {
            warn!(
                finish_event = %self.finish_event,
                state = %self.state(),
                "operation destroyed before completion"
            );
        }
        let slots = std::mem::take(&mut *self.work_items.lock());
        drop(slots);
        {
            let mut profiling = self.profiling.lock();
            profiling.requests.clear();
            profiling.measurements.clear();
        }
        self.kind.on_destroy(self);
        trace!(finish_event = %self.finish_event, "operation destroyed");
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Moves `Pending → Ready` once preconditions are satisfied.
    ///
    /// Returns false if the operation must not be scheduled: cancellation was
    /// requested (the operation is then completed as cancelled) or it was not
    /// pending.
    pub fn mark_ready(&self) -> bool {
        if self.cancellation_requested() {
            self.finish_cancelled_before_start();
            return false;
        }
        match self.state.transition(OperationState::Pending, OperationState::Ready) {
            Ok(()) => {
                let mut profiling = self.profiling.lock();
                profiling.timeline.ready_time = Time::now();
                profiling.set_result(StatusResult::Ready);
                drop(profiling);
                trace!(finish_event = %self.finish_event, "operation ready");
                true
            }
            Err(observed) => {
                if !observed.is_terminal() {
                    warn!(finish_event = %self.finish_event, state = %observed, "mark_ready on non-pending operation");
                }
                false
            }
        }
    }

    /// Moves `Ready → Running` when the owner begins execution.
    ///
    /// Returns false if execution must not proceed.
    pub fn mark_started(&self) -> bool {
        if self.cancellation_requested() {
            self.finish_cancelled_before_start();
            return false;
        }
        match self.state.transition(OperationState::Ready, OperationState::Running) {
            Ok(()) => {
                let mut profiling = self.profiling.lock();
                profiling.timeline.start_time = Time::now();
                profiling.set_result(StatusResult::Running);
                drop(profiling);
                trace!(finish_event = %self.finish_event, "operation started");
                true
            }
            Err(observed) => {
                if !observed.is_terminal() {
                    warn!(finish_event = %self.finish_event, state = %observed, "mark_started on non-ready operation");
                }
                false
            }
        }
    }

    /// Reports that the owner's own execution has ended.
    ///
    /// Completion is deferred until every outstanding work item reports.
    /// Returns false (and changes nothing) if the operation is not running or
    /// the owner already reported.
    pub fn mark_finished(&self, successful: bool) -> bool {
        let state = self.state();
        if state != OperationState::Running {
            warn!(finish_event = %self.finish_event, %state, "mark_finished on non-running operation");
            return false;
        }
        if self.finish_requested.swap(true, Ordering::AcqRel) {
            warn!(finish_event = %self.finish_event, "mark_finished called twice");
            return false;
        }
        self.finished_ok.store(successful, Ordering::Release);
        self.profiling.lock().timeline.end_time = Time::now();
        trace!(
            finish_event = %self.finish_event,
            successful,
            pending = self.pending_work_items(),
            "owner finished"
        );
        self.release_join();
        true
    }

    /// Requests cancellation.
    ///
    /// The reason is recorded if it is the first one. A pre-start operation
    /// is completed immediately as cancelled. A finished operation has
    /// nothing left to cancel and reports success. A running operation asks
    /// its outstanding work items to stop and returns whatever the
    /// kind-specific hook decides.
    pub fn attempt_cancellation(&self, error_code: i32, details: &[u8]) -> bool {
        let reason = {
            let mut slot = self.cancel_reason.lock();
            slot.get_or_insert_with(|| CancelReason::new(error_code, details))
                .clone()
        };
        let first = !self.cancel_requested.swap(true, Ordering::AcqRel);
        debug!(finish_event = %self.finish_event, %reason, first, "cancellation requested");

        match self.state.transition_before_start(OperationState::FinishedFailure) {
            Ok(_) => {
                self.complete_cancelled();
                true
            }
            Err(state) if state.is_terminal() => true,
            Err(_) => {
                self.profiling
                    .lock()
                    .set_result(StatusResult::InterruptRequested);
                self.cancel_outstanding_work_items();
                self.kind.cancel_running(self, &reason)
            }
        }
    }

    /// Forwards a new priority to the kind-specific hook.
    pub fn set_priority(&self, priority: i32) {
        trace!(finish_event = %self.finish_event, priority, "priority change");
        self.kind.set_priority(self, priority);
    }

    /// Fails a pre-start operation because a precondition event was poisoned.
    ///
    /// Returns false if the operation had already started or finished.
    pub fn handle_poisoned_precondition(&self, precondition: Event) -> bool {
        match self.state.transition_before_start(OperationState::FinishedFailure) {
            Ok(_) => {
                let status = OperationStatus {
                    result: StatusResult::Cancelled,
                    error_code: faults::POISONED_PRECONDITION,
                    error_details: precondition.to_bytes().to_vec(),
                };
                debug!(finish_event = %self.finish_event, %precondition, "precondition poisoned");
                self.cancel_outstanding_work_items();
                self.force_outcome(None, status);
                true
            }
            Err(state) => {
                warn!(
                    finish_event = %self.finish_event,
                    %precondition,
                    %state,
                    "poisoned precondition reported after start"
                );
                false
            }
        }
    }

    /// Tears the operation down outside the normal state machine.
    ///
    /// Outstanding work items are asked to stop and the finish event is
    /// triggered poisoned once the last of them reports. Returns false if
    /// completion had already begun or the outcome was already decided.
    pub fn mark_terminated(&self, error_code: i32, details: &[u8]) -> bool {
        let status = OperationStatus {
            result: StatusResult::TerminatedEarly,
            error_code,
            error_details: details.to_vec(),
        };
        if !self.force_outcome(Some(OperationState::Terminated), status) {
            debug!(finish_event = %self.finish_event, "terminate after outcome decided ignored");
            return false;
        }
        warn!(
            finish_event = %self.finish_event,
            error_code,
            pending = self.pending_work_items(),
            "operation terminated"
        );
        self.cancel_outstanding_work_items();
        true
    }

    // ------------------------------------------------------------------
    // Work items
    // ------------------------------------------------------------------

    /// Registers an asynchronous work item that must report before the
    /// operation completes.
    pub fn add_async_work_item(
        self: &Arc<Self>,
        item: impl AsyncWorkItem,
    ) -> Result<WorkItemHandle> {
        if self.is_destroyed() {
            return Err(Error::destroyed(self.finish_event));
        }
        {
            // Held across the join increment so an early outcome cannot
            // release the owner token in between.
            let forced = self.forced.lock();
            if let Some(status) = forced.as_ref() {
                if status.result == StatusResult::Cancelled {
                    return Err(Error::cancelled(self.finish_event));
                }
            }
            if self.finish_requested.load(Ordering::Acquire) || self.is_complete() {
                return Err(Error::invalid_transition(format!(
                    "work item added to {} after finish",
                    self.finish_event
                )));
            }
            self.join_count.fetch_add(1, Ordering::AcqRel);
        }
        let slot = Arc::new(WorkItemSlot::new(Box::new(item)));
        self.work_items.lock().push(Arc::clone(&slot));
        self.add_reference();
        if self.cancellation_requested() {
            slot.item.request_cancellation();
        }
        trace!(finish_event = %self.finish_event, item = %slot.id, "work item added");
        Ok(WorkItemHandle::new(Arc::clone(self), slot))
    }

    pub(crate) fn work_item_finished(&self, slot: &WorkItemSlot, successful: bool) {
        if !successful {
            self.failed_work_items.fetch_add(1, Ordering::AcqRel);
        }
        if slot.gpu_started.load(Ordering::Acquire) {
            self.profiling.lock().timeline_gpu.record_end(Time::now());
        }
        self.release_join();
    }

    pub(crate) fn update_gpu_start(&self) {
        self.profiling.lock().timeline_gpu.record_start(Time::now());
    }

    fn cancel_outstanding_work_items(&self) {
        let outstanding: SmallVec<[Arc<WorkItemSlot>; 4]> = self
            .work_items
            .lock()
            .iter()
            .filter(|slot| !slot.is_finished())
            .cloned()
            .collect();
        for slot in outstanding {
            slot.item.request_cancellation();
        }
    }

    // ------------------------------------------------------------------
    // Profiling
    // ------------------------------------------------------------------

    /// Opens an event-wait interval if any request wants event waits.
    pub fn create_wait_interval(&self, event: Event) -> Option<WaitIntervalId> {
        if !self.wants_event_waits.load(Ordering::Acquire) {
            return None;
        }
        let mut profiling = self.profiling.lock();
        let id = WaitIntervalId(profiling.waits.intervals.len());
        profiling.waits.intervals.push(WaitInterval {
            wait_event: event,
            wait_start: Time::now(),
            wait_ready: Time::ZERO,
            wait_end: Time::ZERO,
        });
        Some(id)
    }

    /// Records that the awaited event fired.
    pub fn record_wait_ready(&self, id: WaitIntervalId) {
        if let Some(interval) = self.profiling.lock().waits.intervals.get_mut(id.0) {
            interval.wait_ready = Time::now();
        }
    }

    /// Records that the waiter resumed.
    pub fn record_wait_end(&self, id: WaitIntervalId) {
        if let Some(interval) = self.profiling.lock().waits.intervals.get_mut(id.0) {
            interval.wait_end = Time::now();
        }
    }

    /// Drops all profiling requests; nothing is sent on completion.
    pub fn clear_profiling(&self) {
        self.wants_event_waits.store(false, Ordering::Release);
        let mut profiling = self.profiling.lock();
        profiling.requests.clear();
        profiling.measurements.clear();
    }

    /// Rebuilds the measurement collection from the current state.
    pub fn reconstruct_measurements(&self) {
        self.profiling.lock().reconstruct();
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    fn release_join(&self) {
        if self.join_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete_join();
        }
    }

    fn complete_join(&self) {
        if !self.begin_completion() {
            return;
        }
        let forced = self.forced.lock().clone();
        if let Some(status) = forced {
            // State was already moved by whoever decided the outcome.
            self.profiling.lock().status = status;
            self.run_completion(true);
            return;
        }
        let failed = self.failed_work_items();
        let ok = self.finished_ok.load(Ordering::Acquire) && failed == 0;
        let target = if ok {
            OperationState::FinishedSuccess
        } else {
            OperationState::FinishedFailure
        };
        if let Err(observed) = self.state.transition(OperationState::Running, target) {
            warn!(finish_event = %self.finish_event, state = %observed, "join completed outside running state");
            self.state.force(target);
        }
        {
            let mut profiling = self.profiling.lock();
            profiling.status.result = if ok {
                StatusResult::CompletedSuccessfully
            } else {
                StatusResult::CompletedWithErrors
            };
        }
        self.run_completion(!ok);
    }

    fn finish_cancelled_before_start(&self) {
        if self
            .state
            .transition_before_start(OperationState::FinishedFailure)
            .is_ok()
        {
            self.complete_cancelled();
        }
    }

    /// Settles an operation that was moved to `FinishedFailure` before it started.
    fn complete_cancelled(&self) {
        let reason = self
            .cancel_reason()
            .unwrap_or_else(|| CancelReason::cancelled(Vec::new()));
        let status = OperationStatus {
            result: StatusResult::Cancelled,
            error_code: reason.error_code,
            error_details: reason.details,
        };
        debug!(finish_event = %self.finish_event, "cancelled before start");
        self.cancel_outstanding_work_items();
        self.force_outcome(None, status);
    }

    /// Records an outcome decided outside the join and gives up the owner's
    /// join token. The trigger happens on the last `release_join`.
    ///
    /// Returns false if an outcome was already forced or completion began.
    fn force_outcome(&self, state: Option<OperationState>, status: OperationStatus) -> bool {
        let owner_token = {
            let mut forced = self.forced.lock();
            if forced.is_some() || self.is_complete() {
                return false;
            }
            if let Some(state) = state {
                self.state.force(state);
            }
            self.profiling.lock().status = status.clone();
            *forced = Some(status);
            !self.finish_requested.swap(true, Ordering::AcqRel)
        };
        if owner_token {
            self.finished_ok.store(false, Ordering::Release);
            self.release_join();
        }
        true
    }

    fn begin_completion(&self) -> bool {
        self.completion_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Triggers the finish event and sends profiling data.
    ///
    /// A temporary reference is held so that a waiter releasing the last
    /// external reference from inside the trigger cannot tear the operation
    /// down mid-completion.
    fn run_completion(&self, poisoned: bool) {
        self.add_reference();
        let (requests, measurements) = {
            let mut profiling = self.profiling.lock();
            profiling.timeline.complete_time = Time::now();
            profiling.reconstruct();
            (
                std::mem::take(&mut profiling.requests),
                profiling.measurements.clone(),
            )
        };
        debug!(
            finish_event = %self.finish_event,
            state = %self.state(),
            poisoned,
            "operation complete"
        );
        self.events.trigger(self.finish_event, poisoned);
        if !requests.is_empty() {
            if let Err(err) = measurements.send_responses(&requests, self.sink.as_ref()) {
                warn!(finish_event = %self.finish_event, error = %err, "failed to send profiling data");
            }
        }
        self.remove_reference();
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.finish_event)?;
        self.kind.describe(f)?;
        write!(
            f,
            ": state={} refs={} pending={}",
            self.state(),
            self.reference_count(),
            self.pending_work_items()
        )?;
        if self.cancellation_requested() {
            f.write_str(" cancel-requested")?;
        }
        for slot in self.work_items.lock().iter() {
            write!(f, "\n    {slot}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("finish_event", &self.finish_event)
            .field("state", &self.state())
            .field("refcount", &self.reference_count())
            .field("cancel_requested", &self.cancellation_requested())
            .field("pending_work_items", &self.pending_work_items())
            .finish_non_exhaustive()
    }
}
