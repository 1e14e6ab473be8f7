//! Operation state for the lifecycle state machine.
//!
//! ```text
//! Pending ──mark_ready──▶ Ready ──mark_started──▶ Running ──▶ FinishedSuccess
//!    │                      │                        │     └─▶ FinishedFailure
//!    └──── cancel ──────────┴──▶ FinishedFailure     │
//!                                                    └─ mark_terminated ─▶ Terminated
//! ```
//!
//! Cancellation is not a state: it is a flag that races with every
//! transition. The state itself lives in an [`AtomicOperationState`] so that
//! cancellation and the owning thread can arbitrate with a single CAS.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationState {
    /// Created; preconditions not yet satisfied.
    Pending = 0,
    /// Handed to the scheduler.
    Ready = 1,
    /// Executing (including while async work items are outstanding).
    Running = 2,
    /// Completed without errors.
    FinishedSuccess = 3,
    /// Completed with errors, cancelled, or failed a precondition.
    FinishedFailure = 4,
    /// Torn down outside the normal state machine.
    Terminated = 5,
}

impl OperationState {
    /// Returns true if the operation can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FinishedSuccess | Self::FinishedFailure | Self::Terminated
        )
    }

    /// Returns true if the operation has not started executing yet.
    #[must_use]
    pub const fn is_before_start(self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::FinishedSuccess,
            4 => Self::FinishedFailure,
            _ => Self::Terminated,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::FinishedSuccess => "finished",
            Self::FinishedFailure => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding an [`OperationState`].
#[derive(Debug)]
pub struct AtomicOperationState(AtomicU8);

impl AtomicOperationState {
    /// Creates a cell in `state`.
    #[must_use]
    pub const fn new(state: OperationState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Returns the current state.
    #[must_use]
    pub fn load(&self) -> OperationState {
        OperationState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from → to` if the cell still holds `from`.
    ///
    /// Returns the state observed on failure.
    pub fn transition(
        &self,
        from: OperationState,
        to: OperationState,
    ) -> Result<(), OperationState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(OperationState::from_u8)
    }

    /// Moves any pre-start state to `to`.
    ///
    /// Returns the state it left, or the state observed if the operation had
    /// already started.
    pub fn transition_before_start(
        &self,
        to: OperationState,
    ) -> Result<OperationState, OperationState> {
        let mut current = self.load();
        loop {
            if !current.is_before_start() {
                return Err(current);
            }
            match self.transition(current, to) {
                Ok(()) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Unconditionally stores `state`, returning the previous one.
    pub fn force(&self, state: OperationState) -> OperationState {
        OperationState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}
