//! Test utilities for unit tests.
//!
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Recording operation kinds and work items

use crate::operation::{AsyncWorkItem, Operation, OperationKind};
use crate::types::CancelReason;
use core::fmt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Operation kind that records every hook invocation.
#[derive(Default)]
pub struct RecordingKind {
    accept_cancel: bool,
    cancels: Arc<Mutex<Vec<CancelReason>>>,
    priority: Arc<AtomicI32>,
    destroyed: Arc<AtomicUsize>,
}

impl RecordingKind {
    /// A kind whose running operations accept interruption.
    #[must_use]
    pub fn accepting_cancel() -> Self {
        Self {
            accept_cancel: true,
            ..Self::default()
        }
    }

    /// Reasons passed to `cancel_running`, in order.
    #[must_use]
    pub fn cancels(&self) -> Arc<Mutex<Vec<CancelReason>>> {
        Arc::clone(&self.cancels)
    }

    /// Last priority applied.
    #[must_use]
    pub fn priority(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.priority)
    }

    /// Number of `on_destroy` calls.
    #[must_use]
    pub fn destroyed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.destroyed)
    }
}

impl OperationKind for RecordingKind {
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("recording")
    }

    fn cancel_running(&self, _op: &Operation, reason: &CancelReason) -> bool {
        self.cancels.lock().push(reason.clone());
        self.accept_cancel
    }

    fn set_priority(&self, _op: &Operation, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    fn on_destroy(&self, _op: &Operation) {
        self.destroyed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Work item that records cancellation requests.
#[derive(Debug, Default)]
pub struct RecordingWorkItem {
    cancelled: Arc<AtomicBool>,
}

impl RecordingWorkItem {
    /// Flag set once `request_cancellation` is called.
    #[must_use]
    pub fn cancelled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

impl AsyncWorkItem for RecordingWorkItem {
    fn request_cancellation(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("recording item")
    }
}
