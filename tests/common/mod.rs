#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use optrack::event::LocalEventTable;
use optrack::lab::MemoryNetwork;
use optrack::operation::{AsyncWorkItem, NamedOperation, Operation, OperationKind};
use optrack::remote::LocalOnlyTransport;
use optrack::runtime::{OperationTable, OperationTableConfig};
use optrack::types::{CancelReason, NodeId};
use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "OPTRACK_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    // If CI is set and no explicit seed is provided, use a fixed seed.
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
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

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// A single node: event table plus operation table, no remote peers.
pub struct SingleNode {
    pub events: Arc<LocalEventTable>,
    pub table: Arc<OperationTable>,
}

impl SingleNode {
    pub fn new() -> Self {
        Self::with_config(OperationTableConfig::default())
    }

    pub fn with_config(config: OperationTableConfig) -> Self {
        let node = NodeId::new(0);
        let events = Arc::new(LocalEventTable::new(node));
        let table = OperationTable::new(
            config,
            events.clone(),
            Arc::new(LocalOnlyTransport::new(node)),
        );
        Self { events, table }
    }

    pub fn op(&self, name: &'static str) -> Arc<Operation> {
        Operation::builder(self.events.create_event(), self.events.clone())
            .build(NamedOperation::new(name))
    }

    pub fn op_with(&self, kind: impl OperationKind) -> Arc<Operation> {
        Operation::builder(self.events.create_event(), self.events.clone()).build(kind)
    }
}

/// One node of a [`Cluster`].
pub struct ClusterNode {
    pub id: NodeId,
    pub events: Arc<LocalEventTable>,
    pub table: Arc<OperationTable>,
}

impl ClusterNode {
    pub fn op(&self, name: &'static str) -> Arc<Operation> {
        Operation::builder(self.events.create_event(), self.events.clone())
            .build(NamedOperation::new(name))
    }

    pub fn op_with(&self, kind: impl OperationKind) -> Arc<Operation> {
        Operation::builder(self.events.create_event(), self.events.clone()).build(kind)
    }
}

/// Several nodes joined by an in-memory network.
pub struct Cluster {
    pub network: Arc<MemoryNetwork>,
    pub nodes: Vec<ClusterNode>,
}

impl Cluster {
    pub fn new(size: u32, config: &OperationTableConfig) -> Self {
        let network = MemoryNetwork::new();
        let nodes = (0..size)
            .map(|raw| {
                let id = NodeId::new(raw);
                let events = Arc::new(LocalEventTable::new(id));
                let table =
                    OperationTable::new(config.clone(), events.clone(), network.endpoint(id));
                network.attach(id, &table);
                ClusterNode { id, events, table }
            })
            .collect();
        Self { network, nodes }
    }

    pub fn node(&self, index: usize) -> &ClusterNode {
        &self.nodes[index]
    }
}

/// Operation kind that records interruption requests and accepts them.
#[derive(Default)]
pub struct InterruptibleKind {
    pub reasons: Arc<Mutex<Vec<CancelReason>>>,
}

impl OperationKind for InterruptibleKind {
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interruptible")
    }

    fn cancel_running(&self, _op: &Operation, reason: &CancelReason) -> bool {
        self.reasons.lock().push(reason.clone());
        true
    }
}

/// Operation kind that counts teardowns.
#[derive(Default)]
pub struct CountingKind {
    pub destroyed: Arc<AtomicUsize>,
}

impl OperationKind for CountingKind {
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("counting")
    }

    fn on_destroy(&self, _op: &Operation) {
        self.destroyed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Operation kind that remembers the last priority it was given.
#[derive(Default)]
pub struct PriorityKind {
    pub priority: Arc<AtomicI32>,
}

impl OperationKind for PriorityKind {
    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("prioritized")
    }

    fn set_priority(&self, _op: &Operation, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }
}

/// Work item that records whether it was asked to stop.
#[derive(Debug, Default)]
pub struct FlagItem {
    pub cancelled: Arc<AtomicBool>,
}

impl AsyncWorkItem for FlagItem {
    fn request_cancellation(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn print(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("flag item")
    }
}
