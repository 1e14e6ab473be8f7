//! Profiling requests, measurement collection and delivery.
//!
//! An operation is created with a [`ProfilingRequestSet`]. While it runs it
//! records status and timestamps; when it completes it rebuilds a
//! [`MeasurementCollection`] holding the requested measurements and hands one
//! serialized [`ProfilingResponse`] per request to a [`ProfilingSink`].
//!
//! Payloads are JSON. Nothing downstream of the sink is specified here.

use crate::error::Result;
use crate::types::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod measurements;

pub use measurements::{
    Measurement, MeasurementKind, OperationEventWaits, OperationStatus, OperationTimeline,
    OperationTimelineGpu, StatusResult, WaitInterval,
};

/// A single requester's interest in an operation's measurements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingRequest {
    requester: NodeId,
    tag: u64,
    kinds: BTreeSet<MeasurementKind>,
}

impl ProfilingRequest {
    /// Creates a request answered to `requester`, echoing `tag` back.
    #[must_use]
    pub fn new(requester: NodeId, tag: u64) -> Self {
        Self {
            requester,
            tag,
            kinds: BTreeSet::new(),
        }
    }

    /// Adds a measurement kind to the request.
    #[must_use]
    pub fn with_measurement(mut self, kind: MeasurementKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Returns the node the response goes to.
    #[must_use]
    pub fn requester(&self) -> NodeId {
        self.requester
    }

    /// Returns the caller-chosen correlation tag.
    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Returns true if this request asks for `kind`.
    #[must_use]
    pub fn wants(&self, kind: MeasurementKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// All profiling requests attached to an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilingRequestSet {
    requests: Vec<ProfilingRequest>,
}

impl ProfilingRequestSet {
    /// Creates an empty request set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request.
    #[must_use]
    pub fn with_request(mut self, request: ProfilingRequest) -> Self {
        self.requests.push(request);
        self
    }

    /// Returns true if any request asks for `kind`.
    #[must_use]
    pub fn wants(&self, kind: MeasurementKind) -> bool {
        self.requests.iter().any(|r| r.wants(kind))
    }

    /// Returns true if there are no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Returns the number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Drops all requests.
    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Iterates the requests.
    pub fn iter(&self) -> impl Iterator<Item = &ProfilingRequest> {
        self.requests.iter()
    }
}

/// Wire shape of one profiling response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingResponse {
    /// The requester's correlation tag.
    pub tag: u64,
    /// Requested measurements, ordered by kind.
    pub measurements: Vec<Measurement>,
}

impl ProfilingResponse {
    /// Parses a payload produced by [`MeasurementCollection::payload_for`].
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns the measurement of `kind`, if present.
    #[must_use]
    pub fn get(&self, kind: MeasurementKind) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.kind() == kind)
    }
}

/// Measurements gathered for one operation, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementCollection {
    measurements: BTreeMap<MeasurementKind, Measurement>,
}

impl MeasurementCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a measurement, replacing any previous one of the same kind.
    pub fn insert(&mut self, measurement: Measurement) {
        self.measurements.insert(measurement.kind(), measurement);
    }

    /// Returns the measurement of `kind`, if collected.
    #[must_use]
    pub fn get(&self, kind: MeasurementKind) -> Option<&Measurement> {
        self.measurements.get(&kind)
    }

    /// Returns the number of collected measurements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Drops all collected measurements.
    pub fn clear(&mut self) {
        self.measurements.clear();
    }

    /// Serializes the subset of measurements `request` asked for.
    pub fn payload_for(&self, request: &ProfilingRequest) -> Result<Vec<u8>> {
        let response = ProfilingResponse {
            tag: request.tag(),
            measurements: self
                .measurements
                .values()
                .filter(|m| request.wants(m.kind()))
                .cloned()
                .collect(),
        };
        Ok(serde_json::to_vec(&response)?)
    }

    /// Sends one response per request to `sink`.
    pub fn send_responses(
        &self,
        requests: &ProfilingRequestSet,
        sink: &dyn ProfilingSink,
    ) -> Result<()> {
        for request in requests.iter() {
            let payload = self.payload_for(request)?;
            sink.send_response(request, payload);
        }
        Ok(())
    }
}

/// Destination of serialized profiling responses.
pub trait ProfilingSink: Send + Sync {
    /// Delivers `payload` to `request`'s requester.
    fn send_response(&self, request: &ProfilingRequest, payload: Vec<u8>);
}

/// A sink that discards every response.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProfilingSink;

impl ProfilingSink for NullProfilingSink {
    fn send_response(&self, _request: &ProfilingRequest, _payload: Vec<u8>) {}
}

/// A sink that keeps responses in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemoryProfilingSink {
    responses: Mutex<Vec<(NodeId, Vec<u8>)>>,
}

impl MemoryProfilingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of responses received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.responses.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.responses.lock().is_empty()
    }

    /// Removes and returns all received `(requester, payload)` pairs.
    pub fn drain(&self) -> Vec<(NodeId, Vec<u8>)> {
        std::mem::take(&mut *self.responses.lock())
    }
}

impl ProfilingSink for MemoryProfilingSink {
    fn send_response(&self, request: &ProfilingRequest, payload: Vec<u8>) {
        self.responses.lock().push((request.requester(), payload));
    }
}
