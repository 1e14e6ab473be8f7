//! Cross-node cancellation and priority routing over the in-memory network.

#[macro_use]
mod common;

use common::*;
use optrack::error::ErrorKind;
use optrack::record::OperationState;
use optrack::runtime::{CancelOutcome, OperationTableConfig};
use optrack::remote::MAX_REASON_LEN;
use optrack::types::{Event, EventId, NodeId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[test]
fn cancellation_follows_remote_entry() {
    init_test_logging();
    test_phase!("cancellation_follows_remote_entry");
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));

    let op = b.op("remote-copy");
    b.table.add_local_operation(&op).expect("register on b");
    a.table
        .add_remote_operation(op.finish_event(), b.id)
        .expect("register on a");

    let outcome = a
        .table
        .request_cancellation(op.finish_event(), b"stop")
        .expect("cancel");
    assert_eq!(outcome, CancelOutcome::Forwarded(b.id));
    assert_eq!(cluster.network.deliver_pending(), 1);

    assert_eq!(op.state(), OperationState::FinishedFailure);
    assert_eq!(op.cancel_reason().expect("reason").details, b"stop");
    assert!(b.table.is_empty());
    test_complete!("cancellation_follows_remote_entry");
}

#[test]
fn unknown_event_forwarded_to_creator() {
    init_test_logging();
    let cluster = Cluster::new(3, &OperationTableConfig::default());
    let (a, c) = (cluster.node(0), cluster.node(2));

    let op = c.op("created-on-c");
    c.table.add_local_operation(&op).expect("register");

    let outcome = a
        .table
        .request_cancellation(op.finish_event(), b"who owns this")
        .expect("cancel");
    assert_eq!(outcome, CancelOutcome::Forwarded(c.id));
    cluster.network.deliver_pending();
    assert!(op.cancellation_requested());
    assert_eq!(a.table.metrics().cancellations_forwarded, 1);
    assert_eq!(c.table.metrics().cancellations_delivered, 1);
}

#[test]
fn creator_parks_cancellation_until_registration() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));

    // The event exists on b, but its operation has not been registered yet.
    let op = b.op("late");
    a.table
        .request_cancellation(op.finish_event(), b"early")
        .expect("cancel");
    cluster.network.deliver_pending();
    assert!(b.table.contains(op.finish_event()));
    assert_eq!(op.state(), OperationState::Pending);

    b.table.add_local_operation(&op).expect("register");
    assert_eq!(op.state(), OperationState::FinishedFailure);
    assert_eq!(op.cancel_reason().expect("reason").details, b"early");
}

#[test]
fn remote_receiver_never_reforwards() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));

    // Created on a, unknown everywhere: b forwards to a, a parks it.
    let foreign = Event::new(EventId::new(a.id, 77), 1);
    b.table.request_cancellation(foreign, b"").expect("cancel");
    assert_eq!(cluster.network.deliver_pending(), 1);
    assert!(a.table.contains(foreign));
    assert_eq!(cluster.network.pending(), 0);
    assert_eq!(a.table.metrics().cancellations_forwarded, 0);
}

#[test]
fn deferred_cancellation_forwarded_on_remote_registration() {
    init_test_logging();
    let config = OperationTableConfig::default().with_forward_unknown_remote(false);
    let cluster = Cluster::new(2, &config);
    let (a, b) = (cluster.node(0), cluster.node(1));

    let op = b.op("delegated");
    b.table.add_local_operation(&op).expect("register on b");

    assert_eq!(
        a.table
            .request_cancellation(op.finish_event(), b"parked")
            .expect("cancel"),
        CancelOutcome::Deferred
    );
    a.table
        .add_remote_operation(op.finish_event(), b.id)
        .expect("register remote");
    cluster.network.deliver_pending();

    assert_eq!(op.state(), OperationState::FinishedFailure);
    assert_eq!(op.cancel_reason().expect("reason").details, b"parked");
}

#[test]
fn priority_forwarded_to_remote_owner() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));

    let kind = PriorityKind::default();
    let priority = Arc::clone(&kind.priority);
    let op = b.op_with(kind);
    b.table.add_local_operation(&op).expect("register");
    a.table
        .add_remote_operation(op.finish_event(), b.id)
        .expect("remote");

    assert!(a.table.set_priority(op.finish_event(), 5).expect("priority"));
    assert_eq!(priority.load(Ordering::Acquire), 0);
    assert_eq!(cluster.network.deliver_pending(), 1);
    assert_eq!(cluster.network.metrics().decode_errors, 0);
    assert_eq!(priority.load(Ordering::Acquire), 5);
}

#[test]
fn remote_priority_for_unknown_event_dropped() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));
    let event = b.events.create_event();
    a.table.add_remote_operation(event, b.id).expect("remote");

    assert!(a.table.set_priority(event, 9).expect("priority"));
    assert_eq!(cluster.network.deliver_pending(), 1);
    assert!(!b.table.contains(event));
    assert_eq!(cluster.network.pending(), 0);
}

#[test]
fn oversized_reason_refused_by_endpoint() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));
    let event = b.events.create_event();
    a.table.add_remote_operation(event, b.id).expect("remote");

    let reason = vec![0u8; MAX_REASON_LEN + 1];
    let err = a.table.request_cancellation(event, &reason).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
    assert_eq!(cluster.network.pending(), 0);
}

#[test]
fn crashed_owner_surfaces_transport_error() {
    init_test_logging();
    let cluster = Cluster::new(2, &OperationTableConfig::default());
    let (a, b) = (cluster.node(0), cluster.node(1));
    let event = b.events.create_event();
    a.table.add_remote_operation(event, b.id).expect("remote");

    cluster.network.crash(b.id);
    let err = a.table.request_cancellation(event, b"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NodeUnavailable);
    assert!(err.is_transport_error());

    cluster.network.restart(b.id);
    assert_eq!(
        a.table.request_cancellation(event, b"").expect("cancel"),
        CancelOutcome::Forwarded(b.id)
    );
}

#[test]
fn frames_to_detached_node_rejected() {
    init_test_logging();
    let cluster = Cluster::new(1, &OperationTableConfig::default());
    let a = cluster.node(0);
    let stranger = Event::new(EventId::new(NodeId::new(42), 1), 1);
    let err = a.table.request_cancellation(stranger, b"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RoutingFailed);
}
