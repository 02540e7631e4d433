//! Link recovery: peers that come up late, die, and come back are healed
//! by the reconciliation pass without losing the rest of the mesh.

use std::time::Duration;

use meshmap_core::RecordFilter;
use tokio::net::TcpListener;

use crate::{record, SilentPeer, TestNode};

/// Reserve an ephemeral port by binding and immediately releasing it.
async fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    listener.local_addr().expect("local addr").to_string()
}

#[tokio::test]
async fn peer_is_dialed_once_it_comes_up() {
    let addr = reserve_addr().await;
    let a = TestNode::spawn(&[addr.clone()]).await;

    // Nothing listens there yet: the pass fails and the peer stays
    // unconnected, with no terminal state.
    a.connect_peers().await;
    assert!(a.node.peers.live_links().is_empty());

    // The peer comes up; the next pass connects.
    let b = TestNode::spawn_at(&addr, &[]).await;
    a.connect_peers().await;
    assert_eq!(a.node.peers.live_links().len(), 1);

    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    assert!(errors.is_empty());
    assert_eq!(b.node.get_records(&RecordFilter::default()).len(), 1);
}

#[tokio::test]
async fn connection_restored_after_peer_restart() {
    // A wedged peer: dials succeed, every call times out.
    let mut silent = SilentPeer::spawn().await;
    let a = TestNode::spawn(&[silent.addr.clone()]).await;
    a.connect_peers().await;
    assert_eq!(a.node.peers.live_links().len(), 1);

    // Two failing rounds post two failure reports; they coalesce into
    // one pending reconnect request.
    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 80)], "test")
        .await;
    assert_eq!(errors.len(), 1);
    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 81)], "test")
        .await;
    assert_eq!(errors.len(), 1);
    assert!(a.node.peers.redial_pending(&silent.addr));

    // A reconcile pass while the peer is still wedged: the dial itself
    // succeeds against the silent listener, swapping in a fresh
    // connection and clearing the request.
    // Restart the peer as a real node on the same port first.
    silent.shutdown().await;
    let b = TestNode::spawn_at(&silent.addr, &[]).await;

    a.connect_peers().await;
    assert!(!a.node.peers.redial_pending(&silent.addr));

    // Replication works against the restarted peer.
    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    assert!(errors.is_empty());
    assert_eq!(b.node.get_records(&RecordFilter::default()).len(), 1);
}

#[tokio::test]
async fn failed_redial_keeps_retrying_without_dropping_the_link() {
    let mut silent = SilentPeer::spawn().await;
    let a = TestNode::spawn(&[silent.addr.clone()]).await;
    a.connect_peers().await;

    // Report a failure, then take the peer fully offline.
    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 80)], "test")
        .await;
    assert_eq!(errors.len(), 1);
    silent.shutdown().await;

    // Reconcile cannot dial: the pending request and the stale handle
    // both survive, so the broadcaster keeps operating best-effort and
    // the retry continues on later passes.
    a.connect_peers().await;
    assert!(a.node.peers.redial_pending(&silent.addr));
    assert_eq!(a.node.peers.live_links().len(), 1);

    // The peer returns; the next pass heals the link.
    let b = TestNode::spawn_at(&silent.addr, &[]).await;
    a.connect_peers().await;
    assert!(!a.node.peers.redial_pending(&silent.addr));

    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    assert!(errors.is_empty());
    assert_eq!(b.node.get_records(&RecordFilter::default()).len(), 1);
}
