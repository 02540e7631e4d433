//! Replication between live nodes: writes fan out, deletes fan out, and
//! one failed peer never takes the round down with it.

use std::time::Duration;

use meshmap_core::{Exception, ExceptionFilter, RecordFilter};

use crate::{record, wait_for, SilentPeer, TestNode};

#[tokio::test]
async fn records_replicate_to_peer() {
    let b = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[b.rpc_addr.clone()]).await;
    a.connect_peers().await;

    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    assert!(errors.is_empty());

    // apply_records waits for every peer, so B already has the record.
    let on_b = b.node.get_records(&RecordFilter::default());
    assert_eq!(on_b.len(), 1);

    let on_a = a.node.get_records(&RecordFilter::default());
    assert_eq!(on_a[0].id, on_b[0].id, "peers must agree on record identity");
}

#[tokio::test]
async fn deletes_replicate_to_peer() {
    let b = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[b.rpc_addr.clone()]).await;
    a.connect_peers().await;

    a.node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    let id = b.node.get_records(&RecordFilter::default())[0].id.clone();

    let errors = a.node.delete_records(vec![id.clone()]).await;

    assert!(errors.is_empty());
    assert!(a.node.records.get(&id).is_none());
    assert!(b.node.records.get(&id).is_none());
}

#[tokio::test]
async fn fire_and_forget_netstat_replicates() {
    let b = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[b.rpc_addr.clone()]).await;
    a.connect_peers().await;

    a.node
        .apply_netstat(vec![record("host-a", "host-b", 80)], "test");

    // The dispatch is asynchronous; wait for it to land.
    let arrived = wait_for(|| b.node.records.len() == 1, Duration::from_secs(5)).await;
    assert!(arrived, "netstat record never reached the peer");
}

#[tokio::test]
async fn exceptions_replicate_and_gather_across_peers() {
    let b = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[b.rpc_addr.clone()]).await;
    a.connect_peers().await;

    a.node.apply_exceptions(vec![Exception {
        account_id: "acct".into(),
        src_name: "host-a".into(),
        ..Exception::default()
    }]);
    let arrived = wait_for(|| b.node.exceptions.len() == 1, Duration::from_secs(5)).await;
    assert!(arrived, "exception never reached the peer");

    // An exception only B knows about is visible through A's gather.
    b.node.apply_exceptions(vec![Exception {
        account_id: "acct".into(),
        src_name: "host-b-only".into(),
        ..Exception::default()
    }]);

    let merged = a.node.fetch_exceptions(&ExceptionFilter::default()).await;
    assert_eq!(merged.len(), 2);
    assert!(merged.iter().any(|e| e.src_name == "host-b-only"));
}

#[tokio::test]
async fn dead_peer_does_not_poison_the_round() {
    let silent = SilentPeer::spawn().await;
    let live = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[silent.addr.clone(), live.rpc_addr.clone()]).await;
    a.connect_peers().await;

    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;

    // The live peer applied the write; the silent one is the only error
    // and is flagged for reconnection.
    assert_eq!(live.node.records.len(), 1);
    assert_eq!(errors.len(), 1);
    assert!(errors.get(&silent.addr).is_some());
    assert!(errors.get(&live.rpc_addr).is_none());
    assert!(a.node.peers.redial_pending(&silent.addr));
    assert!(!a.node.peers.redial_pending(&live.rpc_addr));
}

#[tokio::test]
async fn await_all_returns_the_full_error_map() {
    let silent_a = SilentPeer::spawn().await;
    let silent_b = SilentPeer::spawn().await;
    let a = TestNode::spawn(&[silent_a.addr.clone(), silent_b.addr.clone()]).await;
    a.connect_peers().await;

    let errors = a
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;

    // Every failed peer keeps its own slot; nothing is collapsed away.
    assert_eq!(errors.len(), 2);
    assert!(errors.get(&silent_a.addr).is_some());
    assert!(errors.get(&silent_b.addr).is_some());
    assert!(errors.first().is_some());
}

#[tokio::test]
async fn invalid_record_is_dropped_but_batch_replicates() {
    let b = TestNode::spawn(&[]).await;
    let a = TestNode::spawn(&[b.rpc_addr.clone()]).await;
    a.connect_peers().await;

    let batch = vec![
        record("host-a", "host-b", 80),
        record("host-a", "host-b", 0), // zero port: dropped
        record("host-a", "host-c", 443),
    ];
    let errors = a.node.apply_records(batch, "test").await;

    assert!(errors.is_empty());
    assert_eq!(a.node.records.len(), 2);
    assert_eq!(b.node.records.len(), 2);
}
