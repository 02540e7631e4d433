//! Meshmap integration test harness.
//!
//! Tests spin up full in-process nodes — stores, peer links, and an RPC
//! server on an ephemeral localhost port — and drive replication between
//! them over real TCP. No privileges or external services required.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use meshmap_core::{EndpointAddr, NetRecord, Options, RecordFilter, Relation};
use meshmap_services::{rpc, ContentStore, Node, PeerLinkManager, RpcService};

mod recovery;
mod replication;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestNode {
    pub node: Node,
    pub rpc_addr: String,
    // Dropping this would stop the RPC server.
    _shutdown: tokio::sync::broadcast::Sender<()>,
}

impl TestNode {
    /// Node with an RPC server on an ephemeral port, replicating to `peers`.
    pub async fn spawn(peers: &[String]) -> TestNode {
        Self::spawn_inner("127.0.0.1:0", peers).await
    }

    /// Same, but bound to a specific address — used to bring a node up on
    /// a port another node already has in its peer list.
    pub async fn spawn_at(addr: &str, peers: &[String]) -> TestNode {
        Self::spawn_inner(addr, peers).await
    }

    async fn spawn_inner(bind: &str, peers: &[String]) -> TestNode {
        let records = ContentStore::new(1000, Duration::from_secs(3600));
        let exceptions = ContentStore::new(1000, Duration::ZERO);
        let manager = PeerLinkManager::new(peers, Duration::from_secs(2));
        let node = Node::new(records, exceptions, manager, Duration::from_secs(2));

        let listener = TcpListener::bind(bind).await.expect("bind rpc listener");
        let rpc_addr = listener.local_addr().expect("local addr").to_string();
        let (shutdown, rx) = tokio::sync::broadcast::channel(1);
        let service: Arc<dyn RpcService> = Arc::new(node.clone());
        tokio::spawn(rpc::serve(listener, service, rx));

        TestNode {
            node,
            rpc_addr,
            _shutdown: shutdown,
        }
    }

    /// Dial everything in the peer list once.
    pub async fn connect_peers(&self) {
        self.node.peers.reconcile_all().await;
    }
}

/// A peer that accepts connections and then never answers — it looks
/// alive to the dialer and dead to every call.
pub struct SilentPeer {
    pub addr: String,
    accept_task: tokio::task::JoinHandle<()>,
    conns: Arc<Mutex<Vec<TcpStream>>>,
}

impl SilentPeer {
    pub async fn spawn() -> SilentPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind silent peer");
        let addr = listener.local_addr().expect("local addr").to_string();
        let conns = Arc::new(Mutex::new(Vec::new()));
        let held = Arc::clone(&conns);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                held.lock().expect("conns lock").push(stream);
            }
        });
        SilentPeer {
            addr,
            accept_task,
            conns,
        }
    }

    /// Stop accepting and drop every held connection, freeing the port.
    /// Waits for the accept task to finish so the listener socket is
    /// really gone before the port is reused.
    pub async fn shutdown(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
        self.conns.lock().expect("conns lock").clear();
    }
}

pub fn record(local: &str, remote: &str, port: u16) -> NetRecord {
    NetRecord {
        local_addr: EndpointAddr {
            ip: Some("10.0.0.1".parse().expect("ip")),
            name: local.into(),
        },
        remote_addr: EndpointAddr {
            ip: Some("10.0.0.2".parse().expect("ip")),
            name: remote.into(),
        },
        relation: Relation {
            mode: "tcp".into(),
            port,
            ..Relation::default()
        },
        options: Options::default(),
        ..NetRecord::default()
    }
}

/// Poll until `cond` holds or the deadline passes.
pub async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lone_node_applies_and_reads() {
    let node = TestNode::spawn(&[]).await;

    let errors = node
        .node
        .apply_records(vec![record("host-a", "host-b", 443)], "test")
        .await;
    assert!(errors.is_empty());

    let all = node.node.get_records(&RecordFilter::default());
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].relation.port, 443);
    assert!(!all[0].id.is_empty());
}
