//! Peer link management — keeps a pool of live RPC connections to the
//! configured peer set and heals them after failure.
//!
//! A peer has at most one pending reconnect request: failure reports from
//! concurrent fan-out workers coalesce into a single-slot signal that the
//! next reconciliation pass consumes. While a reconnect is pending the
//! stale handle stays in place, so broadcasts keep going out best-effort
//! instead of dropping the peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::rpc::RpcClient;

struct PeerLink {
    /// Written only by the reconciliation pass; read by broadcasters.
    client: RwLock<Option<RpcClient>>,
    /// Single-slot reconnect signal.
    redial: AtomicBool,
}

/// Connection state of one configured peer, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub id: String,
    pub connected: bool,
    pub redial_pending: bool,
}

/// Owns the outbound links to a statically configured peer set.
pub struct PeerLinkManager {
    links: HashMap<String, PeerLink>,
    dial_timeout: Duration,
}

impl PeerLinkManager {
    /// Build a manager for a fixed peer set. No connections are made
    /// here; the first reconciliation pass dials everything.
    pub fn new(peers: &[String], dial_timeout: Duration) -> Arc<Self> {
        let links = peers
            .iter()
            .map(|addr| {
                (
                    addr.clone(),
                    PeerLink {
                        client: RwLock::new(None),
                        redial: AtomicBool::new(false),
                    },
                )
            })
            .collect();
        Arc::new(Self {
            links,
            dial_timeout,
        })
    }

    /// Post a reconnect request for a peer. Set-if-absent: repeated
    /// reports between reconciliation passes collapse into one pending
    /// request. Unknown peer ids are ignored.
    pub fn request_redial(&self, id: &str) {
        if let Some(link) = self.links.get(id) {
            if link
                .redial
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::debug!(peer = %id, "reconnect requested");
            }
        }
    }

    /// Whether a reconnect request is pending for a peer.
    pub fn redial_pending(&self, id: &str) -> bool {
        self.links
            .get(id)
            .map(|l| l.redial.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Snapshot of currently usable links for the broadcaster to iterate.
    pub fn live_links(&self) -> Vec<(String, RpcClient)> {
        self.links
            .iter()
            .filter_map(|(id, link)| {
                link.client
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .map(|client| (id.clone(), client))
            })
            .collect()
    }

    /// One reconciliation pass over every configured peer: dial anything
    /// unconnected and re-dial anything with a pending reconnect request.
    /// A failed dial leaves the previous state in place (stale handle,
    /// pending flag) and is retried on the next pass — there is no
    /// terminal state.
    pub async fn reconcile_all(&self) {
        for (id, link) in &self.links {
            let connected = link
                .client
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some();

            if connected && !link.redial.load(Ordering::Acquire) {
                continue;
            }

            match RpcClient::dial(id, self.dial_timeout).await {
                Ok(client) => {
                    *link.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
                    link.redial.store(false, Ordering::Release);
                    if connected {
                        tracing::info!(peer = %id, "connection restored");
                    } else {
                        tracing::info!(peer = %id, "successful connection");
                    }
                }
                Err(e) => {
                    tracing::error!(peer = %id, error = %e, "peer dial failed");
                }
            }
        }
    }

    /// Per-peer connection state, for the status endpoint.
    pub fn status(&self) -> Vec<PeerStatus> {
        let mut out: Vec<PeerStatus> = self
            .links
            .iter()
            .map(|(id, link)| PeerStatus {
                id: id.clone(),
                connected: link
                    .client
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some(),
                redial_pending: link.redial.load(Ordering::Acquire),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn peer_count(&self) -> usize {
        self.links.len()
    }
}

/// Periodically reconcile peer links, independent of request traffic.
///
/// Runs forever — cancel by dropping the task handle.
pub async fn reconcile_loop(manager: Arc<PeerLinkManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        manager.reconcile_all().await;
    }
}
