//! Concurrent fan-out of one logical operation to every live peer.
//!
//! Two modes, matching the call sites: `notify` dispatches and returns
//! immediately (status/telemetry propagation), `call_all` joins every
//! per-peer worker and hands back the per-peer error aggregate (deletes
//! and admin writes). A slow or failed peer never delays the calls to
//! the other peers; its failure posts a reconnect request and the next
//! reconciliation pass re-dials. No retry happens within a round.
//!
//! Known gap: successive fire-and-forget rounds are not serialized per
//! peer, so a peer may observe a later round before an earlier one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::peers::PeerLinkManager;

/// Per-peer outcome of one await-all round. Written by the round's
/// workers, read once after the join. The full map is retained;
/// `first()` is what the HTTP boundary reports as the aggregate failure.
#[derive(Debug, Clone, Default)]
pub struct PeerErrors {
    items: BTreeMap<String, String>,
}

impl PeerErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: String, error: String) {
        self.items.insert(peer, error);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, peer: &str) -> Option<&str> {
        self.items.get(peer).map(String::as_str)
    }

    /// First entry in peer-id order; deterministic across runs.
    pub fn first(&self) -> Option<(&str, &str)> {
        self.items
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.items.iter()
    }
}

/// Fans one RPC method out to every live peer link.
#[derive(Clone)]
pub struct Broadcaster {
    peers: Arc<PeerLinkManager>,
    call_timeout: Duration,
}

impl Broadcaster {
    pub fn new(peers: Arc<PeerLinkManager>, call_timeout: Duration) -> Self {
        Self {
            peers,
            call_timeout,
        }
    }

    /// Fire-and-forget: dispatch to every live peer and return without
    /// waiting. Failures are logged and posted as reconnect requests.
    pub fn notify(&self, method: &'static str, params: Value) {
        for (id, client) in self.peers.live_links() {
            let peers = Arc::clone(&self.peers);
            let params = params.clone();
            let timeout = self.call_timeout;
            tokio::spawn(async move {
                if let Err(e) = client.call(method, params, timeout).await {
                    tracing::error!(peer = %id, method, error = %e, "peer call failed");
                    peers.request_redial(&id);
                }
            });
        }
    }

    /// Await-all: dispatch concurrently and block until every peer has
    /// answered or failed. At most one slot per peer in the aggregate.
    pub async fn call_all(&self, method: &'static str, params: Value) -> PeerErrors {
        let (_, errors) = self.fan_out(method, params).await;
        errors
    }

    /// Await-all fan-out that also collects the successful payloads,
    /// for cross-peer read aggregation.
    pub async fn gather(
        &self,
        method: &'static str,
        params: Value,
    ) -> (Vec<(String, Value)>, PeerErrors) {
        self.fan_out(method, params).await
    }

    async fn fan_out(
        &self,
        method: &'static str,
        params: Value,
    ) -> (Vec<(String, Value)>, PeerErrors) {
        let mut workers = JoinSet::new();
        for (id, client) in self.peers.live_links() {
            let params = params.clone();
            let timeout = self.call_timeout;
            workers.spawn(async move {
                let outcome = client.call(method, params, timeout).await;
                (id, outcome)
            });
        }

        let mut replies = Vec::new();
        let mut errors = PeerErrors::new();
        while let Some(joined) = workers.join_next().await {
            let (id, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "fan-out worker panicked");
                    continue;
                }
            };
            match outcome {
                Ok(value) => replies.push((id, value)),
                Err(e) => {
                    tracing::error!(peer = %id, method, error = %e, "peer call failed");
                    self.peers.request_redial(&id);
                    errors.insert(id, e.to_string());
                }
            }
        }
        (replies, errors)
    }
}
