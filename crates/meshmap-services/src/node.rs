//! The node surface: validates inbound mutations, writes the local
//! stores, and propagates to peers. Also the server side of the RPC
//! surface — a peer's broadcast lands here and is applied locally
//! without being re-broadcast, so replication cannot loop.
//!
//! Write flow: validate → derive id → local store → fan out. Reads never
//! cross the network here; cross-peer aggregation lives at the HTTP
//! boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use meshmap_core::{exception_id, record_id, Exception, ExceptionFilter, NetRecord, RecordFilter};

use crate::broadcast::{Broadcaster, PeerErrors};
use crate::peers::PeerLinkManager;
use crate::rpc::{RpcError, RpcService};
use crate::store::{ContentStore, StoreError};

/// RPC method names, shared by client-side fan-out and server dispatch.
pub mod method {
    pub const SET_RECORDS: &str = "set_records";
    pub const DEL_RECORDS: &str = "del_records";
    pub const SET_EXCEPTIONS: &str = "set_exceptions";
    pub const DEL_EXCEPTIONS: &str = "del_exceptions";
    pub const SET_STATUS: &str = "set_status";
    pub const SET_NETSTAT: &str = "set_netstat";
    pub const SET_TRACERT: &str = "set_tracert";
    pub const GET_RECORDS: &str = "get_records";
    pub const GET_EXCEPTIONS: &str = "get_exceptions";
}

fn params<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode rpc params");
        Value::Null
    })
}

/// One collector node: both stores, the peer links, and the broadcaster.
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Node {
    pub records: ContentStore<NetRecord>,
    pub exceptions: ContentStore<Exception>,
    pub peers: Arc<PeerLinkManager>,
    pub broadcaster: Broadcaster,
}

impl Node {
    pub fn new(
        records: ContentStore<NetRecord>,
        exceptions: ContentStore<Exception>,
        peers: Arc<PeerLinkManager>,
        call_timeout: Duration,
    ) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&peers), call_timeout);
        Self {
            records,
            exceptions,
            peers,
            broadcaster,
        }
    }

    // ── Local application ─────────────────────────────────────────────────────

    /// Validate a batch and derive ids. Invalid items are dropped and
    /// logged with the offending field and the sender; the rest of the
    /// batch continues.
    fn admit_records(&self, batch: Vec<NetRecord>, sender: &str) -> Vec<NetRecord> {
        let mut admitted = Vec::with_capacity(batch.len());
        for mut rec in batch {
            if let Err(e) = rec.validate() {
                tracing::error!(error = %e, sender, "record dropped");
                continue;
            }
            rec.id = record_id(&rec);
            admitted.push(rec);
        }
        admitted
    }

    /// Upsert a batch into the record store. Per-item store failures are
    /// logged and the batch continues; the first failure is returned so
    /// the RPC surface can report it to the sending peer.
    fn store_records(&self, records: &[NetRecord], mark_active: bool) -> Result<(), StoreError> {
        let mut first_err = None;
        for rec in records {
            if let Err(e) = self.records.set(&rec.id, rec.clone(), mark_active) {
                tracing::error!(error = %e, "record not stored");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Trace results update existing records only — a trace observation
    /// does not create topology.
    fn apply_trace_updates(&self, records: &[NetRecord]) {
        for rec in records {
            match self.records.get(&rec.id) {
                Some(mut existing) => {
                    existing.relation.trace = rec.relation.trace;
                    existing.relation.command = rec.relation.command.clone();
                    existing.relation.result = rec.relation.result;
                    if let Err(e) = self.records.set(&rec.id, existing, false) {
                        tracing::error!(error = %e, "trace update not stored");
                    }
                }
                None => {
                    tracing::debug!(id = %rec.id, "trace update for unknown record");
                }
            }
        }
    }

    fn admit_exceptions(&self, batch: Vec<Exception>) -> Vec<Exception> {
        batch
            .into_iter()
            .map(|mut ex| {
                if ex.id.is_empty() {
                    ex.id = exception_id(&ex);
                }
                ex
            })
            .collect()
    }

    fn store_exceptions(&self, exceptions: &[Exception]) {
        for ex in exceptions {
            if let Err(e) = self.exceptions.set(&ex.id, ex.clone(), true) {
                tracing::error!(error = %e, "exception not stored");
            }
        }
    }

    // ── Ingestion surface (consumed by the HTTP layer) ────────────────────────

    /// Observed connection table from an agent. Fire-and-forget fan-out.
    pub fn apply_netstat(&self, batch: Vec<NetRecord>, sender: &str) {
        let records = self.admit_records(batch, sender);
        if records.is_empty() {
            return;
        }
        let _ = self.store_records(&records, true);
        self.broadcaster.notify(method::SET_NETSTAT, params(&records));
    }

    /// Probe/service status updates. Fire-and-forget fan-out.
    pub fn apply_status(&self, batch: Vec<NetRecord>, sender: &str) {
        let records = self.admit_records(batch, sender);
        if records.is_empty() {
            return;
        }
        let _ = self.store_records(&records, true);
        self.broadcaster.notify(method::SET_STATUS, params(&records));
    }

    /// Traceroute results. Fire-and-forget fan-out.
    pub fn apply_tracert(&self, batch: Vec<NetRecord>, sender: &str) {
        let records = self.admit_records(batch, sender);
        if records.is_empty() {
            return;
        }
        self.apply_trace_updates(&records);
        self.broadcaster.notify(method::SET_TRACERT, params(&records));
    }

    /// Admin record writes (may pin with `status = "added"`). Await-all;
    /// the local store is updated regardless of the peer outcome.
    pub async fn apply_records(&self, batch: Vec<NetRecord>, sender: &str) -> PeerErrors {
        let records = self.admit_records(batch, sender);
        if records.is_empty() {
            return PeerErrors::new();
        }
        let _ = self.store_records(&records, true);
        self.broadcaster
            .call_all(method::SET_RECORDS, params(&records))
            .await
    }

    /// Delete records by id, locally and on every peer. Await-all.
    pub async fn delete_records(&self, ids: Vec<String>) -> PeerErrors {
        for id in &ids {
            self.records.del(id);
        }
        self.broadcaster
            .call_all(method::DEL_RECORDS, params(&ids))
            .await
    }

    /// Exception writes. Ids are derived when absent. Fire-and-forget.
    pub fn apply_exceptions(&self, batch: Vec<Exception>) {
        let exceptions = self.admit_exceptions(batch);
        if exceptions.is_empty() {
            return;
        }
        self.store_exceptions(&exceptions);
        self.broadcaster
            .notify(method::SET_EXCEPTIONS, params(&exceptions));
    }

    /// Delete exceptions by id, locally and on every peer. Await-all.
    pub async fn delete_exceptions(&self, ids: Vec<String>) -> PeerErrors {
        for id in &ids {
            self.exceptions.del(id);
        }
        self.broadcaster
            .call_all(method::DEL_EXCEPTIONS, params(&ids))
            .await
    }

    // ── Read surface ──────────────────────────────────────────────────────────

    pub fn get_records(&self, filter: &RecordFilter) -> Vec<NetRecord> {
        self.records
            .snapshot()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect()
    }

    pub fn get_exceptions(&self, filter: &ExceptionFilter) -> Vec<Exception> {
        self.exceptions
            .snapshot()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect()
    }

    /// Cross-peer exception read: local entries merged with every live
    /// peer's, deduplicated by id. Unreachable peers are skipped (and
    /// reported for redial by the fan-out).
    pub async fn fetch_exceptions(&self, filter: &ExceptionFilter) -> Vec<Exception> {
        let mut merged: BTreeMap<String, Exception> = self
            .get_exceptions(filter)
            .into_iter()
            .map(|ex| (ex.id.clone(), ex))
            .collect();

        let (replies, _errors) = self
            .broadcaster
            .gather(method::GET_EXCEPTIONS, params(filter))
            .await;
        for (peer, value) in replies {
            match serde_json::from_value::<Vec<Exception>>(value) {
                Ok(items) => {
                    for ex in items {
                        merged.insert(ex.id.clone(), ex);
                    }
                }
                Err(e) => {
                    tracing::error!(peer = %peer, error = %e, "bad get_exceptions reply");
                }
            }
        }
        merged.into_values().collect()
    }
}

// ── Server-side dispatch (what a peer's broadcaster calls here) ───────────────

impl RpcService for Node {
    fn handle(&self, method_name: &str, raw: Value) -> Result<Value, RpcError> {
        match method_name {
            method::SET_NETSTAT | method::SET_STATUS | method::SET_RECORDS => {
                let batch: Vec<NetRecord> = serde_json::from_value(raw)?;
                let records = self.admit_records(batch, "peer");
                self.store_records(&records, true)
                    .map_err(|e| RpcError::Remote(e.to_string()))?;
                Ok(Value::Null)
            }
            method::SET_TRACERT => {
                let batch: Vec<NetRecord> = serde_json::from_value(raw)?;
                let records = self.admit_records(batch, "peer");
                self.apply_trace_updates(&records);
                Ok(Value::Null)
            }
            method::DEL_RECORDS => {
                let ids: Vec<String> = serde_json::from_value(raw)?;
                for id in &ids {
                    self.records.del(id);
                }
                Ok(Value::Null)
            }
            method::SET_EXCEPTIONS => {
                let batch: Vec<Exception> = serde_json::from_value(raw)?;
                let exceptions = self.admit_exceptions(batch);
                self.store_exceptions(&exceptions);
                Ok(Value::Null)
            }
            method::DEL_EXCEPTIONS => {
                let ids: Vec<String> = serde_json::from_value(raw)?;
                for id in &ids {
                    self.exceptions.del(id);
                }
                Ok(Value::Null)
            }
            method::GET_RECORDS => {
                let filter: RecordFilter = serde_json::from_value(raw)?;
                Ok(params(&self.get_records(&filter)))
            }
            method::GET_EXCEPTIONS => {
                let filter: ExceptionFilter = serde_json::from_value(raw)?;
                Ok(params(&self.get_exceptions(&filter)))
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}
