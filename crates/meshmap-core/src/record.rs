//! Record and exception data model — the units of replicated topology data.
//!
//! A record's identity is a deterministic hash of its address/relation
//! tuple, so every node derives the same id for the same observation and
//! replication converges on identity rather than arrival order.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Status value that pins a record: entries carrying it are never removed
/// by the expiry sweep, only by an explicit delete.
pub const STATUS_ADDED: &str = "added";

/// One side of an observed connection: IP plus resolved name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointAddr {
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub name: String,
}

/// Transport relation between the two endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// "tcp", "udp", or a probe type.
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default)]
    pub result: i32,
    #[serde(default)]
    pub response: f64,
    #[serde(default)]
    pub trace: i32,
}

/// Non-identifying record attributes. `active_time` is the expiry clock:
/// UTC epoch seconds, restamped whenever the record is written as active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub max_resp_time: f64,
    #[serde(default)]
    pub active_time: i64,
}

/// One observed local↔remote connection with its probe metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "localAddr", default)]
    pub local_addr: EndpointAddr,
    #[serde(rename = "remoteAddr", default)]
    pub remote_addr: EndpointAddr,
    #[serde(default)]
    pub relation: Relation,
    #[serde(default)]
    pub options: Options,
}

/// A suppression/allow-list rule, keyed independently of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub src_name: String,
    #[serde(default)]
    pub dst_name: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub active_time: i64,
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Malformed or incomplete inbound record. Dropped per item, never aborts
/// the surrounding batch.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("parameter missing {0}")]
    MissingField(&'static str),
}

impl NetRecord {
    /// Check the fields required for admission. The field names in the
    /// error match the JSON wire names so ingest logs point at the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.local_addr.name.is_empty() {
            return Err(ValidationError::MissingField("localAddr.name"));
        }
        if self.local_addr.ip.is_none() {
            return Err(ValidationError::MissingField("localAddr.ip"));
        }
        if self.remote_addr.name.is_empty() {
            return Err(ValidationError::MissingField("remoteAddr.name"));
        }
        if self.remote_addr.ip.is_none() {
            return Err(ValidationError::MissingField("remoteAddr.ip"));
        }
        if self.relation.port == 0 {
            return Err(ValidationError::MissingField("relation.port"));
        }
        if self.relation.mode.is_empty() {
            return Err(ValidationError::MissingField("relation.mode"));
        }
        Ok(())
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Hex-encoded blake3 digest of a text key.
pub fn content_hash(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

fn ip_str(addr: &EndpointAddr) -> String {
    addr.ip.map(|ip| ip.to_string()).unwrap_or_default()
}

/// Deterministic record identity: digest of the identifying tuple.
/// Pure function of the tuple — stable across restarts and across peers.
pub fn record_id(rec: &NetRecord) -> String {
    content_hash(&format!(
        "{}:{}:{}:{}:{}:{}",
        ip_str(&rec.local_addr),
        rec.local_addr.name,
        ip_str(&rec.remote_addr),
        rec.remote_addr.name,
        rec.relation.mode,
        rec.relation.port,
    ))
}

/// Deterministic exception identity, derived from its own key fields.
pub fn exception_id(ex: &Exception) -> String {
    content_hash(&format!(
        "{}:{}:{}:{}:{}",
        ex.account_id, ex.src_name, ex.dst_name, ex.mode, ex.port,
    ))
}

// ── Read filters ──────────────────────────────────────────────────────────────

/// Filter for record reads. Empty fields match everything; `timestamp`
/// excludes records whose expiry clock is older than the given instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub mode: String,
    #[serde(default)]
    pub src_name: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl RecordFilter {
    pub fn matches(&self, rec: &NetRecord) -> bool {
        if !self.id.is_empty() && rec.id != self.id {
            return false;
        }
        if !self.mode.is_empty() && rec.relation.mode != self.mode {
            return false;
        }
        if !self.src_name.is_empty() && rec.local_addr.name != self.src_name {
            return false;
        }
        rec.options.active_time >= self.timestamp
    }
}

/// Filter for exception reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionFilter {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub src_name: String,
    #[serde(default)]
    pub account_id: String,
}

impl ExceptionFilter {
    pub fn matches(&self, ex: &Exception) -> bool {
        if !self.id.is_empty() && ex.id != self.id {
            return false;
        }
        if !self.src_name.is_empty() && ex.src_name != self.src_name {
            return false;
        }
        if !self.account_id.is_empty() && ex.account_id != self.account_id {
            return false;
        }
        true
    }
}
