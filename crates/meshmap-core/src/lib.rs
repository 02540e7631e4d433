//! meshmap-core — shared data model, id derivation, and configuration.
//! All other meshmap crates depend on this one.

pub mod config;
pub mod record;

pub use record::{
    exception_id, record_id, EndpointAddr, Exception, ExceptionFilter, NetRecord, Options,
    RecordFilter, Relation, ValidationError, STATUS_ADDED,
};
