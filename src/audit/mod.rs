//! Tamper-evident audit trail.
//!
//! Events are signed with the same HMAC key used for cache integrity, chained
//! within their segment, and segments are sealed on rotation. An exported
//! segment can be verified with nothing but the signing secret.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod log;
mod models;

pub use log::{load_segments, segment_path, AuditLog};
pub use models::{
    digest, verify_segment, AuditEvent, AuditEventType, AuditRecord, AuditSegment, VerifyError,
};
