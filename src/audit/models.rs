//! Audit event and segment models.

// Author: kelexine (https://github.com/kelexine)

use crate::integrity::{b64, Signer};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

const EVENT_DOMAIN: &[u8] = b"genvault.audit.event.v1";
const SEGMENT_DOMAIN: &[u8] = b"genvault.audit.segment.v1";

/// Kind of event recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Admit,
    Deny,
    CacheHit,
    CacheMiss,
    CacheStore,
    StoreRejected,
    IntegrityFailure,
    QuotaExceeded,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Admit => "admit",
            AuditEventType::Deny => "deny",
            AuditEventType::CacheHit => "cache_hit",
            AuditEventType::CacheMiss => "cache_miss",
            AuditEventType::CacheStore => "cache_store",
            AuditEventType::StoreRejected => "store_rejected",
            AuditEventType::IntegrityFailure => "integrity_failure",
            AuditEventType::QuotaExceeded => "quota_exceeded",
        }
    }
}

/// Hex SHA-256 of some subject. Only digests ever enter the log.
pub fn digest(subject: &[u8]) -> String {
    hex::encode(Sha256::digest(subject))
}

/// What a component hands to [`AuditLog::record`](super::AuditLog::record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub correlation_id: String,
    pub event_type: AuditEventType,
    pub payload_digest: String,
}

impl AuditRecord {
    /// Digest `subject` and build a record.
    pub fn new(correlation_id: impl Into<String>, event_type: AuditEventType, subject: &[u8]) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            event_type,
            payload_digest: digest(subject),
        }
    }
}

/// One signed, immutable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub correlation_id: String,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub payload_digest: String,
    /// Signature of the preceding event in the same segment; empty for the first.
    #[serde(with = "b64")]
    pub prev_signature: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl AuditEvent {
    pub(crate) fn signing_bytes(&self, segment_id: &Uuid) -> Vec<u8> {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let sequence = self.sequence.to_be_bytes();
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(EVENT_DOMAIN);
        for field in [
            segment_id.as_bytes().as_slice(),
            sequence.as_slice(),
            self.correlation_id.as_bytes(),
            self.event_type.as_str().as_bytes(),
            timestamp.as_bytes(),
            self.payload_digest.as_bytes(),
            self.prev_signature.as_slice(),
        ] {
            out.extend_from_slice(&(field.len() as u64).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }
}

/// A bounded slice of the log, sealed on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSegment {
    pub segment_id: Uuid,
    pub index: u64,
    pub opened_at: DateTime<Utc>,
    /// `None` for a snapshot of the segment still being written.
    pub closed_at: Option<DateTime<Utc>>,
    pub events: Vec<AuditEvent>,
    #[serde(with = "b64")]
    pub seal: Vec<u8>,
}

impl AuditSegment {
    pub(crate) fn seal_bytes(&self) -> Vec<u8> {
        let opened = self.opened_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let closed = self
            .closed_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .unwrap_or_default();
        let index = self.index.to_be_bytes();
        let count = (self.events.len() as u64).to_be_bytes();
        let last = self
            .events
            .last()
            .map(|e| e.signature.as_slice())
            .unwrap_or(&[]);

        let mut out = Vec::with_capacity(192);
        out.extend_from_slice(SEGMENT_DOMAIN);
        for field in [
            self.segment_id.as_bytes().as_slice(),
            index.as_slice(),
            opened.as_bytes(),
            closed.as_bytes(),
            count.as_slice(),
            last,
        ] {
            out.extend_from_slice(&(field.len() as u64).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("event {sequence} has an invalid signature")]
    EventSignature { sequence: u64 },

    #[error("event {sequence} does not chain to its predecessor")]
    BrokenChain { sequence: u64 },

    #[error("event {sequence} breaks sequence continuity")]
    SequenceGap { sequence: u64 },

    #[error("segment seal is invalid")]
    Seal,
}

/// Verify a segment using only its own contents and the signing key.
pub fn verify_segment(segment: &AuditSegment, signer: &Signer) -> Result<(), VerifyError> {
    let mut prev: &[u8] = &[];
    let mut expected_sequence: Option<u64> = None;

    for event in &segment.events {
        if let Some(expected) = expected_sequence {
            if event.sequence != expected {
                return Err(VerifyError::SequenceGap {
                    sequence: event.sequence,
                });
            }
        }
        if event.prev_signature.as_slice() != prev {
            return Err(VerifyError::BrokenChain {
                sequence: event.sequence,
            });
        }
        if !signer.verify(&event.signing_bytes(&segment.segment_id), &event.signature) {
            return Err(VerifyError::EventSignature {
                sequence: event.sequence,
            });
        }
        prev = &event.signature;
        expected_sequence = Some(event.sequence + 1);
    }

    if !signer.verify(&segment.seal_bytes(), &segment.seal) {
        return Err(VerifyError::Seal);
    }
    Ok(())
}
