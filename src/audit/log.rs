// Append-only audit log with segment rotation
// Author: kelexine (https://github.com/kelexine)

use super::models::{AuditEvent, AuditEventType, AuditRecord, AuditSegment};
use crate::config::AuditConfig;
use crate::integrity::Signer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Single append-only sink for audit events.
///
/// All appends go through one mutex, so events are totally ordered and a
/// rotation can never split an event across segments.
pub struct AuditLog {
    signer: Signer,
    config: AuditConfig,
    state: Mutex<LogState>,
}

struct LogState {
    next_sequence: u64,
    next_index: u64,
    current: OpenSegment,
    closed: VecDeque<AuditSegment>,
}

/// A rotation's effects, applied to disk once the state lock is released.
struct Rotation {
    closed: AuditSegment,
    /// Indices of segments that fell out of retention.
    dropped: Vec<u64>,
}

struct OpenSegment {
    segment_id: Uuid,
    index: u64,
    opened_at: DateTime<Utc>,
    events: Vec<AuditEvent>,
}

impl OpenSegment {
    fn new(index: u64) -> Self {
        Self {
            segment_id: Uuid::new_v4(),
            index,
            opened_at: Utc::now(),
            events: Vec::new(),
        }
    }

    fn seal(&self, signer: &Signer, closed_at: Option<DateTime<Utc>>) -> AuditSegment {
        let mut segment = AuditSegment {
            segment_id: self.segment_id,
            index: self.index,
            opened_at: self.opened_at,
            closed_at,
            events: self.events.clone(),
            seal: Vec::new(),
        };
        segment.seal = signer.sign(&segment.seal_bytes());
        segment
    }
}

impl AuditLog {
    pub fn new(signer: Signer, config: AuditConfig) -> Self {
        if let Some(dir) = &config.directory {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Cannot create audit directory {}: {}", dir, e);
            }
        }

        Self {
            signer,
            config,
            state: Mutex::new(LogState {
                next_sequence: 0,
                next_index: 1,
                current: OpenSegment::new(0),
                closed: VecDeque::new(),
            }),
        }
    }

    /// Append an event. Never fails; persistence problems are logged.
    pub fn record(&self, record: AuditRecord) {
        let mut to_persist = Vec::new();
        {
            let mut state = self.state.lock();

            let age = Utc::now().signed_duration_since(state.current.opened_at);
            if !state.current.events.is_empty()
                && age.num_seconds() >= self.config.max_segment_age_seconds as i64
            {
                to_persist.push(self.rotate_locked(&mut state, "age"));
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let prev_signature = state
                .current
                .events
                .last()
                .map(|e| e.signature.clone())
                .unwrap_or_default();

            let mut event = AuditEvent {
                sequence,
                correlation_id: record.correlation_id,
                event_type: record.event_type,
                timestamp: Utc::now(),
                payload_digest: record.payload_digest,
                prev_signature,
                signature: Vec::new(),
            };
            event.signature = self
                .signer
                .sign(&event.signing_bytes(&state.current.segment_id));
            state.current.events.push(event);

            if state.current.events.len() >= self.config.max_events_per_segment {
                to_persist.push(self.rotate_locked(&mut state, "size"));
            }
        }

        crate::metrics::record_audit_event(record.event_type.as_str());
        for rotation in &to_persist {
            self.persist(rotation);
        }
    }

    /// Close the current segment now, if it holds any events.
    pub fn rotate(&self) -> Option<AuditSegment> {
        let rotation = {
            let mut state = self.state.lock();
            if state.current.events.is_empty() {
                return None;
            }
            self.rotate_locked(&mut state, "manual")
        };
        self.persist(&rotation);
        Some(rotation.closed)
    }

    fn rotate_locked(&self, state: &mut LogState, reason: &str) -> Rotation {
        let index = state.next_index;
        state.next_index += 1;
        let finished = std::mem::replace(&mut state.current, OpenSegment::new(index));
        let closed = finished.seal(&self.signer, Some(Utc::now()));

        state.closed.push_back(closed.clone());
        let mut dropped = Vec::new();
        while state.closed.len() > self.config.max_segments {
            if let Some(segment) = state.closed.pop_front() {
                debug!("Audit segment {} dropped by retention", segment.index);
                dropped.push(segment.index);
            }
        }

        crate::metrics::record_audit_rotation(reason);
        debug!(
            "Rotated audit segment {} ({} events, reason: {})",
            closed.index,
            closed.events.len(),
            reason
        );
        Rotation { closed, dropped }
    }

    /// Write the closed segment as `segment-<index>.json` via temp file and
    /// rename, then delete the files of segments retention let go.
    fn persist(&self, rotation: &Rotation) {
        let Some(dir) = &self.config.directory else {
            return;
        };
        let dir = Path::new(dir);
        if let Err(e) = write_segment(dir, &rotation.closed) {
            warn!("Failed to persist audit segment {}: {}", rotation.closed.index, e);
        }
        for index in &rotation.dropped {
            let path = segment_path(dir, *index);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove audit segment {}: {}", path.display(), e),
            }
        }
    }

    /// Retained closed segments followed by a sealed snapshot of the open one.
    pub fn export(&self) -> Vec<AuditSegment> {
        let state = self.state.lock();
        let mut segments: Vec<AuditSegment> = state.closed.iter().cloned().collect();
        if !state.current.events.is_empty() {
            segments.push(state.current.seal(&self.signer, None));
        }
        segments
    }

    /// Events of one type across retained segments, oldest first.
    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        let state = self.state.lock();
        state
            .closed
            .iter()
            .flat_map(|s| s.events.iter())
            .chain(state.current.events.iter())
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Number of retained events of `event_type`, optionally for one digest.
    pub fn count(&self, event_type: AuditEventType, payload_digest: Option<&str>) -> usize {
        self.events_of(event_type)
            .iter()
            .filter(|e| payload_digest.map_or(true, |d| e.payload_digest == d))
            .count()
    }

    /// Total events retained.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.closed.iter().map(|s| s.events.len()).sum::<usize>() + state.current.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}

fn write_segment(dir: &Path, segment: &AuditSegment) -> std::io::Result<()> {
    let final_path = segment_path(dir, segment.index);
    let tmp_path = dir.join(format!(".segment-{:08}.json.tmp", segment.index));
    let body = serde_json::to_vec_pretty(segment)?;
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, &final_path)
}

pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("segment-{:08}.json", index))
}

/// Read segments previously written to `dir`, ordered by index.
pub fn load_segments(dir: &Path) -> std::io::Result<Vec<AuditSegment>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_segment = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("segment-") && n.ends_with(".json"));
        if !is_segment {
            continue;
        }
        let raw = std::fs::read(&path)?;
        segments.push(serde_json::from_slice::<AuditSegment>(&raw)?);
    }
    segments.sort_by_key(|s| s.index);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::models::verify_segment;

    fn log(max_events: usize, max_segments: usize) -> AuditLog {
        AuditLog::new(
            Signer::new(&[9u8; 32]).unwrap(),
            AuditConfig {
                max_events_per_segment: max_events,
                max_segment_age_seconds: 3600,
                max_segments,
                directory: None,
            },
        )
    }

    #[test]
    fn test_chain_within_segment() {
        let log = log(100, 4);
        log.record(AuditRecord::new("c1", AuditEventType::Admit, b"alice"));
        log.record(AuditRecord::new("c1", AuditEventType::CacheMiss, b"key"));

        let segments = log.export();
        assert_eq!(segments.len(), 1);
        let events = &segments[0].events;
        assert!(events[0].prev_signature.is_empty());
        assert_eq!(events[1].prev_signature, events[0].signature);
        assert!(verify_segment(&segments[0], log.signer()).is_ok());
    }

    #[test]
    fn test_size_rotation_keeps_every_event_once() {
        let log = log(3, 100);
        for i in 0..10 {
            log.record(AuditRecord::new(format!("c{}", i), AuditEventType::CacheHit, b"k"));
        }
        let segments = log.export();
        let sequences: Vec<u64> = segments
            .iter()
            .flat_map(|s| s.events.iter().map(|e| e.sequence))
            .collect();
        assert_eq!(sequences, (0..10).collect::<Vec<_>>());
        assert_eq!(segments.iter().filter(|s| s.is_closed()).count(), 3);
        for segment in &segments {
            assert!(verify_segment(segment, log.signer()).is_ok());
        }
    }

    #[test]
    fn test_retention_drops_oldest() {
        let log = log(1, 2);
        for i in 0..5 {
            log.record(AuditRecord::new(format!("c{}", i), AuditEventType::Deny, b"o"));
        }
        let segments = log.export();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].events[0].sequence, 3);
        assert_eq!(segments[1].events[0].sequence, 4);
    }

    #[test]
    fn test_manual_rotate_on_empty_is_noop() {
        let log = log(10, 2);
        assert!(log.rotate().is_none());
        log.record(AuditRecord::new("c", AuditEventType::Admit, b"o"));
        assert!(log.rotate().is_some());
        assert!(log.rotate().is_none());
    }
}
