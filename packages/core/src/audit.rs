//! Append-only audit log of security-relevant events.
//!
//! Entries are hash-chained (SHA-256 over the previous digest and the entry
//! fields) so removal or edits inside the retained window are detectable.
//! Critical entries are persisted to the sink inside [`AuditLog::record`],
//! which fails if the sink refuses them; routine entries wait for
//! [`AuditLog::flush`]. The retention sweep is the
//! only way an entry leaves the log.

use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use crate::utils::sync::lock;
use crate::utils::time::{millis, to_utc, Clock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    SessionEstablished,
    /// Scheduled rotation (message count, interval, level change)
    KeyRotated,
    /// Rotation requested explicitly or caused by revocation
    ForcedRotation,
    SessionRetired,
    AuthenticationFailure,
    ReplayRejected,
    MalformedEnvelope,
    SessionExpired,
    UnknownPeer,
    /// Inbound envelope refused for any other reason (e.g. revoked sender)
    MessageRejected,
    VerificationFailed,
    TrustChanged,
    PeerRevoked,
    KeyMismatch,
    EstablishmentTimeout,
    SendRefused,
}

impl AuditKind {
    /// Critical kinds reach the durable sink before `record` returns.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            AuditKind::AuthenticationFailure
                | AuditKind::ReplayRejected
                | AuditKind::PeerRevoked
                | AuditKind::VerificationFailed
                | AuditKind::ForcedRotation
                | AuditKind::KeyMismatch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub kind: AuditKind,
    pub devices: Vec<String>,
    pub outcome: AuditOutcome,
    pub detail: String,
    /// Hex digest of the previous entry (zeros for the first)
    pub prev_digest: String,
    pub digest: String,
}

impl AuditEntry {
    fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.timestamp_ms.to_be_bytes());
        hasher.update(format!("{:?}", self.kind).as_bytes());
        for device in &self.devices {
            hasher.update((device.len() as u32).to_be_bytes());
            hasher.update(device.as_bytes());
        }
        hasher.update([matches!(self.outcome, AuditOutcome::Success) as u8]);
        hasher.update(self.detail.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices: Vec<&str> = self.devices.iter().map(|d| short_id(d)).collect();
        write!(
            f,
            "#{} {} {:?} {:?} [{}] {}",
            self.sequence,
            to_utc(self.timestamp_ms).to_rfc3339(),
            self.kind,
            self.outcome,
            devices.join(","),
            self.detail
        )
    }
}

/// Durable destination for audit entries.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Entries are durable once this returns `Ok`.
    fn persist(&self, entries: &[AuditEntry]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }
}

impl AuditSink for MemorySink {
    fn persist(&self, entries: &[AuditEntry]) -> Result<()> {
        lock(&self.entries).extend_from_slice(entries);
        Ok(())
    }
}

/// JSON lines appended to a file, fsynced per batch.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn persist(&self, entries: &[AuditEntry]) -> Result<()> {
        let file = lock(&self.file);
        let mut writer = BufWriter::new(&*file);
        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);
        file.sync_data()?;
        Ok(())
    }
}

#[derive(Debug)]
struct LogState {
    entries: Vec<AuditEntry>,
    /// Entries not yet handed to the sink, in order
    pending: Vec<AuditEntry>,
    next_sequence: u64,
    last_digest: String,
}

#[derive(Debug)]
pub struct AuditLog {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AuditSink>,
    state: Mutex<LogState>,
}

impl AuditLog {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            clock,
            sink,
            state: Mutex::new(LogState {
                entries: Vec::new(),
                pending: Vec::new(),
                next_sequence: 1,
                last_digest: hex::encode([0u8; 32]),
            }),
        }
    }

    /// Append an entry. Critical kinds are handed to the sink before this
    /// returns; if the sink refuses them the entry stays pending (the next
    /// flush retries) and the error is returned.
    pub fn record(
        &self,
        kind: AuditKind,
        devices: &[&str],
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> Result<AuditEntry> {
        let mut state = lock(&self.state);
        let entry = self.append(&mut state, kind, devices, outcome, detail.into());

        if kind.is_critical() {
            // earlier routine entries go first so the sink keeps log order
            if let Err(e) = self.sink.persist(&state.pending) {
                error!(target: "audit", error = %e, kind = ?kind, "Critical audit entry not persisted");
                return Err(e);
            }
            state.pending.clear();
        }
        Ok(entry)
    }

    /// Append a routine entry; it reaches the sink with the next flush or
    /// critical entry.
    pub fn note(
        &self,
        kind: AuditKind,
        devices: &[&str],
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> AuditEntry {
        debug_assert!(!kind.is_critical(), "critical audit kinds go through record");
        let mut state = lock(&self.state);
        self.append(&mut state, kind, devices, outcome, detail.into())
    }

    fn append(
        &self,
        state: &mut LogState,
        kind: AuditKind,
        devices: &[&str],
        outcome: AuditOutcome,
        detail: String,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            sequence: state.next_sequence,
            timestamp_ms: self.clock.now_millis(),
            kind,
            devices: devices.iter().map(|d| d.to_string()).collect(),
            outcome,
            detail,
            prev_digest: state.last_digest.clone(),
            digest: String::new(),
        };
        entry.digest = entry.compute_digest();

        state.next_sequence += 1;
        state.last_digest = entry.digest.clone();
        state.entries.push(entry.clone());
        state.pending.push(entry.clone());

        debug!(
            target: "audit",
            sequence = entry.sequence,
            kind = ?kind,
            outcome = ?outcome,
            "Audit entry recorded"
        );
        entry
    }

    /// Persist buffered routine entries. Returns how many were written.
    pub fn flush(&self) -> Result<usize> {
        let mut state = lock(&self.state);
        if state.pending.is_empty() {
            return Ok(0);
        }
        self.sink.persist(&state.pending)?;
        let written = state.pending.len();
        state.pending.clear();
        debug!(target: "audit", written, "Audit log flushed");
        Ok(written)
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.state).entries.clone()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        lock(&self.state)
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Drop entries older than `older_than`. Returns how many were removed.
    ///
    /// Pending entries are flushed first so nothing is lost unpersisted.
    pub fn sweep_retention(&self, older_than: Duration) -> Result<usize> {
        self.flush()?;
        let cutoff = self.clock.now_millis().saturating_sub(millis(older_than));
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp_ms >= cutoff);
        let removed = before - state.entries.len();
        if removed > 0 {
            warn!(target: "audit", removed, "Retention sweep removed audit entries");
        }
        Ok(removed)
    }

    /// Check digests and links of the retained entries.
    pub fn verify_chain(&self) -> Result<()> {
        let state = lock(&self.state);
        let mut previous: Option<&AuditEntry> = None;
        for entry in &state.entries {
            if entry.compute_digest() != entry.digest {
                return Err(PalisadeError::StorageError(format!(
                    "audit entry {} digest mismatch",
                    entry.sequence
                )));
            }
            if let Some(prev) = previous {
                if entry.prev_digest != prev.digest || entry.sequence != prev.sequence + 1 {
                    return Err(PalisadeError::StorageError(format!(
                        "audit chain broken before entry {}",
                        entry.sequence
                    )));
                }
            }
            previous = Some(entry);
        }
        Ok(())
    }
}
