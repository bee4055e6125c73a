//! Audit Writer (component I): an append-only JSONL log of every decision
//! the gateway makes, with a bounded in-memory fallback for the window
//! where the backing store is unavailable.

#![deny(unsafe_code)]

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use sentinel_decision::{EmittedDecision, RiskLevel};
use sentinel_mode::Mode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Monotonic identifier assigned to each audit entry on append.
pub type AuditId = u64;

/// A rule that contributed to a request's risk score, as recorded in an
/// audit entry. Kept local to this crate rather than imported from the
/// risk evaluator so the audit schema doesn't shift if that crate's
/// internal reporting type does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub name: String,
    pub risk_score_modifier: f64,
}

/// Errors the audit log's I/O operations can return.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid: {0}")]
    Invalid(String),
}

/// One audited gateway decision, matching the distilled audit entry
/// schema field for field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub agent_id: String,
    pub action_type: String,
    pub target_resource: String,
    /// Parameters after PII masking; raw parameters must never reach here.
    pub sanitized_parameters: serde_json::Value,
    pub decision: EmittedDecision,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub matched_rules: Vec<MatchedRule>,
    pub mode_in_effect: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub forwarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_response_digest: Option<String>,
}

/// A persisted audit entry with its assigned id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub ts_ms: u64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Explicit field order, independent of struct declaration order, so the
/// on-disk shape is stable even if [`AuditEntry`] grows new fields later.
#[derive(Serialize)]
struct AuditRecordSer<'a> {
    id: AuditId,
    ts_ms: u64,
    request_id: &'a str,
    agent_id: &'a str,
    action_type: &'a str,
    target_resource: &'a str,
    sanitized_parameters: &'a serde_json::Value,
    decision: &'a EmittedDecision,
    risk_score: f64,
    risk_level: &'a RiskLevel,
    matched_rules: &'a [MatchedRule],
    mode_in_effect: &'a Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    approval_id: Option<&'a str>,
    forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_response_digest: Option<&'a str>,
}

fn to_jsonl_line(record: &AuditRecord) -> Result<String, AuditError> {
    let ser = AuditRecordSer {
        id: record.id,
        ts_ms: record.ts_ms,
        request_id: &record.entry.request_id,
        agent_id: &record.entry.agent_id,
        action_type: &record.entry.action_type,
        target_resource: &record.entry.target_resource,
        sanitized_parameters: &record.entry.sanitized_parameters,
        decision: &record.entry.decision,
        risk_score: record.entry.risk_score,
        risk_level: &record.entry.risk_level,
        matched_rules: &record.entry.matched_rules,
        mode_in_effect: &record.entry.mode_in_effect,
        approval_id: record.entry.approval_id.as_deref(),
        forwarded: record.entry.forwarded,
        target_response_digest: record.entry.target_response_digest.as_deref(),
    };
    Ok(serde_json::to_string(&ser)?)
}

/// Lowercase hex SHA-256 digest of `bytes`, the default choice for
/// `target_response_digest` when full-body durability is not configured.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Append-only JSONL-backed audit log.
pub struct JsonlAuditLog {
    path: String,
}

impl JsonlAuditLog {
    /// Create or open a log file at `path`.
    ///
    /// # Errors
    /// Returns [`AuditError::Io`] if the file cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let p = path.as_ref();
        if !p.exists() {
            OpenOptions::new().create(true).write(true).truncate(true).open(p)?;
        }
        Ok(Self { path: p.to_string_lossy().into_owned() })
    }

    /// Append a single entry, assigning it `id`/`ts_ms`.
    ///
    /// # Errors
    /// Returns [`AuditError::Io`] on a write failure — the caller is
    /// expected to fall back to [`DegradedAuditBuffer`] in that case.
    pub fn append(&self, id: AuditId, ts_ms: u64, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let record = AuditRecord { id, ts_ms, entry };
        let line = to_jsonl_line(&record)?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(record)
    }

    /// Read every record with id in `[start, end)`.
    ///
    /// # Errors
    /// Returns [`AuditError::Io`] or [`AuditError::Serde`].
    pub fn read_range(&self, start: AuditId, end: AuditId) -> Result<Vec<AuditRecord>, AuditError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let rec: AuditRecord = serde_json::from_str(&line)?;
            if rec.id >= start && rec.id < end {
                out.push(rec);
            }
        }
        Ok(out)
    }
}

/// Bounded drop-oldest buffer used while the backing audit store is
/// unreachable, so a burst of requests during an outage degrades rather
/// than blocking or silently losing the whole window of activity.
pub struct DegradedAuditBuffer {
    capacity: usize,
    buffer: Mutex<VecDeque<AuditRecord>>,
    dropped: std::sync::atomic::AtomicU64,
}

impl DegradedAuditBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, buffer: Mutex::new(VecDeque::with_capacity(capacity)), dropped: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Push a record, dropping the oldest buffered record if at capacity.
    pub fn push(&self, record: AuditRecord) {
        let mut guard = self.buffer.lock().expect("audit buffer lock poisoned");
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        guard.push_back(record);
    }

    /// Drain every buffered record, e.g. once the store becomes reachable
    /// again and they can be flushed to it.
    pub fn drain(&self) -> Vec<AuditRecord> {
        let mut guard = self.buffer.lock().expect("audit buffer lock poisoned");
        guard.drain(..).collect()
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().expect("audit buffer lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
