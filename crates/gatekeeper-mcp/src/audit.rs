//! Audit trail for authentication decisions
//!
//! Entries distinguish what a component *reported* from what the sink
//! has *verified*: a recording sink stores the reported outcome as-is
//! and leaves the verified fields empty for a downstream integrity
//! pass to fill in. The bundled in-memory sink keeps a bounded window
//! of recent entries and hands evicted history to an overflow callback.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::constants::DEFAULT_AUDIT_CAPACITY;
use crate::error::{AuthError, Result};

/// One audit record.
///
/// `source` identifies the emitting component and must be non-empty;
/// sinks reject entries without one.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    /// Unix seconds at construction
    pub timestamp: u64,
    /// Emitting component, e.g. `gatekeeper.authenticator`
    pub source: String,
    /// Operation the entry describes
    pub action: String,
    /// Outcome as reported by the emitting component
    pub reported_success: bool,
    /// Outcome confirmed by an integrity pass; `None` until verified
    pub verified_success: Option<bool>,
    /// Unix seconds of verification, when it has happened
    pub verified_at: Option<u64>,
    /// Content hash set by an integrity pass over the stored record
    pub integrity_hash: Option<String>,
    pub user_id: Option<String>,
    pub reason: Option<String>,
    pub error_code: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(source: impl Into<String>, action: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: unix_now(),
            source: source.into(),
            action: action.into(),
            reported_success: success,
            verified_success: None,
            verified_at: None,
            integrity_hash: None,
            user_id: None,
            reason: None,
            error_code: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Mark the entry verified. Used by integrity passes, not emitters.
    #[must_use]
    pub fn verified(mut self, success: bool) -> Self {
        self.verified_success = Some(success);
        self.verified_at = Some(unix_now());
        self
    }

    #[must_use]
    pub fn with_integrity_hash(mut self, hash: impl Into<String>) -> Self {
        self.integrity_hash = Some(hash.into());
        self
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Destination for audit entries.
///
/// Implementations must be cheap enough to call on every
/// authentication attempt and must not panic.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Discards every entry. The default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: AuditEntry) -> Result<()> {
        Ok(())
    }
}

type OverflowCallback = Box<dyn Fn(&[AuditEntry]) + Send + Sync>;

/// Bounded in-memory sink.
///
/// Holds at most `capacity` entries, evicting the oldest. When a
/// record call would exceed capacity, the overflow callback receives a
/// snapshot of all entries including the incoming one, so no entry is
/// lost before a callback has seen it.
pub struct MemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    on_overflow: Option<OverflowCallback>,
}

impl std::fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.lock().len())
            .field("on_overflow", &self.on_overflow.is_some())
            .finish()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl MemoryAuditSink {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "audit capacity must be non-zero");
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            on_overflow: None,
        }
    }

    /// Install a callback that receives the full entry window whenever
    /// recording would exceed capacity
    #[must_use]
    pub fn with_overflow_callback(
        mut self,
        callback: impl Fn(&[AuditEntry]) + Send + Sync + 'static,
    ) -> Self {
        self.on_overflow = Some(Box::new(callback));
        self
    }

    /// Snapshot of the current window, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        if entry.source.trim().is_empty() {
            return Err(AuthError::AuditSourceMissing);
        }

        // The snapshot is taken while holding the lock so the callback
        // sees a consistent window; the callback itself runs unlocked
        // so it may call back into the sink.
        let overflow_snapshot = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            if entries.len() > self.capacity {
                let snapshot: Vec<AuditEntry> = entries.iter().cloned().collect();
                entries.pop_front();
                Some(snapshot)
            } else {
                None
            }
        };

        if let Some(snapshot) = overflow_snapshot
            && let Some(callback) = &self.on_overflow
        {
            callback(&snapshot);
        }

        Ok(())
    }
}
