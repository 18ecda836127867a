//! Audit emission.
//!
//! Handlers open an [`AuditGuard`] at the start of an operation and mutate the
//! record through it. The record is handed to the sink exactly once, when the
//! guard drops, so every exit path (early return, `?`, panic) is covered.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use accounts_core::{AuditRecord, EventStatus, RequestContext};
use tracing::info;

/// Destination for finished audit records.
pub trait AuditSink: fmt::Debug + Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Writes each record as one structured `tracing` event on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        let data = serde_json::to_string(&record.event_data).unwrap_or_default();
        info!(
            target: "audit",
            event = %record.event_name,
            status = record.status.as_str(),
            user_id = %record.actor.user_id,
            session_id = %record.actor.session_id,
            ip_address = %record.actor.ip_address,
            client = %record.actor.client,
            forwarded_for = %record.actor.forwarded_for,
            path = %record.path,
            request_id = %record.request_id,
            data = %data,
            "audit"
        );
    }
}

/// Open audit record that emits itself when dropped.
///
/// Starts in the `fail` state; call [`AuditRecord::success`] through the guard
/// once the operation succeeds.
pub struct AuditGuard {
    record: AuditRecord,
    sink: Arc<dyn AuditSink>,
}

impl AuditGuard {
    #[must_use]
    pub fn open(sink: Arc<dyn AuditSink>, ctx: &RequestContext, event: &str) -> Self {
        Self {
            record: AuditRecord::new(ctx, event, EventStatus::Fail),
            sink,
        }
    }
}

impl Deref for AuditGuard {
    type Target = AuditRecord;

    fn deref(&self) -> &AuditRecord {
        &self.record
    }
}

impl DerefMut for AuditGuard {
    fn deref_mut(&mut self) -> &mut AuditRecord {
        &mut self.record
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        self.sink.emit(&self.record);
    }
}

impl fmt::Debug for AuditGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditGuard")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Sink that keeps records in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}
