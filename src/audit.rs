//! Audit trail for authentication events.
//!
//! Sinks are fire-and-forget: a request that performed its operation
//! succeeds even when the trail could not be written. Implementations log
//! internal failures and drop the event, never propagate them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: String,
    pub occurred_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
    /// Operation-specific context. Never contains secrets.
    pub metadata: serde_json::Value,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured `target: "audit"` log records.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEvent) {
        tracing::info!(
            target: "audit",
            event = %entry.event,
            user_id = entry.user_id.as_deref().unwrap_or("-"),
            trace_id = entry.trace_id.as_deref().unwrap_or("-"),
            metadata = %entry.metadata,
            "audit event recorded"
        );
    }
}

/// Buffers events in memory so tests can assert on the trail.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
