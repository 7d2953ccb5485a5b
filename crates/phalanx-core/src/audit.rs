//! Append-only audit log
//!
//! Phase transitions and terminal task events are recorded for postmortem.
//! Single-writer violations (spec'd field ownership between coordinator,
//! merge worker and reaper) are detectable from this log.

use crate::error::StoreError;
use crate::store::{keys, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id
    pub id: Uuid,
    /// Event name, e.g. `task_claimed`, `phase_completed`
    pub event: String,
    /// Writer that produced the entry (`coordinator`, `merge`, `reaper`)
    pub writer: String,
    /// Event-specific details
    pub details: serde_json::Value,
    /// Record time
    pub timestamp: DateTime<Utc>,
}

/// Append an entry to the audit log.
pub async fn record(
    store: &dyn StateStore,
    writer: &str,
    event: &str,
    details: serde_json::Value,
) -> Result<(), StoreError> {
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        event: event.to_string(),
        writer: writer.to_string(),
        details,
        timestamp: Utc::now(),
    };
    let payload = serde_json::to_string(&entry)?;
    store.rpush(keys::AUDIT_LOG, &payload).await?;
    Ok(())
}

/// Read the full audit log (newest last).
pub async fn read_all(store: &dyn StateStore) -> Result<Vec<AuditEntry>, StoreError> {
    let raw = store.lrange(keys::AUDIT_LOG, 0, -1).await?;
    let mut entries = Vec::with_capacity(raw.len());
    for line in raw {
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
