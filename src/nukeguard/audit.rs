use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::db::{self, KvStore};

/// Storage key for the audit document.
pub const AUDIT_KEY: &str = "audit_log";

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub entry: String,
}

/// Per-guild append-only audit trail with write-through persistence.
/// Growth is unbounded by design; display surfaces truncate.
#[derive(Debug)]
pub struct AuditLog {
    entries: DashMap<u64, Vec<AuditEntry>>,
    kv: Arc<dyn KvStore>,
}

impl AuditLog {
    pub fn new(initial: HashMap<u64, Vec<AuditEntry>>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            entries: initial.into_iter().collect(),
            kv,
        }
    }

    /// Load the persisted trail, falling back to empty.
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let initial = db::load_or(kv.as_ref(), AUDIT_KEY, HashMap::new()).await;
        Self::new(initial, kv)
    }

    /// Stamp and append one line for a guild, then persist the document.
    pub async fn append(&self, guild_id: u64, entry: impl Into<String>) {
        {
            let mut guild_entries = self.entries.entry(guild_id).or_default();
            guild_entries.push(AuditEntry {
                at: Utc::now(),
                entry: entry.into(),
            });
        }
        self.persist().await;
    }

    /// Newest entries first, up to `limit`.
    pub fn recent(&self, guild_id: u64, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .get(&guild_id)
            .map(|v| v.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn guild_entry_count(&self, guild_id: u64) -> usize {
        self.entries.get(&guild_id).map_or(0, |v| v.len())
    }

    async fn persist(&self) {
        let copy: HashMap<u64, Vec<AuditEntry>> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        match serde_json::to_value(&copy) {
            Ok(v) => {
                if let Err(e) = self.kv.save(AUDIT_KEY, &v).await {
                    tracing::warn!(error = ?e, "audit persist failed");
                }
            }
            Err(e) => tracing::warn!(error = ?e, "audit serialize failed"),
        }
    }
}
