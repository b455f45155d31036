use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::db::{self, KvStore};

/// Storage key for the exemption set.
pub const EXEMPTIONS_KEY: &str = "exemptions";

/// Actors the guard never acts against. Mutations write through to storage
/// best-effort; the in-memory set stays authoritative either way.
#[derive(Debug)]
pub struct ExemptionRegistry {
    inner: RwLock<HashSet<u64>>,
    kv: Arc<dyn KvStore>,
}

impl ExemptionRegistry {
    pub fn new(initial: HashSet<u64>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            inner: RwLock::new(initial),
            kv,
        }
    }

    /// Load the persisted set, falling back to empty.
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let list: Vec<u64> = db::load_or(kv.as_ref(), EXEMPTIONS_KEY, Vec::new()).await;
        Self::new(list.into_iter().collect(), kv)
    }

    pub async fn is_exempt(&self, user_id: u64) -> bool {
        self.inner.read().await.contains(&user_id)
    }

    /// Add an actor. Returns false (and skips persistence) when already
    /// present.
    pub async fn add(&self, user_id: u64) -> bool {
        let snapshot = {
            let mut set = self.inner.write().await;
            if !set.insert(user_id) {
                return false;
            }
            sorted(&set)
        };
        self.persist(snapshot).await;
        true
    }

    /// Remove an actor. Removing an absent member is a no-op returning false.
    pub async fn remove(&self, user_id: u64) -> bool {
        let snapshot = {
            let mut set = self.inner.write().await;
            if !set.remove(&user_id) {
                return false;
            }
            sorted(&set)
        };
        self.persist(snapshot).await;
        true
    }

    pub async fn list(&self) -> Vec<u64> {
        sorted(&*self.inner.read().await)
    }

    async fn persist(&self, list: Vec<u64>) {
        match serde_json::to_value(&list) {
            Ok(v) => {
                if let Err(e) = self.kv.save(EXEMPTIONS_KEY, &v).await {
                    tracing::warn!(error = ?e, "exemptions persist failed");
                }
            }
            Err(e) => tracing::warn!(error = ?e, "exemptions serialize failed"),
        }
    }
}

fn sorted(set: &HashSet<u64>) -> Vec<u64> {
    let mut list: Vec<u64> = set.iter().copied().collect();
    list.sort_unstable();
    list
}
