//! State Manager (C2): versioned key-value store with history, snapshots,
//! and a pluggable durable backend.

pub mod backend;
pub mod json_bridge;

use crate::types::state::ResourceKind;
use crate::types::{OrchestratorError, OrchestratorResult, StateEntry, StateSnapshot, Value};
use backend::StateBackend;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Validates whether a transition from `previous` to `next` is legal for a
/// given resource kind. Registered per kind; kinds with no validator allow
/// any transition.
pub trait TransitionValidator: Send + Sync {
    fn validate(&self, previous: Option<&Value>, next: &Value) -> OrchestratorResult<()>;
}

struct KeyHistory {
    /// All versions for a key, oldest first. Version `n` lives at index
    /// `n - 1`; the invariant that versions are gap-free starting at 1 holds
    /// by construction (only `push` ever appends).
    versions: Vec<StateEntry>,
}

pub struct StateManager {
    backend: Arc<dyn StateBackend>,
    history: RwLock<HashMap<String, KeyHistory>>,
    tombstoned: RwLock<std::collections::HashSet<String>>,
    validators: RwLock<HashMap<ResourceKind, Arc<dyn TransitionValidator>>>,
}

impl StateManager {
    pub async fn new(backend: Arc<dyn StateBackend>) -> OrchestratorResult<Self> {
        let manager = Self {
            backend,
            history: RwLock::new(HashMap::new()),
            tombstoned: RwLock::new(std::collections::HashSet::new()),
            validators: RwLock::new(HashMap::new()),
        };
        manager.hydrate().await?;
        Ok(manager)
    }

    async fn hydrate(&self) -> OrchestratorResult<()> {
        let loaded = self.backend.load_all().await?;
        let mut history = self.history.write().await;
        for (key, entry) in loaded {
            history.insert(key, KeyHistory { versions: vec![entry] });
        }
        Ok(())
    }

    pub async fn register_validator(&self, kind: ResourceKind, validator: Arc<dyn TransitionValidator>) {
        self.validators.write().await.insert(kind, validator);
    }

    /// Atomically appends a new version. Rejects with `InvalidTransition` if
    /// a registered validator for `kind` disallows the transition.
    pub async fn set_state(
        &self,
        key: impl Into<String>,
        value: Value,
        kind: ResourceKind,
        metadata: Option<HashMap<String, Value>>,
        transition_reason: Option<String>,
    ) -> OrchestratorResult<StateEntry> {
        let key = key.into();
        let mut history = self.history.write().await;

        let previous_state = history
            .get(&key)
            .and_then(|h| h.versions.last())
            .map(|e| Box::new(e.value.clone()));

        if let Some(validator) = self.validators.read().await.get(&kind) {
            validator.validate(previous_state.as_deref(), &value)?;
        }

        let next_version = history.get(&key).map(|h| h.versions.len() as u64 + 1).unwrap_or(1);

        let entry = StateEntry {
            key: key.clone(),
            resource_kind: kind,
            value,
            version: next_version,
            previous_state,
            transition_reason,
            timestamp: Utc::now(),
            metadata: metadata.unwrap_or_default(),
        };

        self.backend.append(&entry).await?;
        history
            .entry(key.clone())
            .or_insert_with(|| KeyHistory { versions: Vec::new() })
            .versions
            .push(entry.clone());
        self.tombstoned.write().await.remove(&key);

        Ok(entry)
    }

    pub async fn get_state(&self, key: &str) -> Option<StateEntry> {
        if self.tombstoned.read().await.contains(key) {
            return None;
        }
        self.history.read().await.get(key).and_then(|h| h.versions.last().cloned())
    }

    /// Newest-first.
    pub async fn get_history(&self, key: &str, limit: Option<usize>) -> Vec<StateEntry> {
        let history = self.history.read().await;
        match history.get(key) {
            Some(h) => {
                let mut versions: Vec<StateEntry> = h.versions.clone();
                versions.reverse();
                if let Some(limit) = limit {
                    versions.truncate(limit);
                }
                versions
            }
            None => Vec::new(),
        }
    }

    /// Point-in-time consistent across keys: the latest entry per key at the
    /// moment the read lock is held.
    pub async fn snapshot(&self) -> OrchestratorResult<String> {
        let history = self.history.read().await;
        let mut entries = HashMap::new();
        for (key, h) in history.iter() {
            if let Some(latest) = h.versions.last() {
                entries.insert(key.clone(), latest.clone());
            }
        }
        let taken_at = Utc::now();
        let hash_input = serde_json::to_vec(&entries)
            .map_err(|e| OrchestratorError::SerializationError(e.to_string()))?;
        let snapshot = StateSnapshot {
            snapshot_id: crate::types::content_id(&hash_input),
            taken_at,
            entries,
        };
        self.backend.write_snapshot(&snapshot).await?;
        Ok(snapshot.snapshot_id)
    }

    /// Replaces the in-memory index's *values* with the snapshot's, without
    /// ever rewinding a key's version counter: each restored key gets a fresh
    /// version appended carrying the snapshotted value, so the gap-free
    /// monotonic invariant holds and prior (now-superseded) history is
    /// retained rather than deleted.
    pub async fn restore(&self, snapshot_id: &str) -> OrchestratorResult<()> {
        let snapshot = self
            .backend
            .read_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("snapshot {}", snapshot_id)))?;

        let mut history = self.history.write().await;
        for (key, snapshotted) in snapshot.entries {
            let key_history = history.entry(key.clone()).or_insert_with(|| KeyHistory { versions: Vec::new() });
            let current = key_history.versions.last();
            if current.map(|e| &e.value) == Some(&snapshotted.value) {
                continue;
            }
            let next_version = key_history.versions.len() as u64 + 1;
            let restored = StateEntry {
                key,
                resource_kind: snapshotted.resource_kind,
                value: snapshotted.value,
                version: next_version,
                previous_state: current.map(|e| Box::new(e.value.clone())),
                transition_reason: Some(format!("restored from snapshot {}", snapshot_id)),
                timestamp: Utc::now(),
                metadata: snapshotted.metadata,
            };
            self.backend.append(&restored).await?;
            key_history.versions.push(restored);
        }
        self.tombstoned.write().await.clear();
        Ok(())
    }

    pub async fn find_keys(&self, prefix: &str) -> Vec<String> {
        let history = self.history.read().await;
        let tombstoned = self.tombstoned.read().await;
        history
            .keys()
            .filter(|k| k.starts_with(prefix) && !tombstoned.contains(*k))
            .cloned()
            .collect()
    }

    /// Tombstones the key; history remains queryable via `get_history` until
    /// pruned.
    pub async fn delete_state(&self, key: &str) -> bool {
        let exists = self.history.read().await.contains_key(key);
        if exists {
            self.tombstoned.write().await.insert(key.to_string());
        }
        exists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemoryBackend;

    async fn manager() -> StateManager {
        StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap()
    }

    #[tokio::test]
    async fn versions_are_gap_free() {
        let mgr = manager().await;
        for i in 0..5 {
            mgr.set_state(
                "k",
                Value::Int(i),
                ResourceKind::Generic,
                None,
                None,
            )
            .await
            .unwrap();
        }
        let history = mgr.get_history("k", None).await;
        let mut versions: Vec<u64> = history.iter().map(|e| e.version).collect();
        versions.sort();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn snapshot_then_restore_is_observationally_identical() {
        let mgr = manager().await;
        mgr.set_state("a", Value::Int(1), ResourceKind::Generic, None, None)
            .await
            .unwrap();
        mgr.set_state("b", Value::Int(2), ResourceKind::Generic, None, None)
            .await
            .unwrap();
        let snap = mgr.snapshot().await.unwrap();

        mgr.set_state("a", Value::Int(99), ResourceKind::Generic, None, None)
            .await
            .unwrap();

        mgr.restore(&snap).await.unwrap();
        let a = mgr.get_state("a").await.unwrap();
        assert_eq!(a.value, Value::Int(1));
        // restore never deletes history; it appends a new version carrying
        // the snapshotted value rather than rewinding the version counter.
        let history = mgr.get_history("a", None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, Value::Int(1));
    }

    #[tokio::test]
    async fn delete_tombstones_but_keeps_history() {
        let mgr = manager().await;
        mgr.set_state("k", Value::Int(1), ResourceKind::Generic, None, None)
            .await
            .unwrap();
        assert!(mgr.delete_state("k").await);
        assert!(mgr.get_state("k").await.is_none());
        assert_eq!(mgr.get_history("k", None).await.len(), 1);
    }
}
