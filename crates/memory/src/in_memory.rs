//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cadence_core::error::MemoryError;
use cadence_core::memory::{Memory, MemoryBackend, MemoryFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory backend that stores memories in a Vec.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<Vec<Memory>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str { "in_memory" }

    async fn insert(&self, memory: Memory) -> Result<(), MemoryError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == memory.id) {
            return Err(MemoryError::Storage(format!("duplicate memory id {}", memory.id)));
        }
        entries.push(memory);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn update(&self, memory: Memory) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == memory.id) {
            Some(slot) => {
                *slot = memory;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < len_before)
    }

    async fn query(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, MemoryError> {
        let entries = self.entries.read().await;
        let mut results: Vec<Memory> = entries.iter().filter(|e| filter.matches(e)).cloned().collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    async fn delete_matching(&self, filter: &MemoryFilter) -> Result<usize, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| !filter.matches(e));
        Ok(len_before - entries.len())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| !e.is_expired(now));
        Ok(len_before - entries.len())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::memory::{MemoryMetadata, MemoryType, ScopeFilter};
    use cadence_core::workflow::WorkflowId;
    use chrono::Duration;

    fn make(id: &str, workflow: Option<&str>, age_secs: i64) -> Memory {
        let created = Utc::now() - Duration::seconds(age_secs);
        Memory {
            id: id.into(),
            memory_type: MemoryType::Context,
            content: format!("memory {id}"),
            workflow_id: workflow.map(WorkflowId::from),
            importance: 0.5,
            expires_at: None,
            metadata: MemoryMetadata::default(),
            created_at: created,
            updated_at: created,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn insert_get_delete() {
        let backend = InMemoryBackend::new();
        backend.insert(make("a", None, 0)).await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.delete("a").await.unwrap());
        assert!(!backend.delete("a").await.unwrap());
        assert!(backend.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let backend = InMemoryBackend::new();
        backend.insert(make("a", None, 0)).await.unwrap();
        assert!(backend.insert(make("a", None, 0)).await.is_err());
    }

    #[tokio::test]
    async fn update_replaces_existing_only() {
        let backend = InMemoryBackend::new();
        backend.insert(make("a", None, 0)).await.unwrap();
        let mut changed = make("a", None, 0);
        changed.content = "changed".into();
        assert!(backend.update(changed).await.unwrap());
        assert_eq!(backend.get("a").await.unwrap().unwrap().content, "changed");
        assert!(!backend.update(make("zzz", None, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn query_filters_and_orders_newest_first() {
        let backend = InMemoryBackend::new();
        backend.insert(make("old", Some("wf"), 60)).await.unwrap();
        backend.insert(make("new", Some("wf"), 1)).await.unwrap();
        backend.insert(make("other", Some("x"), 0)).await.unwrap();

        let filter = MemoryFilter::new(ScopeFilter::Workflow, Some(WorkflowId::from("wf")));
        let results = backend.query(&filter).await.unwrap();
        let ids: Vec<_> = results.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(backend.delete_matching(&filter).await.unwrap(), 2);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let backend = InMemoryBackend::new();
        let mut expired = make("expired", None, 0);
        expired.expires_at = Some(Utc::now() - Duration::minutes(1));
        backend.insert(expired).await.unwrap();
        backend.insert(make("fresh", None, 0)).await.unwrap();

        assert_eq!(backend.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(backend.get("fresh").await.unwrap().is_some());
    }
}
