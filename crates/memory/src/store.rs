//! MemoryStore — scope resolution, expiry and ranked retrieval.
//!
//! Every call receives the caller's active workflow explicitly. An optional
//! `workflow_id` on the request overrides it for that call only; the store
//! itself holds no notion of a "current" workflow.

use cadence_config::MemoryConfig;
use cadence_core::error::MemoryError;
use cadence_core::memory::{
    Embedder, Memory, MemoryBackend, MemoryFilter, MemoryMetadata, MemoryScope, MemoryType,
    ScopeFilter,
};
use cadence_core::workflow::WorkflowId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::HashingEmbedder;
use crate::vector::{self, RankParams, ScoredMemory};

pub const DEFAULT_IMPORTANCE: f32 = 0.5;

/// Tunables for retrieval and expiry.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub similarity_threshold: f32,
    pub context_ttl: Duration,
    pub recency_half_life_hours: f64,
    pub default_limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl MemorySettings {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            context_ttl: Duration::hours(config.context_ttl_hours as i64),
            recency_half_life_hours: config.recency_half_life_hours,
            default_limit: config.default_limit,
        }
    }
}

/// Input for [`MemoryStore::add`].
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub content: String,
    /// Explicit scope; `None` applies the type's default
    pub scope: Option<MemoryScope>,
    /// Overrides the caller's active workflow for this call
    pub workflow_id: Option<WorkflowId>,
    pub importance: Option<f32>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            scope: None,
            workflow_id: None,
            importance: None,
            tags: Vec::new(),
            source: None,
            expires_at: None,
        }
    }

    pub fn with_scope(mut self, scope: MemoryScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Scope selection shared by the read operations.
#[derive(Debug, Clone, Default)]
pub struct ScopeQuery {
    pub scope: ScopeFilter,
    /// Overrides the caller's active workflow for this call
    pub workflow_id: Option<WorkflowId>,
}

impl ScopeQuery {
    pub fn new(scope: ScopeFilter) -> Self {
        Self {
            scope,
            workflow_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub scope: ScopeQuery,
    pub memory_type: Option<MemoryType>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub scope: ScopeQuery,
    pub memory_type: Option<MemoryType>,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, scope: ScopeFilter) -> Self {
        Self {
            query: query.into(),
            scope: ScopeQuery::new(scope),
            ..Default::default()
        }
    }
}

/// Changes applied by [`MemoryStore::update`]. The owning workflow is not updatable.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub importance: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate view returned by `describe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub tags: Vec<String>,
    pub workflow_scoped: usize,
    pub general: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

/// Policy layer over a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn Embedder>,
    settings: MemorySettings,
}

fn clamp_importance(value: Option<f32>) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => DEFAULT_IMPORTANCE,
    }
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            embedder: Arc::new(HashingEmbedder::default()),
            settings: MemorySettings::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_settings(mut self, settings: MemorySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn filter(&self, active: Option<&WorkflowId>, scope: &ScopeQuery) -> MemoryFilter {
        let workflow = scope.workflow_id.clone().or_else(|| active.cloned());
        MemoryFilter::new(scope.scope, workflow)
    }

    /// Store a new memory, resolving its scope.
    ///
    /// `user_pref`/`knowledge` default to general, `context`/`decision` to the
    /// active workflow. A workflow scope without any workflow id is an error
    /// when requested explicitly and falls back to general otherwise.
    pub async fn add(&self, active: Option<&WorkflowId>, request: NewMemory) -> Result<Memory, MemoryError> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidRequest("content must not be empty".into()));
        }

        let explicit = request.scope.is_some();
        let scope = request.scope.unwrap_or_else(|| request.memory_type.default_scope());
        let candidate = request.workflow_id.clone().or_else(|| active.cloned());

        let workflow_id = match (scope, candidate) {
            (MemoryScope::General, _) => None,
            (MemoryScope::Workflow, Some(w)) => Some(w),
            (MemoryScope::Workflow, None) if explicit => {
                return Err(MemoryError::InvalidRequest(
                    "workflow scope requested but no workflow id is available".into(),
                ));
            }
            (MemoryScope::Workflow, None) => {
                warn!(
                    memory_type = %request.memory_type,
                    "No active workflow for workflow-scoped memory; storing as general"
                );
                None
            }
        };

        let now = Utc::now();
        let expires_at = request.expires_at.or_else(|| {
            (request.memory_type == MemoryType::Context).then(|| now + self.settings.context_ttl)
        });
        let embedding = self.embedder.embed(content).await?;

        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            memory_type: request.memory_type,
            content: content.to_string(),
            workflow_id,
            importance: clamp_importance(request.importance),
            expires_at,
            metadata: MemoryMetadata {
                tags: request.tags,
                source: request.source,
            },
            created_at: now,
            updated_at: now,
            embedding: Some(embedding),
        };

        self.backend.insert(memory.clone()).await?;
        info!(
            id = %memory.id,
            memory_type = %memory.memory_type,
            workflow_id = ?memory.workflow_id.as_ref().map(|w| w.to_string()),
            "Memory added"
        );
        Ok(memory)
    }

    /// Direct lookup; ignores scope and expiry.
    pub async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        self.backend.get(id).await
    }

    /// Direct delete; ignores scope and expiry.
    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let deleted = self.backend.delete(id).await?;
        debug!(id, deleted, "Memory delete");
        Ok(deleted)
    }

    /// Unexpired memories in scope, newest first.
    pub async fn list(&self, active: Option<&WorkflowId>, query: &ListQuery) -> Result<Vec<Memory>, MemoryError> {
        let filter = self
            .filter(active, &query.scope)
            .with_type(query.memory_type)
            .unexpired_at(Utc::now());
        let mut memories = self.backend.query(&filter).await?;
        memories.truncate(query.limit.unwrap_or(self.settings.default_limit));
        Ok(memories)
    }

    /// Ranked similarity search over unexpired memories in scope.
    pub async fn search(
        &self,
        active: Option<&WorkflowId>,
        query: &SearchQuery,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        if query.query.trim().is_empty() {
            return Err(MemoryError::InvalidRequest("search query must not be empty".into()));
        }

        let now = Utc::now();
        let filter = self
            .filter(active, &query.scope)
            .with_type(query.memory_type)
            .unexpired_at(now);
        let candidates = self.backend.query(&filter).await?;
        let query_embedding = self.embedder.embed(&query.query).await?;

        let params = RankParams {
            threshold: query.threshold.unwrap_or(self.settings.similarity_threshold),
            limit: query.limit.unwrap_or(self.settings.default_limit),
            half_life_hours: self.settings.recency_half_life_hours,
            now,
        };
        let candidate_count = candidates.len();
        let ranked = vector::rank(candidates, &query_embedding, params);
        debug!(
            candidates = candidate_count,
            hits = ranked.len(),
            threshold = params.threshold,
            "Memory search"
        );
        Ok(ranked)
    }

    /// Counts and tags for unexpired memories in scope, without bodies.
    pub async fn describe(&self, active: Option<&WorkflowId>, scope: &ScopeQuery) -> Result<MemorySummary, MemoryError> {
        let filter = self.filter(active, scope).unexpired_at(Utc::now());
        let memories = self.backend.query(&filter).await?;

        let mut summary = MemorySummary {
            total: memories.len(),
            ..Default::default()
        };
        let mut tags = BTreeSet::new();
        for m in &memories {
            *summary.by_type.entry(m.memory_type.to_string()).or_insert(0) += 1;
            tags.extend(m.metadata.tags.iter().cloned());
            if m.is_general() {
                summary.general += 1;
            } else {
                summary.workflow_scoped += 1;
            }
            summary.oldest = Some(summary.oldest.map_or(m.created_at, |o| o.min(m.created_at)));
            summary.newest = Some(summary.newest.map_or(m.created_at, |n| n.max(m.created_at)));
        }
        summary.tags = tags.into_iter().collect();
        Ok(summary)
    }

    /// Apply changes to an existing memory. Returns `None` if it does not exist.
    pub async fn update(&self, id: &str, changes: MemoryUpdate) -> Result<Option<Memory>, MemoryError> {
        let Some(mut memory) = self.backend.get(id).await? else {
            return Ok(None);
        };

        if let Some(content) = changes.content {
            let content = content.trim().to_string();
            if content.is_empty() {
                return Err(MemoryError::InvalidRequest("content must not be empty".into()));
            }
            memory.embedding = Some(self.embedder.embed(&content).await?);
            memory.content = content;
        }
        if let Some(importance) = changes.importance {
            memory.importance = clamp_importance(Some(importance));
        }
        if let Some(tags) = changes.tags {
            memory.metadata.tags = tags;
        }
        if let Some(expires_at) = changes.expires_at {
            memory.expires_at = Some(expires_at);
        }
        memory.updated_at = Utc::now();

        if !self.backend.update(memory.clone()).await? {
            return Ok(None);
        }
        debug!(id, "Memory updated");
        Ok(Some(memory))
    }

    /// Delete every memory of `memory_type` in scope; returns how many were removed.
    pub async fn clear_by_type(
        &self,
        active: Option<&WorkflowId>,
        memory_type: MemoryType,
        scope: &ScopeQuery,
    ) -> Result<usize, MemoryError> {
        let filter = self.filter(active, scope).with_type(Some(memory_type));
        let removed = self.backend.delete_matching(&filter).await?;
        info!(memory_type = %memory_type, removed, "Memories cleared");
        Ok(removed)
    }

    /// Physically remove expired memories.
    pub async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let removed = self.backend.purge_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Expired memories purged");
        }
        Ok(removed)
    }

    pub async fn count(&self) -> Result<usize, MemoryError> {
        self.backend.count().await
    }
}
