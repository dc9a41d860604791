//! Memory domain types and the storage/embedding traits.
//!
//! A memory either belongs to one workflow or is general (visible to all
//! workflows). Scope and expiry policy live in the memory crate's
//! `MemoryStore`; backends only evaluate the [`MemoryFilter`] they are given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;
use crate::workflow::WorkflowId;

/// Kind of memory; drives the default scope and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    UserPref,
    Context,
    Knowledge,
    Decision,
}

impl MemoryType {
    pub const ALL: [MemoryType; 4] = [
        MemoryType::UserPref,
        MemoryType::Context,
        MemoryType::Knowledge,
        MemoryType::Decision,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserPref => "user_pref",
            Self::Context => "context",
            Self::Knowledge => "knowledge",
            Self::Decision => "decision",
        }
    }

    /// Scope a memory of this type lands in when the caller does not say.
    pub fn default_scope(self) -> MemoryScope {
        match self {
            Self::UserPref | Self::Knowledge => MemoryScope::General,
            Self::Context | Self::Decision => MemoryScope::Workflow,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_pref" => Ok(Self::UserPref),
            "context" => Ok(Self::Context),
            "knowledge" => Ok(Self::Knowledge),
            "decision" => Ok(Self::Decision),
            other => Err(MemoryError::InvalidRequest(format!(
                "unknown memory type '{other}'"
            ))),
        }
    }
}

/// Where a memory is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Workflow,
    General,
}

/// Which memories a read operation considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFilter {
    Workflow,
    General,
    #[default]
    Both,
}

impl FromStr for ScopeFilter {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(Self::Workflow),
            "general" => Ok(Self::General),
            "both" => Ok(Self::Both),
            other => Err(MemoryError::InvalidRequest(format!("unknown scope '{other}'"))),
        }
    }
}

/// Free-form annotations on a memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A single stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,

    #[serde(rename = "type")]
    pub memory_type: MemoryType,

    pub content: String,

    /// Owning workflow; `None` means general
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,

    /// 0.0-1.0
    pub importance: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: MemoryMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Embedding vector (stored as blob in DB)
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    pub fn is_general(&self) -> bool {
        self.workflow_id.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Predicate evaluated by backends for list/search/clear.
#[derive(Debug, Clone)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub scope: ScopeFilter,

    /// Workflow the scope is resolved against
    pub workflow_id: Option<WorkflowId>,

    /// Memories expiring at or before this instant are excluded
    pub not_expired_at: Option<DateTime<Utc>>,
}

impl MemoryFilter {
    pub fn new(scope: ScopeFilter, workflow_id: Option<WorkflowId>) -> Self {
        Self {
            memory_type: None,
            scope,
            workflow_id,
            not_expired_at: None,
        }
    }

    pub fn with_type(mut self, memory_type: Option<MemoryType>) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn unexpired_at(mut self, now: DateTime<Utc>) -> Self {
        self.not_expired_at = Some(now);
        self
    }

    /// Whether the scope part of the filter can match anything at all.
    pub fn scope_is_satisfiable(&self) -> bool {
        !(self.scope == ScopeFilter::Workflow && self.workflow_id.is_none())
    }

    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(t) = self.memory_type {
            if memory.memory_type != t {
                return false;
            }
        }
        if let Some(now) = self.not_expired_at {
            if memory.is_expired(now) {
                return false;
            }
        }
        let in_workflow = match (&memory.workflow_id, &self.workflow_id) {
            (Some(owner), Some(current)) => owner == current,
            _ => false,
        };
        match self.scope {
            ScopeFilter::Workflow => in_workflow,
            ScopeFilter::General => memory.is_general(),
            ScopeFilter::Both => in_workflow || memory.is_general(),
        }
    }
}

/// Storage for memories.
///
/// Implementations: in-memory (tests, ephemeral runs) and SQLite.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn insert(&self, memory: Memory) -> std::result::Result<(), MemoryError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<Memory>, MemoryError>;

    /// Replace a stored memory. Returns `false` if it does not exist.
    async fn update(&self, memory: Memory) -> std::result::Result<bool, MemoryError>;

    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// All memories matching the filter, newest first.
    async fn query(&self, filter: &MemoryFilter) -> std::result::Result<Vec<Memory>, MemoryError>;

    /// Delete every memory matching the filter; returns how many were removed.
    async fn delete_matching(&self, filter: &MemoryFilter) -> std::result::Result<usize, MemoryError>;

    /// Delete memories whose expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<usize, MemoryError>;

    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}

/// Turns text into a vector for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, MemoryError>;
}
