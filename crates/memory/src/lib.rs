//! Memory system for Cadence.
//!
//! [`MemoryStore`] applies scope, expiry and ranking policy on top of a
//! storage backend ([`InMemoryBackend`] or [`SqliteBackend`]).

pub mod embedding;
pub mod in_memory;
pub mod store;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use embedding::{HashingEmbedder, ProviderEmbedder};
pub use in_memory::InMemoryBackend;
pub use store::{
    ListQuery, MemorySettings, MemoryStore, MemorySummary, MemoryUpdate, NewMemory, ScopeQuery,
    SearchQuery,
};
pub use vector::{cosine_similarity, recency_decay, ScoredMemory};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
