//! Collaborator traits: the event store and the similarity index.
//!
//! The context engine is read-only against both. Writes come from the
//! extraction pipeline (or `remember` for manual entries).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::event::{SemanticEvent, StoreStats};

/// One ranked result from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub event_id: String,
    /// Higher is more similar.
    pub score: f32,
    /// The document text that was indexed for this event.
    pub document: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Durable record of semantic events.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert a new event. Events are immutable: an existing id is rejected
    /// with [`StoreError::Duplicate`].
    async fn insert(&self, event: SemanticEvent) -> Result<String, StoreError>;

    /// Look up one event.
    async fn get(&self, id: &str) -> Result<Option<SemanticEvent>, StoreError>;

    /// Batched lookup. Missing ids are skipped; order is unspecified.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<SemanticEvent>, StoreError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get(id).await? {
                found.push(event);
            }
        }
        Ok(found)
    }

    /// Total count and per-source breakdown.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Ranked text similarity over indexed event documents.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `max_results` hits, most similar first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, StoreError>;

    /// Insert or replace the document for `event_id`.
    async fn upsert(
        &self,
        event_id: &str,
        document: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Number of indexed documents.
    async fn count(&self) -> Result<usize, StoreError>;
}
