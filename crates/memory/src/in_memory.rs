//! In-memory event store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use mynd_core::error::StoreError;
use mynd_core::event::{SemanticEvent, StoreStats};
use mynd_core::store::EventStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An event store that keeps events in a map keyed by id.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<String, SemanticEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, event: SemanticEvent) -> Result<String, StoreError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id));
        }
        let id = event.id.clone();
        events.insert(id.clone(), event);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<SemanticEvent>, StoreError> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<SemanticEvent>, StoreError> {
        let events = self.events.read().await;
        Ok(ids.iter().filter_map(|id| events.get(id).cloned()).collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let events = self.events.read().await;
        let mut stats = StoreStats {
            count: events.len(),
            ..StoreStats::default()
        };
        for event in events.values() {
            *stats
                .by_source_type
                .entry(event.source_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
