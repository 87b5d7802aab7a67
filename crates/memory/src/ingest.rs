//! Write path for new events: event store first, then the similarity index.

use mynd_core::error::StoreError;
use mynd_core::event::SemanticEvent;
use mynd_core::store::{EventStore, SimilarityIndex};
use tracing::{debug, warn};

/// Persist `event` and make it searchable.
///
/// The store is the source of truth. If indexing fails the event is still
/// stored and the index error is returned.
pub async fn remember(
    store: &dyn EventStore,
    index: &dyn SimilarityIndex,
    event: SemanticEvent,
) -> Result<String, StoreError> {
    let document = event.document_text();
    let metadata = event.index_metadata();
    let id = store.insert(event).await?;

    if let Err(e) = index.upsert(&id, &document, metadata).await {
        warn!(event_id = %id, error = %e, "Event stored but not indexed");
        return Err(e);
    }
    debug!(event_id = %id, index = index.name(), "Event indexed");
    Ok(id)
}
