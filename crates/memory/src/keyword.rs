//! In-process similarity index over term-frequency vectors.
//!
//! Scores are cosine similarity between the query's and each document's
//! term vector. Documents sharing no term with the query are not returned.

use crate::vector::{term_frequencies, term_similarity};
use async_trait::async_trait;
use mynd_core::error::StoreError;
use mynd_core::store::{SearchHit, SimilarityIndex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

struct IndexedDocument {
    document: String,
    metadata: BTreeMap<String, String>,
    terms: BTreeMap<String, f32>,
}

pub struct KeywordIndex {
    documents: Arc<RwLock<HashMap<String, IndexedDocument>>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityIndex for KeywordIndex {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, StoreError> {
        let query_terms = term_frequencies(query);
        if query_terms.is_empty() || max_results == 0 {
            return Ok(vec![]);
        }

        let documents = self.documents.read().await;
        let mut hits: Vec<SearchHit> = documents
            .iter()
            .filter_map(|(id, doc)| {
                let score = term_similarity(&query_terms, &doc.terms);
                (score > 0.0).then(|| SearchHit {
                    event_id: id.clone(),
                    score,
                    document: doc.document.clone(),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn upsert(
        &self,
        event_id: &str,
        document: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let indexed = IndexedDocument {
            document: document.to_string(),
            metadata,
            terms: term_frequencies(document),
        };
        self.documents
            .write()
            .await
            .insert(event_id.to_string(), indexed);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.documents.read().await.len())
    }
}
