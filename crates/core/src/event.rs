//! Semantic events: privacy-filtered summaries of captured user activity.
//!
//! Events are immutable once written. A correction is a new event with a new
//! id; nothing in the system mutates a stored event in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Upper bound on `semantic_summary` length, in characters.
pub const MAX_SUMMARY_CHARS: usize = 2_000;

/// Where a semantic event was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Browser,
    File,
    Code,
    Clipboard,
    Manual,
}

impl SourceType {
    /// Every source type the system knows about.
    pub const ALL: [SourceType; 5] = [
        SourceType::Browser,
        SourceType::File,
        SourceType::Code,
        SourceType::Clipboard,
        SourceType::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::File => "file",
            Self::Code => "code",
            Self::Clipboard => "clipboard",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known source type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source type: {0}")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            // Older capture agents labelled files as documents.
            "file" | "document" => Ok(Self::File),
            "code" => Ok(Self::Code),
            "clipboard" => Ok(Self::Clipboard),
            "manual" => Ok(Self::Manual),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

/// A stored summary of one piece of captured user activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvent {
    /// Opaque unique id.
    pub id: String,

    /// When the underlying activity happened.
    pub timestamp: DateTime<Utc>,

    pub source_type: SourceType,

    /// URL, file path, or empty.
    #[serde(default)]
    pub source_path: String,

    /// Bounded-length, PII-free summary produced by the extraction pipeline.
    pub semantic_summary: String,

    /// Short tags, in extraction order, without duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<String>,

    /// Why a decision was made, when the activity captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_context: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SemanticEvent {
    /// Create an event with a fresh id, stamped now.
    ///
    /// Summaries longer than [`MAX_SUMMARY_CHARS`] are cut at a character
    /// boundary.
    pub fn new(
        source_type: SourceType,
        source_path: impl Into<String>,
        semantic_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_type,
            source_path: source_path.into(),
            semantic_summary: bound_summary(semantic_summary.into()),
            concepts: Vec::new(),
            decision_context: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set concepts, keeping first occurrence order and dropping duplicates.
    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts.clear();
        for concept in concepts {
            let concept = concept.into();
            let concept = concept.trim();
            if !concept.is_empty() && !self.concepts.iter().any(|c| c == concept) {
                self.concepts.push(concept.to_string());
            }
        }
        self
    }

    pub fn with_decision_context(mut self, context: impl Into<String>) -> Self {
        self.decision_context = Some(context.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Text handed to the similarity index: summary, concepts, then any
    /// decision context.
    pub fn document_text(&self) -> String {
        let mut text = self.semantic_summary.clone();
        if !self.concepts.is_empty() {
            text.push(' ');
            text.push_str(&self.concepts.join(" "));
        }
        if let Some(ref decision) = self.decision_context {
            text.push(' ');
            text.push_str(decision);
        }
        text
    }

    /// Flat metadata stored next to the document in the similarity index.
    ///
    /// Carries enough to rebuild the event if the event store cannot be
    /// reached (see [`SemanticEvent::from_index`]).
    pub fn index_metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert("source_type".into(), self.source_type.as_str().into());
        meta.insert("source_path".into(), self.source_path.clone());
        meta.insert("timestamp".into(), self.timestamp.to_rfc3339());
        meta.insert("summary".into(), self.semantic_summary.clone());
        meta.insert(
            "concepts".into(),
            serde_json::to_string(&self.concepts).unwrap_or_else(|_| "[]".into()),
        );
        for (key, value) in &self.metadata {
            meta.insert(format!("meta_{key}"), value.clone());
        }
        meta
    }

    /// Rebuild an event from a similarity-index hit.
    ///
    /// Returns `None` when the metadata lacks a parseable source type or
    /// timestamp.
    pub fn from_index(
        id: &str,
        document: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Option<Self> {
        let source_type = metadata.get("source_type")?.parse().ok()?;
        let timestamp = DateTime::parse_from_rfc3339(metadata.get("timestamp")?)
            .ok()?
            .with_timezone(&Utc);
        let summary = metadata
            .get("summary")
            .cloned()
            .unwrap_or_else(|| document.to_string());
        let concepts = metadata
            .get("concepts")
            .map(|c| decode_concepts(c))
            .unwrap_or_default();
        let extra = metadata
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("meta_").map(|k| (k.to_string(), v.clone())))
            .collect();

        Some(
            Self {
                id: id.to_string(),
                timestamp,
                source_type,
                source_path: metadata.get("source_path").cloned().unwrap_or_default(),
                semantic_summary: bound_summary(summary),
                concepts: Vec::new(),
                decision_context: None,
                metadata: extra,
            }
            .with_concepts(concepts),
        )
    }
}

/// Concepts are a JSON array; older index entries joined them with commas.
fn decode_concepts(raw: &str) -> Vec<String> {
    serde_json::from_str(raw)
        .unwrap_or_else(|_| raw.split(',').map(str::to_string).collect())
}

fn bound_summary(summary: String) -> String {
    match summary.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((cut, _)) => summary[..cut].to_string(),
        None => summary,
    }
}

/// Aggregate counts reported by an event store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    /// Event count per source type name.
    pub by_source_type: BTreeMap<String, usize>,
}
