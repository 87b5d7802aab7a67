//! Context requests and the bundles the engine returns for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::event::SourceType;

/// Half-open time window: `start <= t < end`. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self, ValidationError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start >= end => Err(ValidationError::InvalidTimeRange),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts < end)
    }
}

/// Optional post-filters applied to retrieved candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFilters {
    /// Only these source types. `None` keeps all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_types: Option<BTreeSet<SourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

impl ContextFilters {
    pub fn with_source_types(mut self, types: impl IntoIterator<Item = SourceType>) -> Self {
        self.source_types = Some(types.into_iter().collect());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn admits(&self, source_type: SourceType, ts: DateTime<Utc>) -> bool {
        let source_ok = self
            .source_types
            .as_ref()
            .is_none_or(|types| types.contains(&source_type));
        let time_ok = self.time_range.is_none_or(|range| range.contains(ts));
        source_ok && time_ok
    }
}

/// Everything `get_context` needs for one call.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub query_text: String,
    pub requested_tokens: usize,
    /// The bearer string from [`IssuedToken`](crate::capability::IssuedToken).
    pub bearer: String,
    pub filters: ContextFilters,
}

impl ContextRequest {
    pub fn new(query_text: impl Into<String>, requested_tokens: usize, bearer: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            requested_tokens,
            bearer: bearer.into(),
            filters: ContextFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: ContextFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Attribution for one included event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_type: SourceType,
    pub source_path: String,
    pub timestamp: DateTime<Utc>,
}

/// The engine's output for a permitted query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub query_text: String,
    /// Highest ranked first.
    pub included_event_ids: Vec<String>,
    pub rendered_text: String,
    /// Never above `budget`.
    pub tokens_used: usize,
    /// The effective budget after clamping.
    pub budget: usize,
    /// One entry per included event, same order.
    pub sources: Vec<SourceRef>,
    /// Candidates existed but were dropped for budget reasons, or the
    /// search timed out.
    pub truncated: bool,
    /// A dependency timed out or failed and the bundle may be partial.
    #[serde(default)]
    pub degraded: bool,
    /// Candidates left after filtering and deduplication.
    #[serde(default)]
    pub candidates_considered: usize,
}

/// Coarse outcome of a permitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Empty,
    Complete,
    Truncated,
}

impl ContextBundle {
    /// A bundle with nothing in it.
    pub fn empty(query_text: impl Into<String>, budget: usize) -> Self {
        Self {
            query_text: query_text.into(),
            included_event_ids: Vec::new(),
            rendered_text: String::new(),
            tokens_used: 0,
            budget,
            sources: Vec::new(),
            truncated: false,
            degraded: false,
            candidates_considered: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.included_event_ids.is_empty()
    }

    pub fn status(&self) -> BundleStatus {
        if self.is_empty() {
            BundleStatus::Empty
        } else if self.truncated {
            BundleStatus::Truncated
        } else {
            BundleStatus::Complete
        }
    }
}
