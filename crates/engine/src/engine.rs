//! The context engine: the one entry point clients talk to.
//!
//! Every permitted or denied access decision lands in the audit log exactly
//! once. Malformed requests are rejected before any decision is made and
//! leave no trace.

use crate::context::{TokenEstimator, build_bundle, dedup, estimator_for, rank, select};
use crate::context::candidate::RetrievedCandidate;
use mynd_config::EngineConfig;
use mynd_core::audit::{AuditDraft, AuditRecord};
use mynd_core::bundle::{ContextBundle, ContextFilters, ContextRequest};
use mynd_core::capability::{DenialReason, IssuedToken, Operation, Scope, ValidatedToken};
use mynd_core::error::{AuditError, ContextError, Error, ValidationError};
use mynd_core::event::{SemanticEvent, StoreStats};
use mynd_core::store::{EventStore, SearchHit, SimilarityIndex};
use mynd_security::{AuditLog, ChainReport, TokenManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Snapshot of what the engine is serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub event_store: String,
    pub index: String,
    pub estimator: String,
    pub events: usize,
    pub indexed_documents: usize,
    pub live_tokens: usize,
    /// Highest audit sequence number written (0 when empty).
    pub audit_records: u64,
}

#[derive(Clone)]
pub struct ContextEngine {
    events: Arc<dyn EventStore>,
    index: Arc<dyn SimilarityIndex>,
    tokens: Arc<TokenManager>,
    audit: Arc<AuditLog>,
    estimator: Arc<dyn TokenEstimator>,
    config: EngineConfig,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("events", &self.events.name())
            .field("index", &self.index.name())
            .field("estimator", &self.estimator.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Outcome of the retrieval stages, before selection.
struct Retrieval {
    candidates: Vec<RetrievedCandidate>,
    degraded: bool,
}

impl ContextEngine {
    /// Create an engine. The estimator comes from `config.estimator`.
    pub fn new(
        events: Arc<dyn EventStore>,
        index: Arc<dyn SimilarityIndex>,
        tokens: Arc<TokenManager>,
        audit: Arc<AuditLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            estimator: estimator_for(config.estimator),
            events,
            index,
            tokens,
            audit,
            config,
        }
    }

    /// Replace the configured estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ── Context ──────────────────────────────────────────────────────────

    /// Answer a query with a token-bounded bundle of the most relevant
    /// events the caller's token may see.
    pub async fn get_context(&self, request: ContextRequest) -> Result<ContextBundle, ContextError> {
        let query = self.validate_request(&request)?.to_string();
        let token = self.authorize(&request.bearer, Operation::Read, &query).await?;

        let budget = request
            .requested_tokens
            .min(token.max_tokens)
            .min(self.config.hard_cap_tokens);

        // Access is granted from here on. Assembly and its audit record run
        // as one task so a caller that goes away cannot drop the record.
        let engine = self.clone();
        let filters = request.filters.clone();
        tokio::spawn(async move { engine.assemble(query, filters, token, budget).await })
            .await
            .map_err(|e| {
                error!(error = %e, "Context task did not finish");
                ContextError::AuditUnavailable(e.to_string())
            })?
    }

    /// Retrieve, select and record one granted query.
    async fn assemble(
        &self,
        query: String,
        filters: ContextFilters,
        token: ValidatedToken,
        budget: usize,
    ) -> Result<ContextBundle, ContextError> {
        let bundle = match self.retrieve(&query, &filters, &token).await {
            Some(retrieval) => {
                let mut candidates = retrieval.candidates;
                rank(&mut candidates);
                let candidates = dedup(candidates);
                let considered = candidates.len();
                let mut bundle = build_bundle(&query, budget, considered, select(candidates, budget));
                bundle.degraded = retrieval.degraded;
                bundle
            }
            None => {
                let mut bundle = ContextBundle::empty(&query, budget);
                bundle.truncated = true;
                bundle.degraded = true;
                bundle
            }
        };

        let draft = AuditDraft::query(
            &token.client_id,
            &token.token_id,
            &query,
            bundle.tokens_used as u64,
        );
        if let Err(e) = self.audit.append(draft).await {
            error!(error = %e, "Audit write failed, withholding context");
            return Err(ContextError::AuditUnavailable(e.to_string()));
        }

        info!(
            client_id = %token.client_id,
            items = bundle.included_event_ids.len(),
            tokens_used = bundle.tokens_used,
            budget,
            truncated = bundle.truncated,
            degraded = bundle.degraded,
            "Context delivered"
        );
        Ok(bundle)
    }

    /// Trimmed query text, or why the request is malformed.
    fn validate_request<'a>(&self, request: &'a ContextRequest) -> Result<&'a str, ValidationError> {
        let query = request.query_text.trim();
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let len = query.chars().count();
        if len > self.config.max_query_chars {
            return Err(ValidationError::QueryTooLong {
                len,
                max: self.config.max_query_chars,
            });
        }
        if let Some(range) = request.filters.time_range {
            range.validate()?;
        }
        Ok(query)
    }

    /// Search, then enrich. `None` when the search itself failed.
    async fn retrieve(
        &self,
        query: &str,
        filters: &ContextFilters,
        token: &ValidatedToken,
    ) -> Option<Retrieval> {
        let search_timeout = Duration::from_millis(self.config.search_timeout_ms);
        let hits = match timeout(search_timeout, self.index.search(query, self.config.overfetch_k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(index = self.index.name(), error = %e, "Similarity search failed");
                return None;
            }
            Err(_) => {
                warn!(
                    index = self.index.name(),
                    timeout_ms = self.config.search_timeout_ms,
                    "Similarity search timed out"
                );
                return None;
            }
        };
        debug!(hits = hits.len(), "Similarity search returned");

        let (stored, degraded) = self.enrich(&hits).await;
        let overhead = self.config.header_overhead_tokens;
        let candidates = hits
            .into_iter()
            .filter_map(|hit| {
                let event = stored.get(&hit.event_id).cloned().or_else(|| {
                    SemanticEvent::from_index(&hit.event_id, &hit.document, &hit.metadata)
                })?;
                if !filters.admits(event.source_type, event.timestamp)
                    || !token.scope.permits_source(event.source_type)
                {
                    return None;
                }
                let cost = self.estimator.estimate(&event.semantic_summary) + overhead;
                Some(RetrievedCandidate::new(event, hit.score, cost))
            })
            .collect();

        Some(Retrieval {
            candidates,
            degraded,
        })
    }

    /// One batched lookup for every hit. A failed or slow store leaves the
    /// map empty and marks the result degraded.
    async fn enrich(&self, hits: &[SearchHit]) -> (HashMap<String, SemanticEvent>, bool) {
        if hits.is_empty() {
            return (HashMap::new(), false);
        }
        let ids: Vec<String> = hits.iter().map(|h| h.event_id.clone()).collect();
        let lookup_timeout = Duration::from_millis(self.config.lookup_timeout_ms);

        match timeout(lookup_timeout, self.events.get_many(&ids)).await {
            Ok(Ok(events)) => (events.into_iter().map(|e| (e.id.clone(), e)).collect(), false),
            Ok(Err(e)) => {
                warn!(store = self.events.name(), error = %e, "Event lookup failed, using index metadata");
                (HashMap::new(), true)
            }
            Err(_) => {
                warn!(
                    store = self.events.name(),
                    timeout_ms = self.config.lookup_timeout_ms,
                    "Event lookup timed out, using index metadata"
                );
                (HashMap::new(), true)
            }
        }
    }

    // ── Access control ──────────────────────────────────────────────────

    /// Validate `bearer` for `operation`.
    ///
    /// A refusal is written to the audit log before it is returned;
    /// `subject` is what gets fingerprinted as the query. Revoked tokens
    /// are reported to the caller as expired.
    pub async fn authorize(
        &self,
        bearer: &str,
        operation: Operation,
        subject: &str,
    ) -> Result<ValidatedToken, ContextError> {
        let (reason, presented_id, client_id) = match self.tokens.validate(bearer).await {
            Ok(token) if token.scope.allows(operation) => return Ok(token),
            Ok(token) => (DenialReason::InsufficientScope, token.token_id, token.client_id),
            Err(rejection) => (
                rejection.error.denial_reason(),
                rejection.presented_id,
                rejection.client_id.unwrap_or_default(),
            ),
        };

        warn!(
            client_id = %client_id,
            operation = %operation,
            reason = %reason,
            "Access denied"
        );
        let draft = AuditDraft::denial(&client_id, &presented_id, subject, reason);
        if let Err(e) = self.write_audit(draft).await {
            error!(error = %e, "Audit write failed while recording a denial");
            return Err(ContextError::AuditUnavailable(e.to_string()));
        }
        Err(ContextError::AccessDenied(reason.caller_facing()))
    }

    /// Append on a task of its own, so a caller that goes away mid-write
    /// cannot cancel a decision that has already been made.
    async fn write_audit(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError> {
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move { audit.append(draft).await })
            .await
            .map_err(|e| AuditError::Writer(e.to_string()))?
    }

    // ── Tokens ──────────────────────────────────────────────────────────

    /// Issue a token. `None` takes the configured defaults.
    pub async fn issue_token(
        &self,
        client_id: &str,
        scope: Scope,
        max_tokens: Option<usize>,
        ttl_secs: Option<u64>,
    ) -> Result<IssuedToken, Error> {
        let ttl = ttl_secs.map(Duration::from_secs);
        Ok(self.tokens.issue(client_id, scope, max_tokens, ttl).await?)
    }

    /// Revoke a token and record it. Idempotent; every call is audited.
    pub async fn revoke_token(&self, token_id: &str) -> Result<bool, Error> {
        let client_id = self
            .tokens
            .lookup(token_id)
            .await?
            .map(|t| t.client_id)
            .unwrap_or_default();
        let changed = self.tokens.revoke(token_id).await?;
        self.write_audit(AuditDraft::revocation(&client_id, token_id))
            .await?;
        Ok(changed)
    }

    /// Revoke on behalf of a bearer: its own token, or any token with the
    /// `admin` operation.
    pub async fn revoke_as(&self, bearer: &str, token_id: &str) -> Result<bool, Error> {
        let own = matches!(self.tokens.validate(bearer).await, Ok(ref t) if t.token_id == token_id);
        if !own {
            self.authorize(bearer, Operation::Admin, "revoke").await?;
        }
        self.revoke_token(token_id).await
    }

    /// Drop tokens that expired longer ago than the purge grace period.
    pub async fn purge_expired_tokens(&self) -> Result<usize, Error> {
        Ok(self.tokens.purge_expired().await?)
    }

    // ── Audit ───────────────────────────────────────────────────────────

    pub async fn get_audit_range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, Error> {
        Ok(self.audit.range(from, to).await?)
    }

    pub async fn verify_audit(&self, from: u64, to: u64) -> Result<ChainReport, Error> {
        Ok(self.audit.verify_chain(from, to).await?)
    }

    // ── Store ───────────────────────────────────────────────────────────

    /// Event counts, for holders of the `stats` operation.
    pub async fn stats(&self, bearer: &str) -> Result<StoreStats, Error> {
        self.authorize(bearer, Operation::Stats, "stats").await?;
        Ok(self.events.stats().await?)
    }

    /// Store and index a new event.
    pub async fn remember(&self, event: SemanticEvent) -> Result<String, Error> {
        Ok(mynd_memory::remember(self.events.as_ref(), self.index.as_ref(), event).await?)
    }

    pub async fn status(&self) -> Result<EngineStatus, Error> {
        let stats = self.events.stats().await?;
        Ok(EngineStatus {
            event_store: self.events.name().to_string(),
            index: self.index.name().to_string(),
            estimator: self.estimator.name().to_string(),
            events: stats.count,
            indexed_documents: self.index.count().await?,
            live_tokens: self.tokens.active_count().await?,
            audit_records: self.audit.last_sequence().await?,
        })
    }
}
