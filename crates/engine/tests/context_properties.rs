//! End-to-end behavior of the context engine over in-memory stores.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mynd_config::AppConfig;
use mynd_core::audit::{AuditEventType, AuditRecord, AuditStore};
use mynd_core::bundle::{ContextBundle, ContextFilters, ContextRequest, TimeRange};
use mynd_core::capability::{DenialReason, Scope};
use mynd_core::clock::ManualClock;
use mynd_core::error::{AuditError, ChainBreak, ContextError, Error, StoreError};
use mynd_core::event::{SemanticEvent, SourceType};
use mynd_core::store::{EventStore, SearchHit, SimilarityIndex};
use mynd_engine::{Backends, ContextEngine, TokenEstimator};
use mynd_memory::InMemoryEventStore;
use mynd_security::{InMemoryTokenStore, SigningKey};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ── Test doubles ────────────────────────────────────────────────────────

/// Returns the same scored hits for every query.
struct FixedIndex {
    hits: Vec<SearchHit>,
}

#[async_trait]
impl SimilarityIndex for FixedIndex {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }

    async fn upsert(
        &self,
        _event_id: &str,
        _document: &str,
        _metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.hits.len())
    }
}

/// Every item costs the same.
struct FlatEstimator(usize);

impl TokenEstimator for FlatEstimator {
    fn name(&self) -> &str {
        "flat"
    }

    fn estimate(&self, _text: &str) -> usize {
        self.0
    }
}

/// An audit store whose rows can be edited behind the log's back.
#[derive(Default)]
struct TamperableAuditStore {
    records: Mutex<BTreeMap<u64, AuditRecord>>,
}

impl TamperableAuditStore {
    fn edit(&self, sequence: u64, f: impl FnOnce(&mut AuditRecord)) {
        let mut records = self.records.lock().unwrap();
        f(records.get_mut(&sequence).unwrap());
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl AuditStore for TamperableAuditStore {
    fn name(&self) -> &str {
        "tamperable"
    }

    async fn append_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.sequence_number) {
            return Err(StoreError::Duplicate(record.sequence_number.to_string()));
        }
        records.insert(record.sequence_number, record.clone());
        Ok(())
    }

    async fn last_record(&self) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.records.lock().unwrap().values().next_back().cloned())
    }

    async fn records_in_range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .range(from..=to)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

// ── Fixture ─────────────────────────────────────────────────────────────

struct Fixture {
    engine: ContextEngine,
    audit: Arc<TamperableAuditStore>,
    clock: Arc<ManualClock>,
}

fn at(hour: u32) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&format!("2026-03-01T{hour:02}:00:00Z"))
        .unwrap()
        .with_timezone(&Utc)
}

fn scenario_events() -> Vec<(SemanticEvent, f32)> {
    vec![
        (
            SemanticEvent::new(SourceType::Code, "src/auth.rs", "Chose JWT for stateless mobile auth")
                .with_id("jwt")
                .with_timestamp(at(9)),
            0.91,
        ),
        (
            SemanticEvent::new(SourceType::Browser, "https://owasp.org", "Compared session cookies")
                .with_id("session")
                .with_timestamp(at(10)),
            0.77,
        ),
        (
            SemanticEvent::new(SourceType::Manual, "", "Lunch order was a burrito")
                .with_id("lunch")
                .with_timestamp(at(12)),
            0.12,
        ),
    ]
}

async fn fixture(
    scored: Vec<(SemanticEvent, f32)>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    header_overhead: usize,
) -> Fixture {
    let events = Arc::new(InMemoryEventStore::new());
    let mut hits = Vec::new();
    for (event, score) in scored {
        hits.push(SearchHit {
            event_id: event.id.clone(),
            score,
            document: event.document_text(),
            metadata: event.index_metadata(),
        });
        events.insert(event).await.unwrap();
    }

    let audit = Arc::new(TamperableAuditStore::default());
    let clock = Arc::new(ManualClock::new(at(13)));
    let backends = Backends {
        events,
        index: Arc::new(FixedIndex { hits }),
        tokens: Arc::new(InMemoryTokenStore::new()),
        audit: audit.clone(),
    };

    let mut config = AppConfig::default();
    config.engine.header_overhead_tokens = header_overhead;
    let key = SigningKey::from_secret("integration-test-secret").unwrap();
    let mut engine = ContextEngine::from_backends(backends, key, clock.clone(), &config)
        .await
        .unwrap();
    if let Some(estimator) = estimator {
        engine = engine.with_estimator(estimator);
    }

    Fixture {
        engine,
        audit,
        clock,
    }
}

async fn scenario() -> Fixture {
    fixture(scenario_events(), Some(Arc::new(FlatEstimator(30))), 0).await
}

impl Fixture {
    async fn bearer(&self, scope: Scope, max_tokens: usize) -> String {
        self.engine
            .issue_token("assistant", scope, Some(max_tokens), Some(300))
            .await
            .unwrap()
            .bearer
    }

    async fn ask(&self, bearer: &str, budget: usize) -> ContextBundle {
        self.engine
            .get_context(ContextRequest::new("what did I decide about auth?", budget, bearer))
            .await
            .unwrap()
    }
}

// ── Selection ───────────────────────────────────────────────────────────

#[tokio::test]
async fn jwt_scenario_selects_one_item() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;

    let bundle = f.ask(&bearer, 50).await;
    assert_eq!(bundle.included_event_ids, vec!["jwt"]);
    assert_eq!(bundle.tokens_used, 30);
    assert_eq!(bundle.budget, 50);
    assert!(bundle.truncated);
    assert!(!bundle.degraded);
    assert_eq!(bundle.candidates_considered, 3);
    assert_eq!(
        bundle.rendered_text,
        "[code] src/auth.rs (2026-03-01T09:00:00Z)\nChose JWT for stateless mobile auth"
    );
}

#[tokio::test]
async fn roomy_budget_takes_everything_in_rank_order() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;

    let bundle = f.ask(&bearer, 90).await;
    assert_eq!(bundle.included_event_ids, vec!["jwt", "session", "lunch"]);
    assert_eq!(bundle.tokens_used, 90);
    assert!(!bundle.truncated);
    assert!(bundle.rendered_text.contains("\n\n[browser] https://owasp.org"));
    assert!(bundle.rendered_text.ends_with("[manual] (2026-03-01T12:00:00Z)\nLunch order was a burrito"));
}

#[tokio::test]
async fn zero_budget_is_empty_and_truncated_iff_candidates() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;
    let bundle = f.ask(&bearer, 0).await;
    assert!(bundle.is_empty());
    assert_eq!(bundle.tokens_used, 0);
    assert!(bundle.truncated);

    let empty = fixture(vec![], None, 8).await;
    let bearer = empty.bearer(Scope::read_only(), 4000).await;
    let bundle = empty.ask(&bearer, 0).await;
    assert!(bundle.is_empty());
    assert!(!bundle.truncated);
}

#[tokio::test]
async fn budget_monotonicity_and_prefix_consistency() {
    let f = fixture(scenario_events(), None, 8).await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;

    let mut previous: Option<ContextBundle> = None;
    for budget in (0..=80).step_by(3) {
        let bundle = f.ask(&bearer, budget).await;
        assert!(bundle.tokens_used <= budget);
        if let Some(prev) = previous {
            assert!(bundle.tokens_used >= prev.tokens_used);
            assert_eq!(
                &bundle.included_event_ids[..prev.included_event_ids.len()],
                prev.included_event_ids.as_slice()
            );
        }
        previous = Some(bundle);
    }
}

#[tokio::test]
async fn token_max_tokens_caps_budget() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 40).await;
    let bundle = f.ask(&bearer, 1000).await;
    assert_eq!(bundle.budget, 40);
    assert_eq!(bundle.included_event_ids, vec!["jwt"]);
}

#[tokio::test]
async fn identical_inputs_give_identical_bundles() {
    let tied = vec![
        (
            SemanticEvent::new(SourceType::File, "/b.md", "beta notes")
                .with_id("b")
                .with_timestamp(at(9)),
            0.5,
        ),
        (
            SemanticEvent::new(SourceType::File, "/a.md", "alpha notes")
                .with_id("a")
                .with_timestamp(at(9)),
            0.5,
        ),
        (
            SemanticEvent::new(SourceType::File, "/c.md", "gamma notes")
                .with_id("c")
                .with_timestamp(at(11)),
            0.5,
        ),
    ];
    let f = fixture(tied, None, 8).await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;

    let first = f.ask(&bearer, 500).await;
    let second = f.ask(&bearer, 500).await;
    assert_eq!(first, second);
    // Equal scores: newest first, then id ascending.
    assert_eq!(first.included_event_ids, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn duplicate_summaries_keep_the_higher_ranked() {
    let mut events = scenario_events();
    events.push((
        SemanticEvent::new(SourceType::Clipboard, "", "chose jwt  for STATELESS mobile auth")
            .with_id("jwt-copy")
            .with_timestamp(at(11)),
        0.95,
    ));
    let f = fixture(events, Some(Arc::new(FlatEstimator(10))), 0).await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;

    let bundle = f.ask(&bearer, 100).await;
    assert_eq!(bundle.included_event_ids, vec!["jwt-copy", "session", "lunch"]);
    assert_eq!(bundle.candidates_considered, 3);
}

// ── Filters ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_and_scope_filters_apply() {
    let f = fixture(scenario_events(), Some(Arc::new(FlatEstimator(10))), 0).await;

    let code_only = Scope::parse(["read", "source:code", "source:manual"]).unwrap();
    let bearer = f.bearer(code_only, 4000).await;
    let bundle = f.ask(&bearer, 100).await;
    assert_eq!(bundle.included_event_ids, vec!["jwt", "lunch"]);

    let filters = ContextFilters::default().with_source_types([SourceType::Manual, SourceType::Browser]);
    let bundle = f
        .engine
        .get_context(ContextRequest::new("auth", 100, bearer.clone()).with_filters(filters))
        .await
        .unwrap();
    assert_eq!(bundle.included_event_ids, vec!["lunch"]);

    // Inclusive start, exclusive end.
    let morning = TimeRange::new(Some(at(9)), Some(at(12))).unwrap();
    let bearer = f.bearer(Scope::read_only(), 4000).await;
    let bundle = f
        .engine
        .get_context(
            ContextRequest::new("auth", 100, bearer)
                .with_filters(ContextFilters::default().with_time_range(morning)),
        )
        .await
        .unwrap();
    assert_eq!(bundle.included_event_ids, vec!["jwt", "session"]);
}

#[tokio::test]
async fn events_missing_from_store_fall_back_to_index_metadata() {
    let orphan = SemanticEvent::new(SourceType::Code, "lib.rs", "Indexed but never stored").with_id("orphan");
    let hits = vec![SearchHit {
        event_id: orphan.id.clone(),
        score: 0.8,
        document: orphan.document_text(),
        metadata: orphan.index_metadata(),
    }];
    let backends = Backends {
        events: Arc::new(InMemoryEventStore::new()),
        index: Arc::new(FixedIndex { hits }),
        tokens: Arc::new(InMemoryTokenStore::new()),
        audit: Arc::new(TamperableAuditStore::default()),
    };
    let engine = ContextEngine::from_backends(
        backends,
        SigningKey::generate().unwrap(),
        Arc::new(ManualClock::new(Utc::now())),
        &AppConfig::default(),
    )
    .await
    .unwrap();
    let bearer = engine
        .issue_token("c", Scope::read_only(), None, None)
        .await
        .unwrap()
        .bearer;

    let bundle = engine
        .get_context(ContextRequest::new("indexed", 500, bearer))
        .await
        .unwrap();
    assert_eq!(bundle.included_event_ids, vec!["orphan"]);
    assert!(bundle.rendered_text.contains("Indexed but never stored"));
}

// ── Tokens ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn expiry_boundary_is_exactly_expires_at() {
    let f = scenario().await;
    let issued = f
        .engine
        .issue_token("assistant", Scope::read_only(), None, Some(300))
        .await
        .unwrap();

    f.clock.set(issued.token.expires_at - Duration::nanoseconds(1));
    f.ask(&issued.bearer, 50).await;

    f.clock.set(issued.token.expires_at);
    let err = f
        .engine
        .get_context(ContextRequest::new("auth", 50, issued.bearer))
        .await
        .unwrap_err();
    assert_eq!(err, ContextError::AccessDenied(DenialReason::Expired));
}

#[tokio::test]
async fn revocation_mid_ttl_takes_effect_immediately() {
    let f = scenario().await;
    let issued = f
        .engine
        .issue_token("assistant", Scope::read_only(), None, Some(3600))
        .await
        .unwrap();
    f.ask(&issued.bearer, 50).await;

    f.clock.advance(Duration::seconds(60));
    f.engine.revoke_token(&issued.token.token_id).await.unwrap();

    let err = f
        .engine
        .get_context(ContextRequest::new("auth", 50, issued.bearer))
        .await
        .unwrap_err();
    assert_eq!(err, ContextError::AccessDenied(DenialReason::Expired));

    let records = f.engine.get_audit_range(1, 3).await.unwrap();
    let kinds: Vec<_> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(
        kinds,
        vec![AuditEventType::Query, AuditEventType::Revocation, AuditEventType::Denial]
    );
    assert_eq!(records[2].reason, Some(DenialReason::Revoked));
}

// ── Audit ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_call_writes_exactly_one_record() {
    let f = scenario().await;
    let good = f.bearer(Scope::read_only(), 4000).await;
    let stats_only = f.bearer(Scope::parse(["stats"]).unwrap(), 4000).await;

    let calls: Vec<(String, bool)> = vec![
        (good.clone(), true),
        ("garbage".into(), false),
        (stats_only, false),
        (good, true),
    ];
    for (i, (bearer, permitted)) in calls.into_iter().enumerate() {
        let before = f.audit.len();
        let result = f
            .engine
            .get_context(ContextRequest::new("auth", 50, bearer))
            .await;
        assert_eq!(result.is_ok(), permitted);
        assert_eq!(f.audit.len(), before + 1);

        let last = f.engine.audit_log().last_sequence().await.unwrap();
        assert_eq!(last, i as u64 + 1);
    }

    let records = f.engine.get_audit_range(1, 4).await.unwrap();
    assert_eq!(records[0].tokens_delivered, 30);
    assert_eq!(records[1].reason, Some(DenialReason::MalformedSignature));
    assert_eq!(records[2].reason, Some(DenialReason::InsufficientScope));
    assert_eq!(f.engine.verify_audit(1, 4).await.unwrap().records_checked, 4);
}

#[tokio::test]
async fn raw_token_and_query_never_reach_the_log() {
    let f = scenario().await;
    let issued = f
        .engine
        .issue_token("assistant", Scope::read_only(), None, None)
        .await
        .unwrap();
    f.ask(&issued.bearer, 50).await;

    let record = &f.engine.get_audit_range(1, 1).await.unwrap()[0];
    assert_eq!(record.token_id_hash.len(), 16);
    assert_eq!(record.query_hash.len(), 16);
    assert_ne!(record.token_id_hash, issued.token.token_id);
    assert!(!record.query_hash.contains("auth"));
}

#[tokio::test]
async fn single_byte_mutation_is_detected() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;
    for _ in 0..5 {
        f.ask(&bearer, 50).await;
    }
    f.engine.verify_audit(1, 5).await.unwrap();

    f.audit.edit(3, |r| r.tokens_delivered = 31);
    let err = f.engine.verify_audit(1, 5).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Audit(AuditError::BrokenAt {
            sequence: 3,
            kind: ChainBreak::HashMismatch
        })
    ));
    // Checking only the untouched prefix still passes.
    f.engine.verify_audit(1, 2).await.unwrap();
}

#[tokio::test]
async fn rehashed_forgery_breaks_the_next_link() {
    let f = scenario().await;
    let bearer = f.bearer(Scope::read_only(), 4000).await;
    for _ in 0..4 {
        f.ask(&bearer, 50).await;
    }

    f.audit.edit(2, |r| {
        r.client_id = "someone-else".into();
        r.record_hash = r.compute_hash();
    });
    let err = f.engine.verify_audit(1, 4).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Audit(AuditError::BrokenAt {
            sequence: 3,
            kind: ChainBreak::LinkMismatch
        })
    ));
}

#[tokio::test]
async fn invalid_audit_ranges_are_rejected() {
    let f = scenario().await;
    assert!(f.engine.get_audit_range(0, 5).await.is_err());
    assert!(f.engine.get_audit_range(5, 4).await.is_err());
    assert!(f.engine.get_audit_range(1, 5).await.unwrap().is_empty());
}
