//! End-to-end tests for Mynd over the SQLite backend.
//!
//! These drive the same path the `mynd` binary takes: a config file on
//! disk, `ContextEngine::from_config`, then queries, tokens and the audit
//! log, including across a restart.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mynd_config::{AppConfig, StorageBackend};
use mynd_core::audit::AuditEventType;
use mynd_core::bundle::{ContextBundle, ContextFilters, ContextRequest};
use mynd_core::capability::{DenialReason, Scope};
use mynd_core::error::ContextError;
use mynd_core::event::{SemanticEvent, SourceType};
use mynd_engine::{ContextEngine, KEY_FILE};
use mynd_gateway::{GatewayState, build_router};
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────────

/// Write a default config file under `dir` and load it the way the CLI does.
fn config_in(dir: &Path) -> AppConfig {
    let path = dir.join("config.toml");
    std::fs::write(&path, AppConfig::default_toml()).unwrap();
    let mut config = AppConfig::load_from(&path).unwrap();
    config.data_dir = Some(dir.join("data"));
    config.validate().unwrap();
    config
}

async fn seed(engine: &ContextEngine) {
    let events = [
        SemanticEvent::new(
            SourceType::Browser,
            "https://docs.python.org/authentication",
            "Researched JWT vs session authentication for the mobile app",
        )
        .with_concepts(["jwt", "sessions"]),
        SemanticEvent::new(
            SourceType::File,
            "/projects/auth-decisions.md",
            "Architecture decision: JWT with refresh tokens",
        )
        .with_concepts(["jwt", "architecture"]),
        SemanticEvent::new(
            SourceType::Code,
            "/projects/user-service/auth.py",
            "Implemented JWT refresh with PyJWT",
        )
        .with_concepts(["jwt", "pyjwt"]),
    ];
    for event in events {
        engine.remember(event).await.unwrap();
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn default_config_uses_sqlite_under_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);

    let engine = ContextEngine::from_config(&config).await.unwrap();
    seed(&engine).await;

    assert!(config.database_path().exists());
    assert!(dir.path().join("data").join(KEY_FILE).exists());

    let status = engine.status().await.unwrap();
    assert_eq!(status.events, 3);
    assert_eq!(status.indexed_documents, 3);
    assert_eq!(status.audit_records, 0);
}

#[tokio::test]
async fn events_tokens_and_audit_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let (bearer, token_id) = {
        let engine = ContextEngine::from_config(&config).await.unwrap();
        seed(&engine).await;
        let issued = engine
            .issue_token("claude-desktop", Scope::read_only(), Some(1000), None)
            .await
            .unwrap();
        let bundle = engine
            .get_context(ContextRequest::new("jwt", 1000, issued.bearer.clone()))
            .await
            .unwrap();
        assert_eq!(bundle.included_event_ids.len(), 3);
        (issued.bearer, issued.token.token_id)
    };

    let engine = ContextEngine::from_config(&config).await.unwrap();
    assert_eq!(engine.status().await.unwrap().events, 3);

    // Same key file, so the old bearer still verifies.
    let bundle = engine
        .get_context(ContextRequest::new("refresh tokens", 1000, bearer.clone()))
        .await
        .unwrap();
    assert!(!bundle.is_empty());

    // Revocation is persisted too.
    assert!(engine.revoke_token(&token_id).await.unwrap());
    drop(engine);
    let engine = ContextEngine::from_config(&config).await.unwrap();
    let err = engine
        .get_context(ContextRequest::new("jwt", 100, bearer))
        .await
        .unwrap_err();
    assert_eq!(err, ContextError::AccessDenied(DenialReason::Expired));

    // query, query, revocation, denial: one unbroken chain.
    let report = engine.verify_audit(1, u64::MAX).await.unwrap();
    assert_eq!(report.records_checked, 4);
    let records = engine.get_audit_range(1, 4).await.unwrap();
    let kinds: Vec<_> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventType::Query,
            AuditEventType::Query,
            AuditEventType::Revocation,
            AuditEventType::Denial,
        ]
    );
    for pair in records.windows(2) {
        assert_eq!(pair[1].previous_record_hash, pair[0].record_hash);
    }
}

#[tokio::test]
async fn source_scoped_token_only_sees_its_sources() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ContextEngine::from_config(&config_in(dir.path())).await.unwrap();
    seed(&engine).await;

    let scope = Scope::parse(["read", "source:code"]).unwrap();
    let issued = engine.issue_token("ide-plugin", scope, None, None).await.unwrap();
    let bundle = engine
        .get_context(ContextRequest::new("jwt", 2000, issued.bearer.clone()))
        .await
        .unwrap();
    assert_eq!(bundle.sources.len(), 1);
    assert_eq!(bundle.sources[0].source_type, SourceType::Code);

    // A request filter narrower than the scope still applies.
    let reader = engine
        .issue_token("claude", Scope::read_only(), None, None)
        .await
        .unwrap();
    let filters = ContextFilters::default().with_source_types([SourceType::Browser]);
    let bundle = engine
        .get_context(ContextRequest::new("jwt", 2000, reader.bearer).with_filters(filters))
        .await
        .unwrap();
    assert!(bundle.sources.iter().all(|s| s.source_type == SourceType::Browser));
    assert_eq!(bundle.sources.len(), 1);
}

#[tokio::test]
async fn raw_secrets_never_reach_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let engine = ContextEngine::from_config(&config).await.unwrap();
    seed(&engine).await;

    let issued = engine
        .issue_token("claude", Scope::read_only(), None, None)
        .await
        .unwrap();
    let query = "what did we decide about refresh tokens";
    engine
        .get_context(ContextRequest::new(query, 500, issued.bearer.clone()))
        .await
        .unwrap();
    drop(engine);

    let bytes = std::fs::read(config.database_path()).unwrap();
    let haystack = String::from_utf8_lossy(&bytes);
    assert!(!haystack.contains(query));
    assert!(!haystack.contains(&issued.bearer));
}

// ── Gateway over SQLite ──────────────────────────────────────────────────

#[tokio::test]
async fn gateway_serves_a_persistent_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let engine = Arc::new(ContextEngine::from_config(&config).await.unwrap());
    seed(&engine).await;
    let app = build_router(Arc::new(GatewayState::new(engine, config.gateway.clone())));

    let req = Request::builder()
        .method("POST")
        .uri("/api/tokens")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::json!({ "client_id": "claude-desktop", "scope": ["read"] }).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let issued: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let bearer = issued["token"].as_str().unwrap().to_string();

    let req = Request::builder()
        .method("POST")
        .uri("/api/context")
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {bearer}"))
        .body(Body::from(
            serde_json::json!({ "query": "architecture decision", "max_tokens": 40 }).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let bundle: ContextBundle = serde_json::from_slice(&body).unwrap();
    assert!(bundle.tokens_used <= 40);
    assert!(bundle.rendered_text.contains("Architecture decision"));

    let resp = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["events"], 3);
    assert_eq!(status["audit_records"], 1);
}
