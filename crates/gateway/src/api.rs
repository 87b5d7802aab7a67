//! `/api` routes: tokens, context, stats and the audit log.
//!
//! Every route except token issuance takes `Authorization: Bearer <token>`.
//! Errors are `{ "error": "..." }` with a status code:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 400 | malformed request |
//! | 401 | token missing, forged, unknown or expired |
//! | 403 | token lacks the operation |
//! | 404 | no such route |
//! | 503 | storage or audit log unavailable |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use mynd_core::audit::AuditRecord;
use mynd_core::bundle::{ContextBundle, ContextFilters, ContextRequest, TimeRange};
use mynd_core::capability::{DenialReason, Operation, Scope};
use mynd_core::error::{AuditError, ContextError, Error, IssueError};
use mynd_core::event::{SourceType, StoreStats};
use mynd_engine::EngineStatus;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::SharedState;

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/tokens", post(issue_token_handler))
        .route("/tokens/{id}", delete(revoke_token_handler))
        .route("/context", post(context_handler))
        .route("/search/{query}", get(search_handler))
        .route("/stats", get(stats_handler))
        .route("/audit", get(audit_export_handler))
        .route("/audit/verify", get(audit_verify_handler))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A failed request, rendered as `{ "error": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<ContextError> for ApiError {
    fn from(e: ContextError) -> Self {
        let status = match &e {
            ContextError::Validation(_) => StatusCode::BAD_REQUEST,
            ContextError::AccessDenied(DenialReason::InsufficientScope) => StatusCode::FORBIDDEN,
            ContextError::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            ContextError::AuditUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Context(inner) => return inner.clone().into(),
            Error::Issue(IssueError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Issue(_) => StatusCode::BAD_REQUEST,
            Error::Audit(AuditError::Validation(_)) => StatusCode::BAD_REQUEST,
            Error::Store(_) | Error::Audit(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config { .. } | Error::Serialization(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %e, "Request failed");
        }
        Self::new(status, e.to_string())
    }
}

/// The bearer string from the `Authorization` header, or empty.
///
/// An empty bearer still goes through validation so the denial is audited.
fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("")
}

// ── Status ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub server: String,
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub uptime_secs: i64,
}

async fn status_handler(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let engine = state.engine.status().await?;
    Ok(Json(StatusResponse {
        server: "running".into(),
        engine,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    }))
}

// ── Tokens ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    pub client_id: String,
    #[serde(default = "default_grants")]
    pub scope: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

fn default_grants() -> Vec<String> {
    vec![Operation::Read.as_str().to_string()]
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    /// Bearer string to present on later requests.
    pub token: String,
    pub token_id: String,
    pub client_id: String,
    pub scope: Vec<String>,
    pub max_tokens: usize,
    pub expires_at: DateTime<Utc>,
}

async fn issue_token_handler(
    State(state): State<SharedState>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssueTokenResponse>), ApiError> {
    let scope = Scope::parse(&req.scope).map_err(Error::from)?;
    let issued = state
        .engine
        .issue_token(&req.client_id, scope, req.max_tokens, req.ttl_seconds)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            token: issued.bearer,
            scope: issued.token.scope.grants(),
            token_id: issued.token.token_id,
            client_id: issued.token.client_id,
            max_tokens: issued.token.max_tokens,
            expires_at: issued.token.expires_at,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub token_id: String,
    /// False when the token was already revoked or never existed.
    pub revoked: bool,
}

async fn revoke_token_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let revoked = state.engine.revoke_as(bearer(&headers), &token_id).await?;
    Ok(Json(RevokeResponse { token_id, revoked }))
}

// ── Context ─────────────────────────────────────────────────────────────

fn default_max_tokens() -> usize {
    4000
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextBody {
    pub query: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub source_types: Option<Vec<String>>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl ContextBody {
    fn filters(&self) -> Result<ContextFilters, ApiError> {
        let mut filters = ContextFilters::default();
        if let Some(ref names) = self.source_types {
            let types = names
                .iter()
                .map(|n| n.parse::<SourceType>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            filters = filters.with_source_types(types);
        }
        if self.start.is_some() || self.end.is_some() {
            filters = filters.with_time_range(TimeRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(filters)
    }
}

async fn context_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<ContextBody>,
) -> Result<Json<ContextBundle>, ApiError> {
    let request = ContextRequest::new(body.query.clone(), body.max_tokens, bearer(&headers))
        .with_filters(body.filters()?);
    Ok(Json(state.engine.get_context(request).await?))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default = "default_max_tokens")]
    max_tokens: usize,
}

async fn search_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(query): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ContextBundle>, ApiError> {
    let request = ContextRequest::new(query, params.max_tokens, bearer(&headers));
    Ok(Json(state.engine.get_context(request).await?))
}

// ── Stats & audit ───────────────────────────────────────────────────────

async fn stats_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.engine.stats(bearer(&headers)).await?))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    #[serde(default = "first_sequence")]
    from: u64,
    #[serde(default = "last_possible_sequence")]
    to: u64,
}

fn first_sequence() -> u64 {
    1
}

fn last_possible_sequence() -> u64 {
    u64::MAX
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditExportResponse {
    pub records: Vec<AuditRecord>,
    pub count: usize,
}

async fn audit_export_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(range): Query<RangeParams>,
) -> Result<Json<AuditExportResponse>, ApiError> {
    state
        .engine
        .authorize(bearer(&headers), Operation::Audit, "audit_export")
        .await?;
    let records = state.engine.get_audit_range(range.from, range.to).await?;
    let count = records.len();
    Ok(Json(AuditExportResponse { records, count }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub from: u64,
    pub to: u64,
    pub records_checked: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

/// A broken chain is a successful check with a negative answer, so it is
/// reported with 200 and `valid: false`.
async fn audit_verify_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(range): Query<RangeParams>,
) -> Result<Json<VerifyResponse>, ApiError> {
    state
        .engine
        .authorize(bearer(&headers), Operation::Audit, "audit_verify")
        .await?;
    match state.engine.verify_audit(range.from, range.to).await {
        Ok(report) => Ok(Json(VerifyResponse {
            valid: true,
            from: report.from,
            to: report.to,
            records_checked: report.records_checked,
            broken_at: None,
            problem: None,
        })),
        Err(Error::Audit(AuditError::BrokenAt { sequence, kind })) => {
            error!(sequence, problem = %kind, "Audit chain verification failed");
            Ok(Json(VerifyResponse {
                valid: false,
                from: range.from,
                to: range.to,
                records_checked: 0,
                broken_at: Some(sequence),
                problem: Some(kind.to_string()),
            }))
        }
        Err(e) => Err(e.into()),
    }
}
