//! HTTP gateway for Mynd.
//!
//! Serves the context engine to local AI clients: token issuance,
//! context retrieval, statistics and audit export under `/api`, plus an
//! unauthenticated `/health` probe.
//!
//! Built on Axum.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Json, Router,
    http::StatusCode,
    middleware::{self, Next},
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use mynd_config::{AppConfig, GatewayConfig};
use mynd_engine::ContextEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub engine: Arc<ContextEngine>,
    pub config: GatewayConfig,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(engine: Arc<ContextEngine>, config: GatewayConfig) -> Self {
        Self {
            engine,
            config,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with every route and layer.
///
/// Layers, innermost first:
/// - Request body size limit
/// - Per-client sliding-window rate limit (`/health` exempt)
/// - CORS limited to localhost origins
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(|origin, _| {
            origin
                .to_str()
                .is_ok_and(|o| o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1"))
        }))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(Duration::from_secs(3600));

    let rate_limiter = Arc::new(RateLimiter::new(
        state.config.rate_limit_requests,
        Duration::from_secs(state.config.rate_limit_window_secs),
    ));
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Periodically drop long-expired tokens.
pub fn spawn_token_purge(engine: Arc<ContextEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = engine.purge_expired_tokens().await {
                warn!(error = %e, "Token purge failed");
            }
        }
    })
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let engine = Arc::new(ContextEngine::from_config(&config).await?);
    let purge = spawn_token_purge(
        engine.clone(),
        Duration::from_secs(config.tokens.cleanup_interval_secs),
    );

    let state = Arc::new(GatewayState::new(engine, config.gateway.clone()));
    let app = build_router(state);

    info!(addr = %addr, "Mynd gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app).await;
    purge.abort();
    served?;

    Ok(())
}

// --- Rate Limiter ---

/// In-memory sliding-window rate limiter keyed by bearer string.
///
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within its limit.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keyed by the Authorization header, else "anonymous". 429 when exceeded.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        // Scheme plus the start of the token id; the signature stays out of logs.
        let shown: String = client_key.chars().take(20).collect();
        warn!(client = %shown, "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn not_found_handler() -> impl IntoResponse {
    api::ApiError::new(StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_allows_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn rate_limiter_window_expires() {
        let limiter = RateLimiter::new(1, Duration::from_millis(0));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
    }
}
