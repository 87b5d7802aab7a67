//! Capability token manager: issue, validate, revoke.
//!
//! Tokens are persisted through a [`TokenStore`] so they survive restarts
//! and are shared between the server and the CLI. Revocation is mirrored
//! in an in-process set; a token is treated as revoked if either the set
//! or the stored `active` flag says so.
//!
//! The manager never writes audit records. Callers decide what to log.

use crate::secrets::SigningKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mynd_config::TokensConfig;
use mynd_core::audit::fingerprint;
use mynd_core::capability::{CapabilityToken, IssuedToken, Scope, TokenStore, ValidatedToken};
use mynd_core::clock::Clock;
use mynd_core::error::{IssueError, StoreError, TokenError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Issuance limits.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub default_ttl: Duration,
    /// Longer requested TTLs are capped to this.
    pub max_ttl: Duration,
    pub default_max_tokens: usize,
    /// Expired tokens younger than this are kept so they still validate as
    /// `Expired` rather than `Unknown`.
    pub purge_grace: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self::from_config(&TokensConfig::default())
    }
}

impl TokenPolicy {
    pub fn from_config(config: &TokensConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            max_ttl: Duration::from_secs(config.max_ttl_secs),
            default_max_tokens: config.default_max_tokens,
            purge_grace: Duration::from_secs(config.purge_grace_secs),
        }
    }
}

/// A failed validation plus what could be learned about the presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRejection {
    pub error: TokenError,
    /// The id part of the bearer, or the raw bearer if it had none.
    pub presented_id: String,
    /// Known once the token was found in the store.
    pub client_id: Option<String>,
}

impl TokenRejection {
    fn new(error: TokenError, presented_id: &str, client_id: Option<&str>) -> Self {
        Self {
            error,
            presented_id: presented_id.to_string(),
            client_id: client_id.map(str::to_string),
        }
    }
}

pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    key: SigningKey,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    revoked: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl TokenManager {
    /// Build a manager and load the revocation set from `store`.
    pub async fn open(
        store: Arc<dyn TokenStore>,
        key: SigningKey,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
    ) -> Result<Self, StoreError> {
        let revoked: HashSet<String> = store.revoked_token_ids().await?.into_iter().collect();
        debug!(revoked = revoked.len(), store = store.name(), "Token manager ready");
        Ok(Self {
            store,
            key,
            clock,
            policy,
            revoked: RwLock::new(revoked),
        })
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue a token. `None` picks the policy defaults; TTLs above the
    /// policy maximum are capped.
    pub async fn issue(
        &self,
        client_id: &str,
        scope: Scope,
        max_tokens: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, IssueError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(IssueError::InvalidClient);
        }
        let max_tokens = max_tokens.unwrap_or(self.policy.default_max_tokens);
        if max_tokens == 0 {
            return Err(IssueError::InvalidMaxTokens);
        }
        let ttl = ttl.unwrap_or(self.policy.default_ttl);
        if ttl.is_zero() {
            return Err(IssueError::InvalidTtl);
        }
        let ttl = ttl.min(self.policy.max_ttl);
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| IssueError::InvalidTtl)?;

        let issued_at = self.clock.now();
        let token = CapabilityToken {
            token_id: uuid::Uuid::new_v4().simple().to_string(),
            client_id: client_id.to_string(),
            scope,
            max_tokens,
            issued_at,
            expires_at: issued_at + ttl,
            active: true,
        };
        self.store.insert_token(&token).await?;

        info!(
            client_id = %token.client_id,
            token = %fingerprint(&token.token_id),
            grants = ?token.scope.grants(),
            max_tokens,
            expires_at = %token.expires_at,
            "Issued capability token"
        );

        let bearer = self.key.bearer_for(&token.token_id);
        Ok(IssuedToken { token, bearer })
    }

    /// Check a bearer string.
    ///
    /// Order: signature, lookup, expiry (`now >= expires_at`), revocation.
    pub async fn validate(&self, bearer: &str) -> Result<ValidatedToken, TokenRejection> {
        let token_id = self
            .key
            .open_bearer(bearer)
            .map_err(|presented| TokenRejection::new(TokenError::MalformedSignature, presented, None))?;

        let token = match self.store.get_token(token_id).await {
            Ok(Some(token)) => token,
            Ok(None) => return Err(TokenRejection::new(TokenError::Unknown, token_id, None)),
            Err(e) => {
                warn!(error = %e, "Token store unavailable during validation");
                return Err(TokenRejection::new(TokenError::Unknown, token_id, None));
            }
        };

        if token.is_expired_at(self.clock.now()) {
            return Err(TokenRejection::new(
                TokenError::Expired,
                token_id,
                Some(&token.client_id),
            ));
        }

        if !token.active || self.revoked.read().await.contains(token_id) {
            return Err(TokenRejection::new(
                TokenError::Revoked,
                token_id,
                Some(&token.client_id),
            ));
        }

        Ok(ValidatedToken {
            token_id: token.token_id,
            client_id: token.client_id,
            scope: token.scope,
            max_tokens: token.max_tokens,
            expires_at: token.expires_at,
        })
    }

    /// Look a token up by id without validating it.
    pub async fn lookup(&self, token_id: &str) -> Result<Option<CapabilityToken>, StoreError> {
        self.store.get_token(token_id).await
    }

    /// Revoke a token. Idempotent: unknown, expired, or already revoked ids
    /// are not errors. Returns whether anything changed.
    pub async fn revoke(&self, token_id: &str) -> Result<bool, StoreError> {
        let newly_in_set = self.revoked.write().await.insert(token_id.to_string());
        let deactivated = self.store.deactivate_token(token_id).await?;
        if deactivated {
            info!(token = %fingerprint(token_id), "Revoked capability token");
        }
        Ok(newly_in_set || deactivated)
    }

    /// Delete tokens expired for longer than the grace period.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let grace = chrono::Duration::from_std(self.policy.purge_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = self.clock.now() - grace;
        let removed = self.store.remove_expired_tokens(cutoff).await?;

        // Drop set entries for tokens that no longer exist.
        let still_revoked: HashSet<String> =
            self.store.revoked_token_ids().await?.into_iter().collect();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|id| still_revoked.contains(id));
        revoked.extend(still_revoked);

        if removed > 0 {
            info!(removed, "Purged expired capability tokens");
        }
        Ok(removed)
    }

    /// Active, unexpired tokens right now.
    pub async fn active_count(&self) -> Result<usize, StoreError> {
        self.store.count_live_tokens(self.clock.now()).await
    }
}

// ── In-memory token store ───────────────────────────────────────────────

/// Token store for tests and ephemeral sessions.
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, CapabilityToken>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&token.token_id) {
            return Err(StoreError::Duplicate(token.token_id.clone()));
        }
        tokens.insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn get_token(&self, token_id: &str) -> Result<Option<CapabilityToken>, StoreError> {
        Ok(self.tokens.read().await.get(token_id).cloned())
    }

    async fn deactivate_token(&self, token_id: &str) -> Result<bool, StoreError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token_id) {
            Some(token) if token.active => {
                token.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoked_token_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| !t.active)
            .map(|t| t.token_id.clone())
            .collect())
    }

    async fn remove_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= cutoff);
        Ok(before - tokens.len())
    }

    async fn count_live_tokens(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.active && !t.is_expired_at(now))
            .count())
    }
}
