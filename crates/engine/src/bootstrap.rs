//! Wiring an engine from configuration.

use crate::engine::ContextEngine;
use mynd_config::{AppConfig, StorageBackend};
use mynd_core::audit::AuditStore;
use mynd_core::capability::TokenStore;
use mynd_core::clock::{Clock, SystemClock};
use mynd_core::error::{Error, StoreError};
use mynd_core::store::{EventStore, SimilarityIndex};
use mynd_memory::{InMemoryEventStore, KeywordIndex, SqliteStore};
use mynd_security::{
    AuditLog, InMemoryAuditStore, InMemoryTokenStore, SecretError, SigningKey, TokenManager,
    TokenPolicy, TracingSink,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// File under the data directory holding the generated signing key.
pub const KEY_FILE: &str = "token.key";

/// The four stores an engine reads and writes.
#[derive(Clone)]
pub struct Backends {
    pub events: Arc<dyn EventStore>,
    pub index: Arc<dyn SimilarityIndex>,
    pub tokens: Arc<dyn TokenStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Backends {
    /// Everything in process memory; gone on exit.
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            index: Arc::new(KeywordIndex::new()),
            tokens: Arc::new(InMemoryTokenStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
        }
    }

    /// One SQLite database backing all four.
    pub async fn sqlite(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
        Ok(Self {
            events: store.clone(),
            index: store.clone(),
            tokens: store.clone(),
            audit: store,
        })
    }

    /// The backend named by `config.storage`.
    pub async fn open(config: &AppConfig) -> Result<Self, StoreError> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Sqlite => Self::sqlite(&config.database_path()).await,
        }
    }
}

/// The configured secret, else the key file in the data directory.
///
/// The in-memory backend forgets every token on exit, so it gets a fresh
/// key when no secret is configured.
pub fn signing_key(config: &AppConfig) -> Result<SigningKey, SecretError> {
    if let Some(ref secret) = config.tokens.secret {
        return SigningKey::from_secret(secret);
    }
    match config.storage.backend {
        StorageBackend::Memory => SigningKey::generate(),
        StorageBackend::Sqlite => SigningKey::load_or_create(&config.data_dir().join(KEY_FILE)),
    }
}

impl ContextEngine {
    /// Assemble an engine over existing stores.
    pub async fn from_backends(
        backends: Backends,
        key: SigningKey,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Result<Self, Error> {
        let tokens = TokenManager::open(
            backends.tokens,
            key,
            clock.clone(),
            TokenPolicy::from_config(&config.tokens),
        )
        .await?;
        let audit = AuditLog::with_sinks(backends.audit, clock, vec![Box::new(TracingSink)]);

        Ok(Self::new(
            backends.events,
            backends.index,
            Arc::new(tokens),
            Arc::new(audit),
            config.engine.clone(),
        ))
    }

    /// Open the configured backend and build an engine on the system clock.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let key = signing_key(config).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let backends = Backends::open(config).await?;
        info!(
            backend = ?config.storage.backend,
            store = backends.events.name(),
            index = backends.index.name(),
            "Opened Mynd storage"
        );
        Self::from_backends(backends, key, Arc::new(SystemClock), config).await
    }
}
