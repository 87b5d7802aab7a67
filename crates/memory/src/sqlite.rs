//! SQLite persistence for events, the audit chain, and capability tokens.
//!
//! One database file holds four tables:
//! - `events`: immutable semantic events
//! - `event_fts`: FTS5 table backing the similarity index (BM25)
//! - `audit_log`: hash-chained audit records, keyed by sequence number
//! - `capability_tokens`: issued tokens and their `active` flag
//!
//! Triggers make `events` and `audit_log` append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mynd_core::audit::{AuditRecord, AuditStore, StoredRecord, canonical_timestamp};
use mynd_core::capability::{CapabilityToken, DenialReason, Scope, TokenStore};
use mynd_core::error::StoreError;
use mynd_core::event::{SemanticEvent, StoreStats};
use mynd_core::store::{EventStore, SearchHit, SimilarityIndex};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A SQLite store implementing every persistence trait Mynd uses.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to `:memory:` is a separate database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn migrate(&self, what: &str, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        Ok(())
    }

    /// Run schema migrations. Every statement is idempotent.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        self.migrate(
            "events table",
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id                TEXT PRIMARY KEY NOT NULL,
                timestamp         TEXT NOT NULL,
                source_type       TEXT NOT NULL,
                source_path       TEXT NOT NULL DEFAULT '',
                semantic_summary  TEXT NOT NULL,
                concepts          TEXT NOT NULL DEFAULT '[]',
                decision_context  TEXT,
                metadata          TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .await?;

        self.migrate(
            "events timestamp index",
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp DESC)",
        )
        .await?;

        self.migrate(
            "events update guard",
            r#"
            CREATE TRIGGER IF NOT EXISTS events_no_update BEFORE UPDATE ON events BEGIN
                SELECT RAISE(ABORT, 'events are immutable');
            END
            "#,
        )
        .await?;

        self.migrate(
            "FTS5 table",
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS event_fts USING fts5(
                event_id UNINDEXED,
                document,
                metadata UNINDEXED,
                tokenize='porter unicode61'
            )
            "#,
        )
        .await?;

        self.migrate(
            "audit table",
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                sequence_number       INTEGER PRIMARY KEY NOT NULL,
                timestamp             TEXT NOT NULL,
                event_type            TEXT NOT NULL,
                client_id             TEXT NOT NULL,
                token_id_hash         TEXT NOT NULL,
                query_hash            TEXT NOT NULL,
                tokens_delivered      INTEGER NOT NULL,
                reason                TEXT,
                previous_record_hash  TEXT NOT NULL,
                record_hash           TEXT NOT NULL
            )
            "#,
        )
        .await?;

        self.migrate(
            "audit update guard",
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_no_update BEFORE UPDATE ON audit_log BEGIN
                SELECT RAISE(ABORT, 'audit log is append-only');
            END
            "#,
        )
        .await?;

        self.migrate(
            "audit delete guard",
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_no_delete BEFORE DELETE ON audit_log BEGIN
                SELECT RAISE(ABORT, 'audit log is append-only');
            END
            "#,
        )
        .await?;

        self.migrate(
            "tokens table",
            r#"
            CREATE TABLE IF NOT EXISTS capability_tokens (
                token_id    TEXT PRIMARY KEY NOT NULL,
                client_id   TEXT NOT NULL,
                scope       TEXT NOT NULL,
                max_tokens  INTEGER NOT NULL,
                issued_at   TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                active      INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .await?;

        self.migrate(
            "tokens expiry index",
            "CREATE INDEX IF NOT EXISTS idx_tokens_expires_at ON capability_tokens(expires_at)",
        )
        .await?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    // ── Row mapping ─────────────────────────────────────────────────────

    fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
    }

    fn parse_time(value: &str, what: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
    }

    /// Parse a `SemanticEvent` from an `events` row.
    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<SemanticEvent, StoreError> {
        let source_type: String = Self::column(row, "source_type")?;
        let concepts: String = Self::column(row, "concepts")?;
        let metadata: String = Self::column(row, "metadata")?;
        let timestamp: String = Self::column(row, "timestamp")?;

        Ok(SemanticEvent {
            id: Self::column(row, "id")?,
            timestamp: Self::parse_time(&timestamp, "event timestamp")?,
            source_type: source_type
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            source_path: Self::column(row, "source_path")?,
            semantic_summary: Self::column(row, "semantic_summary")?,
            concepts: serde_json::from_str(&concepts)
                .map_err(|e| StoreError::Corrupt(format!("concepts: {e}")))?,
            decision_context: Self::column(row, "decision_context")?,
            metadata: serde_json::from_str(&metadata)
                .map_err(|e| StoreError::Corrupt(format!("metadata: {e}")))?,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord, StoreError> {
        let sequence_number: i64 = Self::column(row, "sequence_number")?;
        let timestamp: String = Self::column(row, "timestamp")?;
        let event_type: String = Self::column(row, "event_type")?;
        let tokens_delivered: i64 = Self::column(row, "tokens_delivered")?;
        let reason: Option<String> = Self::column(row, "reason")?;

        // The hash covers the canonical form, so any other spelling of the
        // same instant would verify clean.
        let parsed = Self::parse_time(&timestamp, "audit timestamp")?;
        if canonical_timestamp(&parsed) != timestamp {
            return Err(StoreError::Corrupt(format!(
                "audit timestamp {timestamp:?} is not canonical"
            )));
        }

        Ok(AuditRecord {
            sequence_number: sequence_number as u64,
            timestamp: parsed,
            event_type: event_type.parse()?,
            client_id: Self::column(row, "client_id")?,
            token_id_hash: Self::column(row, "token_id_hash")?,
            query_hash: Self::column(row, "query_hash")?,
            tokens_delivered: tokens_delivered as u64,
            reason: reason.map(|r| r.parse::<DenialReason>()).transpose()?,
            previous_record_hash: Self::column(row, "previous_record_hash")?,
            record_hash: Self::column(row, "record_hash")?,
        })
    }

    fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<CapabilityToken, StoreError> {
        let scope: String = Self::column(row, "scope")?;
        let grants: Vec<String> = serde_json::from_str(&scope)
            .map_err(|e| StoreError::Corrupt(format!("scope: {e}")))?;
        let max_tokens: i64 = Self::column(row, "max_tokens")?;
        let issued_at: String = Self::column(row, "issued_at")?;
        let expires_at: String = Self::column(row, "expires_at")?;
        let active: i64 = Self::column(row, "active")?;

        Ok(CapabilityToken {
            token_id: Self::column(row, "token_id")?,
            client_id: Self::column(row, "client_id")?,
            scope: Scope::parse(grants).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            max_tokens: max_tokens as usize,
            issued_at: Self::parse_time(&issued_at, "issued_at")?,
            expires_at: Self::parse_time(&expires_at, "expires_at")?,
            active: active != 0,
        })
    }

    /// Build a safe FTS5 query from user text.
    ///
    /// Each word is stripped to alphanumerics, quoted, and OR-ed so partial
    /// matches still rank.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .map(|w| format!("\"{w}\""))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ── Events ──────────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, event: SemanticEvent) -> Result<String, StoreError> {
        let concepts = serde_json::to_string(&event.concepts)
            .map_err(|e| StoreError::Storage(format!("concepts serialization: {e}")))?;
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|e| StoreError::Storage(format!("metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO events (id, timestamp, source_type, source_path, semantic_summary,
                                concepts, decision_context, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&event.id)
        .bind(canonical_timestamp(&event.timestamp))
        .bind(event.source_type.as_str())
        .bind(&event.source_path)
        .bind(&event.semantic_summary)
        .bind(&concepts)
        .bind(&event.decision_context)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(event.id.clone())
            } else {
                StoreError::Storage(format!("INSERT event failed: {e}"))
            }
        })?;

        debug!(event_id = %event.id, "Stored event");
        Ok(event.id)
    }

    async fn get(&self, id: &str) -> Result<Option<SemanticEvent>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET event: {e}")))?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<SemanticEvent>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT * FROM events WHERE id IN ({})",
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET many events: {e}")))?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let rows = sqlx::query(
            "SELECT source_type, COUNT(*) AS cnt FROM events GROUP BY source_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("event stats: {e}")))?;

        let mut stats = StoreStats::default();
        for row in &rows {
            let source: String = Self::column(row, "source_type")?;
            let cnt: i64 = Self::column(row, "cnt")?;
            stats.count += cnt as usize;
            stats.by_source_type.insert(source, cnt as usize);
        }
        Ok(stats)
    }
}

// ── Similarity index ────────────────────────────────────────────────────

#[async_trait]
impl SimilarityIndex for SqliteStore {
    fn name(&self) -> &str {
        "sqlite_fts5"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, StoreError> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() || max_results == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT event_id, document, metadata, bm25(event_fts) AS rank
            FROM event_fts
            WHERE event_fts MATCH ?1
            ORDER BY rank, event_id
            LIMIT ?2
            "#,
        )
        .bind(&fts_query)
        .bind(max_results as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter()
            .map(|row| {
                let metadata: String = Self::column(row, "metadata")?;
                let rank: f64 = Self::column(row, "rank")?;
                Ok(SearchHit {
                    event_id: Self::column(row, "event_id")?,
                    // bm25() is lower-is-better; flip so higher is better.
                    score: (-rank) as f32,
                    document: Self::column(row, "document")?,
                    metadata: serde_json::from_str(&metadata)
                        .map_err(|e| StoreError::Corrupt(format!("index metadata: {e}")))?,
                })
            })
            .collect()
    }

    async fn upsert(
        &self,
        event_id: &str,
        document: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&metadata)
            .map_err(|e| StoreError::Storage(format!("index metadata serialization: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin index upsert: {e}")))?;
        sqlx::query("DELETE FROM event_fts WHERE event_id = ?1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("index delete: {e}")))?;
        sqlx::query("INSERT INTO event_fts (event_id, document, metadata) VALUES (?1, ?2, ?3)")
            .bind(event_id)
            .bind(document)
            .bind(&metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("index insert: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit index upsert: {e}")))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM event_fts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("index COUNT: {e}")))?;
        let cnt: i64 = Self::column(&row, "cnt")?;
        Ok(cnt as usize)
    }
}

// ── Audit ───────────────────────────────────────────────────────────────

#[async_trait]
impl AuditStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (sequence_number, timestamp, event_type, client_id,
                                   token_id_hash, query_hash, tokens_delivered, reason,
                                   previous_record_hash, record_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(record.sequence_number as i64)
        .bind(canonical_timestamp(&record.timestamp))
        .bind(record.event_type.as_str())
        .bind(&record.client_id)
        .bind(&record.token_id_hash)
        .bind(&record.query_hash)
        .bind(record.tokens_delivered as i64)
        .bind(record.reason.map(|r| r.as_str()))
        .bind(&record.previous_record_hash)
        .bind(&record.record_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("audit sequence {}", record.sequence_number))
            } else {
                StoreError::Storage(format!("INSERT audit record failed: {e}"))
            }
        })?;
        Ok(())
    }

    async fn last_record(&self) -> Result<Option<AuditRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM audit_log ORDER BY sequence_number DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("last audit record: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn records_in_range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE sequence_number BETWEEN ?1 AND ?2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(from.min(i64::MAX as u64) as i64)
        .bind(to.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("audit range: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn last_sequence(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(sequence_number), 0) AS last FROM audit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("last audit sequence: {e}")))?;
        let last: i64 = Self::column(&row, "last")?;
        Ok(last.max(0) as u64)
    }

    async fn stored_in_range(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE sequence_number BETWEEN ?1 AND ?2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(from.min(i64::MAX as u64) as i64)
        .bind(to.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("audit range: {e}")))?;

        rows.iter()
            .map(|row| {
                let sequence_number: i64 = Self::column(row, "sequence_number")?;
                Ok(match Self::row_to_record(row) {
                    Ok(record) => StoredRecord::Decoded(record),
                    Err(e) => {
                        warn!(sequence_number, error = %e, "Audit row does not decode");
                        StoredRecord::Undecodable {
                            sequence_number: sequence_number as u64,
                            problem: e.to_string(),
                        }
                    }
                })
            })
            .collect()
    }
}

// ── Tokens ──────────────────────────────────────────────────────────────

#[async_trait]
impl TokenStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), StoreError> {
        let scope = serde_json::to_string(&token.scope.grants())
            .map_err(|e| StoreError::Storage(format!("scope serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO capability_tokens (token_id, client_id, scope, max_tokens,
                                           issued_at, expires_at, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&token.token_id)
        .bind(&token.client_id)
        .bind(&scope)
        .bind(token.max_tokens as i64)
        .bind(canonical_timestamp(&token.issued_at))
        .bind(canonical_timestamp(&token.expires_at))
        .bind(token.active as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(token.token_id.clone())
            } else {
                StoreError::Storage(format!("INSERT token failed: {e}"))
            }
        })?;
        Ok(())
    }

    async fn get_token(&self, token_id: &str) -> Result<Option<CapabilityToken>, StoreError> {
        let row = sqlx::query("SELECT * FROM capability_tokens WHERE token_id = ?1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET token: {e}")))?;

        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn deactivate_token(&self, token_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE capability_tokens SET active = 0 WHERE token_id = ?1 AND active = 1",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("revoke token: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoked_token_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT token_id FROM capability_tokens WHERE active = 0")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("revoked tokens: {e}")))?;

        rows.iter().map(|row| Self::column(row, "token_id")).collect()
    }

    async fn remove_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        // Timestamps share one fixed-width format, so text order is time order.
        let result = sqlx::query("DELETE FROM capability_tokens WHERE expires_at < ?1")
            .bind(canonical_timestamp(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("purge tokens: {e}")))?;

        Ok(result.rows_affected() as usize)
    }

    async fn count_live_tokens(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM capability_tokens WHERE active = 1 AND expires_at > ?1",
        )
        .bind(canonical_timestamp(&now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("live tokens: {e}")))?;

        let cnt: i64 = Self::column(&row, "cnt")?;
        Ok(cnt as usize)
    }
}
