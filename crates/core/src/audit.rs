//! Audit records: the hash-chained, append-only access history.
//!
//! # Record hash
//!
//! `record_hash` is lowercase hex SHA-256 over the following fields, in this
//! order, each written as an 8-byte big-endian length followed by its UTF-8
//! bytes:
//!
//! 1. `sequence_number` (decimal)
//! 2. `timestamp` (RFC 3339, UTC, nanosecond precision, `Z` suffix)
//! 3. `event_type` (`query`, `denial`, `revocation`)
//! 4. `client_id`
//! 5. `token_id_hash`
//! 6. `query_hash`
//! 7. `tokens_delivered` (decimal)
//! 8. `reason` (snake_case denial reason, empty when absent)
//! 9. `previous_record_hash`
//!
//! The first record links to [`GENESIS_HASH`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::capability::DenialReason;
use crate::error::StoreError;

/// `previous_record_hash` of the first record in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kind of access decision being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Query,
    Denial,
    Revocation,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Denial => "denial",
            Self::Revocation => "revocation",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "denial" => Ok(Self::Denial),
            "revocation" => Ok(Self::Revocation),
            other => Err(StoreError::Corrupt(format!("audit event type: {other}"))),
        }
    }
}

/// The caller-supplied fields of a record, before sequencing and hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub event_type: AuditEventType,
    pub client_id: String,
    pub token_id_hash: String,
    pub query_hash: String,
    pub tokens_delivered: u64,
    pub reason: Option<DenialReason>,
}

impl AuditDraft {
    /// A delivered context bundle.
    pub fn query(client_id: &str, token_id: &str, query: &str, tokens_delivered: u64) -> Self {
        Self {
            event_type: AuditEventType::Query,
            client_id: client_id.to_string(),
            token_id_hash: fingerprint(token_id),
            query_hash: fingerprint(query),
            tokens_delivered,
            reason: None,
        }
    }

    /// A refused request. `client_id` may be empty when the token could not
    /// be resolved to a client.
    pub fn denial(client_id: &str, token_id: &str, query: &str, reason: DenialReason) -> Self {
        Self {
            event_type: AuditEventType::Denial,
            client_id: client_id.to_string(),
            token_id_hash: fingerprint(token_id),
            query_hash: fingerprint(query),
            tokens_delivered: 0,
            reason: Some(reason),
        }
    }

    /// A token revocation.
    pub fn revocation(client_id: &str, token_id: &str) -> Self {
        Self {
            event_type: AuditEventType::Revocation,
            client_id: client_id.to_string(),
            token_id_hash: fingerprint(token_id),
            query_hash: String::new(),
            tokens_delivered: 0,
            reason: None,
        }
    }
}

/// One sealed entry in the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub client_id: String,
    pub token_id_hash: String,
    pub query_hash: String,
    pub tokens_delivered: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    pub previous_record_hash: String,
    pub record_hash: String,
}

impl AuditRecord {
    /// Sequence and hash a draft onto the chain.
    pub fn seal(
        sequence_number: u64,
        timestamp: DateTime<Utc>,
        draft: AuditDraft,
        previous_record_hash: &str,
    ) -> Self {
        let mut record = Self {
            sequence_number,
            timestamp,
            event_type: draft.event_type,
            client_id: draft.client_id,
            token_id_hash: draft.token_id_hash,
            query_hash: draft.query_hash,
            tokens_delivered: draft.tokens_delivered,
            reason: draft.reason,
            previous_record_hash: previous_record_hash.to_string(),
            record_hash: String::new(),
        };
        record.record_hash = record.compute_hash();
        record
    }

    /// Recompute the hash from every field except `record_hash`.
    pub fn compute_hash(&self) -> String {
        let fields = [
            self.sequence_number.to_string(),
            canonical_timestamp(&self.timestamp),
            self.event_type.as_str().to_string(),
            self.client_id.clone(),
            self.token_id_hash.clone(),
            self.query_hash.clone(),
            self.tokens_delivered.to_string(),
            self.reason.map(|r| r.as_str().to_string()).unwrap_or_default(),
            self.previous_record_hash.clone(),
        ];

        let mut hasher = Sha256::new();
        for field in &fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the fields.
    pub fn is_intact(&self) -> bool {
        self.compute_hash() == self.record_hash
    }
}

/// The timestamp encoding used inside the record hash.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Short, non-reversible fingerprint used for token ids and query text:
/// the first 16 hex chars of SHA-256.
pub fn fingerprint(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..16].to_string()
}

/// Append-only persistence for sealed records.
///
/// Implementations never update or delete. `append` must reject a
/// sequence number that already exists.
#[async_trait]
pub trait AuditStore: Send + Sync {
    fn name(&self) -> &str;

    async fn append_record(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// The record with the highest sequence number.
    async fn last_record(&self) -> Result<Option<AuditRecord>, StoreError>;

    /// Records with `from <= sequence_number <= to`, ascending.
    async fn records_in_range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, StoreError>;

    /// Highest sequence number stored, 0 when empty. Must not depend on the
    /// last row decoding.
    async fn last_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.last_record().await?.map(|r| r.sequence_number).unwrap_or(0))
    }

    /// Like [`records_in_range`](Self::records_in_range), but a row whose
    /// fields fail to decode is returned as [`StoredRecord::Undecodable`]
    /// instead of failing the whole read.
    async fn stored_in_range(&self, from: u64, to: u64) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self
            .records_in_range(from, to)
            .await?
            .into_iter()
            .map(StoredRecord::Decoded)
            .collect())
    }
}

/// One audit row as read back for chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRecord {
    Decoded(AuditRecord),
    Undecodable { sequence_number: u64, problem: String },
}

impl StoredRecord {
    pub fn sequence_number(&self) -> u64 {
        match self {
            Self::Decoded(record) => record.sequence_number,
            Self::Undecodable {
                sequence_number, ..
            } => *sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64, prev: &str) -> AuditRecord {
        AuditRecord::seal(
            seq,
            DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456789Z")
                .unwrap()
                .with_timezone(&Utc),
            AuditDraft::query("claude-desktop", "tok-1", "jwt decision", 30),
            prev,
        )
    }

    #[test]
    fn hash_is_deterministic() {
        let a = sample(1, GENESIS_HASH);
        let b = sample(1, GENESIS_HASH);
        assert_eq!(a.record_hash, b.record_hash);
        assert_eq!(a.record_hash.len(), 64);
        assert!(a.is_intact());
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = sample(1, GENESIS_HASH);

        let mut changed = base.clone();
        changed.tokens_delivered = 31;
        assert_ne!(changed.compute_hash(), base.record_hash);

        let mut changed = base.clone();
        changed.reason = Some(DenialReason::Expired);
        assert_ne!(changed.compute_hash(), base.record_hash);

        let mut changed = base.clone();
        changed.previous_record_hash = "1".repeat(64);
        assert_ne!(changed.compute_hash(), base.record_hash);

        let mut changed = base.clone();
        changed.timestamp += chrono::Duration::nanoseconds(1);
        assert_ne!(changed.compute_hash(), base.record_hash);
    }

    #[test]
    fn length_prefix_prevents_field_shifting() {
        let mut a = sample(1, GENESIS_HASH);
        a.client_id = "ab".into();
        a.token_id_hash = "c".into();
        let mut b = a.clone();
        b.client_id = "a".into();
        b.token_id_hash = "bc".into();
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn canonical_timestamp_keeps_nanos() {
        let record = sample(1, GENESIS_HASH);
        assert_eq!(
            canonical_timestamp(&record.timestamp),
            "2026-03-01T12:00:00.123456789Z"
        );
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_eq!(fingerprint("abc").len(), 16);
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn drafts_hash_sensitive_inputs() {
        let draft = AuditDraft::denial("", "tok-secret", "private query", DenialReason::Unknown);
        assert!(!draft.token_id_hash.contains("secret"));
        assert_eq!(draft.query_hash, fingerprint("private query"));
        assert_eq!(draft.tokens_delivered, 0);
    }

    #[test]
    fn record_serialization() {
        let record = sample(3, GENESIS_HASH);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.is_intact());
    }
}
