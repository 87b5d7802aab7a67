//! Error types for the Mynd domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use crate::capability::DenialReason;
use thiserror::Error;

/// The top-level error type for all Mynd operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Token errors ---
    #[error("Token issuance failed: {0}")]
    Issue(#[from] IssueError),

    // --- Audit errors ---
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    // --- Context assembly ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by the event store, similarity index, token store or
/// audit store. The engine never surfaces these raw to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Malformed caller input, rejected before any side effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("query text is {len} characters, limit is {max}")]
    QueryTooLong { len: usize, max: usize },

    #[error("time range start must be before its end")]
    InvalidTimeRange,

    #[error("audit range {from}..={to} is invalid")]
    InvalidAuditRange { from: u64, to: u64 },
}

/// Why a presented capability token was not accepted.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("token unknown")]
    Unknown,

    #[error("token signature malformed")]
    MalformedSignature,
}

impl TokenError {
    /// The reason recorded in the audit log for this failure.
    pub fn denial_reason(self) -> DenialReason {
        match self {
            Self::Expired => DenialReason::Expired,
            Self::Revoked => DenialReason::Revoked,
            Self::Unknown => DenialReason::Unknown,
            Self::MalformedSignature => DenialReason::MalformedSignature,
        }
    }
}

/// Token issuance failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("client id must not be empty")]
    InvalidClient,

    #[error("ttl must be at least one second")]
    InvalidTtl,

    #[error("max_tokens must be positive")]
    InvalidMaxTokens,

    #[error("token store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// How a hash chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainBreak {
    /// The stored `record_hash` does not match the recomputed hash.
    HashMismatch,
    /// `previous_record_hash` does not match the preceding record.
    LinkMismatch,
    /// A sequence number is missing or repeated.
    SequenceGap,
    /// A stored field no longer decodes, or is not in its canonical form.
    Undecodable,
}

impl std::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashMismatch => write!(f, "record hash mismatch"),
            Self::LinkMismatch => write!(f, "previous hash link mismatch"),
            Self::SequenceGap => write!(f, "sequence gap"),
            Self::Undecodable => write!(f, "stored record does not decode"),
        }
    }
}

/// Audit log failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("audit chain broken at sequence {sequence}: {kind}")]
    BrokenAt { sequence: u64, kind: ChainBreak },

    #[error("audit writer task failed: {0}")]
    Writer(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AuditError {
    /// Whether this error proves tampering (as opposed to an I/O failure).
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::BrokenAt { .. })
    }
}

/// Errors returned by `get_context` and the other engine entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("access denied: {0}")]
    AccessDenied(DenialReason),

    #[error("audit log unavailable, refusing to deliver context: {0}")]
    AuditUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_correctly() {
        let err = Error::Store(StoreError::QueryFailed("no such table".into()));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn chain_break_displays_sequence() {
        let err = AuditError::BrokenAt {
            sequence: 7,
            kind: ChainBreak::LinkMismatch,
        };
        assert!(err.to_string().contains("sequence 7"));
        assert!(err.is_integrity_failure());
        assert!(!AuditError::Writer("gone".into()).is_integrity_failure());
    }

    #[test]
    fn token_errors_map_to_distinct_denials() {
        assert_eq!(TokenError::Expired.denial_reason(), DenialReason::Expired);
        assert_eq!(TokenError::Revoked.denial_reason(), DenialReason::Revoked);
        assert_eq!(
            TokenError::MalformedSignature.denial_reason(),
            DenialReason::MalformedSignature
        );
    }
}
