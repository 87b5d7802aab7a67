//! Capability tokens: short-lived, scope-restricted read credentials.
//!
//! Scope is a typed set of operations and source types. Free-text grants
//! are parsed once, at the boundary, and rejected if unknown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{IssueError, StoreError};
use crate::event::SourceType;

/// An operation a token may authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Retrieve context bundles.
    Read,
    /// Read store statistics.
    Stats,
    /// Export and verify the audit log.
    Audit,
    /// Revoke tokens belonging to other clients.
    Admin,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Stats => "stats",
            Self::Audit => "audit",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permitted operations plus permitted source types.
///
/// An empty source-type set means every source type is permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    operations: BTreeSet<Operation>,
    #[serde(default)]
    source_types: BTreeSet<SourceType>,
}

impl Scope {
    /// Build a scope from typed parts. At least one operation is required.
    pub fn new(
        operations: impl IntoIterator<Item = Operation>,
        source_types: impl IntoIterator<Item = SourceType>,
    ) -> Result<Self, IssueError> {
        let operations: BTreeSet<Operation> = operations.into_iter().collect();
        if operations.is_empty() {
            return Err(IssueError::InvalidScope("no operations granted".into()));
        }
        Ok(Self {
            operations,
            source_types: source_types.into_iter().collect(),
        })
    }

    /// `read` over every source type.
    pub fn read_only() -> Self {
        Self {
            operations: BTreeSet::from([Operation::Read]),
            source_types: BTreeSet::new(),
        }
    }

    /// Parse grant strings such as `"read"`, `"stats"`, `"source:code"`.
    ///
    /// `context_read` is accepted as a synonym for `read`. Any unknown
    /// operation or source type fails the whole scope.
    pub fn parse<I, S>(grants: I) -> Result<Self, IssueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut operations = BTreeSet::new();
        let mut source_types = BTreeSet::new();

        for grant in grants {
            let grant = grant.as_ref().trim().to_ascii_lowercase();
            if let Some(source) = grant.strip_prefix("source:") {
                let source = source
                    .parse::<SourceType>()
                    .map_err(|e| IssueError::InvalidScope(e.to_string()))?;
                source_types.insert(source);
                continue;
            }
            let op = match grant.as_str() {
                "read" | "context_read" => Operation::Read,
                "stats" => Operation::Stats,
                "audit" => Operation::Audit,
                "admin" => Operation::Admin,
                other => {
                    return Err(IssueError::InvalidScope(format!("unknown grant: {other}")));
                }
            };
            operations.insert(op);
        }

        Self::new(operations, source_types)
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    pub fn permits_source(&self, source_type: SourceType) -> bool {
        self.source_types.is_empty() || self.source_types.contains(&source_type)
    }

    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.operations.iter().copied()
    }

    pub fn source_types(&self) -> impl Iterator<Item = SourceType> + '_ {
        self.source_types.iter().copied()
    }

    /// Canonical grant strings; `Scope::parse(scope.grants())` round-trips.
    pub fn grants(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|op| op.as_str().to_string())
            .chain(self.source_types.iter().map(|s| format!("source:{s}")))
            .collect()
    }
}

/// A capability token as issued. Only `active` ever changes, and only by
/// revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub token_id: String,
    pub client_id: String,
    pub scope: Scope,
    /// Upper bound on the budget of any single query.
    pub max_tokens: usize,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl CapabilityToken {
    /// Expired at and after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A freshly issued token plus the bearer string the client presents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: CapabilityToken,
    /// `<token_id>.<signature>`
    pub bearer: String,
}

/// The facts a successful validation yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub token_id: String,
    pub client_id: String,
    pub scope: Scope,
    pub max_tokens: usize,
    pub expires_at: DateTime<Utc>,
}

/// Why access was denied, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Expired,
    Revoked,
    Unknown,
    MalformedSignature,
    InsufficientScope,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Unknown => "unknown",
            Self::MalformedSignature => "malformed_signature",
            Self::InsufficientScope => "insufficient_scope",
        }
    }

    /// What the caller is told. Revoked tokens look expired from outside.
    pub fn caller_facing(self) -> Self {
        match self {
            Self::Revoked => Self::Expired,
            other => other,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DenialReason {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "unknown" => Ok(Self::Unknown),
            "malformed_signature" => Ok(Self::MalformedSignature),
            "insufficient_scope" => Ok(Self::InsufficientScope),
            other => Err(StoreError::Corrupt(format!("denial reason: {other}"))),
        }
    }
}

/// Persistence for issued tokens and their revocation flag.
#[async_trait]
pub trait TokenStore: Send + Sync {
    fn name(&self) -> &str;

    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), StoreError>;

    async fn get_token(&self, token_id: &str) -> Result<Option<CapabilityToken>, StoreError>;

    /// Flip `active` to false. Returns whether the flag changed.
    async fn deactivate_token(&self, token_id: &str) -> Result<bool, StoreError>;

    /// Ids of every token whose `active` flag is false.
    async fn revoked_token_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Delete tokens that expired before `cutoff`. Returns how many went.
    async fn remove_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Active, unexpired tokens at `now`.
    async fn count_live_tokens(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
