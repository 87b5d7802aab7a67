//! Security module for Mynd: capability tokens, signing keys, and the
//! tamper-evident audit log.
//!
//! Provides:
//! - **Tokens**: Issue, validate, and revoke short-lived scoped tokens
//! - **Secrets**: HMAC signing key for bearer strings
//! - **Audit logging**: Hash-chained, append-only access records

pub mod audit;
pub mod secrets;
pub mod tokens;

pub use audit::{AuditLog, AuditSink, ChainReport, InMemoryAuditStore, TracingSink};
pub use secrets::{SecretError, SigningKey};
pub use tokens::{InMemoryTokenStore, TokenManager, TokenPolicy, TokenRejection};
