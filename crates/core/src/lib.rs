//! # Mynd Core
//!
//! Domain types, traits, and error definitions for the Mynd context-memory
//! layer. This crate has **no storage or transport dependencies**: it defines
//! the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here (event store, similarity index, token
//! store, audit store, clock). Implementations live in their own crates, so
//! backends can be swapped by configuration and tests can use in-memory
//! twins.

pub mod audit;
pub mod bundle;
pub mod capability;
pub mod clock;
pub mod error;
pub mod event;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use audit::{AuditDraft, AuditEventType, AuditRecord, AuditStore, GENESIS_HASH, StoredRecord};
pub use bundle::{BundleStatus, ContextBundle, ContextFilters, ContextRequest, SourceRef, TimeRange};
pub use capability::{
    CapabilityToken, DenialReason, IssuedToken, Operation, Scope, TokenStore, ValidatedToken,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    AuditError, ContextError, Error, IssueError, Result, StoreError, TokenError, ValidationError,
};
pub use event::{SemanticEvent, SourceType, StoreStats};
pub use store::{EventStore, SearchHit, SimilarityIndex};
