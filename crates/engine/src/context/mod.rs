//! The context pipeline stages, leaf-first.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Pricing | `token` |
//! | Rank + dedup | `candidate` |
//! | Select + render | `assembler` |
//!
//! Retrieval, filtering and auditing are orchestrated by
//! [`ContextEngine`](crate::ContextEngine).

pub mod assembler;
pub mod candidate;
pub mod token;

pub use assembler::{Selection, build_bundle, render, render_header, select};
pub use candidate::{RetrievedCandidate, dedup, normalize_summary, rank};
pub use token::{CharEstimator, TokenEstimator, WordEstimator, estimator_for};
