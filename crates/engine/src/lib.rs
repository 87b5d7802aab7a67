//! The Mynd context engine.
//!
//! A client presents a capability token and a query; the engine returns the
//! most relevant stored events that fit the token budget:
//!
//! 1. **Validate** the request, then the token and its scope
//! 2. **Retrieve** candidates from the similarity index, under a timeout
//! 3. **Enrich** hits from the event store, falling back to index metadata
//! 4. **Filter, rank, deduplicate** the candidates
//! 5. **Select** greedily within the budget and render the bundle
//! 6. **Audit** the decision; no record, no context
//!
//! Denials are audited too. Index and store failures degrade the bundle
//! instead of failing the call.

pub mod bootstrap;
pub mod context;
pub mod engine;

pub use bootstrap::{Backends, KEY_FILE, signing_key};
pub use context::{CharEstimator, RetrievedCandidate, TokenEstimator, WordEstimator};
pub use engine::{ContextEngine, EngineStatus};
