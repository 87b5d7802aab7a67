//! Event stores and similarity indexes for Mynd.

pub mod in_memory;
pub mod ingest;
pub mod keyword;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryEventStore;
pub use ingest::remember;
pub use keyword::KeywordIndex;
pub use vector::{cosine_similarity, term_frequencies, term_similarity};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
