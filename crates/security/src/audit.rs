//! Audit log: the hash-chained, append-only record of access decisions.
//!
//! One writer lock owns the chain head, so sequence numbers never collide
//! or gap within a process. If another process appended first, the store
//! rejects the duplicate sequence and the head is reloaded once.

use async_trait::async_trait;
use mynd_core::audit::{AuditDraft, AuditRecord, AuditStore, GENESIS_HASH, StoredRecord};
use mynd_core::clock::Clock;
use mynd_core::error::{AuditError, ChainBreak, StoreError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Trait for audit log sinks (where sealed records are mirrored).
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// A tracing-based audit sink that logs records via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            sequence = record.sequence_number,
            event = %record.event_type,
            client_id = %record.client_id,
            token = %record.token_id_hash,
            query = %record.query_hash,
            tokens_delivered = record.tokens_delivered,
            reason = ?record.reason,
            "AUDIT"
        );
    }
}

#[derive(Debug, Clone)]
struct ChainHead {
    sequence: u64,
    hash: String,
}

/// Result of a successful chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub from: u64,
    /// Last sequence actually checked (the requested `to`, clamped to the
    /// end of the log).
    pub to: u64,
    pub records_checked: usize,
    /// `record_hash` of the last checked record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<String>,
}

pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    head: Mutex<Option<ChainHead>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("store", &self.store.name())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl AuditLog {
    /// Create a new audit log with no sinks.
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_sinks(store, clock, Vec::new())
    }

    /// Create a new audit log with the given sinks.
    pub fn with_sinks(
        store: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        sinks: Vec<Box<dyn AuditSink>>,
    ) -> Self {
        Self {
            store,
            clock,
            head: Mutex::new(None),
            sinks,
        }
    }

    async fn load_head(&self) -> Result<ChainHead, StoreError> {
        Ok(match self.store.last_record().await? {
            Some(last) => ChainHead {
                sequence: last.sequence_number,
                hash: last.record_hash,
            },
            None => ChainHead {
                sequence: 0,
                hash: GENESIS_HASH.to_string(),
            },
        })
    }

    /// Seal `draft` onto the chain and persist it.
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError> {
        let mut head = self.head.lock().await;
        let mut reloaded = false;

        loop {
            let current = match head.as_ref() {
                Some(h) => h.clone(),
                None => self.load_head().await?,
            };
            let record = AuditRecord::seal(
                current.sequence + 1,
                self.clock.now(),
                draft.clone(),
                &current.hash,
            );

            match self.store.append_record(&record).await {
                Ok(()) => {
                    *head = Some(ChainHead {
                        sequence: record.sequence_number,
                        hash: record.record_hash.clone(),
                    });
                    for sink in &self.sinks {
                        sink.record(&record);
                    }
                    return Ok(record);
                }
                Err(StoreError::Duplicate(_)) if !reloaded => {
                    tracing::warn!(
                        sequence = record.sequence_number,
                        "Audit head was stale, reloading"
                    );
                    *head = None;
                    reloaded = true;
                }
                Err(e) => {
                    // The store may or may not hold the record; re-read next time.
                    *head = None;
                    return Err(e.into());
                }
            }
        }
    }

    /// Highest sequence number written so far (0 when empty).
    pub async fn last_sequence(&self) -> Result<u64, AuditError> {
        Ok(self.store.last_sequence().await?)
    }

    /// Read-only export of `from..=to`.
    pub async fn range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, AuditError> {
        check_range(from, to)?;
        Ok(self.store.records_in_range(from, to).await?)
    }

    /// Recompute every hash in `from..=to`, check each link and that
    /// sequence numbers are contiguous. Reports the first divergence.
    pub async fn verify_chain(&self, from: u64, to: u64) -> Result<ChainReport, AuditError> {
        check_range(from, to)?;
        let last = self.last_sequence().await?;
        let to = to.min(last);
        if from > to {
            return Ok(ChainReport {
                from,
                to,
                records_checked: 0,
                head_hash: None,
            });
        }

        let mut expected_previous = if from == 1 {
            GENESIS_HASH.to_string()
        } else {
            let anchor = self.store.stored_in_range(from - 1, from - 1).await?;
            match anchor.into_iter().next() {
                Some(StoredRecord::Decoded(record)) => record.record_hash,
                Some(StoredRecord::Undecodable { problem, .. }) => {
                    return Err(undecodable(from - 1, &problem));
                }
                None => {
                    return Err(AuditError::BrokenAt {
                        sequence: from - 1,
                        kind: ChainBreak::SequenceGap,
                    });
                }
            }
        };

        let stored = self.store.stored_in_range(from, to).await?;
        let records_checked = stored.len();
        let mut head_hash = None;
        let mut expected_sequence = from;
        for entry in stored {
            if entry.sequence_number() != expected_sequence {
                return Err(AuditError::BrokenAt {
                    sequence: expected_sequence,
                    kind: ChainBreak::SequenceGap,
                });
            }
            let record = match entry {
                StoredRecord::Decoded(record) => record,
                StoredRecord::Undecodable {
                    sequence_number,
                    problem,
                } => return Err(undecodable(sequence_number, &problem)),
            };
            if !record.is_intact() {
                return Err(AuditError::BrokenAt {
                    sequence: record.sequence_number,
                    kind: ChainBreak::HashMismatch,
                });
            }
            if record.previous_record_hash != expected_previous {
                return Err(AuditError::BrokenAt {
                    sequence: record.sequence_number,
                    kind: ChainBreak::LinkMismatch,
                });
            }
            expected_previous = record.record_hash.clone();
            head_hash = Some(record.record_hash);
            expected_sequence += 1;
        }

        if expected_sequence <= to {
            return Err(AuditError::BrokenAt {
                sequence: expected_sequence,
                kind: ChainBreak::SequenceGap,
            });
        }

        Ok(ChainReport {
            from,
            to,
            records_checked,
            head_hash,
        })
    }
}

fn undecodable(sequence: u64, problem: &str) -> AuditError {
    tracing::error!(sequence, problem, "Audit record does not decode");
    AuditError::BrokenAt {
        sequence,
        kind: ChainBreak::Undecodable,
    }
}

fn check_range(from: u64, to: u64) -> Result<(), ValidationError> {
    if from == 0 || from > to {
        return Err(ValidationError::InvalidAuditRange { from, to });
    }
    Ok(())
}

// ── In-memory audit store ───────────────────────────────────────────────

/// Audit store for tests and ephemeral sessions.
pub struct InMemoryAuditStore {
    records: Arc<RwLock<BTreeMap<u64, AuditRecord>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.sequence_number) {
            return Err(StoreError::Duplicate(format!(
                "audit sequence {}",
                record.sequence_number
            )));
        }
        records.insert(record.sequence_number, record.clone());
        Ok(())
    }

    async fn last_record(&self) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .last_key_value()
            .map(|(_, r)| r.clone()))
    }

    async fn records_in_range(&self, from: u64, to: u64) -> Result<Vec<AuditRecord>, StoreError> {
        if from > to {
            return Ok(vec![]);
        }
        Ok(self
            .records
            .read()
            .await
            .range(from..=to)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
