use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    Result, StoreError, Version,
    store::{Mutation, Record, Store},
};

type RecordKey = (String, String);

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<RecordKey, Record>,
    /// Insertion sequence per key, used to list records in insertion order.
    sequence: HashMap<RecordKey, u64>,
    next_sequence: u64,
}

/// In-memory store implementation.
///
/// Clones share the same underlying tables, so a clone handed to another
/// component observes every committed write immediately.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored records of an entity type.
    pub async fn record_count(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .await
            .records
            .keys()
            .filter(|(t, _)| t == entity_type)
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn record_key(entity_type: &str, key: &str) -> RecordKey {
    (entity_type.to_string(), key.to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, entity_type: &str, key: &str) -> Result<Option<Record>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables.records.get(&record_key(entity_type, key)).cloned())
    }

    async fn get_many(&self, entity_type: &str, keys: &[String]) -> Result<Vec<Record>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| tables.records.get(&record_key(entity_type, key)).cloned())
            .collect())
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Record>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut records: Vec<(u64, Record)> = tables
            .records
            .iter()
            .filter(|((t, _), _)| t == entity_type)
            .map(|(k, record)| {
                let seq = tables.sequence.get(k).copied().unwrap_or(u64::MAX);
                (seq, record.clone())
            })
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        // Validate every mutation against the current state plus the effect
        // of earlier mutations in the same batch before touching anything.
        let mut pending: HashMap<RecordKey, Option<Version>> = HashMap::new();
        for mutation in &mutations {
            let (entity_type, key) = mutation.target();
            let k = record_key(entity_type, key);
            let current = match pending.get(&k) {
                Some(version) => *version,
                None => tables.records.get(&k).map(|r| r.version),
            };

            match mutation {
                Mutation::Put {
                    expected_version, ..
                } => {
                    let actual = current.unwrap_or(Version::initial());
                    if actual != *expected_version {
                        tracing::debug!(
                            entity_type,
                            key,
                            expected = %expected_version,
                            actual = %actual,
                            "version check failed"
                        );
                        return Err(StoreError::ConcurrencyConflict {
                            entity_type: entity_type.to_string(),
                            key: key.to_string(),
                            expected: *expected_version,
                            actual,
                        });
                    }
                    pending.insert(k, Some(expected_version.next()));
                }
                Mutation::Delete {
                    expected_version, ..
                } => {
                    let Some(actual) = current else {
                        return Err(StoreError::NotFound {
                            entity_type: entity_type.to_string(),
                            key: key.to_string(),
                        });
                    };
                    if let Some(expected) = expected_version
                        && *expected != actual
                    {
                        return Err(StoreError::ConcurrencyConflict {
                            entity_type: entity_type.to_string(),
                            key: key.to_string(),
                            expected: *expected,
                            actual,
                        });
                    }
                    pending.insert(k, None);
                }
            }
        }

        let now = Utc::now();
        for mutation in mutations {
            match mutation {
                Mutation::Put {
                    entity_type,
                    key,
                    expected_version,
                    payload,
                } => {
                    let k = record_key(&entity_type, &key);
                    if !tables.sequence.contains_key(&k) {
                        let seq = tables.next_sequence;
                        tables.next_sequence += 1;
                        tables.sequence.insert(k.clone(), seq);
                    }
                    tables.records.insert(
                        k,
                        Record {
                            entity_type,
                            key,
                            version: expected_version.next(),
                            payload,
                            updated_at: now,
                        },
                    );
                }
                Mutation::Delete {
                    entity_type, key, ..
                } => {
                    let k = record_key(&entity_type, &key);
                    tables.records.remove(&k);
                    tables.sequence.remove(&k);
                }
            }
        }

        Ok(())
    }
}
