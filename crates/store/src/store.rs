use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Entity, Result, Version};

/// A stored document together with its bookkeeping.
#[derive(Debug, Clone)]
pub struct Record {
    /// Entity type partition (e.g. "Order", "Product").
    pub entity_type: String,

    /// Key within the partition.
    pub key: String,

    /// Version of the stored document.
    pub version: Version,

    /// The document as JSON.
    pub payload: serde_json::Value,

    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Decodes the payload into an entity carrying the stored version.
    pub fn decode<E: Entity>(self) -> Result<E> {
        let mut entity: E = serde_json::from_value(self.payload)?;
        entity.set_version(self.version);
        Ok(entity)
    }
}

/// A single staged write.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert or replace a document. `expected_version` of 0 means the key
    /// must not exist yet.
    Put {
        entity_type: String,
        key: String,
        expected_version: Version,
        payload: serde_json::Value,
    },

    /// Remove a document. With `expected_version` set, the stored version
    /// must match.
    Delete {
        entity_type: String,
        key: String,
        expected_version: Option<Version>,
    },
}

impl Mutation {
    /// Builds a version-checked put for an entity.
    pub fn put<E: Entity>(entity: &E) -> Result<Self> {
        Ok(Mutation::Put {
            entity_type: E::entity_type().to_string(),
            key: E::key_for(entity.id()),
            expected_version: entity.version(),
            payload: serde_json::to_value(entity)?,
        })
    }

    /// Builds a delete for an id.
    pub fn delete<E: Entity>(id: &E::Id, expected_version: Option<Version>) -> Self {
        Mutation::Delete {
            entity_type: E::entity_type().to_string(),
            key: E::key_for(id),
            expected_version,
        }
    }

    /// Returns the `(entity_type, key)` this mutation addresses.
    pub fn target(&self) -> (&str, &str) {
        match self {
            Mutation::Put {
                entity_type, key, ..
            }
            | Mutation::Delete {
                entity_type, key, ..
            } => (entity_type, key),
        }
    }
}

/// Core trait for store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    /// Retrieves a single record.
    async fn get(&self, entity_type: &str, key: &str) -> Result<Option<Record>>;

    /// Retrieves every record whose key is in `keys`, in the order of `keys`.
    /// Missing keys are skipped.
    async fn get_many(&self, entity_type: &str, keys: &[String]) -> Result<Vec<Record>>;

    /// Retrieves all records of an entity type in insertion order.
    async fn list(&self, entity_type: &str) -> Result<Vec<Record>>;

    /// Applies mutations atomically.
    ///
    /// Either every version check passes and all mutations are applied, or
    /// none are. A failed check returns `ConcurrencyConflict`.
    async fn commit(&self, mutations: Vec<Mutation>) -> Result<()>;
}

/// Typed repository operations available on every store.
#[async_trait]
pub trait StoreExt: Store {
    /// Loads an entity by id.
    async fn find_by_id<E: Entity>(&self, id: &E::Id) -> Result<Option<E>> {
        match self.get(E::entity_type(), &E::key_for(id)).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Loads all entities for the given ids with a single store call.
    ///
    /// Unknown ids are skipped; callers compare lengths to detect them.
    async fn find_all_by_ids<E: Entity>(&self, ids: &[E::Id]) -> Result<Vec<E>> {
        let keys: Vec<String> = ids.iter().map(E::key_for).collect();
        self.get_many(E::entity_type(), &keys)
            .await?
            .into_iter()
            .map(Record::decode)
            .collect()
    }

    /// Loads every entity of a type.
    async fn find_all<E: Entity>(&self) -> Result<Vec<E>> {
        self.list(E::entity_type())
            .await?
            .into_iter()
            .map(Record::decode)
            .collect()
    }

    /// Checks whether an entity exists.
    async fn exists_by_id<E: Entity>(&self, id: &E::Id) -> Result<bool> {
        Ok(self.get(E::entity_type(), &E::key_for(id)).await?.is_some())
    }

    /// Saves a single entity as its own unit of work.
    ///
    /// Returns the entity at its new version.
    async fn save<E: Entity>(&self, mut entity: E) -> Result<E> {
        let mutation = Mutation::put(&entity)?;
        self.commit(vec![mutation]).await?;
        entity.set_version(entity.version().next());
        Ok(entity)
    }

    /// Deletes an entity by id. Fails with `NotFound` if it does not exist.
    async fn delete_by_id<E: Entity>(&self, id: &E::Id) -> Result<()> {
        self.commit(vec![Mutation::delete::<E>(id, None)]).await
    }

    /// Starts a unit of work spanning several entities.
    fn begin(&self) -> UnitOfWork<'_, Self> {
        UnitOfWork::new(self)
    }
}

// Blanket implementation for all Store implementations
impl<T: Store + ?Sized> StoreExt for T {}

/// A set of writes committed or discarded together.
///
/// Nothing reaches the store until [`commit`](Self::commit); dropping the
/// unit of work discards every staged write. Staged entities keep their
/// pre-commit version, so callers bump it with [`Version::next`] once the
/// commit succeeds.
#[must_use = "a unit of work does nothing unless committed"]
pub struct UnitOfWork<'a, S: Store + ?Sized> {
    store: &'a S,
    mutations: Vec<Mutation>,
}

impl<'a, S: Store + ?Sized> UnitOfWork<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            mutations: Vec::new(),
        }
    }

    /// Stages a version-checked save of an entity.
    ///
    /// Saving the same entity twice keeps only the latest staged state.
    pub fn save<E: Entity>(&mut self, entity: &E) -> Result<&mut Self> {
        let mutation = Mutation::put(entity)?;
        let existing = self
            .mutations
            .iter()
            .position(|m| m.target() == mutation.target());
        match existing {
            Some(index) => self.mutations[index] = mutation,
            None => self.mutations.push(mutation),
        }
        Ok(self)
    }

    /// Stages a version-checked delete of an entity.
    pub fn delete<E: Entity>(&mut self, entity: &E) -> &mut Self {
        self.mutations
            .push(Mutation::delete::<E>(entity.id(), Some(entity.version())));
        self
    }

    /// Returns the number of staged writes.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Commits every staged write atomically.
    pub async fn commit(self) -> Result<()> {
        if self.mutations.is_empty() {
            return Ok(());
        }
        self.store.commit(self.mutations).await
    }
}
