use serde::{Serialize, de::DeserializeOwned};

use crate::Version;

/// A record type that can be persisted in a [`Store`](crate::Store).
///
/// Entities are stored as JSON documents under `(entity_type(), id)`. The
/// version is owned by the store: it is overwritten from the stored record on
/// every load and checked on every write.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier type. Its `Display` output is the storage key.
    type Id: std::fmt::Display + Clone + Send + Sync;

    /// Returns the entity type name used to partition the store.
    fn entity_type() -> &'static str;

    /// Returns the entity's identifier.
    fn id(&self) -> &Self::Id;

    /// Returns the version this copy was loaded at.
    fn version(&self) -> Version;

    /// Sets the version. Called by the store after loading or saving.
    fn set_version(&mut self, version: Version);

    /// Returns the storage key for an identifier.
    fn key_for(id: &Self::Id) -> String {
        id.to_string()
    }
}
