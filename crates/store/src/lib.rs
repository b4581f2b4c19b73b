//! Persistence contract for the order management core.
//!
//! The store is a key-value collaborator: records are addressed by an
//! entity type and a string key, and every write carries the version the
//! writer last observed. A write whose expected version no longer matches
//! is rejected with [`StoreError::ConcurrencyConflict`], which is what the
//! checkout and progress paths build their lost-update protection on.

pub mod entity;
pub mod error;
pub mod memory;
pub mod store;
pub mod version;

pub use entity::Entity;
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use store::{Mutation, Record, Store, StoreExt, UnitOfWork};
pub use version::Version;
