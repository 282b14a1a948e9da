//! The document store contract this crate consumes, and the [`Document`]/query types that flow
//! across it.
//!
//! Only the operations the orchestrator actually calls are specified here; everything about how a
//! concrete store indexes, persists, or replicates documents is out of scope.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A single stored record. Persisted documents always carry a non-empty `id`; sanitization
/// strips unknown keys on ingress but a document may still carry fields beyond the schema if
/// written by another path, so egress is not similarly filtered.
pub type Document = Map<String, Value>;

/// A query or filter map, passed through to the store mostly opaque: `$fields` projects,
/// `$`-prefixed keys beyond that are store-defined.
pub type Query = Map<String, Value>;

/// An error surfaced verbatim from a [`Store`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Wrap a displayable error as a [`StoreError`].
    pub fn new(message: impl std::fmt::Display) -> StoreError {
        StoreError(message.to_string())
    }
}

/// The document persistence operations the lifecycle orchestrator depends on.
///
/// Every operation is async except [`Store::create_unique_identifier`], which is synchronous and
/// collision-free within the store: a sequence generator or random id minter has no need to
/// suspend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return every document matching `query`.
    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Return the first document matching `query`, or `None`.
    async fn first(&self, query: &Query) -> Result<Option<Document>, StoreError>;

    /// Count documents matching `query`.
    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Persist `doc` (which already carries its assigned `id`) and return the inserted form.
    async fn insert(&self, doc: Document) -> Result<Document, StoreError>;

    /// Apply `partial` to every document matching `query`.
    async fn update(&self, query: &Query, partial: &Document) -> Result<(), StoreError>;

    /// Remove every document matching `query`.
    async fn remove(&self, query: &Query) -> Result<(), StoreError>;

    /// Rename the collection's backing namespace.
    async fn rename(&self, new_name: &str) -> Result<(), StoreError>;

    /// Mint a new, collision-free identifier for this store.
    fn create_unique_identifier(&self) -> String;
}
