//! The contract with the backing datastore.

use async_trait::async_trait;
use thiserror::Error;

use crate::caching::CacheKey;
use crate::types::{NamespaceDefinition, Revision};

/// An error reported by a [`Datastore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    /// The namespace does not exist as of the requested revision.
    #[error("namespace `{0}` not found")]
    NamespaceNotFound(String),
    /// The revision cannot be represented by this datastore.
    #[error("invalid revision: {0}")]
    InvalidRevision(String),
    /// The datastore could not be reached.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    /// Any other failure inside the datastore.
    #[error("datastore error: {0}")]
    Internal(String),
}

/// The backing store of namespace definitions.
///
/// Reads are revision consistent: two reads of the same `(name, revision)` pair must return
/// identical definitions. The caching layer relies on this instead of invalidation.
///
/// Cancellation follows the usual rules for futures: a read is aborted by dropping its future.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Reads the definition of `name` as of `revision`.
    ///
    /// Returns the definition together with the revision at which it was last written.
    async fn read_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<(NamespaceDefinition, Revision), DatastoreError>;

    /// Derives the cache key for `name` as of `revision`.
    ///
    /// Fails with [`DatastoreError::InvalidRevision`] if the pair cannot be represented as a key.
    fn namespace_cache_key(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<CacheKey, DatastoreError>;
}
