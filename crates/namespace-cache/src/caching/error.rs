use std::sync::Arc;

use thiserror::Error;

use crate::datastore::DatastoreError;

/// Errors returned by the [`NamespaceManager`](super::NamespaceManager).
///
/// The enum is `Clone` so that a single failed fetch can be handed to every caller that was
/// coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// The in-memory cache could not be created.
    #[error("unable to initialize namespace manager: {0}")]
    Initialization(String),
    /// The namespace does not exist as of the requested revision.
    #[error("namespace `{0}` not found")]
    NamespaceNotFound(String),
    /// The namespace exists, but does not declare the relation.
    #[error("relation `{relation}` not found under namespace `{namespace}`")]
    RelationNotFound { namespace: String, relation: String },
    /// Any other error of the datastore, including failures to derive a cache key.
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

impl NamespaceError {
    /// Translates an error of a datastore read for `name`.
    pub(crate) fn from_read(name: &str, err: DatastoreError) -> Self {
        match err {
            DatastoreError::NamespaceNotFound(_) => Self::NamespaceNotFound(name.to_owned()),
            err => Self::Datastore(err),
        }
    }

    /// Unwraps an error shared between coalesced requests.
    pub(crate) fn from_shared(err: Arc<Self>) -> Self {
        Arc::unwrap_or_clone(err)
    }

    /// Whether this error is expected during normal operation.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NamespaceNotFound(_) | Self::RelationNotFound { .. }
        )
    }
}
