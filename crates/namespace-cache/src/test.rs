//! Helpers for testing the namespace cache.
//!
//! In every test, call [`setup`] first. The [`FakeDatastore`] is an in-memory datastore that
//! counts its reads, and can be made slow or failing.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

pub use namespace_cache_test::setup;

use crate::caching::CacheKey;
use crate::datastore::{Datastore, DatastoreError};
use crate::types::{
    Metadata, MetadataMessage, NamespaceDefinition, Relation, RelationKind, RelationReference,
    Revision, SetOperationChild, UsersetRewrite,
};

/// An in-memory, versioned [`Datastore`].
///
/// A read as of revision `R` returns the newest version written at or before `R`.
#[derive(Debug, Default)]
pub struct FakeDatastore {
    namespaces: Mutex<BTreeMap<String, BTreeMap<Revision, NamespaceDefinition>>>,
    reads: AtomicUsize,
    delay: Option<Duration>,
    max_revision: Option<Revision>,
    failure: Mutex<Option<DatastoreError>>,
}

impl FakeDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `definition` at `revision`, builder style.
    pub fn with_namespace(self, revision: Revision, definition: NamespaceDefinition) -> Self {
        self.write_namespace(revision, definition);
        self
    }

    /// Makes every read sleep for `delay` before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Rejects cache keys for revisions newer than `revision`.
    pub fn with_max_revision(mut self, revision: Revision) -> Self {
        self.max_revision = Some(revision);
        self
    }

    pub fn write_namespace(&self, revision: Revision, definition: NamespaceDefinition) {
        self.namespaces
            .lock()
            .unwrap()
            .entry(definition.name.clone())
            .or_default()
            .insert(revision, definition);
    }

    /// Makes all following reads fail with `err`, or succeed again with `None`.
    pub fn fail_with(&self, err: Option<DatastoreError>) {
        *self.failure.lock().unwrap() = err;
    }

    /// The number of reads that reached this datastore.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for FakeDatastore {
    async fn read_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<(NamespaceDefinition, Revision), DatastoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let namespaces = self.namespaces.lock().unwrap();
        namespaces
            .get(name)
            .and_then(|versions| versions.range(..=revision).next_back())
            .map(|(written, definition)| (definition.clone(), *written))
            .ok_or_else(|| DatastoreError::NamespaceNotFound(name.to_owned()))
    }

    fn namespace_cache_key(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<CacheKey, DatastoreError> {
        match self.max_revision {
            Some(max) if revision > max => Err(DatastoreError::InvalidRevision(format!(
                "revision {revision} is newer than {max}"
            ))),
            _ => Ok(CacheKey::for_namespace(name, revision)),
        }
    }
}

/// A `user` namespace without relations.
pub fn user() -> NamespaceDefinition {
    NamespaceDefinition::new("user")
}

/// A `document` namespace with `viewer` and `editor` relations and a `view` permission.
///
/// Carries user defined metadata on the namespace and on its relations.
pub fn document() -> NamespaceDefinition {
    NamespaceDefinition::new("document")
        .with_metadata(Metadata::new([MetadataMessage::DocComment(
            "A shared document".into(),
        )]))
        .with_relation(
            Relation::direct("viewer", [RelationReference::ellipsis("user")]).with_metadata(
                Metadata::new([
                    MetadataMessage::DocComment("Who may read".into()),
                    MetadataMessage::RelationKind(RelationKind::Relation),
                ]),
            ),
        )
        .with_relation(
            Relation::direct("editor", [RelationReference::ellipsis("user")]).with_metadata(
                Metadata::new([
                    MetadataMessage::UserDefined {
                        type_url: "example.com/Owner".into(),
                        value: b"team-docs".to_vec(),
                    },
                    MetadataMessage::RelationKind(RelationKind::Relation),
                ]),
            ),
        )
        .with_relation(
            Relation::permission(
                "view",
                UsersetRewrite::Union(vec![
                    SetOperationChild::ComputedUserset {
                        relation: "viewer".into(),
                    },
                    SetOperationChild::ComputedUserset {
                        relation: "editor".into(),
                    },
                ]),
            )
            .with_metadata(Metadata::new([MetadataMessage::RelationKind(
                RelationKind::Permission,
            )])),
        )
}

/// Whether any user supplied metadata is left in `definition`.
pub fn has_user_metadata(definition: &NamespaceDefinition) -> bool {
    let user_message = |metadata: &Metadata| metadata.messages.iter().any(|m| !m.is_system());
    definition.metadata.is_some()
        || definition
            .relations
            .iter()
            .filter_map(|rel| rel.metadata.as_ref())
            .any(user_message)
}
