//! A validated view over a [`NamespaceDefinition`].
//!
//! The type system checks that every relation referenced by a definition exists, looking up
//! other namespaces through a [`NamespaceLookup`]. When the lookup is a
//! [`NamespaceManager`](crate::caching::NamespaceManager), cross-namespace checks reuse its cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::caching::NamespaceError;
use crate::types::{
    ELLIPSIS, NamespaceDefinition, RelationReference, Revision, SetOperationChild, UsersetRewrite,
};

/// Read access to namespace definitions by name and revision.
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    async fn read_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<Arc<NamespaceDefinition>, NamespaceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeSystemError {
    #[error("found duplicate relation `{relation}` in namespace `{namespace}`")]
    DuplicateRelation { namespace: String, relation: String },
    #[error("relation `{relation}` referenced by `{namespace}#{referenced_by}` not found")]
    UnknownRelation {
        namespace: String,
        relation: String,
        referenced_by: String,
    },
    #[error(
        "tupleset relation `{relation}` used by `{namespace}#{referenced_by}` must not be a permission"
    )]
    InvalidTupleset {
        namespace: String,
        relation: String,
        referenced_by: String,
    },
    #[error("allowed relation `{allowed}` of `{namespace}#{relation}` not found")]
    UnknownAllowedRelation {
        namespace: String,
        relation: String,
        allowed: RelationReference,
    },
    #[error(transparent)]
    Lookup(#[from] NamespaceError),
}

/// A validated namespace definition with fast relation lookups.
#[derive(Debug, Clone)]
pub struct NamespaceTypeSystem {
    definition: Arc<NamespaceDefinition>,
    relations: HashMap<String, usize>,
}

impl NamespaceTypeSystem {
    pub fn namespace(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<NamespaceDefinition> {
        &self.definition
    }

    pub fn has_relation(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// Whether `relation` is computed by a rewrite rather than written directly.
    pub fn is_permission(&self, relation: &str) -> bool {
        self.relations
            .get(relation)
            .is_some_and(|idx| self.definition.relations[*idx].userset_rewrite.is_some())
    }

    /// The subject types `relation` accepts, or `None` if there is no such relation.
    pub fn allowed_direct_relations(&self, relation: &str) -> Option<&[RelationReference]> {
        let idx = self.relations.get(relation)?;
        let allowed = self.definition.relations[*idx]
            .type_information
            .as_ref()
            .map_or(&[][..], |info| &info.allowed_direct_relations);
        Some(allowed)
    }

    /// Whether subjects of `namespace#target` may be written directly to `relation`.
    pub fn is_allowed_direct_relation(&self, relation: &str, namespace: &str, target: &str) -> bool {
        self.allowed_direct_relations(relation)
            .unwrap_or_default()
            .iter()
            .any(|allowed| allowed.namespace == namespace && allowed.relation == target)
    }

    fn validate_rewrite(
        &self,
        referenced_by: &str,
        rewrite: &UsersetRewrite,
    ) -> Result<(), TypeSystemError> {
        for child in rewrite.children() {
            match child {
                SetOperationChild::This => {}
                SetOperationChild::ComputedUserset { relation } => {
                    self.ensure_relation(referenced_by, relation)?;
                }
                SetOperationChild::TupleToUserset {
                    tupleset_relation, ..
                } => {
                    self.ensure_relation(referenced_by, tupleset_relation)?;
                    if self.is_permission(tupleset_relation) {
                        return Err(TypeSystemError::InvalidTupleset {
                            namespace: self.namespace().to_owned(),
                            relation: tupleset_relation.clone(),
                            referenced_by: referenced_by.to_owned(),
                        });
                    }
                }
                SetOperationChild::Rewrite(nested) => {
                    self.validate_rewrite(referenced_by, nested)?;
                }
            }
        }
        Ok(())
    }

    fn ensure_relation(&self, referenced_by: &str, relation: &str) -> Result<(), TypeSystemError> {
        if self.has_relation(relation) {
            return Ok(());
        }
        Err(TypeSystemError::UnknownRelation {
            namespace: self.namespace().to_owned(),
            relation: relation.to_owned(),
            referenced_by: referenced_by.to_owned(),
        })
    }

    async fn validate_allowed(
        &self,
        relation: &str,
        allowed: &RelationReference,
        lookup: &dyn NamespaceLookup,
        revision: Revision,
    ) -> Result<(), TypeSystemError> {
        let exists = if allowed.namespace == self.namespace() {
            allowed.relation == ELLIPSIS || self.has_relation(&allowed.relation)
        } else {
            let target = lookup.read_namespace(&allowed.namespace, revision).await?;
            allowed.relation == ELLIPSIS || target.relation(&allowed.relation).is_some()
        };

        if exists {
            return Ok(());
        }
        Err(TypeSystemError::UnknownAllowedRelation {
            namespace: self.namespace().to_owned(),
            relation: relation.to_owned(),
            allowed: allowed.clone(),
        })
    }
}

/// Builds and validates the type system of `definition`.
///
/// Namespaces referenced by allowed direct relations are read through `lookup` as of `revision`.
pub async fn build_type_system(
    definition: Arc<NamespaceDefinition>,
    lookup: &dyn NamespaceLookup,
    revision: Revision,
) -> Result<NamespaceTypeSystem, TypeSystemError> {
    let mut relations = HashMap::with_capacity(definition.relations.len());
    for (idx, relation) in definition.relations.iter().enumerate() {
        if relations.insert(relation.name.clone(), idx).is_some() {
            return Err(TypeSystemError::DuplicateRelation {
                namespace: definition.name.clone(),
                relation: relation.name.clone(),
            });
        }
    }

    let type_system = NamespaceTypeSystem {
        definition,
        relations,
    };

    for relation in &type_system.definition.relations {
        if let Some(rewrite) = &relation.userset_rewrite {
            type_system.validate_rewrite(&relation.name, rewrite)?;
        }
        if let Some(info) = &relation.type_information {
            for allowed in &info.allowed_direct_relations {
                type_system
                    .validate_allowed(&relation.name, allowed, lookup, revision)
                    .await?;
            }
        }
    }

    tracing::trace!(namespace = type_system.namespace(), "Built type system");
    Ok(type_system)
}
