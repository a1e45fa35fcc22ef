//! The namespace data model.
//!
//! A [`NamespaceDefinition`] is an immutable schema document, valid as of a [`Revision`].
//! Definitions are handed out as `Arc`s by the caching layer and must never be mutated in place.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The reserved wildcard relation name.
///
/// A relationship to `namespace#...` refers to the object itself rather than to one of its
/// relations.
pub const ELLIPSIS: &str = "...";

/// A logical, totally ordered revision of the datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub const ZERO: Revision = Revision(0);
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Revision)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A named schema definition in the authorization model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl NamespaceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: Vec::new(),
            metadata: None,
        }
    }

    /// Adds a relation, builder style.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Sets the namespace level metadata, builder style.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Looks up a declared relation by its exact name.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|rel| rel.name == name)
    }

    /// The size of the serialized definition in bytes.
    ///
    /// This is the "cost" of keeping the definition in the in-memory cache.
    pub fn encoded_len(&self) -> usize {
        match serde_json::to_vec(self) {
            Ok(encoded) => encoded.len(),
            Err(e) => {
                tracing::error!(error = &e as &dyn std::error::Error, "Failed to encode namespace");
                0
            }
        }
    }
}

/// A relation or permission declared on a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userset_rewrite: Option<UsersetRewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_information: Option<TypeInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Relation {
    /// Creates a plain relation without any rewrite or type information.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            userset_rewrite: None,
            type_information: None,
            metadata: None,
        }
    }

    /// Creates a relation whose subjects may be any of `allowed`.
    pub fn direct<I>(name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = RelationReference>,
    {
        Self {
            type_information: Some(TypeInformation {
                allowed_direct_relations: allowed.into_iter().collect(),
            }),
            ..Self::new(name)
        }
    }

    /// Creates a permission computed by `rewrite`.
    pub fn permission(name: impl Into<String>, rewrite: UsersetRewrite) -> Self {
        Self {
            userset_rewrite: Some(rewrite),
            ..Self::new(name)
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Describes how the subjects of a permission are computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsersetRewrite {
    Union(Vec<SetOperationChild>),
    Intersection(Vec<SetOperationChild>),
    Exclusion(Vec<SetOperationChild>),
}

impl UsersetRewrite {
    pub fn children(&self) -> &[SetOperationChild] {
        match self {
            Self::Union(children) | Self::Intersection(children) | Self::Exclusion(children) => {
                children
            }
        }
    }
}

/// A single operand of a [`UsersetRewrite`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperationChild {
    /// The subjects directly written for the relation itself.
    This,
    /// The subjects of another relation on the same object.
    ComputedUserset { relation: String },
    /// Walks `tupleset_relation` and takes `computed_relation` on every object found there.
    TupleToUserset {
        tupleset_relation: String,
        computed_relation: String,
    },
    Rewrite(UsersetRewrite),
}

/// The subject types a relation accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeInformation {
    #[serde(default)]
    pub allowed_direct_relations: Vec<RelationReference>,
}

/// A `namespace#relation` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationReference {
    pub namespace: String,
    pub relation: String,
}

impl RelationReference {
    pub fn new(namespace: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            relation: relation.into(),
        }
    }

    /// A reference to the object itself, i.e. `namespace#...`.
    pub fn ellipsis(namespace: impl Into<String>) -> Self {
        Self::new(namespace, ELLIPSIS)
    }
}

impl fmt::Display for RelationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.relation)
    }
}

/// Free-form metadata attached to namespaces and relations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub messages: Vec<MetadataMessage>,
}

impl Metadata {
    pub fn new(messages: impl IntoIterator<Item = MetadataMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataMessage {
    /// A user-written documentation comment.
    DocComment(String),
    /// System metadata recording whether a relation was declared as relation or permission.
    RelationKind(RelationKind),
    /// Arbitrary user supplied metadata.
    UserDefined { type_url: String, value: Vec<u8> },
}

impl MetadataMessage {
    /// Whether this message is owned by the system, as opposed to supplied by a user.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::RelationKind(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Relation,
    Permission,
}

/// Strips all user supplied metadata from a definition.
///
/// Namespace level metadata is dropped entirely. Relations keep only system owned messages, and
/// lose their metadata block when nothing is left in it.
pub fn filter_user_defined_metadata(mut definition: NamespaceDefinition) -> NamespaceDefinition {
    definition.metadata = None;

    for relation in &mut definition.relations {
        if let Some(mut metadata) = relation.metadata.take() {
            metadata.messages.retain(MetadataMessage::is_system);
            if !metadata.messages.is_empty() {
                relation.metadata = Some(metadata);
            }
        }
    }

    definition
}
