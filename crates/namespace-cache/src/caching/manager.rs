use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sentry::{Hub, SentryFutureExt};

use crate::config::NamespaceCacheConfig;
use crate::datastore::{Datastore, DatastoreError};
use crate::typesystem::{NamespaceLookup, NamespaceTypeSystem, TypeSystemError, build_type_system};
use crate::types::{ELLIPSIS, NamespaceDefinition, Revision, filter_user_defined_metadata};

use super::{CacheKey, NamespaceError};

/// A sanitized definition saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct CachedNamespace {
    /// The "cost" of keeping this definition in the cache.
    cost: u32,
    definition: Arc<NamespaceDefinition>,
}

type InMemoryCache = moka::future::Cache<CacheKey, CachedNamespace>;

/// A read-through cache of namespace definitions.
///
/// Definitions are cached per `(name, revision)`, with the key being derived by the
/// [`Datastore`]. Since the content of a namespace at a given revision never changes, entries
/// are never invalidated. They are only evicted once the total cost of all entries exceeds the
/// configured maximum.
///
/// Concurrent lookups of the same key are coalesced into a single datastore read.
pub struct NamespaceManager {
    config: NamespaceCacheConfig,
    datastore: Arc<dyn Datastore>,
    cache: InMemoryCache,
}

impl fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceManager")
            .field("config", &self.config)
            .field("in-memory items", &self.cache.entry_count())
            .field("weighted size", &self.cache.weighted_size())
            .finish()
    }
}

impl NamespaceManager {
    /// Creates a new manager on top of `datastore`.
    ///
    /// Uses [`NamespaceCacheConfig::default`] if no `config` is given.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        config: Option<NamespaceCacheConfig>,
    ) -> Result<Self, NamespaceError> {
        let config = config.unwrap_or_default();
        let cache = build_cache(&config)?;

        Ok(NamespaceManager {
            config,
            datastore,
            cache,
        })
    }

    /// Reads the definition of `name` as of `revision`.
    ///
    /// The returned definition never contains user defined metadata.
    #[tracing::instrument(name = "read_namespace", skip_all, fields(namespace = name, %revision))]
    pub async fn read_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<Arc<NamespaceDefinition>, NamespaceError> {
        metric!(counter("namespace.cache.access") += 1);

        let cache_key = self.datastore.namespace_cache_key(name, revision)?;

        if let Some(cached) = self.cache.get(&cache_key).await {
            metric!(counter("namespace.cache.hit") += 1);
            return Ok(cached.definition);
        }

        let init = Box::pin(
            self.load_namespace(name, revision)
                .bind_hub(Hub::new_from_top(Hub::current())),
        );
        let entry = self
            .cache
            .entry_by_ref(&cache_key)
            .or_try_insert_with(init)
            .await
            .map_err(NamespaceError::from_shared)?;

        // Not fresh means another caller loaded the definition while we waited for it.
        if !entry.is_fresh() {
            metric!(counter("namespace.cache.coalesced") += 1);
        }
        Ok(entry.into_value().definition)
    }

    /// Reads a definition from the datastore and sanitizes it for caching.
    ///
    /// This does not deduplicate concurrent reads, see [`Self::read_namespace`] for this.
    async fn load_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<CachedNamespace, NamespaceError> {
        metric!(counter("namespace.cache.computation") += 1);
        tracing::trace!("Reading namespace from datastore");

        let (loaded, last_written) = match self.datastore.read_namespace(name, revision).await {
            Ok(loaded) => loaded,
            Err(err @ DatastoreError::NamespaceNotFound(_)) => {
                metric!(counter("namespace.cache.not_found") += 1);
                tracing::debug!("Namespace not found");
                return Err(NamespaceError::from_read(name, err));
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "Failed to read namespace"
                );
                return Err(NamespaceError::from_read(name, err));
            }
        };

        let definition = filter_user_defined_metadata(loaded);
        let size = definition.encoded_len();
        metric!(time_raw("namespace.cache.size") = size as u64);
        tracing::trace!(%last_written, size, "Saving namespace to cache");

        Ok(CachedNamespace {
            cost: u32::try_from(size).unwrap_or(u32::MAX),
            definition: Arc::new(definition),
        })
    }

    /// Reads the definition of `name` and builds its type system.
    ///
    /// Referenced namespaces are read through this manager. The type system itself is built
    /// fresh on every call. A failure to build it is returned alongside the definition.
    pub async fn read_namespace_and_types(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<
        (
            Arc<NamespaceDefinition>,
            Result<NamespaceTypeSystem, TypeSystemError>,
        ),
        NamespaceError,
    > {
        let definition = self.read_namespace(name, revision).await?;
        let type_system = build_type_system(Arc::clone(&definition), self, revision).await;
        Ok((definition, type_system))
    }

    /// Checks that `namespace` exists and declares `relation`.
    ///
    /// With `allow_ellipsis`, the wildcard [`ELLIPSIS`] relation is accepted for any existing
    /// namespace.
    pub async fn check_namespace_and_relation(
        &self,
        namespace: &str,
        relation: &str,
        allow_ellipsis: bool,
        revision: Revision,
    ) -> Result<(), NamespaceError> {
        let definition = self.read_namespace(namespace, revision).await?;

        if allow_ellipsis && relation == ELLIPSIS {
            return Ok(());
        }
        if definition.relation(relation).is_some() {
            return Ok(());
        }

        Err(NamespaceError::RelationNotFound {
            namespace: namespace.to_owned(),
            relation: relation.to_owned(),
        })
    }

    /// The number of cached definitions, after all pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    /// Drops all cached definitions.
    ///
    /// The manager should not be used afterwards.
    pub async fn close(&self) -> Result<(), NamespaceError> {
        metric!(gauge("namespace.cache.entries") = self.cache.entry_count());
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        tracing::debug!("Closed namespace cache");
        Ok(())
    }
}

#[async_trait]
impl NamespaceLookup for NamespaceManager {
    async fn read_namespace(
        &self,
        name: &str,
        revision: Revision,
    ) -> Result<Arc<NamespaceDefinition>, NamespaceError> {
        NamespaceManager::read_namespace(self, name, revision).await
    }
}

fn build_cache(config: &NamespaceCacheConfig) -> Result<InMemoryCache, NamespaceError> {
    if config.num_counters == 0 {
        return Err(NamespaceError::Initialization(
            "num_counters can't be zero".into(),
        ));
    }
    if config.max_cost == 0 {
        return Err(NamespaceError::Initialization(
            "max_cost can't be zero".into(),
        ));
    }
    if config.buffer_items == 0 {
        return Err(NamespaceError::Initialization(
            "buffer_items can't be zero".into(),
        ));
    }
    let initial_capacity = usize::try_from(config.num_counters)
        .map_err(|e| NamespaceError::Initialization(e.to_string()))?;

    let mut builder = InMemoryCache::builder()
        .name("namespaces")
        .max_capacity(config.max_cost)
        .initial_capacity(initial_capacity)
        // NOTE: we count the key to the weight as well
        .weigher(|_k, v| {
            (std::mem::size_of::<CacheKey>() as u32).saturating_add(v.cost)
        });
    if let Some(time_to_live) = config.time_to_live {
        builder = builder.time_to_live(time_to_live);
    }

    Ok(builder.build())
}
