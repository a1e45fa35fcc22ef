//! # Namespace caching
//!
//! Namespace definitions are read on nearly every permission check, so they are cached in memory
//! by the [`NamespaceManager`].
//!
//! ## Consistency
//!
//! A definition is cached under a [`CacheKey`] that the datastore derives from the namespace name
//! *and* the revision. The content of a namespace at a given revision is immutable, so a cached
//! entry can never be stale and the cache needs no invalidation on writes. Writes simply produce
//! new revisions, which map to new keys.
//!
//! ## Request coalescing
//!
//! Concurrent reads of a key that is not cached yet are coalesced: the first caller reads from the
//! datastore, and every other caller waits for and shares its result. This includes errors,
//! which are handed to all waiting callers but are never cached. Callers waiting on different
//! keys never block each other, and cache hits never wait at all.
//!
//! ## Sanitization
//!
//! User defined metadata is stripped from every definition before it is cached, so callers of the
//! manager never observe it, no matter if the definition was cached or freshly read.
//!
//! ## Eviction
//!
//! The cost of an entry is the serialized size of its definition. Once the total cost exceeds
//! [`NamespaceCacheConfig::max_cost`](crate::config::NamespaceCacheConfig::max_cost), entries are
//! evicted. Eviction only ever causes a re-read from the datastore.
//!
//! ### Metrics
//!
//! - `namespace.cache.access`: All accesses.
//! - `namespace.cache.hit`: Accesses served by the in-memory cache.
//! - `namespace.cache.coalesced`: Accesses that waited for a concurrent read of the same key.
//! - `namespace.cache.computation`: Actual reads from the datastore.
//! - `namespace.cache.not_found`: Reads of namespaces that do not exist.
//! - `namespace.cache.size`: The cost (in bytes) of freshly cached definitions.
//! - `namespace.cache.entries`: The number of entries when the cache is closed.

mod cache_key;
mod error;
mod manager;

pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use error::NamespaceError;
pub use manager::NamespaceManager;
