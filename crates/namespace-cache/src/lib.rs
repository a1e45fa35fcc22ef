//! A read-through, revision consistent cache of namespace definitions.
//!
//! The [`NamespaceManager`](caching::NamespaceManager) sits in front of a
//! [`Datastore`](datastore::Datastore) and serves namespace definitions by name and revision.

use std::io;

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod datastore;
pub mod logging;
pub mod types;
pub mod typesystem;

#[cfg(any(feature = "test", test))]
pub mod test;

/// Sets up logging and metrics reporting as described by `config`.
///
/// # Safety
/// See [`logging::init_logging`]; this must only be called while the process is single-threaded.
pub unsafe fn init(config: &config::Config) -> io::Result<()> {
    // SAFETY: Forwarded to the caller.
    unsafe { logging::init_logging(&config.logging) };
    metrics::init_metrics(&config.metrics)
}
