//! Provides access to the metrics sytem.
use std::collections::BTreeMap;
use std::io;
use std::net::ToSocketAddrs;
use std::ops::Deref;
use std::sync::OnceLock;

use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

use crate::config::Metrics;

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,

    /// A collection of tags and values that will be sent with every metric.
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (tag, value) in self.tags.iter() {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &Self::Target {
        &self.statsd_client
    }
}

/// Tell the metrics system to report to statsd.
///
/// Only the first successful call configures the client, later calls are ignored.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> io::Result<()> {
    let addrs: Vec<_> = host.to_socket_addrs()?.collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).map_err(io::Error::other)?;
    let statsd_client = StatsdClient::from_sink(prefix, sink);

    if METRICS_CLIENT
        .set(MetricsClient {
            statsd_client,
            tags,
        })
        .is_err()
    {
        tracing::warn!("Metrics are already configured");
    }
    Ok(())
}

/// Configures statsd reporting from `config`.
///
/// Does nothing if no statsd host is configured.
pub fn init_metrics(config: &Metrics) -> io::Result<()> {
    match config.statsd {
        Some(ref statsd) => {
            configure_statsd(&config.prefix, statsd.as_str(), config.custom_tags.clone())
        }
        None => Ok(()),
    }
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part
/// the [`metric!`](crate::metric) macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    match METRICS_CLIENT.get() {
        Some(client) => f(client),
        None => Default::default(),
    }
}

/// Emits a metric.
#[macro_export]
macro_rules! metric {
    // counters
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.count_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};

    // gauges
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.gauge_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};

    // we use statsd timers to send things such as sizes as well.
    (time_raw($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.time_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;

    use crate::caching::NamespaceManager;
    use crate::test::{self, FakeDatastore, document};
    use crate::types::Revision;

    use super::*;

    #[test]
    fn test_init_metrics_without_statsd() {
        let config = Metrics {
            statsd: None,
            ..Default::default()
        };
        init_metrics(&config).unwrap();
    }

    #[tokio::test]
    async fn test_reports_cache_accesses() {
        test::setup();
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let config = Metrics {
            statsd: Some(server.local_addr().unwrap().to_string()),
            prefix: "namespaces".into(),
            custom_tags: BTreeMap::from([("env".to_owned(), "test".to_owned())]),
        };
        init_metrics(&config).unwrap();

        let datastore = Arc::new(
            FakeDatastore::new()
                .with_namespace(Revision(1), document())
                .with_delay(Duration::from_millis(20)),
        );
        let manager = NamespaceManager::new(datastore.clone(), None).unwrap();
        let reads = (0..3).map(|_| manager.read_namespace("document", Revision(1)));
        for result in join_all(reads).await {
            result.unwrap();
        }
        manager.read_namespace("document", Revision(1)).await.unwrap();
        assert_eq!(datastore.reads(), 1);

        let mut expected = BTreeSet::from([
            "namespaces.namespace.cache.access",
            "namespaces.namespace.cache.computation",
            "namespaces.namespace.cache.coalesced",
            "namespaces.namespace.cache.hit",
        ]);
        let mut buf = [0; 1024];
        while !expected.is_empty() {
            let len = server.recv(&mut buf).unwrap();
            let packet = String::from_utf8_lossy(&buf[..len]);
            let (name, rest) = packet.split_once(':').unwrap();
            if expected.remove(name) {
                assert!(rest.contains("|c"), "{packet}");
                assert!(rest.contains("env:test"), "{packet}");
            }
        }
    }
}
