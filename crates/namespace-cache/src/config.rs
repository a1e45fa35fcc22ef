use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the namespace cache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "namespaces".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Sizing of the in-memory namespace cache.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct NamespaceCacheConfig {
    /// Number of keys to track.
    ///
    /// Used to pre-size the key table of the cache.
    ///
    /// Defaults to `10_000`.
    pub num_counters: u64,

    /// Maximum total cost of all cached definitions.
    ///
    /// The cost of a definition is its serialized size in bytes. The limit is a best-effort
    /// approximation, and not an exact limit.
    ///
    /// Defaults to `16 MiB (= 16_777_216)`.
    pub max_cost: u64,

    /// Number of keys per internal bookkeeping batch.
    ///
    /// Defaults to `64`.
    pub buffer_items: u64,

    /// Maximum time a definition stays cached after it was inserted.
    ///
    /// Cached definitions never go stale, so this is only useful to bound memory usage of
    /// namespaces at old revisions. Defaults to no expiration.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Option<Duration>,
}

impl Default for NamespaceCacheConfig {
    fn default() -> Self {
        Self {
            num_counters: 10_000,
            max_cost: 1 << 24,
            buffer_items: 64,
            time_to_live: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Sizing of the namespace cache.
    pub namespace_cache: NamespaceCacheConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_namespace_cache_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.namespace_cache.num_counters, 10_000);
        assert_eq!(cfg.namespace_cache.max_cost, 16 * 1024 * 1024);
        assert_eq!(cfg.namespace_cache.buffer_items, 64);
        assert_eq!(cfg.namespace_cache.time_to_live, None);
    }

    #[test]
    fn test_namespace_cache_config() {
        // Individual options can be set without affecting the other defaults.
        let yaml = r#"
            namespace_cache:
              max_cost: 1048576
              time_to_live: 10m
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.namespace_cache.max_cost, 1024 * 1024);
        assert_eq!(
            cfg.namespace_cache.time_to_live,
            Some(Duration::from_secs(600))
        );
        assert_eq!(cfg.namespace_cache.num_counters, 10_000);
        assert_eq!(cfg.namespace_cache.buffer_items, 64);
    }

    #[test]
    fn test_logging_config() {
        let yaml = r#"
            logging:
              level: trace
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::TRACE);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.logging.enable_backtraces);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            namespace_cache:
              num_counters: 100
            not_a_section:
              foo: bar
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.namespace_cache.num_counters, 100);
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_file() {
        let tempdir = namespace_cache_test::tempdir();
        let path = tempdir.path().join("config.yml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "metrics:\n  prefix: authz\n  custom_tags:\n    region: eu").unwrap();
        drop(file);

        let cfg = Config::get(Some(path.as_path())).unwrap();
        assert_eq!(cfg.metrics.prefix, "authz");
        assert_eq!(cfg.metrics.custom_tags.get("region").unwrap(), "eu");

        let missing = tempdir.path().join("missing.yml");
        assert!(Config::get(Some(missing.as_path())).is_err());
    }
}
