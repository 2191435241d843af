// # Data-source Configuration Resolver
//
// Maps a client's connect-time property set to an immutable
// `DataSourceConfiguration`. Equal property sets resolve to the same
// `Arc` until the cache is cleared, so configuration identity can be
// compared by pointer.

use crate::config::properties::Properties;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAXIMUM_POOL_SIZE: u32 = 10;
pub const DEFAULT_MINIMUM_IDLE: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Recognized option keys; everything else is preserved as pass-through.
const RECOGNIZED_KEYS: [&str; 7] = [
    "dataSourceName",
    "poolEnabled",
    "maximumPoolSize",
    "minimumIdle",
    "idleTimeout",
    "maxLifetime",
    "connectionTimeout",
];

/// Immutable snapshot of one data source's pooling options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceConfiguration {
    pub data_source_name: String,
    pub pool_enabled: bool,
    pub maximum_pool_size: u32,
    pub minimum_idle: u32,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: u64,
    pub connection_timeout_ms: u64,
    /// Unrecognized keys, passed through to the backend driver untouched.
    pub pass_through: BTreeMap<String, String>,
}

impl Default for DataSourceConfiguration {
    fn default() -> Self {
        Self {
            data_source_name: String::new(),
            pool_enabled: true,
            maximum_pool_size: DEFAULT_MAXIMUM_POOL_SIZE,
            minimum_idle: DEFAULT_MINIMUM_IDLE,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_MAX_LIFETIME_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            pass_through: BTreeMap::new(),
        }
    }
}

impl DataSourceConfiguration {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Parse from raw properties. Malformed numerics fall back to their
    /// defaults without error; this permissiveness is deliberate.
    fn parse(props: &Properties) -> Self {
        let defaults = Self::default();

        fn num<T: std::str::FromStr>(props: &Properties, key: &str, default: T) -> T {
            match props.get(key).map(|v| v.trim().parse::<T>()) {
                Some(Ok(value)) => value,
                Some(Err(_)) => {
                    tracing::warn!(key, "malformed data source option, using default");
                    default
                }
                None => default,
            }
        }

        let pool_enabled = props
            .get("poolEnabled")
            .map(|v| !v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let pass_through: BTreeMap<String, String> = props
            .iter()
            .filter(|(k, _)| !RECOGNIZED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            data_source_name: props.get("dataSourceName").cloned().unwrap_or_default(),
            pool_enabled,
            maximum_pool_size: num(props, "maximumPoolSize", defaults.maximum_pool_size),
            minimum_idle: num(props, "minimumIdle", defaults.minimum_idle),
            idle_timeout_ms: num(props, "idleTimeout", defaults.idle_timeout_ms),
            max_lifetime_ms: num(props, "maxLifetime", defaults.max_lifetime_ms),
            connection_timeout_ms: num(props, "connectionTimeout", defaults.connection_timeout_ms),
            pass_through,
        }
    }
}

/// Content-addressed configuration cache keyed by the full property set.
pub struct ConfigResolver {
    cache: DashMap<Properties, Arc<DataSourceConfiguration>>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Resolve a property set to its configuration. Two equal property sets
    /// return the same `Arc` until `clear_cache`.
    pub fn resolve(&self, props: &Properties) -> Arc<DataSourceConfiguration> {
        if let Some(existing) = self.cache.get(props) {
            return Arc::clone(existing.value());
        }
        let config = Arc::new(DataSourceConfiguration::parse(props));
        self.cache
            .entry(props.clone())
            .or_insert(config)
            .value()
            .clone()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::properties::parse_properties;

    #[test]
    fn test_explicit_values_and_defaults() {
        let props = parse_properties(
            "dataSourceName=myApp\nmaximumPoolSize=50\nminimumIdle=10\nconnectionTimeout=15000\n",
        );
        let config = DataSourceConfiguration::parse(&props);
        assert_eq!(config.data_source_name, "myApp");
        assert_eq!(config.maximum_pool_size, 50);
        assert_eq!(config.minimum_idle, 10);
        assert_eq!(config.connection_timeout_ms, 15_000);
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.max_lifetime_ms, DEFAULT_MAX_LIFETIME_MS);
        assert!(config.pool_enabled);
    }

    #[test]
    fn test_malformed_numeric_falls_back() {
        let props = parse_properties("maximumPoolSize=abc\nidleTimeout=-5\n");
        let config = DataSourceConfiguration::parse(&props);
        assert_eq!(config.maximum_pool_size, DEFAULT_MAXIMUM_POOL_SIZE);
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
    }

    #[test]
    fn test_empty_data_source_name_preserved() {
        let props = parse_properties("dataSourceName=\n");
        let config = DataSourceConfiguration::parse(&props);
        assert_eq!(config.data_source_name, "");
    }

    #[test]
    fn test_pass_through_keys() {
        let props = parse_properties("maximumPoolSize=5\nsslmode=require\nuser=app\n");
        let config = DataSourceConfiguration::parse(&props);
        assert_eq!(config.pass_through.get("sslmode"), Some(&"require".to_string()));
        assert_eq!(config.pass_through.get("user"), Some(&"app".to_string()));
        assert!(!config.pass_through.contains_key("maximumPoolSize"));
    }

    #[test]
    fn test_cache_identity() {
        let resolver = ConfigResolver::new();
        let p1 = parse_properties("dataSourceName=a\nmaximumPoolSize=5\n");
        let p2 = parse_properties("maximumPoolSize=5\ndataSourceName=a\n");

        let c1 = resolver.resolve(&p1);
        let c2 = resolver.resolve(&p2);
        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(resolver.cache_size(), 1);

        resolver.clear_cache();
        assert_eq!(resolver.cache_size(), 0);
        let c3 = resolver.resolve(&p1);
        assert!(!Arc::ptr_eq(&c1, &c3));
        assert_eq!(*c1, *c3);
    }
}
