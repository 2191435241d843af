// # Server Configuration
//
// Process-level settings read from the loaded property set. Malformed numeric
// values fall back to defaults, matching the permissive parsing of the
// per-data-source options.

use crate::config::properties::Properties;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVER_PORT: u16 = 1059;
pub const DEFAULT_PROMETHEUS_PORT: u16 = 9159;
pub const DEFAULT_THREAD_POOL_SIZE: usize = 200;
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 4_194_304;
pub const DEFAULT_CONNECTION_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CIRCUIT_BREAKER_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RPC listener port.
    pub port: u16,
    /// Metrics endpoint port.
    pub prometheus_port: u16,
    /// Bound on concurrently executing action bodies.
    pub thread_pool_size: usize,
    /// Maximum accepted frame size in bytes.
    pub max_request_size: usize,
    /// Idle window after which a client session is evicted.
    pub connection_idle_timeout: Duration,
    /// Open duration of a tripped circuit breaker.
    pub circuit_breaker_timeout: Duration,
    /// Consecutive connection faults that trip the breaker.
    pub circuit_breaker_threshold: u32,
    /// Extension directory scanned for provider descriptors and drivers.
    pub libs_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            prometheus_port: DEFAULT_PROMETHEUS_PORT,
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            connection_idle_timeout: Duration::from_millis(DEFAULT_CONNECTION_IDLE_TIMEOUT_MS),
            circuit_breaker_timeout: Duration::from_millis(DEFAULT_CIRCUIT_BREAKER_TIMEOUT_MS),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            libs_path: None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(props: &Properties, key: &str, default: T) -> T {
    match props.get(key).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            tracing::warn!(key, "malformed value, using default");
            default
        }
        None => default,
    }
}

impl ServerConfig {
    /// Build from a loaded property set, applying defaults for unset or
    /// malformed keys.
    pub fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or(props, "ojp.server.port", defaults.port),
            prometheus_port: parse_or(props, "ojp.prometheus.port", defaults.prometheus_port),
            thread_pool_size: parse_or(props, "ojp.thread.pool.size", defaults.thread_pool_size),
            max_request_size: parse_or(props, "ojp.max.request.size", defaults.max_request_size),
            connection_idle_timeout: Duration::from_millis(parse_or(
                props,
                "ojp.connection.idle.timeout",
                DEFAULT_CONNECTION_IDLE_TIMEOUT_MS,
            )),
            circuit_breaker_timeout: Duration::from_millis(parse_or(
                props,
                "ojp.circuit.breaker.timeout",
                DEFAULT_CIRCUIT_BREAKER_TIMEOUT_MS,
            )),
            circuit_breaker_threshold: parse_or(
                props,
                "ojp.circuit.breaker.threshold",
                defaults.circuit_breaker_threshold,
            ),
            libs_path: props.get("ojp.libs.path").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::properties::parse_properties;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_properties(&Properties::new());
        assert_eq!(config.port, 1059);
        assert_eq!(config.prometheus_port, 9159);
        assert_eq!(config.thread_pool_size, 200);
        assert_eq!(config.max_request_size, 4_194_304);
        assert_eq!(config.connection_idle_timeout, Duration::from_millis(30_000));
        assert_eq!(config.circuit_breaker_threshold, 3);
        assert!(config.libs_path.is_none());
    }

    #[test]
    fn test_overrides_and_malformed() {
        let props = parse_properties(
            "ojp.server.port=2000\nojp.thread.pool.size=not-a-number\nojp.libs.path=/opt/ojp/libs\n",
        );
        let config = ServerConfig::from_properties(&props);
        assert_eq!(config.port, 2000);
        assert_eq!(config.thread_pool_size, 200);
        assert_eq!(config.libs_path, Some(PathBuf::from("/opt/ojp/libs")));
    }
}
