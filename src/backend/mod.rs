// # Backend Abstraction Module
//
// Driver traits for standard and XA backend connections, the scheme-keyed
// driver registry, the connection URL resolver, the SQL value model, and the
// embedded in-memory driver family.

pub mod driver;
pub mod memory;
pub mod url;
pub mod value;

pub use driver::{BackendConnection, BackendDriver, DriverRegistry, XaConnection, XaDriver};
pub use url::{has_xa_indicator, resolve_backend_url, scheme_of, strip_ojp_prefix};
pub use value::{ExecuteOutcome, QueryResult, Row, SqlValue};

use crate::config::datasource::DataSourceConfiguration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable fingerprint grouping clients that share a pool.
///
/// Derived from the resolved backend URL, the user, and the pooling-relevant
/// configuration fields, so two clients with identical effective
/// configuration land on the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnHash(String);

impl ConnHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a precomputed hash (wire deserialization and tests).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        ConnHash(raw.into())
    }
}

impl std::fmt::Display for ConnHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the connection hash for a resolved backend URL and configuration.
pub fn connection_hash(url: &str, user: &str, config: &DataSourceConfiguration) -> ConnHash {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(user.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.data_source_name.as_bytes());
    hasher.update([0u8]);
    hasher.update([config.pool_enabled as u8]);
    for n in [
        config.maximum_pool_size as u64,
        config.minimum_idle as u64,
        config.idle_timeout_ms,
        config.max_lifetime_ms,
        config.connection_timeout_ms,
    ] {
        hasher.update(n.to_be_bytes());
    }
    ConnHash(hex::encode(hasher.finalize()))
}
