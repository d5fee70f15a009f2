use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::{CacheError, InMemoryStore, MemcachedStore, MokaStore, Store};

fn default_ttl_secs() -> u64 {
    600
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

/// Declarative backend selection, typically read from a JSON config file.
///
/// ```
/// use rttp_cache::store::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(
///     r#"{ "backend": "moka", "default_ttl_secs": 60, "max_capacity": 10000 }"#,
/// ).unwrap();
/// let store = config.build().unwrap();
/// # drop(store);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case", deny_unknown_fields)]
pub enum StoreConfig {
    /// [`InMemoryStore`].
    Memory {
        #[serde(default = "default_ttl_secs")]
        default_ttl_secs: u64,
        #[serde(default = "default_cleanup_interval_secs")]
        cleanup_interval_secs: u64,
    },
    /// [`MokaStore`].
    Moka {
        #[serde(default = "default_ttl_secs")]
        default_ttl_secs: u64,
        #[serde(default)]
        max_capacity: Option<u64>,
    },
    /// [`MemcachedStore`].
    Memcached {
        servers: Vec<String>,
        #[serde(default = "default_ttl_secs")]
        default_ttl_secs: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            default_ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl StoreConfig {
    /// Builds the configured backend.
    ///
    /// The memory backend must be built inside a Tokio runtime for its sweep
    /// task to run. The memcached backend connects eagerly.
    pub fn build(&self) -> Result<Arc<dyn Store>, CacheError> {
        let store: Arc<dyn Store> = match self {
            Self::Memory {
                default_ttl_secs,
                cleanup_interval_secs,
            } => Arc::new(InMemoryStore::new(
                Duration::from_secs(*default_ttl_secs),
                Duration::from_secs(*cleanup_interval_secs),
            )),
            Self::Moka {
                default_ttl_secs,
                max_capacity,
            } => Arc::new(MokaStore::new(
                Duration::from_secs(*default_ttl_secs),
                *max_capacity,
            )),
            Self::Memcached {
                servers,
                default_ttl_secs,
            } => Arc::new(MemcachedStore::connect(
                servers,
                Duration::from_secs(*default_ttl_secs),
            )?),
        };
        info!(backend = self.backend_name(), "cache store ready");
        Ok(store)
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::Moka { .. } => "moka",
            Self::Memcached { .. } => "memcached",
        }
    }
}
