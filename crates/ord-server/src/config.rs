use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ord_kv::{InMemoryKv, KvBackend, LogConfig, LogKv, SyncMode};
use ord_store::{IdGenerator, MonotonicIds, RandomIds};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Page size of `GET /orders`.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Seconds to wait for in-flight requests once shutdown starts.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Upper bound for randomly generated order ids.
pub const RANDOM_ID_MAX: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Index members examined per `GET /orders` page.
    pub page_size: usize,
    pub ids: IdStrategy,
    /// Allow cross-origin requests from any origin.
    pub cors: bool,
    /// Grace period for in-flight requests after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    pub backend: BackendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            page_size: DEFAULT_PAGE_SIZE,
            ids: IdStrategy::default(),
            cors: false,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            backend: BackendConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.page_size == 0 {
            return Err(ServerError::Config("page_size must be positive".into()));
        }
        if let BackendConfig::Log { path, .. } = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(ServerError::Config("log backend needs a path".into()));
            }
        }
        Ok(())
    }
}

/// Which key-value backend holds the orders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Volatile, process-local storage.
    #[default]
    Memory,
    /// Append-only log file, replayed on startup.
    Log {
        path: PathBuf,
        #[serde(default)]
        sync: SyncMode,
    },
}

impl BackendConfig {
    /// Open the configured backend.
    pub fn open(&self) -> ServerResult<Arc<dyn KvBackend>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryKv::new())),
            Self::Log { path, sync } => {
                let config = LogConfig { sync_mode: *sync };
                Ok(Arc::new(LogKv::open(path, config)?))
            }
        }
    }
}

/// How new order ids are drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Increasing ids seeded from the wall clock.
    #[default]
    Monotonic,
    /// Random ids in `1..=1_000_000`; collisions are retried.
    Random,
}

impl IdStrategy {
    pub fn generator(self) -> Arc<dyn IdGenerator> {
        match self {
            Self::Monotonic => Arc::new(MonotonicIds::from_clock()),
            Self::Random => Arc::new(RandomIds::new(RANDOM_ID_MAX)),
        }
    }
}
