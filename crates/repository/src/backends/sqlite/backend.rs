//! SQLite backend provider.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{BackendKind, BackendProvider, BackendSession, WriteStats};
use crate::error::{BackendError, RepositoryResult};
use crate::registry::RepositoryOptions;

use super::schema;
use super::session::SqliteSession;

/// Path that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Provider of SQLite sessions sharing one connection pool.
pub struct SqliteProvider {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteConfig,
    is_memory: bool,
    stats: Arc<Mutex<WriteStats>>,
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProvider")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("pool_size", &self.pool.state().connections)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_path() -> String {
    MEMORY_PATH.to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

impl SqliteConfig {
    /// Reads `path`, `max_connections`, `busy_timeout` and `enable_wal` from
    /// repository settings, keeping defaults for absent keys.
    pub fn from_options(options: &RepositoryOptions) -> RepositoryResult<Self> {
        let mut config = Self::default();
        if let Some(path) = options.setting("path") {
            config.path = path.to_string();
        }
        if let Some(max) = options.parse_setting::<u32>("max_connections")? {
            config.max_connections = max.max(1);
        }
        if let Some(timeout) = options.duration_setting("busy_timeout")? {
            config.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(wal) = options.parse_setting::<bool>("enable_wal")? {
            config.enable_wal = wal;
        }
        Ok(config)
    }

    fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

fn connection_failed(message: String) -> BackendError {
    BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message,
    }
}

impl SqliteProvider {
    /// Creates a provider over a private in-memory database.
    pub fn in_memory() -> RepositoryResult<Self> {
        Self::with_config(SqliteConfig::default())
    }

    /// Opens or creates a file-based database.
    pub fn open<P: AsRef<Path>>(path: P) -> RepositoryResult<Self> {
        Self::with_config(SqliteConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..SqliteConfig::default()
        })
    }

    /// Creates a provider from repository settings.
    pub fn from_options(options: &RepositoryOptions) -> RepositoryResult<Self> {
        Self::with_config(SqliteConfig::from_options(options)?)
    }

    /// Creates a provider with custom configuration and initializes the schema.
    pub fn with_config(config: SqliteConfig) -> RepositoryResult<Self> {
        let is_memory = config.is_memory();
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        }
        .with_init(move |conn| conn.busy_timeout(busy_timeout));

        // Every connection to ":memory:" opens a separate database, so the
        // in-memory pool holds exactly one connection for its whole life.
        let builder = if is_memory {
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder().max_size(config.max_connections.max(1))
        };
        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))?;

        let provider = Self {
            pool,
            config,
            is_memory,
            stats: Arc::new(Mutex::new(WriteStats::default())),
        };
        provider.configure_connection()?;
        provider.init_schema()?;

        info!(
            path = %provider.config.path,
            max_connections = provider.pool.max_size(),
            "Opened SQLite repository store"
        );
        Ok(provider)
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> RepositoryResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> RepositoryResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| connection_failed(e.to_string()).into())
    }

    fn configure_connection(&self) -> RepositoryResult<()> {
        if self.config.enable_wal && !self.is_memory {
            let conn = self.get_connection()?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| BackendError::Internal {
                    backend_name: "sqlite".to_string(),
                    message: format!("Failed to enable WAL mode: {}", e),
                    source: None,
                })?;
        }
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the provider configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl BackendProvider for SqliteProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn open_session(&self, _options: &RepositoryOptions) -> RepositoryResult<Arc<dyn BackendSession>> {
        Ok(Arc::new(SqliteSession::new(
            self.pool.clone(),
            Arc::clone(&self.stats),
        )))
    }

    fn write_stats(&self) -> WriteStats {
        *self.stats.lock()
    }
}
