//! Shared `SQLite` connection for the graph stores.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_rusqlite::Connection;
use tracing::info;

use crate::graph::core::config::StorageConfig;
use crate::graph::core::errors::GraphResult;
use crate::graph::storage::schema::{CONNECTION_PRAGMAS, SCHEMA};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle to the graph database.
///
/// All stores share one connection so that foreign keys, cascades and
/// multi-table transactions see the same database, including `:memory:`.
#[derive(Clone)]
pub struct GraphDatabase {
    conn: Arc<Connection>,
}

impl GraphDatabase {
    /// Open the configured database and create the schema if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(config: &StorageConfig) -> GraphResult<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory().await?
        } else {
            Connection::open(&config.sqlite_path).await?
        };
        let db = Self::initialize(conn, config.busy_timeout_ms).await?;
        info!("Opened graph database at {}", config.sqlite_path.display());
        Ok(db)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> GraphResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::initialize(conn, StorageConfig::default().busy_timeout_ms).await
    }

    async fn initialize(conn: Connection, busy_timeout_ms: u64) -> GraphResult<Self> {
        conn.call(move |conn| {
            conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
            conn.execute_batch(CONNECTION_PRAGMAS)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Shared connection handle.
    #[must_use]
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.conn)
    }
}
