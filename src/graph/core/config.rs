//! Configuration for the conversation graph store and its server.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::graph::core::errors::{GraphError, GraphResult};

/// Environment variable overriding [`StorageConfig::sqlite_path`].
pub const ENV_DB_PATH: &str = "CONVO_GRAPH_DB";
/// Environment variable overriding [`ServerConfig::port`].
pub const ENV_PORT: &str = "CONVO_GRAPH_PORT";
/// Environment variable overriding [`ConversationConfig::page_size`].
pub const ENV_PAGE_SIZE: &str = "CONVO_GRAPH_PAGE_SIZE";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Conversation listing and defaults.
    pub conversations: ConversationConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl GraphConfig {
    /// Defaults overlaid with `CONVO_GRAPH_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unparsable value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> GraphResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    ///
    /// # Errors
    /// Same as [`GraphConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> GraphResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.server.port = port.trim().parse().map_err(|_| {
                GraphError::InvalidConfig(format!("{ENV_PORT} must be a port number, got {port:?}"))
            })?;
        }
        if let Some(size) = lookup(ENV_PAGE_SIZE) {
            config.conversations.page_size = size.trim().parse().map_err(|_| {
                GraphError::InvalidConfig(format!(
                    "{ENV_PAGE_SIZE} must be a positive integer, got {size:?}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> GraphResult<()> {
        if self.storage.sqlite_path.as_os_str().is_empty() {
            return Err(GraphError::InvalidConfig(
                "storage.sqlite_path must not be empty".to_string(),
            ));
        }

        if self.conversations.page_size == 0 {
            return Err(GraphError::InvalidConfig(
                "conversations.page_size must be > 0".to_string(),
            ));
        }

        if self.conversations.default_title.trim().is_empty() {
            return Err(GraphError::InvalidConfig(
                "conversations.default_title must not be blank".to_string(),
            ));
        }

        Ok(())
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path (`:memory:` for a private in-memory database).
    pub sqlite_path: PathBuf,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    /// Path value that selects an in-memory database.
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Whether the configured path selects an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path.as_os_str() == Self::IN_MEMORY
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("convo_graph.sqlite"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Conversation listing and defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Maximum number of conversations returned by a listing.
    pub page_size: usize,
    /// Title given to conversations created without one.
    pub default_title: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            default_title: "New Conversation".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}
