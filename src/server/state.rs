//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::graph::core::config::GraphConfig;
use crate::graph::core::errors::GraphResult;
use crate::graph::engine::core::GraphEngine;

/// Shared application state.
pub struct AppState {
    /// Conversation graph engine.
    pub engine: GraphEngine,
}

impl AppState {
    /// Wrap an engine for sharing across handlers.
    #[must_use]
    pub fn new(engine: GraphEngine) -> Arc<Self> {
        Arc::new(Self { engine })
    }

    /// Open the configured database and build the state on it.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn from_config(config: GraphConfig) -> GraphResult<Arc<Self>> {
        let engine = GraphEngine::from_config(config).await?;
        Ok(Self::new(engine))
    }
}
