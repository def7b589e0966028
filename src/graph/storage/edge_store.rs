//! Edge log: explicit relationships between messages.

use std::sync::Arc;

use rusqlite::Connection as SyncConnection;
use tokio_rusqlite::Connection;

use crate::graph::core::errors::GraphResult;
use crate::graph::core::ids::{ConversationId, EdgeId, MessageId};
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::Edge;
use crate::graph::storage::database::{GraphDatabase, StoreFuture};
use crate::graph::storage::rows::{EDGE_COLUMNS, edge_from_row, json_text, member_depth, now_millis};

/// Edge store trait.
pub trait EdgeStore: Send + Sync {
    /// Record an edge between two messages of the same conversation.
    ///
    /// # Errors
    /// Returns an error if either endpoint is outside the conversation or
    /// storage access fails.
    fn add(
        &self,
        conversation_id: ConversationId,
        source_id: MessageId,
        target_id: MessageId,
        edge_type: EdgeType,
        metadata: Option<serde_json::Value>,
    ) -> StoreFuture<'_, GraphResult<Edge>>;

    /// All edges of a conversation in insertion order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Vec<Edge>>>;
}

/// Insert one edge row on an already open connection or transaction.
pub(crate) fn insert_edge(
    conn: &SyncConnection,
    conversation_id: ConversationId,
    source_id: MessageId,
    target_id: MessageId,
    edge_type: EdgeType,
    metadata: Option<serde_json::Value>,
) -> Result<Edge, tokio_rusqlite::Error> {
    let id = EdgeId::new();
    let now_ms = now_millis();
    let metadata_text = json_text(metadata.as_ref())?;
    conn.execute(
        "INSERT INTO edges (id, conversation_id, source_id, target_id, type, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, conversation_id, source_id, target_id, edge_type, metadata_text, now_ms],
    )?;
    let edge = conn.query_row(
        &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1"),
        rusqlite::params![id],
        edge_from_row,
    )?;
    Ok(edge)
}

/// `SQLite` implementation of the edge store.
pub struct SqliteEdgeStore {
    conn: Arc<Connection>,
}

impl SqliteEdgeStore {
    /// Build the store on a shared database.
    #[must_use]
    pub fn new(db: &GraphDatabase) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl EdgeStore for SqliteEdgeStore {
    fn add(
        &self,
        conversation_id: ConversationId,
        source_id: MessageId,
        target_id: MessageId,
        edge_type: EdgeType,
        metadata: Option<serde_json::Value>,
    ) -> StoreFuture<'_, GraphResult<Edge>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    for endpoint in [source_id, target_id] {
                        if let Err(rejection) = member_depth(&tx, conversation_id, endpoint)? {
                            return Ok(Err(rejection));
                        }
                    }
                    let edge = insert_edge(
                        &tx,
                        conversation_id,
                        source_id,
                        target_id,
                        edge_type,
                        metadata,
                    )?;
                    tx.commit()?;
                    Ok(Ok(edge))
                })
                .await?
        })
    }

    fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Vec<Edge>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EDGE_COLUMNS}
                         FROM edges
                         WHERE conversation_id = ?1
                         ORDER BY created_at, rowid"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], edge_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }
}
