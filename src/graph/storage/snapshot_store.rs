//! Rewind snapshots keyed to a message.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::graph::core::errors::GraphResult;
use crate::graph::core::ids::{ConversationId, MessageId, SnapshotId};
use crate::graph::core::models::Snapshot;
use crate::graph::storage::database::{GraphDatabase, StoreFuture};
use crate::graph::storage::rows::{
    SNAPSHOT_COLUMNS, json_text, member_depth, now_millis, snapshot_from_row,
};

/// Snapshot store trait.
pub trait SnapshotStore: Send + Sync {
    /// Capture a snapshot for a message of the conversation.
    ///
    /// # Errors
    /// Returns an error if the message is outside the conversation or storage
    /// access fails.
    fn create(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        snapshot: serde_json::Value,
    ) -> StoreFuture<'_, GraphResult<Snapshot>>;

    /// Snapshots of a conversation, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list(&self, conversation_id: ConversationId) -> StoreFuture<'_, GraphResult<Vec<Snapshot>>>;

    /// Most recent snapshot of a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn latest(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Option<Snapshot>>>;
}

/// `SQLite` implementation of the snapshot store.
pub struct SqliteSnapshotStore {
    conn: Arc<Connection>,
}

impl SqliteSnapshotStore {
    /// Build the store on a shared database.
    #[must_use]
    pub fn new(db: &GraphDatabase) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn create(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        snapshot: serde_json::Value,
    ) -> StoreFuture<'_, GraphResult<Snapshot>> {
        Box::pin(async move {
            let id = SnapshotId::new();
            let now_ms = now_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if let Err(rejection) = member_depth(&tx, conversation_id, message_id)? {
                        return Ok(Err(rejection));
                    }
                    let blob = json_text(Some(&snapshot))?;
                    tx.execute(
                        "INSERT INTO snapshots (id, conversation_id, message_id, snapshot, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id, conversation_id, message_id, blob, now_ms],
                    )?;
                    let stored = tx.query_row(
                        &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1"),
                        rusqlite::params![id],
                        snapshot_from_row,
                    )?;
                    tx.commit()?;
                    Ok(Ok(stored))
                })
                .await?
        })
    }

    fn list(&self, conversation_id: ConversationId) -> StoreFuture<'_, GraphResult<Vec<Snapshot>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SNAPSHOT_COLUMNS}
                         FROM snapshots
                         WHERE conversation_id = ?1
                         ORDER BY created_at DESC, rowid DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], snapshot_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn latest(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Option<Snapshot>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {SNAPSHOT_COLUMNS}
                                 FROM snapshots
                                 WHERE conversation_id = ?1
                                 ORDER BY created_at DESC, rowid DESC
                                 LIMIT 1"
                            ),
                            rusqlite::params![conversation_id],
                            snapshot_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }
}
