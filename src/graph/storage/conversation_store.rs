//! Conversation rows and the active-leaf cursor.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::graph::core::errors::{GraphError, GraphResult};
use crate::graph::core::ids::{ConversationId, MessageId, UserId};
use crate::graph::core::models::{Conversation, ConversationDetail};
use crate::graph::storage::database::{GraphDatabase, StoreFuture};
use crate::graph::storage::message_store::purge_conversation_messages;
use crate::graph::storage::rows::{
    CONVERSATION_COLUMNS, EDGE_COLUMNS, MESSAGE_COLUMNS, conversation_from_row, edge_from_row,
    member_depth, message_from_row, now_millis,
};

/// Conversation store trait.
pub trait ConversationStore: Send + Sync {
    /// List a user's conversations, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreFuture<'_, GraphResult<Vec<Conversation>>>;

    /// Get a conversation by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, GraphResult<Option<Conversation>>>;

    /// Conversation with all of its messages and edges, read in one
    /// transaction so the active leaf and the graph are consistent.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_detail(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Option<ConversationDetail>>>;

    /// Insert a new conversation.
    ///
    /// # Errors
    /// Returns `UserNotFound` if the owner does not exist, or an error if
    /// storage access fails.
    fn create(
        &self,
        user_id: Option<UserId>,
        title: String,
    ) -> StoreFuture<'_, GraphResult<Conversation>>;

    /// Rename a conversation and bump `updated_at`.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if no row matches.
    fn update_title(&self, id: ConversationId, title: &str) -> StoreFuture<'_, GraphResult<()>>;

    /// Point the active leaf at `message_id` and bump `updated_at`.
    ///
    /// # Errors
    /// Returns an error if the message is not part of the conversation.
    fn set_active_leaf(
        &self,
        id: ConversationId,
        message_id: MessageId,
    ) -> StoreFuture<'_, GraphResult<()>>;

    /// Delete a conversation and its graph.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: ConversationId) -> StoreFuture<'_, GraphResult<bool>>;
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Arc<Connection>,
}

impl SqliteConversationStore {
    /// Build the store on a shared database.
    #[must_use]
    pub fn new(db: &GraphDatabase) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl ConversationStore for SqliteConversationStore {
    fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreFuture<'_, GraphResult<Vec<Conversation>>> {
        Box::pin(async move {
            let limit = i64::try_from(limit)
                .map_err(|_| GraphError::InvalidConfig("limit exceeds i64".to_string()))?;
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CONVERSATION_COLUMNS}
                         FROM conversations
                         WHERE user_id = ?1
                         ORDER BY updated_at DESC, rowid DESC
                         LIMIT ?2"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![user_id, limit], conversation_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn get(&self, id: ConversationId) -> StoreFuture<'_, GraphResult<Option<Conversation>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            conversation_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn load_detail(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Option<ConversationDetail>>> {
        Box::pin(async move {
            let detail = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let Some(conversation) = tx
                        .query_row(
                            &format!(
                                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            conversation_from_row,
                        )
                        .optional()?
                    else {
                        return Ok(None);
                    };
                    let messages = tx
                        .prepare(&format!(
                            "SELECT {MESSAGE_COLUMNS}
                             FROM messages
                             WHERE conversation_id = ?1
                             ORDER BY created_at, rowid"
                        ))?
                        .query_map(rusqlite::params![id], message_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    let edges = tx
                        .prepare(&format!(
                            "SELECT {EDGE_COLUMNS}
                             FROM edges
                             WHERE conversation_id = ?1
                             ORDER BY created_at, rowid"
                        ))?
                        .query_map(rusqlite::params![id], edge_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    tx.commit()?;
                    Ok(Some(ConversationDetail {
                        conversation,
                        messages,
                        edges,
                    }))
                })
                .await?;
            Ok(detail)
        })
    }

    fn create(
        &self,
        user_id: Option<UserId>,
        title: String,
    ) -> StoreFuture<'_, GraphResult<Conversation>> {
        Box::pin(async move {
            let id = ConversationId::new();
            let now_ms = now_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if let Some(owner) = user_id {
                        let known = tx
                            .query_row(
                                "SELECT 1 FROM users WHERE id = ?1",
                                rusqlite::params![owner],
                                |_| Ok(()),
                            )
                            .optional()?
                            .is_some();
                        if !known {
                            return Ok(Err(GraphError::UserNotFound(owner)));
                        }
                    }
                    tx.execute(
                        "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        rusqlite::params![id, user_id, title, now_ms],
                    )?;
                    let row = tx.query_row(
                        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                        rusqlite::params![id],
                        conversation_from_row,
                    )?;
                    tx.commit()?;
                    Ok(Ok(row))
                })
                .await?
        })
    }

    fn update_title(&self, id: ConversationId, title: &str) -> StoreFuture<'_, GraphResult<()>> {
        let title = title.to_string();
        Box::pin(async move {
            let now_ms = now_millis();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        "UPDATE conversations
                         SET title = ?1, updated_at = MAX(?2, updated_at + 1)
                         WHERE id = ?3",
                        rusqlite::params![title, now_ms, id],
                    )?;
                    Ok(changed)
                })
                .await?;
            if changed == 0 {
                return Err(GraphError::ConversationNotFound(id));
            }
            Ok(())
        })
    }

    fn set_active_leaf(
        &self,
        id: ConversationId,
        message_id: MessageId,
    ) -> StoreFuture<'_, GraphResult<()>> {
        Box::pin(async move {
            let now_ms = now_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if let Err(rejection) = member_depth(&tx, id, message_id)? {
                        return Ok(Err(rejection));
                    }
                    tx.execute(
                        "UPDATE conversations
                         SET active_leaf_id = ?1, updated_at = MAX(?2, updated_at + 1)
                         WHERE id = ?3",
                        rusqlite::params![message_id, now_ms, id],
                    )?;
                    tx.commit()?;
                    Ok(Ok(()))
                })
                .await?
        })
    }

    fn delete(&self, id: ConversationId) -> StoreFuture<'_, GraphResult<bool>> {
        Box::pin(async move {
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    purge_conversation_messages(&tx, id)?;
                    let removed = tx.execute(
                        "DELETE FROM conversations WHERE id = ?1",
                        rusqlite::params![id],
                    )?;
                    tx.commit()?;
                    Ok(removed > 0)
                })
                .await?;
            Ok(removed)
        })
    }
}
