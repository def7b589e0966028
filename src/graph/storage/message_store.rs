//! Message nodes of the conversation graph.
//!
//! Every write that creates a node also writes its default edge and advances
//! the conversation's active leaf inside the same transaction, so readers never
//! observe a message without its edge or a cursor pointing at a rolled-back row.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{Connection as SyncConnection, OptionalExtension};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::graph::core::errors::{GraphError, GraphResult};
use crate::graph::core::ids::{ConversationId, MessageId};
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::{Message, MessageMetadata, NewMessage};
use crate::graph::storage::database::{GraphDatabase, StoreFuture};
use crate::graph::storage::edge_store::insert_edge;
use crate::graph::storage::rows::{
    MESSAGE_COLUMNS, json_text, member_depth, merge_parents_text, message_from_row, now_millis,
};

/// Message store trait.
pub trait MessageStore: Send + Sync {
    /// Append a message and make it the active leaf.
    ///
    /// # Errors
    /// Returns an error if the parent is outside the conversation or storage
    /// access fails.
    fn append(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>>;

    /// Append a merge node joining several branches and make it the active leaf.
    ///
    /// The first parent is the primary one; the rest become `merge_parent_ids`
    /// and each gets a `merge` edge.
    ///
    /// # Errors
    /// Returns `InvalidMerge` for fewer than two distinct parents, or an error
    /// if a parent is outside the conversation.
    fn merge(
        &self,
        conversation_id: ConversationId,
        parents: Vec<MessageId>,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>>;

    /// Append an alternate of `sibling_of` under the same parent.
    ///
    /// A `retry` edge links the previous attempt to the new one.
    ///
    /// # Errors
    /// Returns an error if `sibling_of` is outside the conversation.
    fn regenerate(
        &self,
        conversation_id: ConversationId,
        sibling_of: MessageId,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>>;

    /// Get a message by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: MessageId) -> StoreFuture<'_, GraphResult<Option<Message>>>;

    /// All messages of a conversation ordered by creation time.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Vec<Message>>>;

    /// Children of a message ordered by branch index.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn children(&self, parent_id: MessageId) -> StoreFuture<'_, GraphResult<Vec<Message>>>;

    /// Fill in payload fields of an existing message; unset fields are kept.
    ///
    /// # Errors
    /// Returns `MessageNotFound` if no row matches.
    fn update_metadata(
        &self,
        id: MessageId,
        metadata: MessageMetadata,
    ) -> StoreFuture<'_, GraphResult<()>>;

    /// Delete a message with its descendants, edges and snapshots.
    ///
    /// An active leaf inside the removed subtree moves to the deleted
    /// message's parent. Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: MessageId) -> StoreFuture<'_, GraphResult<bool>>;
}

/// Node to insert once placement has been resolved.
struct NodeDraft {
    message: NewMessage,
    parent_id: Option<MessageId>,
    merge_parent_ids: Vec<MessageId>,
}

/// Next free sibling slot under `parent_id` (roots share one slot space).
fn next_branch_index(
    conn: &SyncConnection,
    conversation_id: ConversationId,
    parent_id: Option<MessageId>,
) -> rusqlite::Result<u32> {
    match parent_id {
        Some(parent) => conn.query_row(
            "SELECT COALESCE(MAX(branch_index) + 1, 0) FROM messages WHERE parent_id = ?1",
            rusqlite::params![parent],
            |row| row.get(0),
        ),
        None => conn.query_row(
            "SELECT COALESCE(MAX(branch_index) + 1, 0) FROM messages
             WHERE conversation_id = ?1 AND parent_id IS NULL",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        ),
    }
}

/// Insert a node, its default edge, and advance the active leaf.
///
/// Must run inside a transaction owned by the caller.
fn insert_node(
    conn: &SyncConnection,
    conversation_id: ConversationId,
    draft: NodeDraft,
) -> Result<Result<Message, GraphError>, tokio_rusqlite::Error> {
    let conversation_exists = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !conversation_exists {
        return Ok(Err(GraphError::ConversationNotFound(conversation_id)));
    }

    let depth = match draft.parent_id {
        Some(parent) => match member_depth(conn, conversation_id, parent)? {
            Ok(parent_depth) => parent_depth + 1,
            Err(rejection) => return Ok(Err(rejection)),
        },
        None => 0,
    };
    let branch_index = next_branch_index(conn, conversation_id, draft.parent_id)?;

    let id = MessageId::new();
    let now_ms = now_millis();
    let NewMessage {
        message_type,
        content,
        metadata,
        ..
    } = draft.message;
    let merge_parents = merge_parents_text(&draft.merge_parent_ids)?;
    let tool_calls = json_text(metadata.tool_calls.as_ref())?;
    let tool_result = json_text(metadata.tool_result.as_ref())?;
    let checkpoint = json_text(metadata.checkpoint.as_ref())?;

    conn.execute(
        &format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        rusqlite::params![
            id,
            conversation_id,
            draft.parent_id,
            merge_parents,
            message_type,
            content,
            tool_calls,
            tool_result,
            metadata.node_name,
            metadata.step,
            checkpoint,
            branch_index,
            depth,
            now_ms
        ],
    )?;

    if let Some(parent) = draft.parent_id {
        insert_edge(conn, conversation_id, parent, id, EdgeType::Default, None)?;
    }

    conn.execute(
        "UPDATE conversations
         SET active_leaf_id = ?1, updated_at = MAX(?2, updated_at + 1)
         WHERE id = ?3",
        rusqlite::params![id, now_ms, conversation_id],
    )?;

    let message = conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        rusqlite::params![id],
        message_from_row,
    )?;
    Ok(Ok(message))
}

/// Delete every message of a conversation, deepest level first.
///
/// Each row is removed after its children, so the `parent_id` cascade never
/// nests; `SQLite` caps nested cascades at its trigger depth limit.
pub(crate) fn purge_conversation_messages(
    conn: &SyncConnection,
    conversation_id: ConversationId,
) -> rusqlite::Result<()> {
    let max_depth: Option<u32> = conn.query_row(
        "SELECT MAX(depth) FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )?;
    let Some(max_depth) = max_depth else {
        return Ok(());
    };
    let mut stmt =
        conn.prepare("DELETE FROM messages WHERE conversation_id = ?1 AND depth = ?2")?;
    for depth in (0..=max_depth).rev() {
        stmt.execute(rusqlite::params![conversation_id, depth])?;
    }
    Ok(())
}

/// Delete `root` and its descendants deepest first; returns the removed ids.
fn purge_subtree(conn: &SyncConnection, root: MessageId) -> rusqlite::Result<Vec<MessageId>> {
    let ids = conn
        .prepare(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT ?1
                 UNION
                 SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
             )
             SELECT m.id FROM messages m JOIN subtree s ON m.id = s.id
             ORDER BY m.depth DESC",
        )?
        .query_map(rusqlite::params![root], |row| row.get(0))?
        .collect::<Result<Vec<MessageId>, rusqlite::Error>>()?;

    let mut stmt = conn.prepare("DELETE FROM messages WHERE id = ?1")?;
    for id in &ids {
        stmt.execute(rusqlite::params![id])?;
    }
    Ok(ids)
}

/// Drop removed ids from the `merge_parent_ids` of surviving merge nodes.
fn prune_merge_parents(
    conn: &SyncConnection,
    conversation_id: ConversationId,
    removed: &[MessageId],
) -> Result<(), tokio_rusqlite::Error> {
    let removed: HashSet<MessageId> = removed.iter().copied().collect();
    let merges = conn
        .prepare(
            "SELECT id, merge_parent_ids FROM messages
             WHERE conversation_id = ?1 AND merge_parent_ids IS NOT NULL",
        )?
        .query_map(rusqlite::params![conversation_id], |row| {
            Ok((row.get::<_, MessageId>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;

    for (id, text) in merges {
        let parents: Vec<MessageId> = serde_json::from_str(&text)
            .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))?;
        if !parents.iter().any(|p| removed.contains(p)) {
            continue;
        }
        let kept: Vec<MessageId> = parents.into_iter().filter(|p| !removed.contains(p)).collect();
        conn.execute(
            "UPDATE messages SET merge_parent_ids = ?1 WHERE id = ?2",
            rusqlite::params![merge_parents_text(&kept)?, id],
        )?;
    }
    Ok(())
}

/// `SQLite` implementation of the message store.
pub struct SqliteMessageStore {
    conn: Arc<Connection>,
}

impl SqliteMessageStore {
    /// Build the store on a shared database.
    #[must_use]
    pub fn new(db: &GraphDatabase) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>> {
        Box::pin(async move {
            let draft = NodeDraft {
                parent_id: message.parent_id,
                merge_parent_ids: Vec::new(),
                message,
            };
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let inserted = insert_node(&tx, conversation_id, draft)?;
                    if inserted.is_ok() {
                        tx.commit()?;
                    }
                    Ok(inserted)
                })
                .await?
        })
    }

    fn merge(
        &self,
        conversation_id: ConversationId,
        parents: Vec<MessageId>,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>> {
        Box::pin(async move {
            let mut seen = HashSet::new();
            let parents: Vec<MessageId> =
                parents.into_iter().filter(|id| seen.insert(*id)).collect();
            let Some((&primary, secondary)) = parents.split_first() else {
                return Err(GraphError::InvalidMerge("no parents given".to_string()));
            };
            if secondary.is_empty() {
                return Err(GraphError::InvalidMerge(
                    "a merge needs at least two distinct parents".to_string(),
                ));
            }
            let secondary = secondary.to_vec();

            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    for parent in &secondary {
                        if let Err(rejection) = member_depth(&tx, conversation_id, *parent)? {
                            return Ok(Err(rejection));
                        }
                    }
                    let draft = NodeDraft {
                        message,
                        parent_id: Some(primary),
                        merge_parent_ids: secondary.clone(),
                    };
                    let merged = match insert_node(&tx, conversation_id, draft)? {
                        Ok(merged) => merged,
                        Err(rejection) => return Ok(Err(rejection)),
                    };
                    for parent in secondary {
                        insert_edge(&tx, conversation_id, parent, merged.id, EdgeType::Merge, None)?;
                    }
                    tx.commit()?;
                    Ok(Ok(merged))
                })
                .await?
        })
    }

    fn regenerate(
        &self,
        conversation_id: ConversationId,
        sibling_of: MessageId,
        message: NewMessage,
    ) -> StoreFuture<'_, GraphResult<Message>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if let Err(rejection) = member_depth(&tx, conversation_id, sibling_of)? {
                        return Ok(Err(rejection));
                    }
                    let parent_id: Option<MessageId> = tx.query_row(
                        "SELECT parent_id FROM messages WHERE id = ?1",
                        rusqlite::params![sibling_of],
                        |row| row.get(0),
                    )?;
                    let draft = NodeDraft {
                        message,
                        parent_id,
                        merge_parent_ids: Vec::new(),
                    };
                    let retried = match insert_node(&tx, conversation_id, draft)? {
                        Ok(retried) => retried,
                        Err(rejection) => return Ok(Err(rejection)),
                    };
                    insert_edge(&tx, conversation_id, sibling_of, retried.id, EdgeType::Retry, None)?;
                    tx.commit()?;
                    Ok(Ok(retried))
                })
                .await?
        })
    }

    fn get(&self, id: MessageId) -> StoreFuture<'_, GraphResult<Option<Message>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                            rusqlite::params![id],
                            message_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, GraphResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS}
                         FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at, rowid"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], message_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            debug!("Loaded {} messages for {}", rows.len(), conversation_id);
            Ok(rows)
        })
    }

    fn children(&self, parent_id: MessageId) -> StoreFuture<'_, GraphResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS}
                         FROM messages
                         WHERE parent_id = ?1
                         ORDER BY branch_index, rowid"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![parent_id], message_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn update_metadata(
        &self,
        id: MessageId,
        metadata: MessageMetadata,
    ) -> StoreFuture<'_, GraphResult<()>> {
        Box::pin(async move {
            let changed = self
                .conn
                .call(move |conn| {
                    let tool_calls = json_text(metadata.tool_calls.as_ref())?;
                    let tool_result = json_text(metadata.tool_result.as_ref())?;
                    let checkpoint = json_text(metadata.checkpoint.as_ref())?;
                    let changed = conn.execute(
                        "UPDATE messages
                         SET tool_calls = COALESCE(?1, tool_calls),
                             tool_result = COALESCE(?2, tool_result),
                             node_name = COALESCE(?3, node_name),
                             step = COALESCE(?4, step),
                             checkpoint = COALESCE(?5, checkpoint)
                         WHERE id = ?6",
                        rusqlite::params![
                            tool_calls,
                            tool_result,
                            metadata.node_name,
                            metadata.step,
                            checkpoint,
                            id
                        ],
                    )?;
                    Ok(changed)
                })
                .await?;
            if changed == 0 {
                return Err(GraphError::MessageNotFound(id));
            }
            Ok(())
        })
    }

    fn delete(&self, id: MessageId) -> StoreFuture<'_, GraphResult<bool>> {
        Box::pin(async move {
            let now_ms = now_millis();
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let placement: Option<(ConversationId, Option<MessageId>)> = tx
                        .query_row(
                            "SELECT conversation_id, parent_id FROM messages WHERE id = ?1",
                            rusqlite::params![id],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    let Some((conversation_id, parent_id)) = placement else {
                        return Ok(false);
                    };

                    tx.execute(
                        "WITH RECURSIVE subtree(id) AS (
                             SELECT ?1
                             UNION
                             SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
                         )
                         UPDATE conversations
                         SET active_leaf_id = ?2, updated_at = MAX(?3, updated_at + 1)
                         WHERE id = ?4 AND active_leaf_id IN (SELECT id FROM subtree)",
                        rusqlite::params![id, parent_id, now_ms, conversation_id],
                    )?;
                    let removed = purge_subtree(&tx, id)?;
                    prune_merge_parents(&tx, conversation_id, &removed)?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;
            Ok(removed)
        })
    }
}
