//! Row decoding shared by the `SQLite` stores.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::graph::core::errors::GraphError;
use crate::graph::core::ids::{ConversationId, MessageId};
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::{
    Conversation, Edge, Message, MessageMetadata, Snapshot, User,
};

pub(crate) const USER_COLUMNS: &str = "id, email, name, image, created_at, updated_at";

pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, user_id, title, created_at, updated_at, active_leaf_id";

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, parent_id, merge_parent_ids, type, \
     content, tool_calls, tool_result, node_name, step, checkpoint, branch_index, depth, created_at";

pub(crate) const EDGE_COLUMNS: &str =
    "id, conversation_id, source_id, target_id, type, metadata, created_at";

pub(crate) const SNAPSHOT_COLUMNS: &str = "id, conversation_id, message_id, snapshot, created_at";

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct InvalidTimestamp(i64);

impl std::fmt::Display for InvalidTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid timestamp: {}", self.0)
    }
}

impl std::error::Error for InvalidTimestamp {}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(InvalidTimestamp(millis)),
        )
    })
}

fn json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

/// Encode an optional JSON payload as TEXT.
pub(crate) fn json_text(
    value: Option<&serde_json::Value>,
) -> Result<Option<String>, tokio_rusqlite::Error> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))
}

/// Encode merge parents; an empty list is stored as NULL.
pub(crate) fn merge_parents_text(ids: &[MessageId]) -> Result<Option<String>, tokio_rusqlite::Error> {
    if ids.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(ids)
        .map(Some)
        .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))
}

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        image: row.get(3)?,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
    })
}

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: timestamp(row, 3)?,
        updated_at: timestamp(row, 4)?,
        active_leaf_id: row.get(5)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let merge_parent_ids = match row.get::<_, Option<String>>(3)? {
        Some(text) => serde_json::from_str(&text).map_err(|e| conversion_error(3, e))?,
        None => Vec::new(),
    };

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        parent_id: row.get(2)?,
        merge_parent_ids,
        message_type: row.get(4)?,
        content: row.get(5)?,
        metadata: MessageMetadata {
            tool_calls: json(row, 6)?,
            tool_result: json(row, 7)?,
            node_name: row.get(8)?,
            step: row.get(9)?,
            checkpoint: json(row, 10)?,
        },
        branch_index: row.get(11)?,
        depth: row.get(12)?,
        created_at: timestamp(row, 13)?,
    })
}

pub(crate) fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
        edge_type: row.get::<_, Option<EdgeType>>(4)?.unwrap_or_default(),
        metadata: json(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

pub(crate) fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_id: row.get(2)?,
        snapshot: json(row, 3)?.unwrap_or(serde_json::Value::Null),
        created_at: timestamp(row, 4)?,
    })
}

/// Owning conversation and depth of a message, if it exists.
pub(crate) fn message_placement(
    conn: &Connection,
    message_id: MessageId,
) -> rusqlite::Result<Option<(ConversationId, u32)>> {
    conn.query_row(
        "SELECT conversation_id, depth FROM messages WHERE id = ?1",
        rusqlite::params![message_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Depth of `message_id` once it is known to belong to `conversation_id`.
///
/// The outer result carries storage failures, the inner one the rejection.
pub(crate) fn member_depth(
    conn: &Connection,
    conversation_id: ConversationId,
    message_id: MessageId,
) -> rusqlite::Result<Result<u32, GraphError>> {
    Ok(match message_placement(conn, message_id)? {
        None => Err(GraphError::MessageNotFound(message_id)),
        Some((owner, _)) if owner != conversation_id => Err(GraphError::MessageNotInConversation {
            conversation: conversation_id,
            message: message_id,
        }),
        Some((_, depth)) => Ok(depth),
    })
}
