//! Persisted records of the conversation graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::core::ids::{
    AccountId, ConversationId, EdgeId, MessageId, SnapshotId, UserId,
};
use crate::graph::core::kinds::{EdgeType, MessageType};

/// Identity record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique id.
    pub id: UserId,
    /// Unique email.
    pub email: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional avatar image reference.
    pub image: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last profile update.
    pub updated_at: DateTime<Utc>,
}

/// Linked OAuth identity of a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Account type (`oauth`, `oidc`, `email`, ...).
    pub account_type: String,
    /// Provider name.
    pub provider: String,
    /// Account id at the provider.
    pub provider_account_id: String,
    /// OAuth refresh token.
    pub refresh_token: Option<String>,
    /// OAuth access token.
    pub access_token: Option<String>,
    /// Access token expiry (Unix seconds).
    pub expires_at: Option<i64>,
    /// Token type.
    pub token_type: Option<String>,
    /// Granted scope.
    pub scope: Option<String>,
    /// OIDC id token.
    pub id_token: Option<String>,
    /// Provider session state.
    pub session_state: Option<String>,
}

/// Stored OAuth account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique id.
    pub id: AccountId,
    /// Owning user.
    pub user_id: UserId,
    /// Provider fields.
    #[serde(flatten)]
    pub details: NewAccount,
}

/// A named container for a message graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique id.
    pub id: ConversationId,
    /// Owner; `None` for anonymous conversations.
    pub user_id: Option<UserId>,
    /// Display title.
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity (new message, branch switch, rename).
    pub updated_at: DateTime<Utc>,
    /// Tip of the active branch.
    pub active_leaf_id: Option<MessageId>,
}

/// Optional payloads attached to a message.
///
/// Used both when appending and when backfilling an existing message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Tool calls requested by the message.
    pub tool_calls: Option<serde_json::Value>,
    /// Tool result carried by the message.
    pub tool_result: Option<serde_json::Value>,
    /// Name of the agent graph node that produced the message.
    pub node_name: Option<String>,
    /// Agent graph step index.
    pub step: Option<i64>,
    /// Opaque agent checkpoint.
    pub checkpoint: Option<serde_json::Value>,
}

impl MessageMetadata {
    /// Whether no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tool_calls.is_none()
            && self.tool_result.is_none()
            && self.node_name.is_none()
            && self.step.is_none()
            && self.checkpoint.is_none()
    }
}

/// A message node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Primary parent; `None` marks a root.
    pub parent_id: Option<MessageId>,
    /// Secondary parents of a merge node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_parent_ids: Vec<MessageId>,
    /// Author kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Text content.
    pub content: Option<String>,
    /// Optional payloads.
    #[serde(flatten)]
    pub metadata: MessageMetadata,
    /// Order among siblings sharing `parent_id`.
    pub branch_index: u32,
    /// Distance from the root.
    pub depth: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message has no parent.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this message joins more than one branch.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        !self.merge_parent_ids.is_empty()
    }
}

/// Input for appending a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Text content.
    pub content: String,
    /// Parent; `None` appends a new root.
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    /// Optional payloads.
    #[serde(flatten)]
    pub metadata: MessageMetadata,
}

impl NewMessage {
    /// Build a message of the given type.
    #[must_use]
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            message_type,
            content: content.into(),
            parent_id: None,
            metadata: MessageMetadata::default(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageType::Human, content)
    }

    /// Build a model reply.
    #[must_use]
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageType::Ai, content)
    }

    /// Set the parent.
    #[must_use]
    pub const fn with_parent(mut self, parent_id: MessageId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Attach payloads.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Relationship record between two messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique id.
    pub id: EdgeId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Source message.
    pub source_id: MessageId,
    /// Target message.
    pub target_id: MessageId,
    /// Relationship kind.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Free-form metadata.
    pub metadata: Option<serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Point-in-time capture used for rewind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique id.
    pub id: SnapshotId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Message the capture belongs to.
    pub message_id: MessageId,
    /// Opaque state blob.
    pub snapshot: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// All messages and edges of one conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationGraph {
    /// Messages ordered by creation time.
    pub messages: Vec<Message>,
    /// Edges ordered by creation time.
    pub edges: Vec<Edge>,
}

/// A conversation joined with its graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    /// The conversation row.
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Messages ordered by creation time.
    pub messages: Vec<Message>,
    /// All edges.
    pub edges: Vec<Edge>,
}
