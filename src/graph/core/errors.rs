//! Error types for the conversation graph store.

use thiserror::Error;

use crate::graph::core::ids::{ConversationId, MessageId, UserId};

/// Conversation graph error type.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A record failed validation before reaching storage.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// The user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    /// The conversation does not exist.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    /// The message does not exist.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
    /// The message exists but belongs to another conversation.
    #[error("message {message} does not belong to conversation {conversation}")]
    MessageNotInConversation {
        /// Conversation the caller targeted.
        conversation: ConversationId,
        /// Offending message.
        message: MessageId,
    },
    /// A merge request that cannot produce a merge node.
    #[error("invalid merge: {0}")]
    InvalidMerge(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Whether the error means the addressed record is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_) | Self::ConversationNotFound(_) | Self::MessageNotFound(_)
        )
    }

    /// Whether the error was caused by caller input rather than storage.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidRecord(_)
                | Self::MessageNotInConversation { .. }
                | Self::InvalidMerge(_)
        )
    }
}

/// Convenience result alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
