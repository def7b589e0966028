//! Core graph types, identifiers, configuration and errors.

pub mod config;
pub mod errors;
pub mod ids;
pub mod kinds;
pub mod models;

pub use config::{ConversationConfig, GraphConfig, ServerConfig, StorageConfig};
pub use errors::{GraphError, GraphResult};
pub use ids::{AccountId, ConversationId, EdgeId, MessageId, SnapshotId, UserId};
pub use kinds::{EdgeType, KindParseError, MessageType};
pub use models::{
    Account, Conversation, ConversationDetail, ConversationGraph, Edge, Message, MessageMetadata,
    NewAccount, NewMessage, Snapshot, User,
};
