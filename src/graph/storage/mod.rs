//! Persistent storage for the conversation graph.

pub mod conversation_store;
pub mod database;
pub mod edge_store;
pub mod message_store;
mod rows;
pub mod schema;
pub mod snapshot_store;
pub mod user_store;

pub use conversation_store::{ConversationStore, SqliteConversationStore};
pub use database::{GraphDatabase, StoreFuture};
pub use edge_store::{EdgeStore, SqliteEdgeStore};
pub use message_store::{MessageStore, SqliteMessageStore};
pub use snapshot_store::{SnapshotStore, SqliteSnapshotStore};
pub use user_store::{SqliteUserStore, UserStore};
