//! Conversation graph engine orchestration.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::graph::core::config::GraphConfig;
use crate::graph::core::errors::{GraphError, GraphResult};
use crate::graph::core::ids::{ConversationId, MessageId, UserId};
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::{
    Account, Conversation, ConversationDetail, ConversationGraph, Edge, Message, MessageMetadata,
    NewAccount, NewMessage, Snapshot, User,
};
use crate::graph::storage::conversation_store::{ConversationStore, SqliteConversationStore};
use crate::graph::storage::database::GraphDatabase;
use crate::graph::storage::edge_store::{EdgeStore, SqliteEdgeStore};
use crate::graph::storage::message_store::{MessageStore, SqliteMessageStore};
use crate::graph::storage::snapshot_store::{SnapshotStore, SqliteSnapshotStore};
use crate::graph::storage::user_store::{SqliteUserStore, UserStore};
use crate::graph::traversal::path::{InvariantViolation, MessageGraph, PathStop};

/// Backend dependencies for the graph engine.
pub struct GraphBackends {
    /// Conversation store implementation.
    pub conversation_store: Arc<dyn ConversationStore>,
    /// Message store implementation.
    pub message_store: Arc<dyn MessageStore>,
    /// Edge store implementation.
    pub edge_store: Arc<dyn EdgeStore>,
    /// Snapshot store implementation.
    pub snapshot_store: Arc<dyn SnapshotStore>,
    /// User store implementation.
    pub user_store: Arc<dyn UserStore>,
}

impl GraphBackends {
    /// Build `SQLite` backends sharing one database.
    #[must_use]
    pub fn sqlite(db: &GraphDatabase) -> Self {
        Self {
            conversation_store: Arc::new(SqliteConversationStore::new(db)),
            message_store: Arc::new(SqliteMessageStore::new(db)),
            edge_store: Arc::new(SqliteEdgeStore::new(db)),
            snapshot_store: Arc::new(SqliteSnapshotStore::new(db)),
            user_store: Arc::new(SqliteUserStore::new(db)),
        }
    }
}

/// Conversation graph engine: CRUD over the graph plus path reconstruction.
pub struct GraphEngine {
    config: GraphConfig,
    conversation_store: Arc<dyn ConversationStore>,
    message_store: Arc<dyn MessageStore>,
    edge_store: Arc<dyn EdgeStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    user_store: Arc<dyn UserStore>,
}

impl GraphEngine {
    /// Create a new engine.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: GraphConfig, backends: GraphBackends) -> GraphResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            conversation_store: backends.conversation_store,
            message_store: backends.message_store,
            edge_store: backends.edge_store,
            snapshot_store: backends.snapshot_store,
            user_store: backends.user_store,
        })
    }

    /// Open the configured `SQLite` database and build an engine on it.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn from_config(config: GraphConfig) -> GraphResult<Self> {
        config.validate()?;
        let db = GraphDatabase::open(&config.storage).await?;
        Self::new(config, GraphBackends::sqlite(&db))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &GraphConfig {
        &self.config
    }

    // ---- conversations -------------------------------------------------

    /// A user's conversations, most recently updated first, one page long.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list_conversations(&self, user_id: UserId) -> GraphResult<Vec<Conversation>> {
        let rows = self
            .conversation_store
            .list_for_user(user_id, self.config.conversations.page_size)
            .await?;
        debug!("Listed {} conversations for {}", rows.len(), user_id);
        Ok(rows)
    }

    /// Conversation with its messages and edges.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> GraphResult<Option<ConversationDetail>> {
        self.conversation_store.load_detail(id).await
    }

    /// Create a conversation; a missing or blank title uses the default.
    ///
    /// # Errors
    /// Returns an error if the owner does not exist or storage access fails.
    pub async fn create_conversation(
        &self,
        user_id: Option<UserId>,
        title: Option<&str>,
    ) -> GraphResult<Conversation> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.config.conversations.default_title)
            .to_string();
        let conversation = self.conversation_store.create(user_id, title).await?;
        info!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Rename a conversation and return the updated row.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` if the conversation does not exist.
    pub async fn update_conversation_title(
        &self,
        id: ConversationId,
        title: &str,
    ) -> GraphResult<Conversation> {
        self.conversation_store.update_title(id, title).await?;
        self.conversation_store
            .get(id)
            .await?
            .ok_or(GraphError::ConversationNotFound(id))
    }

    /// Delete a conversation with its messages, edges and snapshots.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn delete_conversation(&self, id: ConversationId) -> GraphResult<bool> {
        let removed = self.conversation_store.delete(id).await?;
        if removed {
            info!("Deleted conversation {}", id);
        }
        Ok(removed)
    }

    // ---- paths and branches --------------------------------------------

    /// Messages from a root to `leaf`, or to the active leaf when `leaf` is
    /// `None`.
    ///
    /// Without any leaf the conversation's root set is returned. A leaf that
    /// is not part of the conversation yields an empty path, and a parent
    /// pointer that does not resolve ends the walk early.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_message_path(
        &self,
        conversation_id: ConversationId,
        leaf: Option<MessageId>,
    ) -> GraphResult<Vec<Message>> {
        let Some(detail) = self.conversation_store.load_detail(conversation_id).await? else {
            debug!("Path requested for unknown conversation {}", conversation_id);
            return Ok(Vec::new());
        };
        let leaf = leaf.or(detail.conversation.active_leaf_id);
        let graph = MessageGraph::new(detail.messages, detail.edges);

        let Some(leaf) = leaf else {
            return Ok(graph.roots().into_iter().cloned().collect());
        };

        let path = graph.path_to(leaf);
        match path.stop {
            PathStop::Root => {}
            PathStop::UnknownLeaf => {
                debug!("Leaf {} is not part of conversation {}", leaf, conversation_id);
            }
            PathStop::MissingParent(parent) => {
                warn!(
                    "Path to {} truncated: parent {} missing from conversation {}",
                    leaf, parent, conversation_id
                );
            }
            PathStop::Cycle(at) => {
                warn!(
                    "Path to {} truncated: parent chain revisits {} in conversation {}",
                    leaf, at, conversation_id
                );
            }
        }
        Ok(path.to_messages())
    }

    /// Append a message and make it the active leaf.
    ///
    /// # Errors
    /// Returns an error if the conversation does not exist, the parent is not
    /// one of its messages, or storage access fails.
    pub async fn add_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> GraphResult<Message> {
        let message = self.message_store.append(conversation_id, message).await?;
        debug!(
            "Appended {} message {} at depth {} to {}",
            message.message_type, message.id, message.depth, conversation_id
        );
        Ok(message)
    }

    /// Make `message_id` the active leaf without touching any message.
    ///
    /// # Errors
    /// Returns an error if the message is not part of the conversation.
    pub async fn switch_branch(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> GraphResult<()> {
        self.conversation_store
            .set_active_leaf(conversation_id, message_id)
            .await?;
        debug!("Active leaf of {} is now {}", conversation_id, message_id);
        Ok(())
    }

    /// Children of a message ordered by branch index.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_branches(&self, message_id: MessageId) -> GraphResult<Vec<Message>> {
        self.message_store.children(message_id).await
    }

    /// Get a single message.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_message(&self, message_id: MessageId) -> GraphResult<Option<Message>> {
        self.message_store.get(message_id).await
    }

    /// Join several branches under a new merge node.
    ///
    /// # Errors
    /// Returns `InvalidMerge` for fewer than two distinct parents, or an error
    /// if a parent is not part of the conversation.
    pub async fn merge_branches(
        &self,
        conversation_id: ConversationId,
        parents: Vec<MessageId>,
        message: NewMessage,
    ) -> GraphResult<Message> {
        let merged = self
            .message_store
            .merge(conversation_id, parents, message)
            .await?;
        info!(
            "Merged {} branches into {} in {}",
            merged.merge_parent_ids.len() + 1,
            merged.id,
            conversation_id
        );
        Ok(merged)
    }

    /// Add an alternate of `sibling_of` under the same parent.
    ///
    /// # Errors
    /// Returns an error if `sibling_of` is not part of the conversation.
    pub async fn regenerate(
        &self,
        conversation_id: ConversationId,
        sibling_of: MessageId,
        message: NewMessage,
    ) -> GraphResult<Message> {
        let retried = self
            .message_store
            .regenerate(conversation_id, sibling_of, message)
            .await?;
        debug!(
            "Regenerated {} as branch {} ({})",
            sibling_of, retried.branch_index, retried.id
        );
        Ok(retried)
    }

    /// Fill in tool data, node name, step or checkpoint of a stored message.
    ///
    /// # Errors
    /// Returns `MessageNotFound` if the message does not exist.
    pub async fn update_message_metadata(
        &self,
        message_id: MessageId,
        metadata: MessageMetadata,
    ) -> GraphResult<()> {
        if metadata.is_empty() {
            return Ok(());
        }
        self.message_store.update_metadata(message_id, metadata).await
    }

    /// Delete a message and its descendants.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn delete_message(&self, message_id: MessageId) -> GraphResult<bool> {
        let removed = self.message_store.delete(message_id).await?;
        if removed {
            info!("Deleted message {} with its descendants", message_id);
        }
        Ok(removed)
    }

    // ---- edges, graph and snapshots ------------------------------------

    /// Record a `default` edge between two messages.
    ///
    /// # Errors
    /// Returns an error if either endpoint is not part of the conversation.
    pub async fn add_edge(
        &self,
        conversation_id: ConversationId,
        source_id: MessageId,
        target_id: MessageId,
    ) -> GraphResult<Edge> {
        self.add_typed_edge(conversation_id, source_id, target_id, EdgeType::Default, None)
            .await
    }

    /// Record an edge of any kind with optional metadata.
    ///
    /// # Errors
    /// Returns an error if either endpoint is not part of the conversation.
    pub async fn add_typed_edge(
        &self,
        conversation_id: ConversationId,
        source_id: MessageId,
        target_id: MessageId,
        edge_type: EdgeType,
        metadata: Option<serde_json::Value>,
    ) -> GraphResult<Edge> {
        let edge = self
            .edge_store
            .add(conversation_id, source_id, target_id, edge_type, metadata)
            .await?;
        debug!(
            "Added {} edge {} -> {} in {}",
            edge.edge_type, source_id, target_id, conversation_id
        );
        Ok(edge)
    }

    /// All messages and edges of a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_conversation_graph(
        &self,
        conversation_id: ConversationId,
    ) -> GraphResult<ConversationGraph> {
        let (messages, edges) = tokio::try_join!(
            self.message_store.list_for_conversation(conversation_id),
            self.edge_store.list_for_conversation(conversation_id),
        )?;
        Ok(ConversationGraph { messages, edges })
    }

    /// Structural problems in a stored conversation graph.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn check_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> GraphResult<Vec<InvariantViolation>> {
        let graph = MessageGraph::from(self.get_conversation_graph(conversation_id).await?);
        let violations = graph.check_invariants();
        if !violations.is_empty() {
            warn!(
                "Conversation {} has {} structural violations",
                conversation_id,
                violations.len()
            );
        }
        Ok(violations)
    }

    /// Capture a snapshot for a message.
    ///
    /// # Errors
    /// Returns an error if the message is not part of the conversation.
    pub async fn create_snapshot(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        snapshot: serde_json::Value,
    ) -> GraphResult<Snapshot> {
        let snapshot = self
            .snapshot_store
            .create(conversation_id, message_id, snapshot)
            .await?;
        debug!("Snapshot {} taken at {}", snapshot.id, message_id);
        Ok(snapshot)
    }

    /// Snapshots of a conversation, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_snapshots(&self, conversation_id: ConversationId) -> GraphResult<Vec<Snapshot>> {
        self.snapshot_store.list(conversation_id).await
    }

    /// Most recent snapshot of a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn latest_snapshot(
        &self,
        conversation_id: ConversationId,
    ) -> GraphResult<Option<Snapshot>> {
        self.snapshot_store.latest(conversation_id).await
    }

    // ---- users ---------------------------------------------------------

    /// Register a user.
    ///
    /// # Errors
    /// Returns an error if the email is blank, already taken, or storage
    /// access fails.
    pub async fn create_user(
        &self,
        email: &str,
        name: Option<String>,
        image: Option<String>,
    ) -> GraphResult<User> {
        if email.trim().is_empty() {
            return Err(GraphError::InvalidRecord("email must not be empty".to_string()));
        }
        let user = self.user_store.create(email, name, image).await?;
        info!("Created user {}", user.id);
        Ok(user)
    }

    /// Get a user by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_user(&self, id: UserId) -> GraphResult<Option<User>> {
        self.user_store.get(id).await
    }

    /// Get a user by email.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_user_by_email(&self, email: &str) -> GraphResult<Option<User>> {
        self.user_store.get_by_email(email).await
    }

    /// Replace a user's display name and avatar.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn update_user_profile(
        &self,
        id: UserId,
        name: Option<String>,
        image: Option<String>,
    ) -> GraphResult<Option<User>> {
        self.user_store.update_profile(id, name, image).await
    }

    /// Delete a user with their accounts and conversations.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn delete_user(&self, id: UserId) -> GraphResult<bool> {
        let removed = self.user_store.delete(id).await?;
        if removed {
            info!("Deleted user {}", id);
        }
        Ok(removed)
    }

    /// Link an OAuth account to a user.
    ///
    /// # Errors
    /// Returns an error if the user does not exist or the provider account is
    /// already linked.
    pub async fn link_account(&self, user_id: UserId, account: NewAccount) -> GraphResult<Account> {
        let account = self.user_store.link_account(user_id, account).await?;
        debug!("Linked {} account to {}", account.details.provider, user_id);
        Ok(account)
    }

    /// Accounts linked to a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list_accounts(&self, user_id: UserId) -> GraphResult<Vec<Account>> {
        self.user_store.accounts(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::core::kinds::MessageType;
    use serde_json::json;

    async fn engine() -> GraphEngine {
        let db = GraphDatabase::open_in_memory().await.unwrap();
        GraphEngine::new(GraphConfig::default(), GraphBackends::sqlite(&db)).unwrap()
    }

    async fn active_leaf(engine: &GraphEngine, id: ConversationId) -> Option<MessageId> {
        engine
            .get_conversation(id)
            .await
            .unwrap()
            .unwrap()
            .conversation
            .active_leaf_id
    }

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn test_append_and_linear_path() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        assert_eq!(c.title.as_deref(), Some("New Conversation"));

        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();

        assert_eq!(m1.message_type, MessageType::Human);
        assert_eq!(m2.content.as_deref(), Some("hello"));
        assert_eq!(active_leaf(&engine, c.id).await, Some(m2.id));

        let path = engine.get_message_path(c.id, Some(m2.id)).await.unwrap();
        assert_eq!(ids(&path), vec![m1.id, m2.id]);
    }

    #[tokio::test]
    async fn test_branch_switch_and_children_order() {
        let engine = engine().await;
        let c = engine.create_conversation(None, Some("Branches")).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine
            .add_message(c.id, NewMessage::ai("first").with_parent(m1.id))
            .await
            .unwrap();
        let m3 = engine
            .add_message(c.id, NewMessage::ai("second").with_parent(m1.id))
            .await
            .unwrap();
        assert_eq!((m2.branch_index, m3.branch_index), (0, 1));

        engine.switch_branch(c.id, m3.id).await.unwrap();
        let path = engine.get_message_path(c.id, None).await.unwrap();
        assert_eq!(ids(&path), vec![m1.id, m3.id]);

        let children = engine.get_branches(m1.id).await.unwrap();
        assert_eq!(ids(&children), vec![m2.id, m3.id]);
    }

    #[tokio::test]
    async fn test_unknown_leaf_returns_empty_path() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();

        let path = engine
            .get_message_path(c.id, Some(MessageId::new()))
            .await
            .unwrap();
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_leaf_from_other_conversation_is_unknown() {
        let engine = engine().await;
        let a = engine.create_conversation(None, None).await.unwrap();
        let b = engine.create_conversation(None, None).await.unwrap();
        let foreign = engine.add_message(b.id, NewMessage::human("b")).await.unwrap();
        engine.add_message(a.id, NewMessage::human("a")).await.unwrap();

        let path = engine.get_message_path(a.id, Some(foreign.id)).await.unwrap();
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_no_leaf_returns_root_set() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        assert!(engine.get_message_path(c.id, None).await.unwrap().is_empty());
        assert!(engine
            .get_message_path(ConversationId::new(), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_multiple_roots_share_sibling_slots() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let r1 = engine.add_message(c.id, NewMessage::human("one")).await.unwrap();
        let r2 = engine.add_message(c.id, NewMessage::human("two")).await.unwrap();

        assert_eq!((r1.depth, r2.depth), (0, 0));
        assert_eq!((r1.branch_index, r2.branch_index), (0, 1));

        let r3 = engine.add_message(c.id, NewMessage::human("three")).await.unwrap();
        assert!(engine.delete_message(r3.id).await.unwrap());
        assert!(active_leaf(&engine, c.id).await.is_none());

        let path = engine.get_message_path(c.id, None).await.unwrap();
        assert_eq!(ids(&path), vec![r1.id, r2.id]);
    }

    #[tokio::test]
    async fn test_append_bumps_updated_at() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let after_first = engine.get_conversation(c.id).await.unwrap().unwrap();
        assert!(after_first.conversation.updated_at > c.updated_at);

        engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();
        let after_second = engine.get_conversation(c.id).await.unwrap().unwrap();
        assert!(after_second.conversation.updated_at > after_first.conversation.updated_at);
    }

    #[tokio::test]
    async fn test_switch_branch_leaves_messages_untouched() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();
        let before = engine.get_conversation_graph(c.id).await.unwrap();

        engine.switch_branch(c.id, m1.id).await.unwrap();

        let after = engine.get_conversation_graph(c.id).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(active_leaf(&engine, c.id).await, Some(m1.id));
    }

    #[tokio::test]
    async fn test_switch_branch_rejects_foreign_message() {
        let engine = engine().await;
        let a = engine.create_conversation(None, None).await.unwrap();
        let b = engine.create_conversation(None, None).await.unwrap();
        let foreign = engine.add_message(b.id, NewMessage::human("b")).await.unwrap();

        let err = engine.switch_branch(a.id, foreign.id).await.unwrap_err();
        assert!(err.is_invalid_input());
        assert!(active_leaf(&engine, a.id).await.is_none());
    }

    #[tokio::test]
    async fn test_add_message_validates_parent_and_conversation() {
        let engine = engine().await;
        let a = engine.create_conversation(None, None).await.unwrap();
        let b = engine.create_conversation(None, None).await.unwrap();
        let foreign = engine.add_message(b.id, NewMessage::human("b")).await.unwrap();

        let err = engine
            .add_message(a.id, NewMessage::ai("x").with_parent(foreign.id))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::MessageNotInConversation { .. }));

        let err = engine
            .add_message(ConversationId::new(), NewMessage::human("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ConversationNotFound(_)));

        let graph = engine.get_conversation_graph(a.id).await.unwrap();
        assert!(graph.messages.is_empty());
    }

    #[tokio::test]
    async fn test_path_length_tracks_depth() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let mut parent: Option<MessageId> = None;
        let mut last = None;
        for turn in 0..6 {
            let mut message = NewMessage::human(format!("turn {turn}"));
            if let Some(p) = parent {
                message = message.with_parent(p);
            }
            let stored = engine.add_message(c.id, message).await.unwrap();
            parent = Some(stored.id);
            last = Some(stored);
        }
        let leaf = last.unwrap();

        let path = engine.get_message_path(c.id, Some(leaf.id)).await.unwrap();
        assert_eq!(path.len() as u32, leaf.depth + 1);
        assert!(path[0].is_root());
        for pair in path.windows(2) {
            assert_eq!(pair[1].depth, pair[0].depth + 1);
            assert_eq!(pair[1].parent_id, Some(pair[0].id));
        }
        assert!(engine.check_conversation(c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();
        engine
            .create_snapshot(c.id, m2.id, json!({"step": 1}))
            .await
            .unwrap();

        assert!(engine.delete_conversation(c.id).await.unwrap());

        assert!(engine.get_conversation(c.id).await.unwrap().is_none());
        assert_eq!(
            engine.get_conversation_graph(c.id).await.unwrap(),
            ConversationGraph::default()
        );
        assert!(engine.get_snapshots(c.id).await.unwrap().is_empty());
        assert!(engine.get_message(m1.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_message_removes_subtree_and_moves_leaf() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();
        let m3 = engine
            .add_message(c.id, NewMessage::human("more").with_parent(m2.id))
            .await
            .unwrap();
        let side = engine
            .add_message(c.id, NewMessage::ai("alt").with_parent(m1.id))
            .await
            .unwrap();
        engine.switch_branch(c.id, m3.id).await.unwrap();

        assert!(engine.delete_message(m2.id).await.unwrap());
        assert!(!engine.delete_message(m2.id).await.unwrap());

        let graph = engine.get_conversation_graph(c.id).await.unwrap();
        assert_eq!(ids(&graph.messages), vec![m1.id, side.id]);
        assert!(graph
            .edges
            .iter()
            .all(|e| e.source_id != m2.id && e.target_id != m2.id && e.target_id != m3.id));
        assert_eq!(active_leaf(&engine, c.id).await, Some(m1.id));
    }

    #[tokio::test]
    async fn test_append_writes_default_edge() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine
            .add_message(c.id, NewMessage::ai("hello").with_parent(m1.id))
            .await
            .unwrap();

        let graph = engine.get_conversation_graph(c.id).await.unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].edge_type, EdgeType::Default);
        assert_eq!((graph.edges[0].source_id, graph.edges[0].target_id), (m1.id, m2.id));
    }

    #[tokio::test]
    async fn test_typed_edges_and_validation() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m1 = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let m2 = engine.add_message(c.id, NewMessage::human("again")).await.unwrap();

        let edge = engine
            .add_typed_edge(c.id, m1.id, m2.id, EdgeType::Branch, Some(json!({"why": "fork"})))
            .await
            .unwrap();
        assert_eq!(edge.edge_type, EdgeType::Branch);
        assert_eq!(edge.metadata, Some(json!({"why": "fork"})));

        let plain = engine.add_edge(c.id, m2.id, m1.id).await.unwrap();
        assert_eq!(plain.edge_type, EdgeType::Default);

        let err = engine
            .add_edge(c.id, m1.id, MessageId::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_merge_branches() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let root = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let left = engine
            .add_message(c.id, NewMessage::ai("left").with_parent(root.id))
            .await
            .unwrap();
        let right = engine
            .add_message(c.id, NewMessage::ai("right").with_parent(root.id))
            .await
            .unwrap();

        let merged = engine
            .merge_branches(c.id, vec![left.id, right.id, left.id], NewMessage::ai("both"))
            .await
            .unwrap();
        assert_eq!(merged.parent_id, Some(left.id));
        assert_eq!(merged.merge_parent_ids, vec![right.id]);
        assert_eq!(merged.depth, 2);
        assert!(merged.is_merge());
        assert_eq!(active_leaf(&engine, c.id).await, Some(merged.id));

        let graph = engine.get_conversation_graph(c.id).await.unwrap();
        assert!(graph.edges.iter().any(|e| e.edge_type == EdgeType::Merge
            && e.source_id == right.id
            && e.target_id == merged.id));
        assert!(engine.check_conversation(c.id).await.unwrap().is_empty());

        let err = engine
            .merge_branches(c.id, vec![left.id, left.id], NewMessage::ai("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidMerge(_)));
    }

    #[tokio::test]
    async fn test_regenerate_adds_sibling_with_retry_edge() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let question = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();
        let first = engine
            .add_message(c.id, NewMessage::ai("v1").with_parent(question.id))
            .await
            .unwrap();

        let second = engine
            .regenerate(c.id, first.id, NewMessage::ai("v2"))
            .await
            .unwrap();
        assert_eq!(second.parent_id, Some(question.id));
        assert_eq!(second.branch_index, 1);

        let targets = MessageGraph::from(engine.get_conversation_graph(c.id).await.unwrap())
            .edge_targets(first.id);
        assert_eq!(targets, vec![(EdgeType::Retry, second.id)]);

        let path = engine.get_message_path(c.id, None).await.unwrap();
        assert_eq!(ids(&path), vec![question.id, second.id]);
    }

    #[tokio::test]
    async fn test_metadata_backfill() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m = engine
            .add_message(c.id, NewMessage::new(MessageType::Tool, "result"))
            .await
            .unwrap();

        let metadata = MessageMetadata {
            tool_result: Some(json!({"ok": true})),
            node_name: Some("search".to_string()),
            step: Some(3),
            ..MessageMetadata::default()
        };
        engine.update_message_metadata(m.id, metadata).await.unwrap();
        engine
            .update_message_metadata(
                m.id,
                MessageMetadata {
                    checkpoint: Some(json!("cp-1")),
                    ..MessageMetadata::default()
                },
            )
            .await
            .unwrap();

        let stored = engine.get_message(m.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata.node_name.as_deref(), Some("search"));
        assert_eq!(stored.metadata.step, Some(3));
        assert_eq!(stored.metadata.checkpoint, Some(json!("cp-1")));

        let err = engine
            .update_message_metadata(
                MessageId::new(),
                MessageMetadata {
                    step: Some(1),
                    ..MessageMetadata::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_snapshots_newest_first() {
        let engine = engine().await;
        let c = engine.create_conversation(None, None).await.unwrap();
        let m = engine.add_message(c.id, NewMessage::human("hi")).await.unwrap();

        let first = engine.create_snapshot(c.id, m.id, json!({"n": 1})).await.unwrap();
        let second = engine.create_snapshot(c.id, m.id, json!({"n": 2})).await.unwrap();

        let listed = engine.get_snapshots(c.id).await.unwrap();
        assert_eq!(
            listed.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(engine.latest_snapshot(c.id).await.unwrap(), Some(second));

        let other = engine.create_conversation(None, None).await.unwrap();
        let err = engine
            .create_snapshot(other.id, m.id, json!(null))
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_user_conversations_are_paged_and_ordered() {
        let db = GraphDatabase::open_in_memory().await.unwrap();
        let mut config = GraphConfig::default();
        config.conversations.page_size = 2;
        let engine = GraphEngine::new(config, GraphBackends::sqlite(&db)).unwrap();

        let user = engine.create_user("ada@example.com", None, None).await.unwrap();
        let first = engine.create_conversation(Some(user.id), Some("a")).await.unwrap();
        let second = engine.create_conversation(Some(user.id), Some("b")).await.unwrap();
        engine.create_conversation(Some(user.id), Some("c")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        engine.update_conversation_title(first.id, "a2").await.unwrap();

        let listed = engine.list_conversations(user.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_ne!(listed[1].id, second.id);

        assert!(engine.delete_user(user.id).await.unwrap());
        assert!(engine.list_conversations(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_accounts() {
        let engine = engine().await;
        assert!(engine.create_user("  ", None, None).await.is_err());

        let user = engine.create_user("ada@example.com", None, None).await.unwrap();
        let account = engine
            .link_account(
                user.id,
                NewAccount {
                    account_type: "oauth".to_string(),
                    provider: "github".to_string(),
                    provider_account_id: "1".to_string(),
                    ..NewAccount::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(engine.list_accounts(user.id).await.unwrap(), vec![account]);
        assert_eq!(
            engine.get_user_by_email("ada@example.com").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
        let renamed = engine
            .update_user_profile(user.id, Some("Ada".to_string()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Ada"));
        assert_eq!(engine.get_user(user.id).await.unwrap(), Some(renamed));
    }
}
