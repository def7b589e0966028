//! In-memory view of one conversation's message graph.
//!
//! Messages live in a map keyed by id; `parent_id` is only a lookup key, so the
//! structure holds no references between nodes. Path reconstruction walks
//! parent pointers from a leaf and is O(path length).

use std::collections::{HashMap, HashSet};

use crate::graph::core::ids::MessageId;
use crate::graph::core::kinds::EdgeType;
use crate::graph::core::models::{ConversationGraph, Edge, Message};

/// Why a parent walk ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathStop {
    /// Reached a message without a parent.
    Root,
    /// The leaf itself is not part of the graph; the path is empty.
    UnknownLeaf,
    /// A parent id did not resolve; the path starts below it.
    MissingParent(MessageId),
    /// A parent chain led back to an already visited message.
    Cycle(MessageId),
}

/// Result of walking from a leaf towards the root.
#[derive(Clone, Debug)]
pub struct MessagePath<'a> {
    /// Messages ordered root (or first resolvable ancestor) to leaf.
    pub messages: Vec<&'a Message>,
    /// How the walk ended.
    pub stop: PathStop,
}

impl MessagePath<'_> {
    /// Whether the walk reached a real root.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.stop, PathStop::Root)
    }

    /// Owned copy of the messages.
    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        self.messages.iter().map(|m| (*m).clone()).collect()
    }
}

/// A structural problem found by [`MessageGraph::check_invariants`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InvariantViolation {
    /// `depth` is not `depth(parent) + 1` (or not 0 for a root).
    DepthMismatch {
        /// Offending message.
        message: MessageId,
        /// Depth implied by the parent.
        expected: u32,
        /// Stored depth.
        actual: u32,
    },
    /// Two children of the same parent share a branch index.
    DuplicateBranchIndex {
        /// Shared parent.
        parent: MessageId,
        /// Repeated index.
        branch_index: u32,
    },
    /// `parent_id` points outside the loaded graph.
    DanglingParent {
        /// Offending message.
        message: MessageId,
        /// Unresolved parent.
        parent: MessageId,
    },
    /// No default edge mirrors a `parent_id` link.
    MissingDefaultEdge {
        /// Parent end.
        parent: MessageId,
        /// Child end.
        child: MessageId,
    },
}

/// Arena of messages and edges for one conversation.
#[derive(Clone, Debug, Default)]
pub struct MessageGraph {
    nodes: HashMap<MessageId, Message>,
    order: Vec<MessageId>,
    edges: Vec<Edge>,
}

impl MessageGraph {
    /// Build from messages (kept in the given order) and edges.
    #[must_use]
    pub fn new(messages: Vec<Message>, edges: Vec<Edge>) -> Self {
        let mut nodes = HashMap::with_capacity(messages.len());
        let mut order = Vec::with_capacity(messages.len());
        for message in messages {
            let id = message.id;
            if nodes.insert(id, message).is_none() {
                order.push(id);
            }
        }
        Self {
            nodes,
            order,
            edges,
        }
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a message.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.nodes.get(&id)
    }

    /// Messages in load order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Messages without a parent, in load order.
    #[must_use]
    pub fn roots(&self) -> Vec<&Message> {
        self.messages().filter(|m| m.is_root()).collect()
    }

    /// Children of `parent` ordered by branch index.
    #[must_use]
    pub fn children_of(&self, parent: MessageId) -> Vec<&Message> {
        let mut children: Vec<&Message> = self
            .messages()
            .filter(|m| m.parent_id == Some(parent))
            .collect();
        children.sort_by_key(|m| m.branch_index);
        children
    }

    /// Targets of edges leaving `source`, with the edge kind.
    #[must_use]
    pub fn edge_targets(&self, source: MessageId) -> Vec<(EdgeType, MessageId)> {
        self.edges
            .iter()
            .filter(|e| e.source_id == source)
            .map(|e| (e.edge_type, e.target_id))
            .collect()
    }

    /// Walk parent pointers from `leaf` and return the root-to-leaf path.
    ///
    /// A parent that is not in the graph ends the walk without error, so a
    /// partially loaded chain yields the resolvable suffix.
    #[must_use]
    pub fn path_to(&self, leaf: MessageId) -> MessagePath<'_> {
        let Some(mut current) = self.nodes.get(&leaf) else {
            return MessagePath {
                messages: Vec::new(),
                stop: PathStop::UnknownLeaf,
            };
        };

        let mut visited = HashSet::new();
        let mut reversed = Vec::new();
        let stop = loop {
            visited.insert(current.id);
            reversed.push(current);
            let Some(parent_id) = current.parent_id else {
                break PathStop::Root;
            };
            if visited.contains(&parent_id) {
                break PathStop::Cycle(parent_id);
            }
            match self.nodes.get(&parent_id) {
                Some(parent) => current = parent,
                None => break PathStop::MissingParent(parent_id),
            }
        };

        reversed.reverse();
        MessagePath {
            messages: reversed,
            stop,
        }
    }

    /// Report structural problems without changing anything.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let default_edges: HashSet<(MessageId, MessageId)> = self
            .edges
            .iter()
            .filter(|e| e.edge_type.is_structural())
            .map(|e| (e.source_id, e.target_id))
            .collect();
        let mut sibling_slots: HashSet<(MessageId, u32)> = HashSet::new();

        for message in self.messages() {
            let Some(parent_id) = message.parent_id else {
                if message.depth != 0 {
                    violations.push(InvariantViolation::DepthMismatch {
                        message: message.id,
                        expected: 0,
                        actual: message.depth,
                    });
                }
                continue;
            };

            match self.nodes.get(&parent_id) {
                Some(parent) if parent.depth + 1 != message.depth => {
                    violations.push(InvariantViolation::DepthMismatch {
                        message: message.id,
                        expected: parent.depth + 1,
                        actual: message.depth,
                    });
                }
                Some(_) => {}
                None => violations.push(InvariantViolation::DanglingParent {
                    message: message.id,
                    parent: parent_id,
                }),
            }

            if !sibling_slots.insert((parent_id, message.branch_index)) {
                violations.push(InvariantViolation::DuplicateBranchIndex {
                    parent: parent_id,
                    branch_index: message.branch_index,
                });
            }

            if !default_edges.contains(&(parent_id, message.id)) {
                violations.push(InvariantViolation::MissingDefaultEdge {
                    parent: parent_id,
                    child: message.id,
                });
            }
        }

        violations
    }
}

impl From<ConversationGraph> for MessageGraph {
    fn from(graph: ConversationGraph) -> Self {
        Self::new(graph.messages, graph.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::core::ids::{ConversationId, EdgeId};
    use crate::graph::core::kinds::MessageType;
    use crate::graph::core::models::MessageMetadata;
    use chrono::Utc;

    fn node(conversation: ConversationId, parent: Option<&Message>, branch_index: u32) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: conversation,
            parent_id: parent.map(|p| p.id),
            merge_parent_ids: Vec::new(),
            message_type: MessageType::Human,
            content: Some("text".to_string()),
            metadata: MessageMetadata::default(),
            branch_index,
            depth: parent.map_or(0, |p| p.depth + 1),
            created_at: Utc::now(),
        }
    }

    fn default_edge(source: &Message, target: &Message) -> Edge {
        Edge {
            id: EdgeId::new(),
            conversation_id: source.conversation_id,
            source_id: source.id,
            target_id: target.id,
            edge_type: EdgeType::Default,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_path_is_root_to_leaf() {
        let c = ConversationId::new();
        let m1 = node(c, None, 0);
        let m2 = node(c, Some(&m1), 0);
        let m3 = node(c, Some(&m2), 0);
        let graph = MessageGraph::new(vec![m1.clone(), m2.clone(), m3.clone()], Vec::new());

        let path = graph.path_to(m3.id);
        assert!(path.is_complete());
        let ids: Vec<MessageId> = path.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id, m3.id]);
        assert_eq!(path.messages.len() as u32, m3.depth + 1);
    }

    #[test]
    fn test_path_stops_at_missing_parent() {
        let c = ConversationId::new();
        let m1 = node(c, None, 0);
        let m2 = node(c, Some(&m1), 0);
        let m3 = node(c, Some(&m2), 0);
        let graph = MessageGraph::new(vec![m2.clone(), m3.clone()], Vec::new());

        let path = graph.path_to(m3.id);
        assert_eq!(path.stop, PathStop::MissingParent(m1.id));
        let ids: Vec<MessageId> = path.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m2.id, m3.id]);
    }

    #[test]
    fn test_unknown_leaf_gives_empty_path() {
        let c = ConversationId::new();
        let graph = MessageGraph::new(vec![node(c, None, 0)], Vec::new());

        let path = graph.path_to(MessageId::new());
        assert_eq!(path.stop, PathStop::UnknownLeaf);
        assert!(path.messages.is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let c = ConversationId::new();
        let mut a = node(c, None, 0);
        let b = node(c, Some(&a), 0);
        a.parent_id = Some(b.id);
        let graph = MessageGraph::new(vec![a.clone(), b.clone()], Vec::new());

        let path = graph.path_to(b.id);
        assert_eq!(path.stop, PathStop::Cycle(b.id));
        assert_eq!(path.messages.len(), 2);
    }

    #[test]
    fn test_children_sorted_by_branch_index() {
        let c = ConversationId::new();
        let root = node(c, None, 0);
        let second = node(c, Some(&root), 1);
        let first = node(c, Some(&root), 0);
        let graph = MessageGraph::new(vec![root.clone(), second.clone(), first.clone()], Vec::new());

        let ids: Vec<MessageId> = graph.children_of(root.id).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn test_check_invariants_clean_graph() {
        let c = ConversationId::new();
        let m1 = node(c, None, 0);
        let m2 = node(c, Some(&m1), 0);
        let m3 = node(c, Some(&m1), 1);
        let edges = vec![default_edge(&m1, &m2), default_edge(&m1, &m3)];
        let graph = MessageGraph::new(vec![m1.clone(), m2, m3], edges);

        assert!(graph.check_invariants().is_empty());
        assert_eq!(graph.edge_targets(m1.id).len(), 2);
    }

    #[test]
    fn test_check_invariants_reports_problems() {
        let c = ConversationId::new();
        let m1 = node(c, None, 0);
        let mut m2 = node(c, Some(&m1), 0);
        m2.depth = 5;
        let m3 = node(c, Some(&m1), 0);
        let graph = MessageGraph::new(vec![m1.clone(), m2.clone(), m3.clone()], Vec::new());

        let violations = graph.check_invariants();
        assert!(violations.contains(&InvariantViolation::DepthMismatch {
            message: m2.id,
            expected: 1,
            actual: 5,
        }));
        assert!(violations.contains(&InvariantViolation::DuplicateBranchIndex {
            parent: m1.id,
            branch_index: 0,
        }));
        assert!(violations.contains(&InvariantViolation::MissingDefaultEdge {
            parent: m1.id,
            child: m3.id,
        }));
    }
}
