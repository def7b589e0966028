//! Conversation graph: branching message trees with edges and snapshots.

pub mod core;
pub mod engine;
pub mod storage;
pub mod traversal;

pub use core::{
    Conversation, ConversationDetail, ConversationGraph, ConversationId, Edge, EdgeType,
    GraphConfig, GraphError, GraphResult, Message, MessageId, MessageType, NewMessage, Snapshot,
};
pub use engine::{GraphBackends, GraphEngine};
