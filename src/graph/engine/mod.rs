//! Conversation graph engine orchestration module.

pub mod core;

pub use core::{GraphBackends, GraphEngine};
