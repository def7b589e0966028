//! Path reconstruction and structural checks over a loaded graph.

pub mod path;

pub use path::{InvariantViolation, MessageGraph, MessagePath, PathStop};
