//! Message and edge kinds.
//!
//! Both enums use stable lowercase identifiers for storage and for the JSON
//! API. Parsing accepts a few aliases used by chat front-ends (`user`,
//! `assistant`) so transcripts from either vocabulary can be stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored or submitted kind is not recognized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KindParseError {
    what: &'static str,
    value: String,
}

impl KindParseError {
    /// The raw value that failed parsing.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for KindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.what, self.value)
    }
}

impl std::error::Error for KindParseError {}

/// Author of a message node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// User input.
    Human,
    /// Model reply.
    Ai,
    /// Tool output.
    Tool,
    /// System prompt or notice.
    System,
}

impl MessageType {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = KindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "human" | "user" => Ok(Self::Human),
            "ai" | "assistant" => Ok(Self::Ai),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            _ => Err(KindParseError {
                what: "message type",
                value: value.to_string(),
            }),
        }
    }
}

/// Relationship recorded by an edge.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Plain parent -> child link mirroring `parent_id`.
    #[default]
    Default,
    /// Regenerated reply: previous attempt -> new attempt.
    Retry,
    /// Explicit fork point.
    Branch,
    /// Secondary parent of a merge node -> the merge node.
    Merge,
}

impl EdgeType {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Retry => "retry",
            Self::Branch => "branch",
            Self::Merge => "merge",
        }
    }

    /// Whether the edge mirrors a `parent_id` link.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = KindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "retry" => Ok(Self::Retry),
            "branch" => Ok(Self::Branch),
            "merge" => Ok(Self::Merge),
            _ => Err(KindParseError {
                what: "edge type",
                value: value.to_string(),
            }),
        }
    }
}

mod rusqlite_impl {
    use std::str::FromStr;

    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    use super::{EdgeType, MessageType};

    macro_rules! impl_rusqlite_kind {
        ($t:ty) => {
            impl ToSql for $t {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $t {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let raw = value.as_str()?;
                    <$t>::from_str(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        };
    }

    impl_rusqlite_kind!(MessageType);
    impl_rusqlite_kind!(EdgeType);
}
