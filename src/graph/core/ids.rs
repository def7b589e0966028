//! Identifier types for the conversation graph.
//!
//! Every entity gets its own UUID newtype so a `MessageId` can never be passed
//! where a `ConversationId` is expected. Ids are stored as TEXT.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7` for graph rows, which
//!   keeps inserts roughly ordered by creation time.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// User account identifier.
    ///
    /// Random (`UUIDv4`) to avoid leaking sign-up time when exposed.
    UserId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of a linked OAuth account.
    AccountId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of a conversation (the container of one message graph).
    ConversationId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of a message node.
    MessageId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of an edge record.
    EdgeId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of a rewind snapshot.
    SnapshotId,
    generator = uuid_time_ordered
);

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{AccountId, ConversationId, EdgeId, MessageId, SnapshotId, UserId};
    use std::fmt;

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    #[derive(Debug)]
    struct InvalidUuidBlobLen {
        got: usize,
    }

    impl fmt::Display for InvalidUuidBlobLen {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid UUID blob length: got {}, expected 16", self.got)
        }
    }

    impl std::error::Error for InvalidUuidBlobLen {}

    fn uuid_from_blob(b: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let bytes: [u8; 16] = b
            .try_into()
            .map_err(|_| FromSqlError::Other(Box::new(InvalidUuidBlobLen { got: b.len() })))?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }

    fn uuid_from_text(t: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }

    macro_rules! impl_rusqlite_uuid_newtype {
        ($t:ty) => {
            impl ToSql for $t {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
                }
            }

            impl FromSql for $t {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    match value {
                        ValueRef::Blob(b) => uuid_from_blob(b).map(Self),
                        ValueRef::Text(t) => uuid_from_text(t).map(Self),
                        _ => Err(FromSqlError::InvalidType),
                    }
                }
            }
        };
    }

    impl_rusqlite_uuid_newtype!(UserId);
    impl_rusqlite_uuid_newtype!(AccountId);
    impl_rusqlite_uuid_newtype!(ConversationId);
    impl_rusqlite_uuid_newtype!(MessageId);
    impl_rusqlite_uuid_newtype!(EdgeId);
    impl_rusqlite_uuid_newtype!(SnapshotId);
}
