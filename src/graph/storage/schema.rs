//! `SQLite` schema for the conversation graph.
//!
//! Column names follow the relational layout the chat front-end was built
//! against. JSON payloads are stored as TEXT; `merge_parent_ids` is a JSON
//! array of message ids. Timestamps are Unix milliseconds.

/// Pragmas applied to every connection before use.
pub const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

/// Full schema, idempotent.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    image TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    refresh_token TEXT,
    access_token TEXT,
    expires_at INTEGER,
    token_type TEXT,
    scope TEXT,
    id_token TEXT,
    session_state TEXT,
    UNIQUE (provider, provider_account_id)
);
CREATE INDEX IF NOT EXISTS accounts_user_idx ON accounts (user_id);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT REFERENCES users(id) ON DELETE CASCADE,
    title TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    active_leaf_id TEXT
);
CREATE INDEX IF NOT EXISTS conversations_user_updated_idx
    ON conversations (user_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    parent_id TEXT REFERENCES messages(id) ON DELETE CASCADE,
    merge_parent_ids TEXT,
    type TEXT NOT NULL,
    content TEXT,
    tool_calls TEXT,
    tool_result TEXT,
    node_name TEXT,
    step INTEGER,
    checkpoint TEXT,
    branch_index INTEGER NOT NULL DEFAULT 0,
    depth INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS conversation_idx ON messages (conversation_id);
CREATE INDEX IF NOT EXISTS parent_idx ON messages (parent_id);
CREATE INDEX IF NOT EXISTS conversation_depth_idx ON messages (conversation_id, depth);
CREATE INDEX IF NOT EXISTS created_at_idx ON messages (created_at);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    source_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    type TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS edges_conversation_idx ON edges (conversation_id);
CREATE INDEX IF NOT EXISTS edges_source_idx ON edges (source_id);
CREATE INDEX IF NOT EXISTS edges_target_idx ON edges (target_id);

CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    snapshot TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS snapshots_conversation_idx ON snapshots (conversation_id);
CREATE INDEX IF NOT EXISTS snapshots_message_idx ON snapshots (message_id);
";
