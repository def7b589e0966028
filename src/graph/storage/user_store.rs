//! Users and their linked OAuth accounts.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::graph::core::errors::GraphResult;
use crate::graph::core::ids::{AccountId, ConversationId, UserId};
use crate::graph::core::models::{Account, NewAccount, User};
use crate::graph::storage::database::{GraphDatabase, StoreFuture};
use crate::graph::storage::message_store::purge_conversation_messages;
use crate::graph::storage::rows::{USER_COLUMNS, now_millis, user_from_row};

/// User store trait.
pub trait UserStore: Send + Sync {
    /// Create a user.
    ///
    /// # Errors
    /// Returns an error if the email is already taken or storage access fails.
    fn create(
        &self,
        email: &str,
        name: Option<String>,
        image: Option<String>,
    ) -> StoreFuture<'_, GraphResult<User>>;

    /// Get a user by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: UserId) -> StoreFuture<'_, GraphResult<Option<User>>>;

    /// Get a user by email.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_by_email(&self, email: &str) -> StoreFuture<'_, GraphResult<Option<User>>>;

    /// Replace display name and avatar; returns the updated user if it exists.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn update_profile(
        &self,
        id: UserId,
        name: Option<String>,
        image: Option<String>,
    ) -> StoreFuture<'_, GraphResult<Option<User>>>;

    /// Delete a user with their accounts and conversations.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: UserId) -> StoreFuture<'_, GraphResult<bool>>;

    /// Link an OAuth account to a user.
    ///
    /// # Errors
    /// Returns an error if the user does not exist, the provider account is
    /// already linked, or storage access fails.
    fn link_account(
        &self,
        user_id: UserId,
        account: NewAccount,
    ) -> StoreFuture<'_, GraphResult<Account>>;

    /// Accounts linked to a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn accounts(&self, user_id: UserId) -> StoreFuture<'_, GraphResult<Vec<Account>>>;
}

/// `SQLite` implementation of the user store.
pub struct SqliteUserStore {
    conn: Arc<Connection>,
}

impl SqliteUserStore {
    /// Build the store on a shared database.
    #[must_use]
    pub fn new(db: &GraphDatabase) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl UserStore for SqliteUserStore {
    fn create(
        &self,
        email: &str,
        name: Option<String>,
        image: Option<String>,
    ) -> StoreFuture<'_, GraphResult<User>> {
        let email = email.trim().to_string();
        Box::pin(async move {
            let id = UserId::new();
            let now_ms = now_millis();
            let user = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO users (id, email, name, image, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        rusqlite::params![id, email, name, image, now_ms],
                    )?;
                    let user = conn.query_row(
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                        rusqlite::params![id],
                        user_from_row,
                    )?;
                    Ok(user)
                })
                .await?;
            Ok(user)
        })
    }

    fn get(&self, id: UserId) -> StoreFuture<'_, GraphResult<Option<User>>> {
        Box::pin(async move {
            let user = self
                .conn
                .call(move |conn| {
                    let user = conn
                        .query_row(
                            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                            rusqlite::params![id],
                            user_from_row,
                        )
                        .optional()?;
                    Ok(user)
                })
                .await?;
            Ok(user)
        })
    }

    fn get_by_email(&self, email: &str) -> StoreFuture<'_, GraphResult<Option<User>>> {
        let email = email.trim().to_string();
        Box::pin(async move {
            let user = self
                .conn
                .call(move |conn| {
                    let user = conn
                        .query_row(
                            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                            rusqlite::params![email],
                            user_from_row,
                        )
                        .optional()?;
                    Ok(user)
                })
                .await?;
            Ok(user)
        })
    }

    fn update_profile(
        &self,
        id: UserId,
        name: Option<String>,
        image: Option<String>,
    ) -> StoreFuture<'_, GraphResult<Option<User>>> {
        Box::pin(async move {
            let now_ms = now_millis();
            let user = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE users
                         SET name = ?1, image = ?2, updated_at = MAX(?3, updated_at + 1)
                         WHERE id = ?4",
                        rusqlite::params![name, image, now_ms, id],
                    )?;
                    let user = conn
                        .query_row(
                            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                            rusqlite::params![id],
                            user_from_row,
                        )
                        .optional()?;
                    Ok(user)
                })
                .await?;
            Ok(user)
        })
    }

    fn delete(&self, id: UserId) -> StoreFuture<'_, GraphResult<bool>> {
        Box::pin(async move {
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let conversations = tx
                        .prepare("SELECT id FROM conversations WHERE user_id = ?1")?
                        .query_map(rusqlite::params![id], |row| row.get(0))?
                        .collect::<Result<Vec<ConversationId>, rusqlite::Error>>()?;
                    for conversation_id in conversations {
                        purge_conversation_messages(&tx, conversation_id)?;
                    }
                    let removed =
                        tx.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![id])?;
                    tx.commit()?;
                    Ok(removed > 0)
                })
                .await?;
            Ok(removed)
        })
    }

    fn link_account(
        &self,
        user_id: UserId,
        account: NewAccount,
    ) -> StoreFuture<'_, GraphResult<Account>> {
        Box::pin(async move {
            let id = AccountId::new();
            let details = account.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO accounts (id, user_id, type, provider, provider_account_id,
                             refresh_token, access_token, expires_at, token_type, scope,
                             id_token, session_state)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        rusqlite::params![
                            id,
                            user_id,
                            account.account_type,
                            account.provider,
                            account.provider_account_id,
                            account.refresh_token,
                            account.access_token,
                            account.expires_at,
                            account.token_type,
                            account.scope,
                            account.id_token,
                            account.session_state
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(Account {
                id,
                user_id,
                details,
            })
        })
    }

    fn accounts(&self, user_id: UserId) -> StoreFuture<'_, GraphResult<Vec<Account>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, type, provider, provider_account_id, refresh_token,
                                access_token, expires_at, token_type, scope, id_token, session_state
                         FROM accounts
                         WHERE user_id = ?1
                         ORDER BY rowid",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![user_id], |row| {
                            Ok(Account {
                                id: row.get(0)?,
                                user_id: row.get(1)?,
                                details: NewAccount {
                                    account_type: row.get(2)?,
                                    provider: row.get(3)?,
                                    provider_account_id: row.get(4)?,
                                    refresh_token: row.get(5)?,
                                    access_token: row.get(6)?,
                                    expires_at: row.get(7)?,
                                    token_type: row.get(8)?,
                                    scope: row.get(9)?,
                                    id_token: row.get(10)?,
                                    session_state: row.get(11)?,
                                },
                            })
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }
}
