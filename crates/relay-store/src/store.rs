//! `SQLite`-backed implementations of the store traits.
//!
//! [`SqliteStore`] wraps a connection pool and dispatches to the stateless
//! repositories. Queries run on the blocking thread pool so the async
//! runtime's worker threads never block on disk I/O.

use async_trait::async_trait;

use relay_core::{ChatId, StoredMessage, UserId};

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::ConnectionPool;
use crate::sqlite::repos::{MembershipRepo, MessageRepo};
use crate::traits::{MembershipDirectory, MessageStore};

/// Message log and membership directory backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Create a store over an already-migrated pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Add a user to a chat's member list.
    pub async fn add_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        let pool = self.pool.clone();
        let chat_id = chat_id.clone();
        let user_id = user_id.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            MembershipRepo::add_member(&conn, &chat_id, &user_id)
        })
        .await
    }

    /// Remove a user from a chat's member list.
    pub async fn remove_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        let pool = self.pool.clone();
        let chat_id = chat_id.clone();
        let user_id = user_id.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            MembershipRepo::remove_member(&conn, &chat_id, &user_id)
        })
        .await
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(&self, message: &StoredMessage) -> Result<()> {
        let pool = self.pool.clone();
        let message = message.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            MessageRepo::insert(&conn, &message)
        })
        .await
    }

    async fn list_by_chat(
        &self,
        chat_id: &ChatId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>> {
        let pool = self.pool.clone();
        let chat_id = chat_id.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            MessageRepo::list_by_chat(&conn, &chat_id, limit, offset)
        })
        .await
    }
}

#[async_trait]
impl MembershipDirectory for SqliteStore {
    async fn members(&self, chat_id: &ChatId) -> Result<Vec<UserId>> {
        let pool = self.pool.clone();
        let chat_id = chat_id.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            MembershipRepo::members(&conn, &chat_id)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Internal(format!("blocking task failed: {e}")))?
}
