//! Collaborator interfaces consumed by the relay core.
//!
//! The hub and ingest path depend on these traits, never on a concrete
//! backend. Both are object-safe so the server can hold
//! `Arc<dyn MessageStore>` / `Arc<dyn MembershipDirectory>`.

use async_trait::async_trait;

use relay_core::{ChatId, StoredMessage, UserId};

use crate::errors::Result;

/// Durable message persistence.
///
/// A message must be recorded here before it is broadcast; a failed write
/// suppresses the broadcast entirely (at-most-once delivery).
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message.
    async fn create(&self, message: &StoredMessage) -> Result<()>;

    /// List messages of a chat in creation order.
    ///
    /// A negative `limit` means no limit; a negative `offset` means zero.
    async fn list_by_chat(
        &self,
        chat_id: &ChatId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>>;
}

/// Chat membership lookup.
///
/// Resolves a chat to the user IDs that should receive its messages. The
/// relay never caches the result; every broadcast resolves afresh.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// User IDs that are members of the chat.
    async fn members(&self, chat_id: &ChatId) -> Result<Vec<UserId>>;
}
