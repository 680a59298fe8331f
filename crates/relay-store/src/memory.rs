//! In-memory store implementations for tests and ephemeral deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use relay_core::{ChatId, StoredMessage, UserId};

use crate::errors::Result;
use crate::traits::{MembershipDirectory, MessageStore};

/// Message log held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages, across all chats.
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether the store holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create(&self, message: &StoredMessage) -> Result<()> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    async fn list_by_chat(
        &self,
        chat_id: &ChatId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>> {
        let messages = self.messages.read();
        // Negative limit means no limit, matching SQLite's LIMIT -1.
        Ok(messages
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

/// Chat membership held in process memory.
#[derive(Default)]
pub struct MemoryDirectory {
    members: RwLock<HashMap<ChatId, HashSet<UserId>>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a chat. Adding an existing member is a no-op.
    pub fn add_member(&self, chat_id: &ChatId, user_id: &UserId) {
        let _ = self
            .members
            .write()
            .entry(chat_id.clone())
            .or_default()
            .insert(user_id.clone());
    }

    /// Remove a user from a chat. Removing a non-member is a no-op.
    pub fn remove_member(&self, chat_id: &ChatId, user_id: &UserId) {
        let mut members = self.members.write();
        if let Some(set) = members.get_mut(chat_id) {
            let _ = set.remove(user_id);
            if set.is_empty() {
                let _ = members.remove(chat_id);
            }
        }
    }
}

#[async_trait]
impl MembershipDirectory for MemoryDirectory {
    async fn members(&self, chat_id: &ChatId) -> Result<Vec<UserId>> {
        Ok(self
            .members
            .read()
            .get(chat_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
