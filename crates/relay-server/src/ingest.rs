//! Inbound message processing: persist, then fan out.

use std::sync::Arc;

use metrics::counter;
use tracing::warn;

use relay_core::{ClientFrame, StoredMessage, UserId};
use relay_store::MessageStore;

use crate::metrics::{MESSAGES_PERSIST_ERRORS_TOTAL, MESSAGES_PERSISTED_TOTAL};
use crate::registry::Registry;

/// Turns decoded client frames into durable messages and broadcasts.
///
/// At-most-once: a message that fails to persist is never broadcast, and
/// ingestion does not retry. The sender's connection is unaffected either
/// way.
pub struct Ingestor {
    store: Arc<dyn MessageStore>,
    registry: Arc<Registry>,
}

impl Ingestor {
    /// Create an ingestor writing to `store` and fanning out via `registry`.
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Persist a frame from `sender_id` and broadcast it to the chat.
    ///
    /// Returns the number of sessions the payload was queued for, or
    /// `None` if the message was not persisted.
    pub async fn ingest(&self, sender_id: &UserId, frame: ClientFrame) -> Option<usize> {
        let message = StoredMessage::from_frame(sender_id.clone(), frame);

        if let Err(e) = self.store.create(&message).await {
            counter!(MESSAGES_PERSIST_ERRORS_TOTAL).increment(1);
            warn!(
                message_id = %message.id,
                chat_id = %message.chat_id,
                sender_id = %sender_id,
                error = %e,
                "failed to persist message, broadcast suppressed"
            );
            return None;
        }
        counter!(MESSAGES_PERSISTED_TOTAL).increment(1);

        let payload: Arc<str> = match serde_json::to_string(&message) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "failed to serialize message");
                return None;
            }
        };

        Some(self.registry.broadcast(&message.chat_id, payload).await)
    }
}
