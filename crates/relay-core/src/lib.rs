//! # relay-core
//!
//! Foundation types for the chat relay.
//!
//! This crate provides the shared vocabulary the server and store crates
//! depend on:
//!
//! - **Branded IDs**: `UserId`, `ChatId`, `MessageId`, `ConnectionId` as
//!   newtypes for type safety
//! - **Inbound wire frames**: [`ClientFrame`] — one JSON object per
//!   WebSocket frame, tagged by `"type"`
//! - **Persisted messages**: [`StoredMessage`] with kind-specific
//!   [`MessageContent`], serialized verbatim as the outbound fan-out payload

#![deny(unsafe_code)]

pub mod ids;
pub mod messages;

pub use ids::{ChatId, ConnectionId, MessageId, UserId};
pub use messages::{ClientFrame, CodeContent, MessageContent, MessageKind, StoredMessage};
