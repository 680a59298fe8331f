//! # relay-store
//!
//! Persistence collaborators for the relay core.
//!
//! The connection hub treats storage as two narrow interfaces:
//!
//! - [`MessageStore`] — durably record a message before it is fanned out
//! - [`MembershipDirectory`] — resolve a chat to its member user IDs
//!
//! Two implementations are provided: [`SqliteStore`] (r2d2-pooled `SQLite`
//! with WAL mode and embedded migrations) for production, and
//! [`MemoryStore`]/[`MemoryDirectory`] for tests and local demos.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod traits;

pub use errors::{Result, StoreError};
pub use memory::{MemoryDirectory, MemoryStore};
pub use sqlite::{new_file, new_in_memory, ConnectionConfig, ConnectionPool};
pub use store::SqliteStore;
pub use traits::{MembershipDirectory, MessageStore};
