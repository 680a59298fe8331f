//! WebSocket relay server: connection registry, per-connection session
//! pump, message ingestion, and chat fan-out over Axum.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use connection::{SendOutcome, Session};
pub use ingest::Ingestor;
pub use registry::Registry;
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
