//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without a Pong.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket frame size in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for a single outbound socket write, in milliseconds.
    pub write_deadline_ms: u64,
    /// Capacity of each session's outbound queue.
    pub outbound_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_frame_bytes: 512 * 1024,
            write_deadline_ms: 10_000,
            outbound_queue_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Heartbeat interval as a [`std::time::Duration`].
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout as a [`std::time::Duration`].
    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Write deadline as a [`std::time::Duration`].
    pub fn write_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.write_deadline_ms)
    }
}
