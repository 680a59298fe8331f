//! Per-connection session state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use relay_core::{ConnectionId, UserId};

/// Result of enqueueing a payload onto a session's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload was queued for delivery.
    Delivered,
    /// Queue was full; payload dropped for this session only.
    QueueFull,
    /// Queue has been closed; the session is shutting down.
    Closed,
}

/// One live WebSocket connection of one user.
///
/// The session owns the sending half of the bounded outbound queue. The
/// writer task owns the receiving half and drains it onto the socket.
/// Closing the queue is the shutdown signal for the writer.
pub struct Session {
    /// Unique connection ID, never reused.
    pub id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Outbound queue sender. `None` once the session has been closed.
    tx: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client responded since the last liveness check.
    is_alive: AtomicBool,
    /// When the last Pong (or any liveness signal) was received.
    last_pong: Mutex<Instant>,
    /// Payloads dropped because the queue was full.
    dropped_messages: AtomicU64,
}

impl Session {
    /// Create a new session.
    pub fn new(user_id: UserId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            user_id,
            tx: Mutex::new(Some(tx)),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a payload without blocking.
    ///
    /// A full queue drops the payload for this session only and increments
    /// the drop counter; the connection stays up.
    pub fn send(&self, payload: Arc<str>) -> SendOutcome {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Close the outbound queue.
    ///
    /// Returns `true` only on the first call. Dropping the sender lets the
    /// writer task drain remaining payloads and exit.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Total payloads dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last liveness signal.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
