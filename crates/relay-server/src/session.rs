//! WebSocket session lifecycle — drives a single connection from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use relay_core::{ClientFrame, UserId};

use crate::config::ServerConfig;
use crate::connection::Session;
use crate::ingest::Ingestor;
use crate::metrics::{
    FRAME_DECODE_ERRORS_TOTAL, FRAMES_IN_TOTAL, FRAMES_OVERSIZED_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::Registry;

/// Run a WebSocket session for a connected user.
///
/// Splits the socket into a reader (this task) and a writer task. The two
/// share only the outbound queue and a cancellation token; either side's
/// death tears the pair down through the registry's idempotent unregister.
/// The server-wide `shutdown` token closes every live session the same way.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    user_id: UserId,
    registry: Arc<Registry>,
    ingestor: Arc<Ingestor>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(config.outbound_queue_capacity);
    let session = Arc::new(Session::new(user_id.clone(), send_tx));
    let connection_id = session.id.clone();
    let started = Instant::now();

    info!(connection_id = %connection_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    registry.register(session.clone()).await;

    let token = CancellationToken::new();
    let writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        session.clone(),
        token.clone(),
        config.clone(),
    ));

    // Reader loop. Exits on transport error, close frame, writer death,
    // or server shutdown.
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = shutdown.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(ref t) => {
                        session.mark_alive();
                        Some(t.to_string())
                    }
                    Message::Binary(ref data) => {
                        session.mark_alive();
                        match std::str::from_utf8(data) {
                            Ok(s) => Some(s.to_string()),
                            Err(_) => {
                                debug!(len = data.len(), "non-UTF8 binary frame ignored");
                                counter!(FRAME_DECODE_ERRORS_TOTAL).increment(1);
                                None
                            }
                        }
                    }
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        session.mark_alive();
                        None
                    }
                };
                let Some(text) = text else { continue };

                counter!(FRAMES_IN_TOTAL).increment(1);
                if text.len() > config.max_frame_bytes {
                    counter!(FRAMES_OVERSIZED_TOTAL).increment(1);
                    warn!(len = text.len(), max = config.max_frame_bytes, "oversized frame skipped");
                    continue;
                }
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        let _ = ingestor.ingest(&user_id, frame).await;
                    }
                    Err(e) => {
                        counter!(FRAME_DECODE_ERRORS_TOTAL).increment(1);
                        debug!(error = %e, "frame decode failed, skipping");
                    }
                }
            }
        }
    }

    // Teardown. Unregister closes the queue exactly once; the writer drains
    // what is left and exits on its own.
    registry.unregister(&user_id, &connection_id).await;
    let _ = writer.await;

    info!(connection_id = %connection_id, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Writer half of the pump: drains the outbound queue onto the socket and
/// keeps the connection alive with periodic Pings.
///
/// Cancels the shared token on exit so the reader never outlives it.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    session: Arc<Session>,
    token: CancellationToken,
    config: ServerConfig,
) {
    let write_deadline = config.write_deadline();
    let mut ping_interval = tokio::time::interval(config.heartbeat_interval());
    // Skip the immediate first tick.
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                match msg {
                    Some(first) => {
                        // Coalesce everything already queued into one write.
                        let mut batch = String::from(&*first);
                        while let Ok(next) = send_rx.try_recv() {
                            batch.push('\n');
                            batch.push_str(&next);
                        }
                        let write = ws_tx.send(Message::Text(batch.into()));
                        match tokio::time::timeout(write_deadline, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => break,
                            Err(_) => {
                                warn!(connection_id = %session.id, "write deadline exceeded");
                                break;
                            }
                        }
                    }
                    // Queue closed and drained: clean shutdown.
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if !session.check_alive()
                    && session.last_pong_elapsed() > config.heartbeat_timeout()
                {
                    warn!(
                        connection_id = %session.id,
                        elapsed_secs = session.last_pong_elapsed().as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    break;
                }
                let ping = ws_tx.send(Message::Ping(vec![].into()));
                if !matches!(tokio::time::timeout(write_deadline, ping).await, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
    token.cancel();
}
