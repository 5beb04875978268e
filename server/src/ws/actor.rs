use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, sleep, timeout};

use crate::state::AppState;
use crate::ws::registry::ConnectionHandle;
use crate::ws::session::Session;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer may keep flushing queued frames after the reader ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Server-side keepalive timing for relay sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

/// Whether a pong has arrived since the last ping was sent.
///
/// A flag rather than a queue: any number of pongs between two pings counts
/// once, and pongs from before a ping never answer it.
#[derive(Debug, Default)]
pub struct PongTracker {
    seen: AtomicBool,
}

impl PongTracker {
    /// Reset before sending a ping.
    pub fn arm(&self) {
        self.seen.store(false, Ordering::SeqCst);
    }

    pub fn record(&self) {
        self.seen.store(true, Ordering::SeqCst);
    }

    pub fn answered(&self) -> bool {
        self.seen.load(Ordering::SeqCst)
    }
}

/// Drive one authenticated relay connection.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink and drains the connection's mpsc queue, so
///   every write to this socket is serialized no matter who sends it
/// - Reader loop: hands each text frame to the session for routing
///
/// The session is registered before the loop starts and deregistered exactly
/// once after it ends, whatever ended it.
pub async fn run_connection(socket: WebSocket, state: AppState, mut session: Session) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let handle = ConnectionHandle::new(tx.clone());
    let connection_id = handle.id();

    if let Err(err) = session.activate(&state.registry, handle) {
        tracing::warn!(error = %err, "Refusing to start relay loop");
        return;
    }
    let identity = session.identity().unwrap_or_default().to_string();

    tracing::info!(
        identity = %identity,
        connection_id = %connection_id,
        online = state.registry.size(),
        "WebSocket actor started"
    );

    // Either helper task can end the reader loop through this.
    let shutdown = Arc::new(Notify::new());

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, shutdown.clone()));

    let pongs = Arc::new(PongTracker::default());
    let keepalive = state.keepalive;

    let ping_tx = tx.clone();
    let ping_pongs = pongs.clone();
    let ping_shutdown = shutdown.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(keepalive.ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            ping_pongs.arm();
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            sleep(keepalive.pong_timeout).await;
            if !ping_pongs.answered() {
                tracing::warn!("Pong timeout, closing connection");
                let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                ping_shutdown.notify_one();
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = shutdown.notified() => {
                tracing::info!(identity = %identity, "Connection shut down by server");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    session.handle_text(&state.router, text.as_str());
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        identity = %identity,
                        bytes = data.len(),
                        "Ignoring binary frame (relay protocol is JSON text)"
                    );
                }
                Message::Pong(_) => pongs.record(),
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        identity = %identity,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    identity = %identity,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(identity = %identity, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    let _ = ping_handle.await;

    session.close(&state.registry);

    // Once every sender is gone the writer flushes what is queued (a close
    // frame, say) and exits on its own.
    drop(session);
    drop(tx);
    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        identity = %identity,
        connection_id = %connection_id,
        online = state.registry.size(),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    shutdown: Arc<Notify>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
    shutdown.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keepalive_is_thirty_and_ten_seconds() {
        let keepalive = Keepalive::default();
        assert_eq!(keepalive.ping_interval, Duration::from_secs(30));
        assert_eq!(keepalive.pong_timeout, Duration::from_secs(10));
    }

    #[test]
    fn pong_before_ping_does_not_answer_it() {
        let pongs = PongTracker::default();
        for _ in 0..1000 {
            pongs.record();
        }

        pongs.arm();
        assert!(!pongs.answered());

        pongs.record();
        assert!(pongs.answered());
    }

    #[test]
    fn each_ping_needs_its_own_pong() {
        let pongs = PongTracker::default();

        pongs.arm();
        pongs.record();
        assert!(pongs.answered());

        pongs.arm();
        assert!(!pongs.answered());
    }
}
