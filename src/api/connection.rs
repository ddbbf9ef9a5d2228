//! WebSocket connection manager.
//!
//! Owns the socket lifecycle and nothing else: open, send, close, and the
//! observable transitions delivered into the session's event queue. Holds no
//! protocol state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::SessionEvent;

/// Observable socket transitions, delivered in arrival order.
#[derive(Debug)]
pub enum SocketEvent {
    Opened,
    Frame(String),
    Closed {
        code: Option<u16>,
        reason: Option<String>,
        was_clean: bool,
    },
    Error(String),
}

/// Handle to one physical socket.
///
/// The socket task owns the stream; this handle only enqueues work for it.
/// `send` on a non-open handle fails with [`SessionError::NotConnected`] and
/// never panics; `close` is idempotent.
pub struct Connection {
    outbound: mpsc::Sender<String>,
    shutdown: mpsc::Sender<()>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Open a socket to `url` and start its task. Transitions are delivered
    /// as epoch-tagged [`SessionEvent::Socket`] entries on `events`.
    pub fn open(
        url: String,
        epoch: u64,
        connect_timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(
            url,
            epoch,
            connect_timeout,
            events,
            outbound_rx,
            shutdown_rx,
            Arc::clone(&open),
        ));

        Self {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            open,
        }
    }

    /// Whether the socket is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Enqueue a text frame for transmission. Returns immediately; the write
    /// happens in the socket task.
    pub fn send(&self, frame: String) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotConnected);
        }
        self.outbound
            .try_send(frame)
            .map_err(|_| SessionError::NotConnected)
    }

    /// Request the socket task to close. Safe to call repeatedly.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.shutdown.try_send(());
    }
}

async fn run_socket(
    url: String,
    epoch: u64,
    connect_timeout: Duration,
    events: mpsc::Sender<SessionEvent>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: mpsc::Receiver<()>,
    open: Arc<AtomicBool>,
) {
    let emit = |event: SocketEvent| {
        let events = events.clone();
        async move {
            let _ = events.send(SessionEvent::Socket { epoch, event }).await;
        }
    };

    let ws_stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, "WebSocket connect failed");
            emit(SocketEvent::Error(e.to_string())).await;
            emit(SocketEvent::Closed {
                code: None,
                reason: None,
                was_clean: false,
            })
            .await;
            return;
        }
        Err(_) => {
            warn!(timeout = ?connect_timeout, "WebSocket connect timed out");
            emit(SocketEvent::Error("connection timed out".to_string())).await;
            emit(SocketEvent::Closed {
                code: None,
                reason: None,
                was_clean: false,
            })
            .await;
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    emit(SocketEvent::Opened).await;

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            // Outbound frames drain before a pending shutdown is honored, so
            // best-effort teardown messages still reach the wire.
            biased;

            maybe_frame = outbound.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            open.store(false, Ordering::SeqCst);
                            emit(SocketEvent::Error(e.to_string())).await;
                            emit(SocketEvent::Closed {
                                code: None,
                                reason: None,
                                was_clean: false,
                            })
                            .await;
                            return;
                        }
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        let _ = sink.close().await;
                        return;
                    }
                }
            }

            _ = shutdown.recv() => {
                open.store(false, Ordering::SeqCst);
                let _ = sink.close().await;
                emit(SocketEvent::Closed {
                    code: None,
                    reason: None,
                    was_clean: true,
                })
                .await;
                return;
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        emit(SocketEvent::Frame(text)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send pong");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        open.store(false, Ordering::SeqCst);
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), Some(f.reason.to_string())),
                            None => (None, None),
                        };
                        emit(SocketEvent::Closed {
                            code,
                            reason,
                            was_clean: true,
                        })
                        .await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        open.store(false, Ordering::SeqCst);
                        emit(SocketEvent::Error(e.to_string())).await;
                        emit(SocketEvent::Closed {
                            code: None,
                            reason: None,
                            was_clean: false,
                        })
                        .await;
                        return;
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        emit(SocketEvent::Closed {
                            code: None,
                            reason: None,
                            was_clean: false,
                        })
                        .await;
                        return;
                    }
                }
            }
        }
    }
}
