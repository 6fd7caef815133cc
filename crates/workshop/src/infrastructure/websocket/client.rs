//! WebSocket client for the broadcast relay
//!
//! Connects, forwards inbound frames to the event loop and reconnects after a
//! fixed delay whenever the link drops, forever, until shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use rift_shared::BroadcastMessage;

use crate::application::EventSender;
use crate::ports::BroadcastPort;

/// Buffer size for the outbound frame channel.
const OUTBOUND_CHANNEL_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the relay
    Disconnected,
    /// Attempting to establish connection
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, waiting to retry
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Why a live session ended.
enum SessionEnd {
    Closed,
    Shutdown,
    RuntimeClosed,
}

#[derive(Clone)]
pub struct BroadcastClient {
    url: String,
    reconnect_delay: Duration,
    state: Arc<RwLock<ConnectionState>>,
    tx: Arc<Mutex<Option<mpsc::Sender<String>>>>,
}

impl BroadcastClient {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            tx: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        *state = new_state;
    }

    /// Keep a relay session alive until `shutdown` fires.
    pub async fn run(&self, events: EventSender, shutdown: CancellationToken) {
        loop {
            match self.connect_once(&events, &shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::RuntimeClosed) => {
                    tracing::info!("Event loop stopped, closing relay connection");
                    break;
                }
                Ok(SessionEnd::Closed) => {
                    tracing::warn!(url = %self.url, "Relay connection lost");
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Relay connection failed");
                }
            }

            self.set_state(ConnectionState::Reconnecting).await;
            tracing::info!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Reconnecting to relay"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.tx.lock().await.take();
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn connect_once(
        &self,
        events: &EventSender,
        shutdown: &CancellationToken,
    ) -> Result<SessionEnd, TransportError> {
        self.set_state(ConnectionState::Connecting).await;

        let ws_stream = tokio::select! {
            _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            result = connect_async(self.url.as_str()) => result?.0,
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_BUFFER);
        {
            let mut tx_lock = self.tx.lock().await;
            *tx_lock = Some(tx);
        }

        tracing::info!("Connected to relay at {}", self.url);
        self.set_state(ConnectionState::Connected).await;

        let events = events.clone();
        let mut read_handle = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match BroadcastMessage::parse(&text) {
                        Ok(message) => {
                            if events.inbound(message).await.is_err() {
                                return SessionEnd::RuntimeClosed;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed relay frame"),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Relay closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
            SessionEnd::Closed
        });

        let mut write_handle = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!(error = %e, "Failed to send frame");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let end = tokio::select! {
            _ = shutdown.cancelled() => SessionEnd::Shutdown,
            result = &mut read_handle => result.unwrap_or(SessionEnd::Closed),
            _ = &mut write_handle => SessionEnd::Closed,
        };

        self.tx.lock().await.take();
        read_handle.abort();
        write_handle.abort();
        self.set_state(ConnectionState::Disconnected).await;

        Ok(end)
    }
}

#[async_trait]
impl BroadcastPort for BroadcastClient {
    async fn publish(&self, message: BroadcastMessage) {
        let tx = {
            let tx_lock = self.tx.lock().await;
            tx_lock.clone()
        };
        let Some(tx) = tx else {
            tracing::warn!(device_id = %message.device_id, "Not connected to relay, dropping broadcast");
            return;
        };

        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast");
                return;
            }
        };
        if let Err(e) = tx.try_send(text) {
            tracing::warn!(error = %e, "Relay link busy or closed, dropping broadcast");
        }
    }
}
