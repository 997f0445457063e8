//! WebSocket Client für den Realtime-Server
//!
//! Verwaltet die WebSocket-Verbindung:
//! - Authentifizierung über Token im Query-String
//! - Heartbeat per Ping
//! - Event-basierte Kommunikation (broadcast an alle Subscriber)

use super::messages::*;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Verbunden mit dem Server
    Connected,

    /// Verbindung getrennt
    Disconnected,

    /// Event vom Server empfangen
    Received(IncomingEvent),
}

// ============================================================================
// SINK
// ============================================================================

/// Ausgehende Seite des Realtime-Kanals
///
/// `emit` blockiert nie; die Nachricht wird nur in die Sende-Queue gelegt.
pub trait SignalingSink: Send + Sync {
    fn emit(&self, event: OutgoingEvent) -> Result<(), SignalingError>;
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

pub struct SignalingClient {
    server_url: String,
    token: String,
    heartbeat: Duration,
    state: Arc<RwLock<ClientState>>,
    tx: RwLock<Option<mpsc::Sender<Message>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingClient {
    pub fn new(server_url: String, token: String, heartbeat: Duration, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            server_url,
            token,
            heartbeat,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: RwLock::new(None),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// URL mit angehängtem Auth-Token
    fn connect_url(&self) -> Result<url::Url, SignalingError> {
        let mut url = url::Url::parse(&self.server_url)
            .map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// Verbindet mit dem Server und startet Read-, Write- und Heartbeat-Task
    pub async fn connect(&self) -> Result<(), SignalingError> {
        if self.is_connected() {
            return Ok(());
        }

        let url = self.connect_url()?;
        tracing::info!("Connecting to realtime server: {}", self.server_url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Message>(256);
        *self.tx.write() = Some(tx.clone());
        self.state.write().is_connected = true;
        let _ = self.event_tx.send(SignalingEvent::Connected);

        // Read-Task
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => Self::handle_frame(&text, &event_tx),
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state.write().is_connected = false;
            let _ = event_tx.send(SignalingEvent::Disconnected);
        });

        // Write-Task
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        // Heartbeat-Task, hält Proxies mit Idle-Timeout offen
        let heartbeat_tx = tx;
        let period = self.heartbeat;
        let state = Arc::clone(&self.state);
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !state.read().is_connected {
                    tracing::info!("Heartbeat: client disconnected, stopping heartbeat task");
                    break;
                }
                if heartbeat_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        *self.tasks.lock() = vec![reader, writer, heartbeat];
        Ok(())
    }

    /// Parst einen Text-Frame und leitet ihn an die Subscriber weiter
    fn handle_frame(text: &str, event_tx: &broadcast::Sender<SignalingEvent>) {
        match serde_json::from_str::<IncomingEvent>(text) {
            Ok(event) => {
                let _ = event_tx.send(SignalingEvent::Received(event));
            }
            Err(e) => {
                // Unbekannte Events (Presence etc.) sind kein Fehler
                tracing::debug!("Ignoring frame: {}", e);
            }
        }
    }

    /// Trennt die Verbindung und beendet alle Tasks
    pub fn disconnect(&self) {
        *self.tx.write() = None;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let was_connected = std::mem::take(&mut self.state.write().is_connected);
        if was_connected {
            let _ = self.event_tx.send(SignalingEvent::Disconnected);
        }
    }

    pub fn send_typing(&self, chat_id: &str, typing: bool) -> Result<(), SignalingError> {
        let payload = ChatRoomPayload {
            chat_id: chat_id.to_string(),
        };
        self.emit(if typing {
            OutgoingEvent::TypingStart(payload)
        } else {
            OutgoingEvent::TypingStop(payload)
        })
    }

    pub fn join_chat(&self, chat_id: &str) -> Result<(), SignalingError> {
        self.emit(OutgoingEvent::ChatJoin(ChatRoomPayload {
            chat_id: chat_id.to_string(),
        }))
    }

    pub fn leave_chat(&self, chat_id: &str) -> Result<(), SignalingError> {
        self.emit(OutgoingEvent::ChatLeave(ChatRoomPayload {
            chat_id: chat_id.to_string(),
        }))
    }
}

impl SignalingSink for SignalingClient {
    fn emit(&self, event: OutgoingEvent) -> Result<(), SignalingError> {
        let tx = self.tx.read().clone().ok_or(SignalingError::NotConnected)?;

        let text =
            serde_json::to_string(&event).map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tracing::debug!("Emitting {}", event.name());

        // try_send ist non-blocking
        tx.try_send(Message::Text(text))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}
