//! ChatCall - Chat-Sitzung und P2P-Anrufe
//!
//! Client-Kern einer Chat-Anwendung mit:
//! - WebSocket-Realtime-Kanal für Nachrichten, Tipp-Indikatoren und Call-Signaling
//! - WebRTC für P2P Audio/Video
//! - REST-API für Chats und Nachrichten
//! - ICE-Credentials mit Cache und STUN-Fallback

pub mod call_engine;
pub mod chat;
pub mod config;
pub mod ice;
pub mod signaling;

use call_engine::{CallEngine, CallEngineError, DeviceMedia, RtcPeerFactory};
use chat::{ChatError, ChatStore, HttpChatApi};
use config::AppConfig;
use ice::{HttpIceSource, IceConfigCache};
use parking_lot::Mutex;
use signaling::{IncomingEvent, SignalingClient, SignalingError, SignalingEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default-Filter, falls `RUST_LOG` nicht gesetzt ist
const DEFAULT_LOG_FILTER: &str = "chatcall_lib=debug,webrtc=warn";

/// Initialisiert Logging; mehrfacher Aufruf ist harmlos
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Call(#[from] CallEngineError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

// ============================================================================
// APPLICATION
// ============================================================================

/// Vom Login ausgestellte Identität
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub token: String,
}

/// Verdrahtet Realtime-Kanal, Call Engine und Chat Store
///
/// Der Router abonniert den Realtime-Kanal genau einmal beim Start;
/// `dispose` beendet ihn zusammen mit Anruf und Verbindung.
pub struct ChatApp {
    config: AppConfig,
    user_id: String,
    signaling: Arc<SignalingClient>,
    calls: Arc<CallEngine>,
    chat: Arc<ChatStore>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ChatApp {
    /// Lädt die Konfiguration und startet die App
    pub async fn start_from_env(session: AuthSession) -> Result<Arc<Self>, AppError> {
        let config = AppConfig::load().map_err(|e| AppError::Config(e.to_string()))?;
        Self::start(config, session).await
    }

    /// Baut alle Komponenten auf, verbindet und lädt Benutzer und Chats
    pub async fn start(config: AppConfig, session: AuthSession) -> Result<Arc<Self>, AppError> {
        tracing::info!("Starting chat session for {}", session.user_id);

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| AppError::Http(e.to_string()))?;

        let signaling = Arc::new(SignalingClient::new(
            config.signaling_url.clone(),
            session.token.clone(),
            config.heartbeat_interval(),
            config.event_capacity,
        ));

        let ice_source = Arc::new(HttpIceSource::new(
            http.clone(),
            config.ice_url(),
            Some(session.token.clone()),
        ));
        let ice = Arc::new(
            IceConfigCache::new(ice_source, config.ice_cache_ttl(), &config.fallback_stun_urls)
                .with_fetch_timeout(config.ice_fetch_timeout()),
        );

        let calls = Arc::new(CallEngine::new(
            Arc::new(DeviceMedia::new()),
            Arc::new(RtcPeerFactory::new()),
            ice,
            signaling.clone(),
            config.event_capacity,
        ));

        let api = Arc::new(HttpChatApi::new(http, &config.api_url, session.token));
        let chat = Arc::new(ChatStore::new(
            api,
            session.user_id.clone(),
            config.event_capacity,
        ));

        // Vor dem Verbinden abonnieren, damit kein Event verloren geht
        let router = tokio::spawn(run_router(
            signaling.subscribe(),
            Arc::clone(&calls),
            Arc::clone(&chat),
        ));

        let app = Arc::new(Self {
            config,
            user_id: session.user_id,
            signaling,
            calls,
            chat,
            router: Mutex::new(Some(router)),
        });

        app.signaling.connect().await?;
        app.chat.fetch_all_users().await?;
        app.chat.fetch_chats().await?;

        Ok(app)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn calls(&self) -> &Arc<CallEngine> {
        &self.calls
    }

    pub fn chat(&self) -> &Arc<ChatStore> {
        &self.chat
    }

    pub fn is_connected(&self) -> bool {
        self.signaling.is_connected()
    }

    /// Öffnet eine Unterhaltung und betritt ihren Realtime-Raum
    pub async fn open_chat(&self, chat_id: &str) -> Result<(), AppError> {
        if let Some(previous) = self.chat.open_chat_id() {
            if previous != chat_id {
                self.signaling.leave_chat(&previous)?;
            }
        }

        self.chat.fetch_single_chat(chat_id).await?;
        self.signaling.join_chat(chat_id)?;
        Ok(())
    }

    pub fn close_chat(&self) -> Result<(), AppError> {
        if let Some(chat_id) = self.chat.open_chat_id() {
            self.chat.close_chat();
            self.signaling.leave_chat(&chat_id)?;
        }
        Ok(())
    }

    /// Sendet `typing:start` bzw. `typing:stop`
    pub fn set_typing(&self, chat_id: &str, typing: bool) -> Result<(), AppError> {
        self.signaling.send_typing(chat_id, typing)?;
        Ok(())
    }

    /// Beendet Router, Anruf und Verbindung
    pub async fn dispose(&self) {
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        self.calls.end_call().await;
        self.signaling.disconnect();
        tracing::info!("Chat session disposed");
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
    }
}

impl std::fmt::Debug for ChatApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatApp")
            .field("user_id", &self.user_id)
            .field("signaling", &self.signaling)
            .field("calls", &self.calls)
            .finish()
    }
}

// ============================================================================
// EVENT ROUTER
// ============================================================================

async fn run_router(
    mut rx: broadcast::Receiver<SignalingEvent>,
    calls: Arc<CallEngine>,
    chat: Arc<ChatStore>,
) {
    loop {
        match rx.recv().await {
            Ok(SignalingEvent::Received(event)) => route_event(event, &calls, &chat).await,
            Ok(SignalingEvent::Connected) => {
                tracing::info!("Connected to realtime server");
            }
            Ok(SignalingEvent::Disconnected) => {
                tracing::warn!("Disconnected from realtime server");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Event router lagged, {} event(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Leitet ein Server-Event an Call Engine bzw. Chat Store weiter
pub async fn route_event(event: IncomingEvent, calls: &CallEngine, chat: &ChatStore) {
    match event {
        IncomingEvent::CallIncoming(call) => calls.handle_incoming_call(call).await,
        IncomingEvent::CallOffer(offer) => calls.handle_offer(offer).await,
        IncomingEvent::CallAnswer(answer) => calls.handle_answer(answer).await,
        IncomingEvent::CallCandidate(candidate) => calls.handle_candidate(candidate).await,
        IncomingEvent::CallAccept(accept) => calls.handle_accept(accept).await,
        IncomingEvent::CallReject(hangup) => calls.handle_reject(hangup).await,
        IncomingEvent::CallEnd(hangup) => calls.handle_end(hangup).await,

        IncomingEvent::MessageNew(message) => {
            let chat_id = message.chat_id.clone();
            chat.add_new_message(&chat_id, message);
        }
        IncomingEvent::TypingStart(notice) => {
            // Eigene Tipp-Events kommen vom Server nicht zurück, trotzdem filtern
            if notice.user_id != chat.current_user_id() {
                let name = chat.user_name(&notice.user_id).unwrap_or(notice.user_id);
                chat.add_typing_user(&notice.chat_id, &name);
            }
        }
        IncomingEvent::TypingStop(notice) => {
            if notice.user_id != chat.current_user_id() {
                let name = chat.user_name(&notice.user_id).unwrap_or(notice.user_id);
                chat.remove_typing_user(&notice.chat_id, &name);
            }
        }
        IncomingEvent::ChatNew(new_chat) => chat.add_new_chat(new_chat),
        IncomingEvent::ChatUpdate(update) => {
            chat.update_chat_last_message(&update.chat_id, update.last_message);
        }
    }
}
