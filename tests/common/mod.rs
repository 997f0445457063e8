//! In-Memory-Fakes für Media, Peer Connections, Realtime-Kanal und REST-API

#![allow(dead_code)]

use chatcall_lib::call_engine::{
    CallEngine, MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack,
    PeerConnection, PeerConnectionFactory, PeerError, PeerHandlers, RemoteTrack, TrackKind,
};
use chatcall_lib::chat::{
    Chat, ChatApi, ChatError, ChatStore, ChatWithMessages, CreateChatPayload, Message,
    MessageStatus, SendMessagePayload, SentMessage, User,
};
use chatcall_lib::ice::{IceConfig, IceConfigCache, IceCredentialSource, IceError, IceServersResponse};
use chatcall_lib::route_event;
use chatcall_lib::signaling::{
    IceCandidate, IncomingCall, IncomingEvent, OutgoingEvent, RemoteAccept, RemoteCandidate,
    RemoteHangup, RemoteSdp, SessionDescription, SignalingError, SignalingSink,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// SIGNALING
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutgoingEvent>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<OutgoingEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn snapshot(&self) -> Vec<OutgoingEvent> {
        self.events.lock().clone()
    }
}

impl SignalingSink for RecordingSink {
    fn emit(&self, event: OutgoingEvent) -> Result<(), SignalingError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Wandelt ein gesendetes Event in das, was die Gegenseite empfängt
pub fn relay(from: &str, event: OutgoingEvent) -> Option<IncomingEvent> {
    let from_user_id = from.to_string();

    Some(match event {
        OutgoingEvent::CallInvite(p) => IncomingEvent::CallIncoming(IncomingCall {
            chat_id: p.chat_id,
            from_user_id,
            call_type: p.call_type,
            timestamp: 0,
        }),
        OutgoingEvent::CallOffer(p) => IncomingEvent::CallOffer(RemoteSdp {
            chat_id: p.chat_id,
            from_user_id,
            sdp: p.sdp,
        }),
        OutgoingEvent::CallAnswer(p) => IncomingEvent::CallAnswer(RemoteSdp {
            chat_id: p.chat_id,
            from_user_id,
            sdp: p.sdp,
        }),
        OutgoingEvent::CallCandidate(p) => IncomingEvent::CallCandidate(RemoteCandidate {
            chat_id: p.chat_id,
            from_user_id,
            candidate: p.candidate,
        }),
        OutgoingEvent::CallAccept(p) => IncomingEvent::CallAccept(RemoteAccept {
            chat_id: p.chat_id,
            from_user_id,
        }),
        OutgoingEvent::CallReject(p) => IncomingEvent::CallReject(RemoteHangup {
            chat_id: p.chat_id,
            from_user_id: Some(from_user_id),
            reason: p.reason,
        }),
        OutgoingEvent::CallEnd(p) => IncomingEvent::CallEnd(RemoteHangup {
            chat_id: p.chat_id,
            from_user_id: Some(from_user_id),
            reason: Some(p.reason),
        }),
        _ => return None,
    })
}

// ============================================================================
// ICE
// ============================================================================

/// Credential-Endpoint, der nie erreichbar ist
#[derive(Default)]
pub struct OfflineIce {
    fetches: AtomicUsize,
}

impl OfflineIce {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl IceCredentialSource for OfflineIce {
    fn fetch(&self) -> BoxFuture<'_, Result<IceServersResponse, IceError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(IceError::RequestFailed("offline".into())) })
    }
}

pub fn ice_cache(source: Arc<OfflineIce>) -> Arc<IceConfigCache> {
    Arc::new(IceConfigCache::new(
        source,
        Duration::from_secs(50 * 60),
        &["stun:stun.l.google.com:19302".to_string()],
    ))
}

// ============================================================================
// MEDIA
// ============================================================================

#[derive(Default)]
pub struct FakeMedia {
    pub deny: AtomicBool,
    /// Hält `acquire` an, bis `notify_one` gerufen wird
    pub gate: Option<Arc<Notify>>,
    tracks: Mutex<Vec<Arc<MediaTrack>>>,
}

impl FakeMedia {
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Alle jemals ausgegebenen Tracks
    pub fn tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks.lock().clone()
    }
}

impl MediaDevices for FakeMedia {
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, Result<MediaStream, MediaError>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.deny.load(Ordering::SeqCst) {
                return Err(MediaError::PermissionDenied("camera blocked".into()));
            }

            let stream = MediaStream::from_constraints(constraints);
            self.tracks.lock().extend(stream.tracks().iter().cloned());
            Ok(stream)
        })
    }
}

// ============================================================================
// PEER CONNECTIONS
// ============================================================================

/// Peer Connection, die jeden Aufruf protokolliert
///
/// Die SDP enthält die Track-Arten der Seite (`"offer audio video"`);
/// `set_remote_description` meldet daraus entfernte Tracks.
pub struct FakePeer {
    id: usize,
    ops: Mutex<Vec<String>>,
    kinds: Mutex<Vec<TrackKind>>,
    handlers: PeerHandlers,
    closed: AtomicBool,
    candidates: AtomicUsize,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn sdp(&self, kind: &str) -> String {
        let mut sdp = kind.to_string();
        for k in self.kinds.lock().iter() {
            sdp.push_str(match k {
                TrackKind::Audio => " audio",
                TrackKind::Video => " video",
            });
        }
        sdp
    }

    fn log(&self, op: String) {
        self.ops.lock().push(op);
    }
}

fn sdp_kind(desc: &SessionDescription) -> String {
    format!("{:?}", desc.sdp_type).to_lowercase()
}

impl PeerConnection for FakePeer {
    fn add_track(&self, track: Arc<MediaTrack>) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.log(format!("track:{:?}", track.kind()).to_lowercase());
            self.kinds.lock().push(track.kind());
            Ok(())
        })
    }

    fn create_offer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>> {
        Box::pin(async move {
            self.log("create_offer".into());
            Ok(SessionDescription::offer(self.sdp("offer")))
        })
    }

    fn create_answer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>> {
        Box::pin(async move {
            self.log("create_answer".into());
            Ok(SessionDescription::answer(self.sdp("answer")))
        })
    }

    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.log(format!("local:{}", sdp_kind(&desc)));
            let n = self.candidates.fetch_add(1, Ordering::SeqCst);
            (self.handlers.on_ice_candidate)(IceCandidate::new(format!("host-{}-{}", self.id, n)));
            Ok(())
        })
    }

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.log(format!("remote:{}", sdp_kind(&desc)));
            for word in desc.sdp.split_whitespace() {
                let kind = match word {
                    "audio" => TrackKind::Audio,
                    "video" => TrackKind::Video,
                    _ => continue,
                };
                (self.handlers.on_track)(RemoteTrack {
                    id: format!("remote-{}", word),
                    stream_id: "remote-stream".into(),
                    kind,
                });
            }
            Ok(())
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.log(format!("candidate:{}", candidate.candidate));
            if candidate.candidate.contains("bad") {
                return Err(PeerError::InvalidCandidate(candidate.candidate));
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.log("close".into());
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    /// Lässt `create` scheitern
    pub fail: AtomicBool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

impl PeerConnectionFactory for FakePeerFactory {
    fn create(
        &self,
        _ice: Arc<IceConfig>,
        handlers: PeerHandlers,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerConnection>, PeerError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PeerError::WebRTC("ICE transport unavailable".into()));
            }
            let mut peers = self.peers.lock();
            let peer = Arc::new(FakePeer {
                id: peers.len(),
                ops: Mutex::new(Vec::new()),
                kinds: Mutex::new(Vec::new()),
                handlers,
                closed: AtomicBool::new(false),
                candidates: AtomicUsize::new(0),
            });
            peers.push(Arc::clone(&peer));
            Ok(peer as Arc<dyn PeerConnection>)
        })
    }
}

// ============================================================================
// CHAT API
// ============================================================================

pub struct FakeChatApi {
    users: Vec<User>,
    chats: Vec<Chat>,
}

impl FakeChatApi {
    pub fn new(users: Vec<User>, chats: Vec<Chat>) -> Self {
        Self { users, chats }
    }
}

impl ChatApi for FakeChatApi {
    fn fetch_all_users(&self) -> BoxFuture<'_, Result<Vec<User>, ChatError>> {
        Box::pin(async move { Ok(self.users.clone()) })
    }

    fn fetch_chats(&self) -> BoxFuture<'_, Result<Vec<Chat>, ChatError>> {
        Box::pin(async move { Ok(self.chats.clone()) })
    }

    fn create_chat(&self, _payload: CreateChatPayload) -> BoxFuture<'_, Result<Chat, ChatError>> {
        Box::pin(async { Ok(chat("new")) })
    }

    fn fetch_single_chat(
        &self,
        chat_id: String,
    ) -> BoxFuture<'_, Result<ChatWithMessages, ChatError>> {
        Box::pin(async move {
            Ok(ChatWithMessages {
                chat: chat(&chat_id),
                messages: Vec::new(),
            })
        })
    }

    fn send_message(
        &self,
        payload: SendMessagePayload,
    ) -> BoxFuture<'_, Result<SentMessage, ChatError>> {
        Box::pin(async move {
            Ok(SentMessage {
                user_message: Message {
                    id: "server-1".into(),
                    chat_id: payload.chat_id,
                    sender_id: "alice".into(),
                    content: payload.content,
                    image_url: payload.image,
                    audio_url: payload.audio,
                    reply_to_id: payload.reply_to_id,
                    created_at: chrono::Utc::now(),
                    status: MessageStatus::Sent,
                },
                chat: None,
            })
        })
    }

    fn delete_chat(&self, _chat_id: String) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
        Box::pin(async { Ok(None) })
    }
}

pub fn user(id: &str, name: &str) -> User {
    User {
        id: id.into(),
        name: name.into(),
        email: None,
        avatar: None,
        is_ai: false,
    }
}

pub fn chat(id: &str) -> Chat {
    Chat {
        id: id.into(),
        is_group: false,
        group_name: None,
        participants: Vec::new(),
        last_message: None,
        created_by: None,
        updated_at: None,
    }
}

pub fn message(id: &str, chat_id: &str, sender_id: &str, content: &str) -> Message {
    Message {
        id: id.into(),
        chat_id: chat_id.into(),
        sender_id: sender_id.into(),
        content: Some(content.into()),
        image_url: None,
        audio_url: None,
        reply_to_id: None,
        created_at: chrono::Utc::now(),
        status: MessageStatus::Sent,
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Ein Teilnehmer mit Call Engine und Chat Store auf Fakes
pub struct Client {
    pub user_id: String,
    pub engine: Arc<CallEngine>,
    pub chat: Arc<ChatStore>,
    pub sink: Arc<RecordingSink>,
    pub media: Arc<FakeMedia>,
    pub peers: Arc<FakePeerFactory>,
    pub ice: Arc<OfflineIce>,
}

impl Client {
    pub fn new(user_id: &str) -> Self {
        Self::with_media(user_id, FakeMedia::default())
    }

    pub fn with_media(user_id: &str, media: FakeMedia) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let media = Arc::new(media);
        let peers = Arc::new(FakePeerFactory::default());
        let ice = Arc::new(OfflineIce::default());

        let engine = Arc::new(CallEngine::new(
            media.clone(),
            peers.clone(),
            ice_cache(ice.clone()),
            sink.clone(),
            64,
        ));

        let api = Arc::new(FakeChatApi::new(
            vec![user("alice", "Alice"), user("bob", "Bob"), user("carol", "Carol")],
            vec![chat("c1"), chat("c2"), chat("c3")],
        ));
        let chat = Arc::new(ChatStore::new(api, user_id.to_string(), 64));

        Self {
            user_id: user_id.to_string(),
            engine,
            chat,
            sink,
            media,
            peers,
            ice,
        }
    }

    pub async fn receive(&self, event: IncomingEvent) {
        route_event(event, &self.engine, &self.chat).await;
    }

    /// Liefert alles, was `self` gesendet hat, an `to` aus
    pub async fn deliver_to(&self, to: &Client) {
        for event in self.sink.take() {
            if let Some(incoming) = relay(&self.user_id, event) {
                to.receive(incoming).await;
            }
        }
    }
}
