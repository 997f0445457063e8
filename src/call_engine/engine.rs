//! Call Engine - Signaling-Zustandsautomat
//!
//! Besitzt die eine Peer Connection und die lokalen/entfernten Streams.
//! Offer, Answer und Candidates laufen über den Realtime-Kanal. Was für den
//! laufenden Anruf vor der Peer Connection ankommt, wird gepuffert; Signale
//! ohne passenden Anruf werden verworfen.
//!
//! Jede Operation, die zwischendurch wartet (Media, ICE, SDP), merkt sich
//! die Epoche der Session. `end_call` erhöht die Epoche; eine laufende
//! Operation erkennt das nach dem nächsten `await`, gibt frei, was sie
//! selbst erzeugt hat, und endet mit `CallEngineError::Cancelled`.

use super::media::{MediaConstraints, MediaDevices, MediaError, MediaStream, RemoteStream, RemoteTrack};
use super::peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerHandlers};
use crate::ice::{IceConfig, IceConfigCache};
use crate::signaling::{
    AcceptPayload, CallType, CandidatePayload, EndPayload, IceCandidate, IncomingCall,
    InvitePayload, OutgoingEvent, RejectPayload, RemoteAccept, RemoteCandidate,
    RemoteHangup, RemoteSdp, SdpPayload, SessionDescription, SignalingError, SignalingSink,
};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Grund für die automatische Ablehnung während eines Anrufs
pub const BUSY_REASON: &str = "busy";

/// Grund in `call:end` beim Auflegen
pub const END_REASON: &str = "ended";

/// Grund in `call:reject`, wenn das Annehmen scheitert
pub const UNAVAILABLE_REASON: &str = "unavailable";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum CallEngineError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Peer connection error: {0}")]
    Peer(#[from] PeerError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No incoming call")]
    NoIncomingCall,

    #[error("Call was ended while the operation was in flight")]
    Cancelled,
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Gegenseite und Kontext eines Anrufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPeer {
    pub chat_id: String,
    pub peer_user_id: String,
    pub call_type: CallType,
}

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    /// Kein aktiver Anruf
    #[default]
    Idle,
    /// Ausgehender Anruf klingelt bei der Gegenseite
    Calling(CallPeer),
    /// Eingehender Anruf wartet auf Antwort
    Ringing(IncomingCall),
    /// Eingehender Anruf wird angenommen
    Connecting(CallPeer),
    /// Anruf aktiv
    Connected(CallPeer),
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            CallState::Idle => None,
            CallState::Ringing(call) => Some(&call.chat_id),
            CallState::Calling(p) | CallState::Connecting(p) | CallState::Connected(p) => {
                Some(&p.chat_id)
            }
        }
    }

    /// Gegenseite, sobald ein Anruf aufgebaut wird
    pub fn peer(&self) -> Option<&CallPeer> {
        match self {
            CallState::Calling(p) | CallState::Connecting(p) | CallState::Connected(p) => Some(p),
            _ => None,
        }
    }
}

/// Events die vom CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    IncomingCall(IncomingCall),
    RemoteStreamUpdated(RemoteStream),
    /// Gegenseite hat angenommen; der Zustand ändert sich erst mit der Answer
    RemoteAccepted { chat_id: String },
    /// Einladung wurde wegen eines laufenden Anrufs abgelehnt
    BusyRejected { chat_id: String, from_user_id: String },
    Error(String),
}

/// Lesende Sicht auf die Session
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub state: CallState,
    pub in_call: bool,
    pub call_type: Option<CallType>,
    pub peer_user_id: Option<String>,
    pub chat_id: Option<String>,
    pub local_stream: Option<Arc<MediaStream>>,
    pub remote_stream: Option<RemoteStream>,
    pub muted: bool,
    pub camera_off: bool,
    pub incoming_call: Option<IncomingCall>,
    pub has_pending_offer: bool,
    pub pending_candidates: usize,
    pub has_peer_connection: bool,
}

// ============================================================================
// SESSION
// ============================================================================

struct PendingOffer {
    chat_id: String,
    sdp: SessionDescription,
}

struct PendingCandidate {
    chat_id: String,
    candidate: IceCandidate,
}

#[derive(Default)]
struct CallSession {
    state: CallState,
    local_stream: Option<Arc<MediaStream>>,
    remote_stream: Option<RemoteStream>,
    muted: bool,
    camera_off: bool,
    pending_offer: Option<PendingOffer>,
    pending_candidates: Vec<PendingCandidate>,
    peer: Option<Arc<dyn PeerConnection>>,
    /// Candidates dürfen erst danach angewendet werden
    remote_description_set: bool,
    epoch: u64,
}

impl CallSession {
    fn clear_pending(&mut self) {
        self.pending_offer = None;
        self.pending_candidates.clear();
    }
}

// ============================================================================
// CALL ENGINE
// ============================================================================

pub struct CallEngine {
    session: Arc<Mutex<CallSession>>,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    ice: Arc<IceConfigCache>,
    signaling: Arc<dyn SignalingSink>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallEngine {
    pub fn new(
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        ice: Arc<IceConfigCache>,
        signaling: Arc<dyn SignalingSink>,
        capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            session: Arc::new(Mutex::new(CallSession::default())),
            media,
            peers,
            ice,
            signaling,
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.session.lock().state.clone()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let s = self.session.lock();
        let peer = s.state.peer();

        CallSnapshot {
            state: s.state.clone(),
            in_call: s.peer.is_some() && s.local_stream.is_some(),
            call_type: peer.map(|p| p.call_type),
            peer_user_id: peer.map(|p| p.peer_user_id.clone()),
            chat_id: peer.map(|p| p.chat_id.clone()),
            local_stream: s.local_stream.clone(),
            remote_stream: s.remote_stream.clone(),
            muted: s.muted,
            camera_off: s.camera_off,
            incoming_call: match &s.state {
                CallState::Ringing(call) => Some(call.clone()),
                _ => None,
            },
            has_pending_offer: s.pending_offer.is_some(),
            pending_candidates: s.pending_candidates.len(),
            has_peer_connection: s.peer.is_some(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.session.lock().muted
    }

    pub fn is_camera_off(&self) -> bool {
        self.session.lock().camera_off
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    ///
    /// Sendet `call:invite` und danach `call:offer`. Scheitert ein Schritt,
    /// wird die Session wie bei `end_call` abgebaut.
    pub async fn start_call(
        &self,
        chat_id: String,
        to_user_id: String,
        call_type: CallType,
    ) -> Result<(), CallEngineError> {
        let target = CallPeer {
            chat_id,
            peer_user_id: to_user_id,
            call_type,
        };

        let epoch = {
            let mut s = self.session.lock();
            if !s.state.is_idle() {
                return Err(CallEngineError::AlreadyInCall);
            }
            s.state = CallState::Calling(target.clone());
            s.muted = false;
            s.camera_off = !call_type.wants_video();
            s.clear_pending();
            s.epoch
        };

        tracing::info!(
            "Starting {:?} call to {} in chat {}",
            call_type,
            target.peer_user_id,
            target.chat_id
        );
        self.publish_state();

        match self.run_start_call(epoch, &target).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(epoch, e).await.0),
        }
    }

    async fn run_start_call(&self, epoch: u64, target: &CallPeer) -> Result<(), CallEngineError> {
        let stream = self.acquire_media(epoch, target.call_type).await?;

        let ice = self.ice_config().await;
        self.ensure_current(epoch)?;

        let peer = self
            .peers
            .create(ice, self.peer_handlers(epoch, target))
            .await?;
        self.install_peer(epoch, Arc::clone(&peer), &stream).await?;

        self.send(OutgoingEvent::CallInvite(InvitePayload {
            chat_id: target.chat_id.clone(),
            to_user_id: target.peer_user_id.clone(),
            call_type: target.call_type,
        }))?;

        let offer = peer.create_offer().await?;
        self.ensure_current(epoch)?;
        peer.set_local_description(offer.clone()).await?;
        self.ensure_current(epoch)?;

        self.send(OutgoingEvent::CallOffer(SdpPayload {
            chat_id: target.chat_id.clone(),
            to_user_id: target.peer_user_id.clone(),
            sdp: offer,
        }))?;

        tracing::debug!("Offer sent to {}", target.peer_user_id);
        Ok(())
    }

    /// Nimmt den eingehenden Anruf an
    pub async fn accept_call(&self) -> Result<(), CallEngineError> {
        let (epoch, target) = {
            let mut s = self.session.lock();
            let call = match &s.state {
                CallState::Ringing(call) => call.clone(),
                _ => return Err(CallEngineError::NoIncomingCall),
            };
            let target = CallPeer {
                chat_id: call.chat_id,
                peer_user_id: call.from_user_id,
                call_type: call.call_type,
            };
            s.state = CallState::Connecting(target.clone());
            s.muted = false;
            s.camera_off = !target.call_type.wants_video();
            (s.epoch, target)
        };

        tracing::info!("Accepting call from {}", target.peer_user_id);
        self.publish_state();

        match self.run_accept_call(epoch, &target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let (err, notified) = self.abort(epoch, e).await;
                // Ohne Peer Connection ging kein call:end raus
                if !notified && !matches!(err, CallEngineError::Cancelled) {
                    self.send_best_effort(OutgoingEvent::CallReject(RejectPayload {
                        chat_id: target.chat_id.clone(),
                        to_user_id: target.peer_user_id.clone(),
                        reason: Some(UNAVAILABLE_REASON.to_string()),
                    }));
                }
                Err(err)
            }
        }
    }

    async fn run_accept_call(&self, epoch: u64, target: &CallPeer) -> Result<(), CallEngineError> {
        let stream = self.acquire_media(epoch, target.call_type).await?;

        let ice = self.ice_config().await;
        self.ensure_current(epoch)?;

        let peer = self
            .peers
            .create(ice, self.peer_handlers(epoch, target))
            .await?;
        let pending_offer = self.install_peer(epoch, Arc::clone(&peer), &stream).await?;

        self.send(OutgoingEvent::CallAccept(AcceptPayload {
            chat_id: target.chat_id.clone(),
            to_user_id: target.peer_user_id.clone(),
        }))?;

        // Offer kam vor dem Annehmen
        if let Some(offer) = pending_offer {
            tracing::debug!("Applying buffered offer for chat {}", offer.chat_id);
            self.answer_offer(epoch, &peer, target, offer.sdp).await?;
        }

        let promoted = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                false
            } else {
                s.state = CallState::Connected(target.clone());
                true
            }
        };
        if !promoted {
            return Err(CallEngineError::Cancelled);
        }

        tracing::info!("Call with {} active", target.peer_user_id);
        self.publish_state();
        Ok(())
    }

    /// Lehnt den eingehenden Anruf ab
    pub async fn reject_call(&self) -> Result<(), CallEngineError> {
        let call = match &self.session.lock().state {
            CallState::Ringing(call) => call.clone(),
            _ => return Err(CallEngineError::NoIncomingCall),
        };

        tracing::info!("Rejecting call from {}", call.from_user_id);
        self.shutdown().await;

        self.send_best_effort(OutgoingEvent::CallReject(RejectPayload {
            chat_id: call.chat_id,
            to_user_id: call.from_user_id,
            reason: None,
        }));
        Ok(())
    }

    /// Beendet den aktuellen Anruf; aus jedem Zustand aufrufbar
    pub async fn end_call(&self) {
        self.shutdown().await;
    }

    /// Schaltet alle Audio-Tracks um und gibt den neuen Mute-Status zurück
    pub fn toggle_mute(&self) -> bool {
        let mut s = self.session.lock();
        let Some(stream) = s.local_stream.clone() else {
            return s.muted;
        };

        for track in stream.audio_tracks() {
            track.set_enabled(!track.is_enabled());
        }
        s.muted = !s.muted;
        tracing::debug!("Audio muted: {}", s.muted);
        s.muted
    }

    /// Schaltet alle Video-Tracks um und gibt zurück, ob die Kamera aus ist
    pub fn toggle_camera(&self) -> bool {
        let mut s = self.session.lock();
        let Some(stream) = s.local_stream.clone() else {
            return s.camera_off;
        };

        for track in stream.video_tracks() {
            track.set_enabled(!track.is_enabled());
        }
        s.camera_off = !s.camera_off;
        tracing::debug!("Camera off: {}", s.camera_off);
        s.camera_off
    }

    // ========================================================================
    // REMOTE SIGNALS
    // ========================================================================

    /// `call:incoming`
    pub async fn handle_incoming_call(&self, call: IncomingCall) {
        enum Decision {
            Ring,
            Busy,
            Duplicate,
        }

        let decision = {
            let mut s = self.session.lock();
            let decision = match &s.state {
                CallState::Idle => Decision::Ring,
                CallState::Ringing(current)
                    if current.chat_id == call.chat_id
                        && current.from_user_id == call.from_user_id =>
                {
                    Decision::Duplicate
                }
                _ => Decision::Busy,
            };
            if matches!(decision, Decision::Ring) {
                // Signale aus einer früheren Sitzung gelten nicht für diesen Anruf
                s.clear_pending();
                s.state = CallState::Ringing(call.clone());
            }
            decision
        };

        match decision {
            Decision::Ring => {
                tracing::info!("Incoming {:?} call from {}", call.call_type, call.from_user_id);
                let _ = self.event_tx.send(CallEvent::IncomingCall(call));
                self.publish_state();
            }
            Decision::Busy => {
                tracing::info!("Busy, rejecting call from {}", call.from_user_id);
                self.send_best_effort(OutgoingEvent::CallReject(RejectPayload {
                    chat_id: call.chat_id.clone(),
                    to_user_id: call.from_user_id.clone(),
                    reason: Some(BUSY_REASON.to_string()),
                }));
                let _ = self.event_tx.send(CallEvent::BusyRejected {
                    chat_id: call.chat_id,
                    from_user_id: call.from_user_id,
                });
            }
            Decision::Duplicate => {
                tracing::debug!("Ignoring duplicate invite from {}", call.from_user_id);
            }
        }
    }

    /// `call:offer`
    ///
    /// Vor dem Annehmen wird gepuffert, ohne Anruf in diesem Chat verworfen.
    pub async fn handle_offer(&self, offer: RemoteSdp) {
        let live = {
            let mut s = self.session.lock();
            let same_chat = s.state.chat_id() == Some(offer.chat_id.as_str());

            match (s.peer.clone(), s.state.peer().cloned()) {
                (None, _) if same_chat => {
                    tracing::debug!("Buffering offer from {}", offer.from_user_id);
                    s.pending_offer = Some(PendingOffer {
                        chat_id: offer.chat_id,
                        sdp: offer.sdp,
                    });
                    return;
                }
                (Some(peer), Some(target)) if same_chat => (peer, target, s.epoch),
                _ => {
                    tracing::debug!("Dropping offer for chat {}", offer.chat_id);
                    return;
                }
            }
        };

        let (peer, target, epoch) = live;
        if let Err(e) = self.answer_offer(epoch, &peer, &target, offer.sdp).await {
            self.abort(epoch, e).await;
        }
    }

    /// `call:answer`
    pub async fn handle_answer(&self, answer: RemoteSdp) {
        let live = {
            let mut s = self.session.lock();
            let target = match &s.state {
                CallState::Calling(target) if target.chat_id == answer.chat_id => Some(target.clone()),
                _ => None,
            };
            match (target, s.peer.clone()) {
                (Some(target), Some(peer)) => {
                    s.state = CallState::Connected(target.clone());
                    Some((peer, target, s.epoch))
                }
                _ => None,
            }
        };

        let Some((peer, target, epoch)) = live else {
            tracing::debug!("Ignoring late answer for chat {}", answer.chat_id);
            return;
        };

        tracing::info!("Call with {} active", target.peer_user_id);
        self.publish_state();

        let result: Result<(), CallEngineError> = async {
            peer.set_remote_description(answer.sdp).await?;
            self.flush_candidates(epoch, &peer, &target.chat_id).await;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.abort(epoch, e).await;
        }
    }

    /// `call:candidate`
    pub async fn handle_candidate(&self, remote: RemoteCandidate) {
        let ready = {
            let mut s = self.session.lock();
            if s.state.chat_id() != Some(remote.chat_id.as_str()) {
                tracing::debug!("Dropping candidate for chat {}", remote.chat_id);
                return;
            }

            match s.peer.clone() {
                Some(peer) if s.remote_description_set => Some(peer),
                _ => {
                    s.pending_candidates.push(PendingCandidate {
                        chat_id: remote.chat_id,
                        candidate: remote.candidate.clone(),
                    });
                    None
                }
            }
        };

        if let Some(peer) = ready {
            if let Err(e) = peer.add_ice_candidate(remote.candidate).await {
                tracing::warn!("Failed to add ICE candidate: {}", e);
            }
        }
    }

    /// `call:accept` hat keinen Einfluss auf den Zustand
    pub async fn handle_accept(&self, accept: RemoteAccept) {
        let same_chat = self.session.lock().state.chat_id() == Some(accept.chat_id.as_str());
        if same_chat {
            tracing::info!("{} accepted the call", accept.from_user_id);
            let _ = self.event_tx.send(CallEvent::RemoteAccepted {
                chat_id: accept.chat_id,
            });
        }
    }

    /// `call:reject` der Gegenseite
    pub async fn handle_reject(&self, hangup: RemoteHangup) {
        self.remote_hangup(hangup, "rejected").await;
    }

    /// `call:end` der Gegenseite
    pub async fn handle_end(&self, hangup: RemoteHangup) {
        self.remote_hangup(hangup, "ended").await;
    }

    async fn remote_hangup(&self, hangup: RemoteHangup, action: &str) {
        let same_chat = self.session.lock().state.chat_id() == Some(hangup.chat_id.as_str());
        if !same_chat {
            tracing::debug!("Ignoring call:{} for chat {}", action, hangup.chat_id);
            return;
        }

        tracing::info!(
            "Call {} by remote ({})",
            action,
            hangup.reason.as_deref().unwrap_or("no reason")
        );
        self.shutdown().await;
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn is_current(&self, epoch: u64) -> bool {
        self.session.lock().epoch == epoch
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), CallEngineError> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(CallEngineError::Cancelled)
        }
    }

    async fn ice_config(&self) -> Arc<IceConfig> {
        let ice = self.ice.get().await;
        if ice.is_stun_only() {
            tracing::warn!("No TURN relay available, calls behind symmetric NAT may fail");
        }
        ice
    }

    /// Holt Mikrofon (+ Kamera) und legt den Stream in die Session
    async fn acquire_media(
        &self,
        epoch: u64,
        call_type: CallType,
    ) -> Result<Arc<MediaStream>, CallEngineError> {
        let stream = Arc::new(
            self.media
                .acquire(MediaConstraints::for_call(call_type))
                .await?,
        );

        let installed = {
            let mut s = self.session.lock();
            if s.epoch == epoch {
                s.local_stream = Some(Arc::clone(&stream));
                true
            } else {
                false
            }
        };

        if !installed {
            stream.stop();
            return Err(CallEngineError::Cancelled);
        }
        Ok(stream)
    }

    /// Hängt die lokalen Tracks an und übernimmt die Verbindung in die Session
    ///
    /// Gibt ein gepuffertes Offer für diesen Chat zurück.
    async fn install_peer(
        &self,
        epoch: u64,
        peer: Arc<dyn PeerConnection>,
        stream: &MediaStream,
    ) -> Result<Option<PendingOffer>, CallEngineError> {
        for track in stream.tracks() {
            if let Err(e) = peer.add_track(Arc::clone(track)).await {
                let _ = peer.close().await;
                return Err(e.into());
            }
        }

        let installed = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                None
            } else {
                s.peer = Some(Arc::clone(&peer));
                s.remote_description_set = false;
                Some(s.pending_offer.take())
            }
        };

        match installed {
            Some(pending_offer) => Ok(pending_offer),
            None => {
                let _ = peer.close().await;
                Err(CallEngineError::Cancelled)
            }
        }
    }

    /// Wendet ein Offer an, sendet die Answer und spielt gepufferte Candidates ein
    async fn answer_offer(
        &self,
        epoch: u64,
        peer: &Arc<dyn PeerConnection>,
        target: &CallPeer,
        sdp: SessionDescription,
    ) -> Result<(), CallEngineError> {
        peer.set_remote_description(sdp).await?;
        self.ensure_current(epoch)?;

        let answer = peer.create_answer().await?;
        self.ensure_current(epoch)?;
        peer.set_local_description(answer.clone()).await?;
        self.ensure_current(epoch)?;

        self.send(OutgoingEvent::CallAnswer(SdpPayload {
            chat_id: target.chat_id.clone(),
            to_user_id: target.peer_user_id.clone(),
            sdp: answer,
        }))?;

        self.flush_candidates(epoch, peer, &target.chat_id).await;
        Ok(())
    }

    /// Spielt gepufferte Candidates in Empfangsreihenfolge ein
    ///
    /// Candidates, die währenddessen ankommen, landen ebenfalls im Puffer
    /// und werden in der nächsten Runde angewendet.
    async fn flush_candidates(&self, epoch: u64, peer: &Arc<dyn PeerConnection>, chat_id: &str) {
        loop {
            let batch: Vec<PendingCandidate> = {
                let mut s = self.session.lock();
                if s.epoch != epoch {
                    return;
                }
                let (batch, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut s.pending_candidates)
                    .into_iter()
                    .partition(|c| c.chat_id == chat_id);
                s.pending_candidates = rest;
                if batch.is_empty() {
                    s.remote_description_set = true;
                    return;
                }
                batch
            };

            tracing::debug!("Applying {} buffered ICE candidate(s)", batch.len());
            for pending in batch {
                if let Err(e) = peer.add_ice_candidate(pending.candidate).await {
                    tracing::warn!("Failed to add buffered ICE candidate: {}", e);
                }
            }
        }
    }

    /// Callbacks der Peer Connection, gebunden an die aktuelle Epoche
    fn peer_handlers(&self, epoch: u64, target: &CallPeer) -> PeerHandlers {
        let session = Arc::clone(&self.session);
        let signaling = Arc::clone(&self.signaling);
        let chat_id = target.chat_id.clone();
        let to_user_id = target.peer_user_id.clone();

        let on_ice_candidate = Box::new(move |candidate: IceCandidate| {
            if session.lock().epoch != epoch {
                return;
            }
            let event = OutgoingEvent::CallCandidate(CandidatePayload {
                chat_id: chat_id.clone(),
                to_user_id: to_user_id.clone(),
                candidate,
            });
            if let Err(e) = signaling.emit(event) {
                tracing::warn!("Failed to relay ICE candidate: {}", e);
            }
        });

        let session = Arc::clone(&self.session);
        let event_tx = self.event_tx.clone();
        let on_track = Box::new(move |track: RemoteTrack| {
            let stream = {
                let mut s = session.lock();
                if s.epoch != epoch {
                    return;
                }
                let merged = RemoteStream::merge(s.remote_stream.take(), track);
                s.remote_stream = Some(merged.clone());
                merged
            };
            let _ = event_tx.send(CallEvent::RemoteStreamUpdated(stream));
        });

        PeerHandlers {
            on_ice_candidate,
            on_track,
        }
    }

    /// Baut die Session nach einem Fehler ab
    ///
    /// Gibt den endgültigen Fehler zurück und ob die Gegenseite `call:end`
    /// bekommen hat. Hat `end_call` die Session schon abgebaut, wird daraus
    /// `Cancelled`.
    async fn abort(&self, epoch: u64, err: CallEngineError) -> (CallEngineError, bool) {
        if !self.is_current(epoch) {
            return (CallEngineError::Cancelled, false);
        }

        tracing::error!("Call failed: {}", err);
        if matches!(err, CallEngineError::Peer(_)) {
            // Abgelaufene TURN-Credentials nicht für den nächsten Versuch behalten
            self.ice.invalidate().await;
        }
        let notified = self.shutdown().await;
        let _ = self.event_tx.send(CallEvent::Error(err.to_string()));
        (err, notified)
    }

    /// Setzt die Session zurück und gibt alle Ressourcen frei
    ///
    /// Gibt zurück, ob `call:end` an die Gegenseite ging.
    async fn shutdown(&self) -> bool {
        let old = {
            let mut s = self.session.lock();
            let next_epoch = s.epoch.wrapping_add(1);
            let old = std::mem::take(&mut *s);
            s.epoch = next_epoch;
            old
        };

        let was_idle = old.state.is_idle() && old.peer.is_none() && old.local_stream.is_none();

        if let Some(stream) = &old.local_stream {
            stream.stop();
        }

        let mut notified = false;
        if let Some(peer) = &old.peer {
            if let Some(target) = old.state.peer() {
                self.send_best_effort(OutgoingEvent::CallEnd(EndPayload {
                    chat_id: target.chat_id.clone(),
                    to_user_id: target.peer_user_id.clone(),
                    reason: END_REASON.to_string(),
                }));
                notified = true;
            }
            if let Err(e) = peer.close().await {
                tracing::debug!("Closing peer connection failed: {}", e);
            }
        }

        if !was_idle {
            tracing::info!("Call ended");
            let _ = self.event_tx.send(CallEvent::StateChanged(CallState::Idle));
        }
        notified
    }

    fn send(&self, event: OutgoingEvent) -> Result<(), CallEngineError> {
        self.signaling.emit(event)?;
        Ok(())
    }

    fn send_best_effort(&self, event: OutgoingEvent) {
        let name = event.name();
        if let Err(e) = self.signaling.emit(event) {
            tracing::warn!("Failed to send {}: {}", name, e);
        }
    }

    /// Aktualisiert die UI über den aktuellen State
    fn publish_state(&self) {
        let _ = self.event_tx.send(CallEvent::StateChanged(self.state()));
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("state", &self.state())
            .field("is_muted", &self.is_muted())
            .finish()
    }
}
