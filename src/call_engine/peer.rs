//! Peer-Connection-Schnittstelle
//!
//! Die Call Engine kennt nur diese Traits. `rtc::RtcPeerFactory` setzt sie
//! mit `webrtc` um, Tests verwenden In-Memory-Fakes.

use super::media::{MediaTrack, RemoteTrack};
use crate::ice::IceConfig;
use crate::signaling::{IceCandidate, SessionDescription};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),
}

/// Callbacks, die beim Erzeugen der Peer Connection registriert werden
pub struct PeerHandlers {
    /// Lokaler ICE Candidate gefunden
    pub on_ice_candidate: Box<dyn Fn(IceCandidate) + Send + Sync>,
    /// Track der Gegenseite angekommen
    pub on_track: Box<dyn Fn(RemoteTrack) + Send + Sync>,
}

impl std::fmt::Debug for PeerHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandlers").finish_non_exhaustive()
    }
}

pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: Arc<MediaTrack>) -> BoxFuture<'_, Result<(), PeerError>>;
    fn create_offer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>>;
    fn create_answer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>>;
    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>>;
    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>>;
    fn add_ice_candidate(&self, candidate: IceCandidate) -> BoxFuture<'_, Result<(), PeerError>>;
    /// Stoppt alle Transceiver und schließt die Verbindung
    fn close(&self) -> BoxFuture<'_, Result<(), PeerError>>;
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        ice: Arc<IceConfig>,
        handlers: PeerHandlers,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerConnection>, PeerError>>;
}
