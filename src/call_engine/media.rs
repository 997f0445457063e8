//! Lokale und entfernte Media-Streams
//!
//! Ein `MediaTrack` ist die Sample-Senke für genau einen Track. Der Track
//! wird an die Peer Connection gehängt; `enabled = false` verwirft Frames
//! (Mute bzw. Kamera aus), `stop()` beendet ihn endgültig.

use crate::signaling::CallType;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Bevorzugte Capture-Rate des Mikrofons (48kHz)
pub const SAMPLE_RATE: u32 = 48000;

/// Clock Rate für G.711 µ-law (PCMU)
pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Clock Rate für Video-RTP
const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture failed: {0}")]
    Capture(String),
}

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_string(),
                clock_rate: PCMU_CLOCK_RATE,
                channels: 1,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        }
    }

    fn label(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_signal: Notify,
    sink: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind.label(), uuid::Uuid::new_v4());
        let sink = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_string(),
        ));

        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop_signal.notify_waiters();
            tracing::debug!("Stopped {} track {}", self.kind.label(), self.id);
        }
    }

    /// Wartet, bis der Track gestoppt wurde
    pub async fn stopped(&self) {
        let notified = self.stop_signal.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    /// RTP-Senke, die an die Peer Connection gehängt wird
    pub fn sink(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sink)
    }

    /// Schreibt einen encodierten Frame (PCMU bzw. VP8)
    ///
    /// Deaktivierte oder gestoppte Tracks verwerfen den Frame still.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), MediaError> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(());
        }

        self.sink
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| MediaError::Capture(e.to_string()))
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// STREAMS
// ============================================================================

/// Welche Geräte für einen Anruf benötigt werden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_call(call_type: CallType) -> Self {
        Self {
            audio: true,
            video: call_type.wants_video(),
        }
    }
}

#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    /// Legt je einen Track pro angefordertem Gerät an
    pub fn from_constraints(constraints: MediaConstraints) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Audio, &id)));
        }
        if constraints.video {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Video, &id)));
        }
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn has_video(&self) -> bool {
        self.video_tracks().next().is_some()
    }

    /// Stoppt alle Tracks
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}

/// Track der Gegenseite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Alle Tracks der Gegenseite mit derselben Stream-ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Audio)
    }

    /// Fügt einen Track hinzu; ein Track eines anderen Streams ersetzt den Stream
    pub(crate) fn merge(current: Option<RemoteStream>, track: RemoteTrack) -> RemoteStream {
        match current {
            Some(mut stream) if stream.id == track.stream_id => {
                if !stream.tracks.iter().any(|t| t.id == track.id) {
                    stream.tracks.push(track);
                }
                stream
            }
            _ => RemoteStream {
                id: track.stream_id.clone(),
                tracks: vec![track],
            },
        }
    }
}

// ============================================================================
// DEVICES
// ============================================================================

/// Zugriff auf Mikrofon und Kamera
pub trait MediaDevices: Send + Sync {
    fn acquire(&self, constraints: MediaConstraints)
        -> BoxFuture<'_, Result<MediaStream, MediaError>>;
}
