//! Call Engine Module - WebRTC-Anrufe
//!
//! Dieses Modul verwaltet:
//! - Den Signaling-Zustandsautomaten (Einladung, Offer/Answer, Candidates)
//! - Lokale Media-Streams (Mikrofon, Kamera) und entfernte Tracks
//! - WebRTC Peer Connections

mod capture;
mod devices;
mod engine;
mod media;
mod peer;
mod rtc;

pub use devices::{list_audio_devices, AudioDevice, DeviceMedia};
pub use engine::{
    CallEngine, CallEngineError, CallEvent, CallPeer, CallSnapshot, CallState, BUSY_REASON,
    END_REASON, UNAVAILABLE_REASON,
};
pub use media::{
    MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, RemoteStream,
    RemoteTrack, TrackKind, PCMU_CLOCK_RATE, SAMPLE_RATE,
};
pub use peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerHandlers};
pub use rtc::{RtcPeer, RtcPeerFactory};
