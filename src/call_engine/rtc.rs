//! WebRTC Peer Connection
//!
//! Setzt `PeerConnection` mit der `webrtc`-Crate um.

use super::media::{MediaTrack, RemoteTrack, TrackKind};
use super::peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerHandlers};
use crate::ice::IceConfig;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use futures::future::BoxFuture;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

fn rtc_err(e: webrtc::Error) -> PeerError {
    PeerError::WebRTC(e.to_string())
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
    };
    result.map_err(|e| PeerError::InvalidSdp(e.to_string()))
}

// ============================================================================
// FACTORY
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct RtcPeerFactory;

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self
    }

    async fn build(ice: &IceConfig) -> Result<Arc<RTCPeerConnection>, PeerError> {
        // Media Engine mit den Standard-Codecs (PCMU, Opus, VP8)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(rtc_err)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(rtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice.to_rtc_servers(),
            ..Default::default()
        };

        Ok(Arc::new(
            api.new_peer_connection(config).await.map_err(rtc_err)?,
        ))
    }

    /// Registriert Event Handler für die Peer Connection
    fn register_handlers(pc: &RTCPeerConnection, handlers: PeerHandlers) {
        let PeerHandlers {
            on_ice_candidate,
            on_track,
        } = handlers;

        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);
            Box::pin(async {})
        }));

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // None = Gathering abgeschlossen
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => on_ice_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            tracing::info!("Received {:?} track: {:?}", kind, track.codec());
            on_track(RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
            });
            Box::pin(async {})
        }));
    }
}

impl PeerConnectionFactory for RtcPeerFactory {
    fn create(
        &self,
        ice: Arc<IceConfig>,
        handlers: PeerHandlers,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerConnection>, PeerError>> {
        Box::pin(async move {
            let pc = Self::build(&ice).await?;
            Self::register_handlers(&pc, handlers);
            Ok(Arc::new(RtcPeer { pc }) as Arc<dyn PeerConnection>)
        })
    }
}

// ============================================================================
// PEER
// ============================================================================

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl PeerConnection for RtcPeer {
    fn add_track(&self, track: Arc<MediaTrack>) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            let sender = self
                .pc
                .add_track(track.sink() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(rtc_err)?;

            // RTCP lesen, sonst laufen die Interceptors nicht
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
            Ok(())
        })
    }

    fn create_offer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>> {
        Box::pin(async move {
            let offer = self.pc.create_offer(None).await.map_err(rtc_err)?;
            Ok(SessionDescription::offer(offer.sdp))
        })
    }

    fn create_answer(&self) -> BoxFuture<'_, Result<SessionDescription, PeerError>> {
        Box::pin(async move {
            let answer = self.pc.create_answer(None).await.map_err(rtc_err)?;
            Ok(SessionDescription::answer(answer.sdp))
        })
    }

    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.pc
                .set_local_description(to_rtc(desc)?)
                .await
                .map_err(rtc_err)
        })
    }

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.pc
                .set_remote_description(to_rtc(desc)?)
                .await
                .map_err(rtc_err)
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            self.pc
                .add_ice_candidate(RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                    username_fragment: candidate.username_fragment,
                })
                .await
                .map_err(|e| PeerError::InvalidCandidate(e.to_string()))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PeerError>> {
        Box::pin(async move {
            for transceiver in self.pc.get_transceivers().await {
                if let Err(e) = transceiver.stop().await {
                    tracing::debug!("Transceiver stop failed: {}", e);
                }
            }
            self.pc.close().await.map_err(rtc_err)
        })
    }
}

impl std::fmt::Debug for RtcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcPeer")
            .field("state", &self.pc.connection_state())
            .finish()
    }
}
