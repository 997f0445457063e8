//! ICE Module - Netzwerk-Traversal Konfiguration
//!
//! Holt kurzlebige STUN/TURN-Credentials vom API-Server und hält sie
//! prozessweit im Cache. Schlägt der Abruf fehl, wird ein reiner
//! STUN-Fallback verwendet, damit Anrufe nie blockiert werden.

mod cache;
mod source;

pub use cache::IceConfigCache;
pub use source::{HttpIceSource, IceCredentialSource, IceServersResponse, RawIceServer};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum IceError {
    #[error("Credential request failed: {0}")]
    RequestFailed(String),

    #[error("Credential endpoint returned {status}")]
    BadStatus { status: u16 },

    #[error("Invalid credential response: {0}")]
    InvalidResponse(String),

    #[error("Credential request timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// ICE CONFIG
// ============================================================================

/// Ein STUN/TURN-Server in kanonischer Form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Geordnete Liste der ICE-Server für eine Peer Connection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl IceConfig {
    /// Fallback-Konfiguration mit einem einzelnen STUN-Eintrag
    pub fn stun_only(urls: &[String]) -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: urls.to_vec(),
                username: None,
                credential: None,
            }],
        }
    }

    pub fn is_stun_only(&self) -> bool {
        self.ice_servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .all(|u| u.starts_with("stun:"))
    }

    /// Umwandlung in die Server-Liste für `RTCConfiguration`
    pub fn to_rtc_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}
