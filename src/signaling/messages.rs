//! Event-Typen für den Realtime-Kanal
//!
//! Jeder Frame ist ein JSON-Objekt `{"event": "<name>", "data": {...}}`.
//! Die Namen entsprechen den Socket-Events des Servers (`call:offer`,
//! `message:new`, ...). Feldnamen sind camelCase.

use crate::chat::{Chat, Message};
use serde::{Deserialize, Serialize};

// ============================================================================
// SHARED TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn wants_video(self) -> bool {
        self == CallType::Video
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

/// SDP wie `RTCSessionDescriptionInit` im Browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate wie `RTCIceCandidateInit` im Browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// CLIENT → SERVER PAYLOADS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub chat_id: String,
    pub to_user_id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub chat_id: String,
    pub to_user_id: String,
    pub sdp: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub chat_id: String,
    pub to_user_id: String,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptPayload {
    pub chat_id: String,
    pub to_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectPayload {
    pub chat_id: String,
    pub to_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPayload {
    pub chat_id: String,
    pub to_user_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomPayload {
    pub chat_id: String,
}

/// Alle Events, die der Client sendet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutgoingEvent {
    #[serde(rename = "call:invite")]
    CallInvite(InvitePayload),
    #[serde(rename = "call:offer")]
    CallOffer(SdpPayload),
    #[serde(rename = "call:answer")]
    CallAnswer(SdpPayload),
    #[serde(rename = "call:candidate")]
    CallCandidate(CandidatePayload),
    #[serde(rename = "call:accept")]
    CallAccept(AcceptPayload),
    #[serde(rename = "call:reject")]
    CallReject(RejectPayload),
    #[serde(rename = "call:end")]
    CallEnd(EndPayload),
    #[serde(rename = "chat:join")]
    ChatJoin(ChatRoomPayload),
    #[serde(rename = "chat:leave")]
    ChatLeave(ChatRoomPayload),
    #[serde(rename = "typing:start")]
    TypingStart(ChatRoomPayload),
    #[serde(rename = "typing:stop")]
    TypingStop(ChatRoomPayload),
}

impl OutgoingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutgoingEvent::CallInvite(_) => "call:invite",
            OutgoingEvent::CallOffer(_) => "call:offer",
            OutgoingEvent::CallAnswer(_) => "call:answer",
            OutgoingEvent::CallCandidate(_) => "call:candidate",
            OutgoingEvent::CallAccept(_) => "call:accept",
            OutgoingEvent::CallReject(_) => "call:reject",
            OutgoingEvent::CallEnd(_) => "call:end",
            OutgoingEvent::ChatJoin(_) => "chat:join",
            OutgoingEvent::ChatLeave(_) => "chat:leave",
            OutgoingEvent::TypingStart(_) => "typing:start",
            OutgoingEvent::TypingStop(_) => "typing:stop",
        }
    }
}

// ============================================================================
// SERVER → CLIENT PAYLOADS
// ============================================================================

/// Einladung zu einem Anruf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub chat_id: String,
    pub from_user_id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSdp {
    pub chat_id: String,
    pub from_user_id: String,
    pub sdp: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCandidate {
    pub chat_id: String,
    pub from_user_id: String,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccept {
    pub chat_id: String,
    pub from_user_id: String,
}

/// Payload von `call:reject` und `call:end`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHangup {
    pub chat_id: String,
    #[serde(default)]
    pub from_user_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdate {
    pub chat_id: String,
    pub last_message: Message,
}

/// Alle Events, die der Server an den Client schickt
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum IncomingEvent {
    #[serde(rename = "call:incoming")]
    CallIncoming(IncomingCall),
    #[serde(rename = "call:offer")]
    CallOffer(RemoteSdp),
    #[serde(rename = "call:answer")]
    CallAnswer(RemoteSdp),
    #[serde(rename = "call:candidate")]
    CallCandidate(RemoteCandidate),
    #[serde(rename = "call:accept")]
    CallAccept(RemoteAccept),
    #[serde(rename = "call:reject")]
    CallReject(RemoteHangup),
    #[serde(rename = "call:end")]
    CallEnd(RemoteHangup),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "typing:start")]
    TypingStart(TypingNotice),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingNotice),
    #[serde(rename = "chat:new")]
    ChatNew(Chat),
    #[serde(rename = "chat:update")]
    ChatUpdate(ChatUpdate),
}
