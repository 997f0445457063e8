//! Datenmodelle für Chats, Nachrichten und Benutzer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, alias = "is_ai")]
    pub is_ai: bool,
}

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Optimistisch eingefügt, Server-Bestätigung steht aus
    Sending,
    #[default]
    Sent,
    /// Senden fehlgeschlagen, kann erneut versucht werden
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(alias = "chat_id")]
    pub chat_id: String,
    #[serde(alias = "sender_id")]
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default, alias = "audio")]
    pub audio_url: Option<String>,
    #[serde(default, alias = "reply_to_id")]
    pub reply_to_id: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    pub fn has_body(&self) -> bool {
        non_blank(&self.content) || non_blank(&self.image_url) || non_blank(&self.audio_url)
    }

    /// Gleicher Inhalt, unabhängig von ID und Zeitstempel
    pub(crate) fn same_body(&self, other: &Message) -> bool {
        self.content.as_deref().map(str::trim) == other.content.as_deref().map(str::trim)
            && self.image_url.is_some() == other.image_url.is_some()
            && self.audio_url.is_some() == other.audio_url.is_some()
    }
}

// ============================================================================
// CHATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(default, alias = "is_group")]
    pub is_group: bool,
    #[serde(default, alias = "group_name")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub participants: Vec<User>,
    #[serde(default, alias = "last_message")]
    pub last_message: Option<Message>,
    #[serde(default, alias = "created_by")]
    pub created_by: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Ein Chat mit seinem Nachrichtenverlauf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatWithMessages {
    pub chat: Chat,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Server-Antwort auf `POST /chat/message/send`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub user_message: Message,
    #[serde(default)]
    pub chat: Option<Chat>,
}

// ============================================================================
// REQUEST PAYLOADS
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Chat id is required")]
    MissingChatId,

    #[error("Either content, image or audio must be provided")]
    EmptyMessage,

    #[error("Group name and participants are required")]
    IncompleteGroup,

    #[error("A participant is required")]
    MissingParticipant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Bild als Data-URI oder URL, der Server lädt es zum Asset-Host hoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl SendMessagePayload {
    pub fn text(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Trimmt alle Felder, leere Felder werden zu `None`
    pub fn validate(self) -> Result<Self, ValidationError> {
        let chat_id = self.chat_id.trim().to_string();
        if chat_id.is_empty() {
            return Err(ValidationError::MissingChatId);
        }

        let payload = Self {
            chat_id,
            content: trimmed(self.content),
            image: trimmed(self.image),
            audio: trimmed(self.audio),
            reply_to_id: trimmed(self.reply_to_id),
        };

        if payload.content.is_none() && payload.image.is_none() && payload.audio.is_none() {
            return Err(ValidationError::EmptyMessage);
        }

        Ok(payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl CreateChatPayload {
    pub fn direct(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: Some(participant_id.into()),
            ..Default::default()
        }
    }

    pub fn group(group_name: impl Into<String>, participants: Vec<String>) -> Self {
        Self {
            is_group: true,
            participants,
            group_name: Some(group_name.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_group {
            let named = self.group_name.as_deref().is_some_and(|n| !n.trim().is_empty());
            if !named || self.participants.is_empty() {
                return Err(ValidationError::IncompleteGroup);
            }
        } else if self.participant_id.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(ValidationError::MissingParticipant);
        }
        Ok(())
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_without_media_is_rejected() {
        let payload = SendMessagePayload::text("c1", "");
        assert_eq!(payload.validate(), Err(ValidationError::EmptyMessage));

        let payload = SendMessagePayload::text("c1", "   ");
        assert_eq!(payload.validate(), Err(ValidationError::EmptyMessage));
    }

    #[test]
    fn image_only_message_is_valid() {
        let payload = SendMessagePayload {
            chat_id: "c1".into(),
            content: Some("".into()),
            image: Some("data:image/png;base64,AAAA".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();

        assert_eq!(payload.content, None);
        assert!(payload.image.is_some());
    }

    #[test]
    fn blank_chat_id_is_rejected() {
        let payload = SendMessagePayload::text(" ", "hi");
        assert_eq!(payload.validate(), Err(ValidationError::MissingChatId));
    }

    #[test]
    fn message_accepts_database_column_names() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"m1","chat_id":"c1","sender_id":"u1","content":"hi","image":null,
                "created_at":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(msg.chat_id, "c1");
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.has_body());
    }

    #[test]
    fn group_needs_name_and_members() {
        assert_eq!(
            CreateChatPayload::group("", vec!["u2".into()]).validate(),
            Err(ValidationError::IncompleteGroup)
        );
        assert!(CreateChatPayload::group("Team", vec!["u2".into()]).validate().is_ok());
        assert_eq!(
            CreateChatPayload::default().validate(),
            Err(ValidationError::MissingParticipant)
        );
    }
}
