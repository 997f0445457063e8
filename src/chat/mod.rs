//! Chat Module - Sitzungszustand für Unterhaltungen
//!
//! Dieses Modul verwaltet:
//! - Chat-Liste (zuletzt aktiv zuerst)
//! - Nachrichten der geöffneten Unterhaltung inkl. optimistischem Senden
//! - Tipp-Indikatoren und Ungelesen-Zähler pro Unterhaltung

mod api;
mod models;
mod store;

pub use api::{ChatApi, HttpChatApi};
pub use models::*;
pub use store::{ChatEvent, ChatStore, Notice, NoticeLevel};

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Server error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unknown pending message: {0}")]
    UnknownMessage(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Http(e.to_string())
    }
}

impl ChatError {
    /// Text für einen Hinweis an den Benutzer
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ChatError::Api { message, .. } => message.clone(),
            ChatError::Validation(e) => e.to_string(),
            _ => fallback.to_string(),
        }
    }
}
