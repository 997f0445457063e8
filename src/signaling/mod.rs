//! Signaling Module - WebSocket Client für den Realtime-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Realtime-Server:
//! - WebSocket-Verbindung aufbauen und halten
//! - Events serialisieren und senden
//! - Eingehende Events parsen und weiterleiten
//!

mod client;
mod messages;

pub use client::{SignalingClient, SignalingError, SignalingEvent, SignalingSink};
pub use messages::*;
