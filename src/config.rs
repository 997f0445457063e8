//! Konfiguration
//!
//! Lädt `config.json` aus dem Plattform-Konfigurationsverzeichnis und
//! wendet danach Umgebungsvariablen an. Fehlt die Datei, gelten die Defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Wie lange ICE-Credentials wiederverwendet werden (50 Minuten)
pub const ICE_CACHE_TTL: Duration = Duration::from_secs(50 * 60);

/// Öffentlicher STUN-Server, falls keine TURN-Credentials verfügbar sind
pub const FALLBACK_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Maximale Wartezeit auf den Credential-Endpoint
pub const ICE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout für REST-Requests
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Pfad des Credential-Endpoints relativ zur API-URL
pub const ICE_PATH: &str = "/ice/twilio";

const CONFIG_FILE: &str = "config.json";
const ENV_SIGNALING_URL: &str = "CHATCALL_SIGNALING_URL";
const ENV_API_URL: &str = "CHATCALL_API_URL";

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket-Endpoint des Realtime-Servers (ws:// oder wss://)
    pub signaling_url: String,
    /// Basis-URL der REST-API
    pub api_url: String,
    /// Pfad für ICE-Credentials, relativ zu `api_url`
    pub ice_path: String,
    /// Cache-Dauer der ICE-Konfiguration in Sekunden
    pub ice_cache_ttl_secs: u64,
    /// Wartezeit auf ICE-Credentials in Sekunden, danach STUN-Fallback
    pub ice_fetch_timeout_secs: u64,
    /// Timeout für REST-Requests in Sekunden
    pub http_timeout_secs: u64,
    /// STUN-URLs für den Fallback
    pub fallback_stun_urls: Vec<String>,
    /// Heartbeat-Intervall der WebSocket-Verbindung in Sekunden
    pub heartbeat_secs: u64,
    /// Kapazität der Event-Channels
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8000/ws".to_string(),
            api_url: "http://localhost:8000/api".to_string(),
            ice_path: ICE_PATH.to_string(),
            ice_cache_ttl_secs: ICE_CACHE_TTL.as_secs(),
            ice_fetch_timeout_secs: ICE_FETCH_TIMEOUT.as_secs(),
            http_timeout_secs: HTTP_TIMEOUT.as_secs(),
            fallback_stun_urls: vec![FALLBACK_STUN_URL.to_string()],
            heartbeat_secs: 25,
            event_capacity: 100,
        }
    }
}

impl AppConfig {
    /// Lädt die Konfiguration aus dem Standardverzeichnis und der Umgebung
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match Self::config_dir() {
            Some(dir) => Self::load_from(&dir)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Lädt `config.json` aus `dir`, oder die Defaults wenn sie fehlt
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    /// Plattformspezifisches Konfigurationsverzeichnis
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "chatcall").map(|d| d.config_dir().to_path_buf())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_SIGNALING_URL) {
            self.signaling_url = url;
        }
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_url = url;
        }
    }

    pub fn ice_url(&self) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), self.ice_path)
    }

    pub fn ice_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ice_cache_ttl_secs)
    }

    pub fn ice_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_fetch_timeout_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_fifty_minute_ice_cache() {
        let config = AppConfig::default();
        assert_eq!(config.ice_cache_ttl(), Duration::from_secs(3000));
        assert_eq!(config.fallback_stun_urls, vec![FALLBACK_STUN_URL.to_string()]);
    }

    #[test]
    fn ice_url_joins_without_double_slash() {
        let config = AppConfig {
            api_url: "https://chat.example/api/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.ice_url(), "https://chat.example/api/ice/twilio");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"api_url": "https://chat.example/api"}"#).unwrap();
        assert_eq!(config.api_url, "https://chat.example/api");
        assert_eq!(config.heartbeat_secs, 25);
        assert_eq!(config.ice_fetch_timeout(), ICE_FETCH_TIMEOUT);
        assert_eq!(config.http_timeout(), HTTP_TIMEOUT);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("chatcall-test-{}", uuid::Uuid::new_v4()));
        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = std::env::temp_dir().join(format!("chatcall-test-{}", uuid::Uuid::new_v4()));
        let config = AppConfig {
            heartbeat_secs: 10,
            ..Default::default()
        };
        config.save_to(&dir).unwrap();
        assert_eq!(AppConfig::load_from(&dir).unwrap(), config);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
