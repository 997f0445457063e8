//! Credential-Quelle für ICE-Server

use super::{IceError, IceServer};
use futures::future::BoxFuture;
use serde::Deserialize;

/// Antwort des Credential-Endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<RawIceServer>,
}

/// Server-Eintrag wie ihn der Endpoint liefert (`urls` oder `url`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIceServer {
    #[serde(default)]
    pub urls: Option<UrlList>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlList {
    One(String),
    Many(Vec<String>),
}

impl RawIceServer {
    /// Normalisiert `url` → `urls`; Einträge ohne URL werden verworfen
    pub fn normalize(self) -> Option<IceServer> {
        let urls: Vec<String> = match (self.urls, self.url) {
            (Some(UrlList::Many(urls)), _) => urls,
            (Some(UrlList::One(url)), _) => vec![url],
            (None, Some(url)) => vec![url],
            (None, None) => Vec::new(),
        };
        let urls: Vec<String> = urls.into_iter().filter(|u| !u.trim().is_empty()).collect();

        if urls.is_empty() {
            return None;
        }

        Some(IceServer {
            urls,
            username: self.username,
            credential: self.credential,
        })
    }
}

impl IceServersResponse {
    pub fn into_servers(self) -> Vec<IceServer> {
        self.ice_servers
            .into_iter()
            .filter_map(RawIceServer::normalize)
            .collect()
    }
}

/// Externer Dienst, der kurzlebige TURN-Credentials ausstellt
pub trait IceCredentialSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<IceServersResponse, IceError>>;
}

// ============================================================================
// HTTP SOURCE
// ============================================================================

/// Holt Credentials per `GET` vom API-Server
pub struct HttpIceSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpIceSource {
    pub fn new(client: reqwest::Client, url: String, token: Option<String>) -> Self {
        Self { client, url, token }
    }
}

impl IceCredentialSource for HttpIceSource {
    fn fetch(&self) -> BoxFuture<'_, Result<IceServersResponse, IceError>> {
        Box::pin(async move {
            let mut req = self.client.get(&self.url);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| IceError::RequestFailed(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(IceError::BadStatus {
                    status: resp.status().as_u16(),
                });
            }

            resp.json::<IceServersResponse>()
                .await
                .map_err(|e| IceError::InvalidResponse(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_url_and_urls_and_drops_empty_entries() {
        let resp: IceServersResponse = serde_json::from_str(
            r#"{"iceServers": [
                {"url": "stun:global.stun.twilio.com:3478", "urls": "stun:global.stun.twilio.com:3478"},
                {"url": "turn:global.turn.twilio.com:3478?transport=udp", "username": "u", "credential": "c"},
                {"urls": ["turn:a:443", "turns:a:443"], "username": "u2", "credential": "c2"},
                {"username": "orphan"}
            ]}"#,
        )
        .unwrap();

        let servers = resp.into_servers();
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[0].urls, vec!["stun:global.stun.twilio.com:3478"]);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
        assert_eq!(servers[2].urls.len(), 2);
    }

    #[test]
    fn missing_ice_servers_field_yields_nothing() {
        let resp: IceServersResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.into_servers().is_empty());
    }
}
