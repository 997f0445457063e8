//! ICE-Konfigurations-Cache
//!
//! Ein einziger Eintrag pro Prozess. Auch der Fallback wird gecached,
//! damit wiederholte Fehler den Endpoint nicht fluten.

use super::{IceConfig, IceCredentialSource, IceError};
use crate::config::ICE_FETCH_TIMEOUT;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct CachedIce {
    config: Arc<IceConfig>,
    cached_at: Instant,
}

pub struct IceConfigCache {
    source: Arc<dyn IceCredentialSource>,
    ttl: Duration,
    fetch_timeout: Duration,
    fallback: Arc<IceConfig>,
    // tokio-Mutex: gleichzeitige Aufrufer warten auf denselben Abruf
    entry: Mutex<Option<CachedIce>>,
}

impl IceConfigCache {
    pub fn new(
        source: Arc<dyn IceCredentialSource>,
        ttl: Duration,
        fallback_stun_urls: &[String],
    ) -> Self {
        Self {
            source,
            ttl,
            fetch_timeout: ICE_FETCH_TIMEOUT,
            fallback: Arc::new(IceConfig::stun_only(fallback_stun_urls)),
            entry: Mutex::new(None),
        }
    }

    /// Begrenzt die Wartezeit auf den Credential-Endpoint
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Gibt eine nutzbare ICE-Konfiguration zurück, schlägt nie fehl
    ///
    /// Spätestens nach `fetch_timeout` liegt ein Ergebnis vor.
    pub async fn get(&self) -> Arc<IceConfig> {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.cached_at.elapsed() < self.ttl {
                return Arc::clone(&cached.config);
            }
        }

        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .unwrap_or(Err(IceError::Timeout(self.fetch_timeout)));

        let config = match fetched {
            Ok(resp) => {
                let servers = resp.into_servers();
                if servers.is_empty() {
                    tracing::warn!("Credential endpoint returned no usable ICE servers, using STUN fallback");
                    Arc::clone(&self.fallback)
                } else {
                    tracing::debug!("Fetched {} ICE server(s)", servers.len());
                    Arc::new(IceConfig {
                        ice_servers: servers,
                    })
                }
            }
            Err(e) => {
                tracing::warn!("Failed to fetch ICE credentials: {}, using STUN fallback", e);
                Arc::clone(&self.fallback)
            }
        };

        *entry = Some(CachedIce {
            config: Arc::clone(&config),
            cached_at: Instant::now(),
        });

        config
    }

    /// Verwirft den Cache-Eintrag, der nächste `get` holt neu
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

impl std::fmt::Debug for IceConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceConfigCache")
            .field("ttl", &self.ttl)
            .finish()
    }
}
