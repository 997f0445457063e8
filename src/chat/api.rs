//! REST-Schnittstelle zum Chat-Backend
//!
//! Das Backend kapselt Persistenz und Medien-Upload. Der Client sieht nur
//! Request/Response-Paare mit den Entitäten aus `models`.

use super::models::*;
use super::ChatError;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Request/Response-Operationen, die der Chat-Store benötigt
pub trait ChatApi: Send + Sync {
    fn fetch_all_users(&self) -> BoxFuture<'_, Result<Vec<User>, ChatError>>;
    fn fetch_chats(&self) -> BoxFuture<'_, Result<Vec<Chat>, ChatError>>;
    fn create_chat(&self, payload: CreateChatPayload) -> BoxFuture<'_, Result<Chat, ChatError>>;
    fn fetch_single_chat(&self, chat_id: String)
        -> BoxFuture<'_, Result<ChatWithMessages, ChatError>>;
    fn send_message(&self, payload: SendMessagePayload)
        -> BoxFuture<'_, Result<SentMessage, ChatError>>;
    /// Löscht einen Direktchat bzw. verlässt eine Gruppe
    fn delete_chat(&self, chat_id: String) -> BoxFuture<'_, Result<Option<String>, ChatError>>;
}

// ============================================================================
// HTTP API
// ============================================================================

#[derive(Deserialize)]
struct UsersResponse {
    users: Vec<User>,
}

#[derive(Deserialize)]
struct ChatsResponse {
    chats: Vec<Chat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    chat: Chat,
}

#[derive(Deserialize, Default)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(client: reqwest::Client, base_url: &str, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sendet den Request und dekodiert den Body; Fehler-Bodies liefern `message`
    async fn execute<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ChatError> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body: MessageResponse = resp.json().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                message: body
                    .message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
            });
        }

        Ok(resp.json::<T>().await?)
    }
}

impl ChatApi for HttpChatApi {
    fn fetch_all_users(&self) -> BoxFuture<'_, Result<Vec<User>, ChatError>> {
        Box::pin(async move {
            let resp: UsersResponse = self.execute(self.client.get(self.url("/user/all"))).await?;
            Ok(resp.users)
        })
    }

    fn fetch_chats(&self) -> BoxFuture<'_, Result<Vec<Chat>, ChatError>> {
        Box::pin(async move {
            let resp: ChatsResponse = self.execute(self.client.get(self.url("/chat/all"))).await?;
            Ok(resp.chats)
        })
    }

    fn create_chat(&self, payload: CreateChatPayload) -> BoxFuture<'_, Result<Chat, ChatError>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/chat/create")).json(&payload);
            let resp: ChatResponse = self.execute(req).await?;
            Ok(resp.chat)
        })
    }

    fn fetch_single_chat(
        &self,
        chat_id: String,
    ) -> BoxFuture<'_, Result<ChatWithMessages, ChatError>> {
        Box::pin(async move {
            let req = self.client.get(self.url(&format!("/chat/{}", chat_id)));
            self.execute(req).await
        })
    }

    fn send_message(
        &self,
        payload: SendMessagePayload,
    ) -> BoxFuture<'_, Result<SentMessage, ChatError>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/chat/message/send")).json(&payload);
            self.execute(req).await
        })
    }

    fn delete_chat(&self, chat_id: String) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
        Box::pin(async move {
            let req = self.client.delete(self.url(&format!("/chat/{}", chat_id)));
            let resp: MessageResponse = self.execute(req).await?;
            Ok(resp.message)
        })
    }
}

impl std::fmt::Debug for HttpChatApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}
