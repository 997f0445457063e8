//! Chat Session Store
//!
//! Einziger Besitzer des Chat-Zustands. Von außen wird nur über die
//! Methoden hier mutiert; die UI liest Snapshots und hört auf `ChatEvent`s.

use super::api::ChatApi;
use super::models::*;
use super::ChatError;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Kurzlebiger Hinweis für den Benutzer (Toast)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ChatsChanged,
    MessagesChanged { chat_id: String },
    TypingChanged { chat_id: String },
    UnreadChanged { chat_id: String },
    Notice(Notice),
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone)]
struct OpenChat {
    chat: Chat,
    messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct ChatState {
    chats: Vec<Chat>,
    users: Vec<User>,
    open: Option<OpenChat>,
    /// Zuletzt angeforderter Chat; ältere Antworten werden verworfen
    requested: Option<String>,
    typing: HashMap<String, Vec<String>>,
    unread: HashMap<String, u32>,
    /// Temp-ID → Payload, für erneutes Senden
    outbox: HashMap<String, SendMessagePayload>,
}

impl ChatState {
    fn is_open(&self, chat_id: &str) -> bool {
        self.open.as_ref().is_some_and(|o| o.chat.id == chat_id)
    }

    fn open_messages_mut(&mut self, chat_id: &str) -> Option<&mut Vec<Message>> {
        self.open
            .as_mut()
            .filter(|o| o.chat.id == chat_id)
            .map(|o| &mut o.messages)
    }

    /// Setzt die letzte Nachricht und schiebt den Chat nach vorne
    fn touch_chat(&mut self, chat_id: &str, last_message: Message) -> bool {
        let Some(pos) = self.chats.iter().position(|c| c.id == chat_id) else {
            return false;
        };
        let mut chat = self.chats.remove(pos);
        chat.last_message = Some(last_message);
        self.chats.insert(0, chat);
        true
    }
}

// ============================================================================
// CHAT STORE
// ============================================================================

pub struct ChatStore {
    api: Arc<dyn ChatApi>,
    current_user_id: String,
    state: RwLock<ChatState>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatStore {
    pub fn new(api: Arc<dyn ChatApi>, current_user_id: String, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            api,
            current_user_id,
            state: RwLock::new(ChatState::default()),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Success => tracing::info!("{}", message),
            NoticeLevel::Error => tracing::warn!("{}", message),
        }
        self.emit(ChatEvent::Notice(Notice { level, message }));
    }

    fn fail<T>(&self, err: ChatError, fallback: &str) -> Result<T, ChatError> {
        self.notify(NoticeLevel::Error, err.user_message(fallback));
        Err(err)
    }

    // ========================================================================
    // READ ACCESS
    // ========================================================================

    /// Chat-Liste, zuletzt aktiv zuerst
    pub fn chats(&self) -> Vec<Chat> {
        self.state.read().chats.clone()
    }

    pub fn users(&self) -> Vec<User> {
        self.state.read().users.clone()
    }

    pub fn user_name(&self, user_id: &str) -> Option<String> {
        self.state
            .read()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.name.clone())
    }

    pub fn open_chat_id(&self) -> Option<String> {
        self.state.read().open.as_ref().map(|o| o.chat.id.clone())
    }

    /// Nachrichten der geöffneten Unterhaltung
    pub fn messages(&self) -> Vec<Message> {
        self.state
            .read()
            .open
            .as_ref()
            .map(|o| o.messages.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // REQUEST/RESPONSE OPERATIONS
    // ========================================================================

    pub async fn fetch_all_users(&self) -> Result<(), ChatError> {
        match self.api.fetch_all_users().await {
            Ok(users) => {
                self.state.write().users = users;
                Ok(())
            }
            Err(e) => self.fail(e, "Failed to fetch users"),
        }
    }

    pub async fn fetch_chats(&self) -> Result<(), ChatError> {
        match self.api.fetch_chats().await {
            Ok(chats) => {
                self.state.write().chats = chats;
                self.emit(ChatEvent::ChatsChanged);
                Ok(())
            }
            Err(e) => self.fail(e, "Failed to fetch chats"),
        }
    }

    pub async fn create_chat(&self, payload: CreateChatPayload) -> Result<Chat, ChatError> {
        if let Err(e) = payload.validate() {
            return self.fail(e.into(), "Failed to create chat");
        }

        match self.api.create_chat(payload).await {
            Ok(chat) => {
                self.add_new_chat(chat.clone());
                self.notify(NoticeLevel::Success, "Chat created successfully".to_string());
                Ok(chat)
            }
            Err(e) => self.fail(e, "Failed to create chat"),
        }
    }

    /// Öffnet eine Unterhaltung und markiert sie als gelesen
    pub async fn fetch_single_chat(&self, chat_id: &str) -> Result<(), ChatError> {
        self.state.write().requested = Some(chat_id.to_string());

        let loaded = match self.api.fetch_single_chat(chat_id.to_string()).await {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(e, "Failed to fetch chat"),
        };

        {
            let mut state = self.state.write();
            if state.requested.as_deref() != Some(chat_id) {
                tracing::debug!("Dropping stale chat response for {}", chat_id);
                return Ok(());
            }
            state.open = Some(OpenChat {
                chat: loaded.chat,
                messages: loaded.messages,
            });
        }

        self.emit(ChatEvent::MessagesChanged {
            chat_id: chat_id.to_string(),
        });
        self.mark_chat_as_read(chat_id);
        Ok(())
    }

    pub fn close_chat(&self) {
        let mut state = self.state.write();
        state.open = None;
        state.requested = None;
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ChatError> {
        let message = match self.api.delete_chat(chat_id.to_string()).await {
            Ok(message) => message,
            Err(e) => return self.fail(e, "Failed to delete chat"),
        };

        {
            let mut state = self.state.write();
            state.chats.retain(|c| c.id != chat_id);
            if state.is_open(chat_id) {
                state.open = None;
                state.requested = None;
            }
            state.typing.remove(chat_id);
            state.unread.remove(chat_id);
            state.outbox.retain(|_, pending| pending.chat_id != chat_id);
        }

        self.emit(ChatEvent::ChatsChanged);
        self.notify(
            NoticeLevel::Success,
            message.unwrap_or_else(|| "Chat deleted successfully".to_string()),
        );
        Ok(())
    }

    // ========================================================================
    // OPTIMISTIC SEND
    // ========================================================================

    /// Sendet eine Nachricht; sie erscheint sofort mit Status `Sending`
    ///
    /// Bei Erfolg wird der Platzhalter durch die Server-Nachricht ersetzt,
    /// bei Fehler bleibt er mit Status `Failed` stehen (siehe `retry_message`).
    pub async fn send_message(&self, payload: SendMessagePayload) -> Result<Message, ChatError> {
        let payload = match payload.validate() {
            Ok(payload) => payload,
            Err(e) => return self.fail(e.into(), "Failed to send message"),
        };

        let temp = Message {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: payload.chat_id.clone(),
            sender_id: self.current_user_id.clone(),
            content: payload.content.clone(),
            image_url: payload.image.clone(),
            audio_url: payload.audio.clone(),
            reply_to_id: payload.reply_to_id.clone(),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
        };

        {
            let mut state = self.state.write();
            if let Some(messages) = state.open_messages_mut(&temp.chat_id) {
                messages.push(temp.clone());
            }
            state.outbox.insert(temp.id.clone(), payload.clone());
        }
        self.emit(ChatEvent::MessagesChanged {
            chat_id: temp.chat_id.clone(),
        });

        self.deliver(&temp.id, payload).await
    }

    /// Sendet eine fehlgeschlagene Nachricht erneut
    pub async fn retry_message(&self, temp_id: &str) -> Result<Message, ChatError> {
        let payload = {
            let mut state = self.state.write();
            let payload = state
                .outbox
                .get(temp_id)
                .cloned()
                .ok_or_else(|| ChatError::UnknownMessage(temp_id.to_string()))?;
            if let Some(messages) = state.open_messages_mut(&payload.chat_id) {
                if let Some(msg) = messages.iter_mut().find(|m| m.id == temp_id) {
                    msg.status = MessageStatus::Sending;
                }
            }
            payload
        };

        self.emit(ChatEvent::MessagesChanged {
            chat_id: payload.chat_id.clone(),
        });
        self.deliver(temp_id, payload).await
    }

    async fn deliver(&self, temp_id: &str, payload: SendMessagePayload) -> Result<Message, ChatError> {
        let chat_id = payload.chat_id.clone();

        match self.api.send_message(payload).await {
            Ok(sent) => {
                let confirmed = sent.user_message;
                let moved = {
                    let mut state = self.state.write();
                    state.outbox.remove(temp_id);
                    if let Some(messages) = state.open_messages_mut(&chat_id) {
                        reconcile(messages, temp_id, &confirmed);
                    }
                    state.touch_chat(&chat_id, confirmed.clone())
                };

                self.emit(ChatEvent::MessagesChanged { chat_id });
                if moved {
                    self.emit(ChatEvent::ChatsChanged);
                }
                Ok(confirmed)
            }
            Err(e) => {
                {
                    let mut state = self.state.write();
                    if let Some(messages) = state.open_messages_mut(&chat_id) {
                        if let Some(msg) = messages.iter_mut().find(|m| m.id == temp_id) {
                            msg.status = MessageStatus::Failed;
                        }
                    }
                }
                self.emit(ChatEvent::MessagesChanged { chat_id });
                self.fail(e, "Failed to send message")
            }
        }
    }

    // ========================================================================
    // REALTIME UPDATES
    // ========================================================================

    /// Neue Nachricht vom Server (`message:new`)
    ///
    /// Nachrichten ohne Text und ohne Medien werden verworfen.
    pub fn add_new_message(&self, chat_id: &str, message: Message) {
        if !message.has_body() {
            tracing::warn!("Dropping message {} without content or media", message.id);
            return;
        }

        let own = message.sender_id == self.current_user_id;

        let (unread_changed, moved) = {
            let mut state = self.state.write();
            let is_open = state.is_open(chat_id);

            if let Some(messages) = state.open_messages_mut(chat_id) {
                merge_incoming(messages, &message, own);
            }

            let unread_changed = !own && !is_open;
            if unread_changed {
                *state.unread.entry(chat_id.to_string()).or_insert(0) += 1;
            }

            (unread_changed, state.touch_chat(chat_id, message))
        };

        self.emit(ChatEvent::MessagesChanged {
            chat_id: chat_id.to_string(),
        });
        if unread_changed {
            self.emit(ChatEvent::UnreadChanged {
                chat_id: chat_id.to_string(),
            });
        }
        if moved {
            self.emit(ChatEvent::ChatsChanged);
        }
    }

    /// Neuer oder aktualisierter Chat, landet immer ganz vorne
    pub fn add_new_chat(&self, chat: Chat) {
        {
            let mut state = self.state.write();
            state.chats.retain(|c| c.id != chat.id);
            state.chats.insert(0, chat);
        }
        self.emit(ChatEvent::ChatsChanged);
    }

    pub fn update_chat_last_message(&self, chat_id: &str, last_message: Message) {
        let moved = self.state.write().touch_chat(chat_id, last_message);
        if moved {
            self.emit(ChatEvent::ChatsChanged);
        }
    }

    // ========================================================================
    // TYPING INDICATORS
    // ========================================================================

    pub fn add_typing_user(&self, chat_id: &str, name: &str) {
        let changed = {
            let mut state = self.state.write();
            let users = state.typing.entry(chat_id.to_string()).or_default();
            if users.iter().any(|u| u == name) {
                false
            } else {
                users.push(name.to_string());
                true
            }
        };

        if changed {
            self.emit(ChatEvent::TypingChanged {
                chat_id: chat_id.to_string(),
            });
        }
    }

    pub fn remove_typing_user(&self, chat_id: &str, name: &str) {
        let changed = {
            let mut state = self.state.write();
            match state.typing.get_mut(chat_id) {
                Some(users) => {
                    let before = users.len();
                    users.retain(|u| u != name);
                    let changed = users.len() != before;
                    // Keine leeren Einträge behalten
                    if users.is_empty() {
                        state.typing.remove(chat_id);
                    }
                    changed
                }
                None => false,
            }
        };

        if changed {
            self.emit(ChatEvent::TypingChanged {
                chat_id: chat_id.to_string(),
            });
        }
    }

    pub fn typing_users(&self, chat_id: &str) -> Vec<String> {
        self.state
            .read()
            .typing
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_typing_entry(&self, chat_id: &str) -> bool {
        self.state.read().typing.contains_key(chat_id)
    }

    // ========================================================================
    // UNREAD COUNTS
    // ========================================================================

    pub fn increment_unread_count(&self, chat_id: &str) {
        *self
            .state
            .write()
            .unread
            .entry(chat_id.to_string())
            .or_insert(0) += 1;
        self.emit(ChatEvent::UnreadChanged {
            chat_id: chat_id.to_string(),
        });
    }

    pub fn mark_chat_as_read(&self, chat_id: &str) {
        let removed = self.state.write().unread.remove(chat_id).is_some();
        if removed {
            self.emit(ChatEvent::UnreadChanged {
                chat_id: chat_id.to_string(),
            });
        }
    }

    pub fn unread_count(&self, chat_id: &str) -> u32 {
        self.state.read().unread.get(chat_id).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.state.read().unread.values().sum()
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ChatStore")
            .field("current_user_id", &self.current_user_id)
            .field("chats", &state.chats.len())
            .field("open", &state.open.as_ref().map(|o| &o.chat.id))
            .finish()
    }
}

/// Ersetzt den Platzhalter `temp_id` durch die bestätigte Nachricht
fn reconcile(messages: &mut Vec<Message>, temp_id: &str, confirmed: &Message) {
    let temp_pos = messages.iter().position(|m| m.id == temp_id);
    let confirmed_pos = messages.iter().position(|m| m.id == confirmed.id);

    match (temp_pos, confirmed_pos) {
        // Echo war schneller als die HTTP-Antwort
        (Some(temp), Some(_)) => {
            messages.remove(temp);
        }
        (Some(temp), None) => messages[temp] = confirmed.clone(),
        (None, Some(existing)) => messages[existing] = confirmed.clone(),
        (None, None) => {}
    }
}

/// Fügt eine Server-Nachricht ein, ohne Duplikate zu erzeugen
fn merge_incoming(messages: &mut Vec<Message>, incoming: &Message, own: bool) {
    if let Some(pos) = messages.iter().position(|m| m.id == incoming.id) {
        messages[pos] = incoming.clone();
        return;
    }

    if own {
        let placeholder = messages.iter().position(|m| {
            m.status == MessageStatus::Sending
                && m.sender_id == incoming.sender_id
                && m.same_body(incoming)
        });
        if let Some(pos) = placeholder {
            messages[pos] = incoming.clone();
            return;
        }
    }

    messages.push(incoming.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    const ME: &str = "me";

    /// API-Fake mit steuerbarer Send-Antwort
    #[derive(Default)]
    struct FakeApi {
        fail_send: Mutex<bool>,
        sent: Mutex<Vec<SendMessagePayload>>,
        chats: Mutex<HashMap<String, ChatWithMessages>>,
    }

    impl ChatApi for FakeApi {
        fn fetch_all_users(&self) -> BoxFuture<'_, Result<Vec<User>, ChatError>> {
            Box::pin(async {
                Ok(vec![User {
                    id: "u2".into(),
                    name: "Alice".into(),
                    email: None,
                    avatar: None,
                    is_ai: false,
                }])
            })
        }

        fn fetch_chats(&self) -> BoxFuture<'_, Result<Vec<Chat>, ChatError>> {
            Box::pin(async { Ok(vec![chat("c1"), chat("c2"), chat("c3")]) })
        }

        fn create_chat(&self, _payload: CreateChatPayload) -> BoxFuture<'_, Result<Chat, ChatError>> {
            Box::pin(async { Ok(chat("c9")) })
        }

        fn fetch_single_chat(
            &self,
            chat_id: String,
        ) -> BoxFuture<'_, Result<ChatWithMessages, ChatError>> {
            Box::pin(async move {
                Ok(self.chats.lock().get(&chat_id).cloned().unwrap_or(ChatWithMessages {
                    chat: chat(&chat_id),
                    messages: Vec::new(),
                }))
            })
        }

        fn send_message(
            &self,
            payload: SendMessagePayload,
        ) -> BoxFuture<'_, Result<SentMessage, ChatError>> {
            Box::pin(async move {
                self.sent.lock().push(payload.clone());
                if *self.fail_send.lock() {
                    return Err(ChatError::Api {
                        status: 500,
                        message: "Failed to create message".into(),
                    });
                }
                Ok(SentMessage {
                    user_message: Message {
                        id: format!("srv-{}", self.sent.lock().len()),
                        chat_id: payload.chat_id,
                        sender_id: ME.into(),
                        content: payload.content,
                        image_url: payload.image,
                        audio_url: payload.audio,
                        reply_to_id: payload.reply_to_id,
                        created_at: Utc::now(),
                        status: MessageStatus::Sent,
                    },
                    chat: None,
                })
            })
        }

        fn delete_chat(&self, _chat_id: String) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
            Box::pin(async { Ok(Some("Successfully left the group".into())) })
        }
    }

    fn chat(id: &str) -> Chat {
        Chat {
            id: id.into(),
            is_group: false,
            group_name: None,
            participants: Vec::new(),
            last_message: None,
            created_by: None,
            updated_at: None,
        }
    }

    fn message(id: &str, chat_id: &str, sender: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            chat_id: chat_id.into(),
            sender_id: sender.into(),
            content: Some(content.into()),
            image_url: None,
            audio_url: None,
            reply_to_id: None,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    fn store() -> (ChatStore, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        (ChatStore::new(api.clone(), ME.into(), 64), api)
    }

    #[tokio::test]
    async fn message_from_other_user_in_closed_chat_counts_as_unread() {
        let (store, _) = store();
        store.fetch_chats().await.unwrap();
        store.fetch_single_chat("c1").await.unwrap();

        store.add_new_message("c2", message("m1", "c2", "u2", "hi"));

        assert_eq!(store.unread_count("c2"), 1);
        assert_eq!(store.unread_count("c1"), 0);
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn message_in_open_chat_is_appended_without_unread() {
        let (store, _) = store();
        store.fetch_single_chat("c1").await.unwrap();

        store.add_new_message("c1", message("m1", "c1", "u2", "hi"));

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.unread_count("c1"), 0);
    }

    #[tokio::test]
    async fn own_message_never_counts_as_unread() {
        let (store, _) = store();
        store.add_new_message("c2", message("m1", "c2", ME, "from another tab"));
        assert_eq!(store.unread_count("c2"), 0);
    }

    #[test]
    fn mark_as_read_resets_any_count() {
        let (store, _) = store();
        for _ in 0..5 {
            store.increment_unread_count("c1");
        }
        store.increment_unread_count("c2");
        assert_eq!(store.total_unread(), 6);

        store.mark_chat_as_read("c1");

        assert_eq!(store.unread_count("c1"), 0);
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn typing_set_ignores_duplicates_and_drops_empty_entries() {
        let (store, _) = store();
        store.add_typing_user("c1", "Alice");
        store.add_typing_user("c1", "Alice");
        assert_eq!(store.typing_users("c1"), vec!["Alice".to_string()]);

        store.add_typing_user("c1", "Bob");
        store.remove_typing_user("c1", "Alice");
        assert_eq!(store.typing_users("c1"), vec!["Bob".to_string()]);

        store.remove_typing_user("c1", "Bob");
        assert!(!store.has_typing_entry("c1"));
        assert!(store.typing_users("c1").is_empty());
    }

    #[tokio::test]
    async fn optimistic_send_is_replaced_by_server_message() {
        let (store, api) = store();
        store.fetch_chats().await.unwrap();
        store.fetch_single_chat("c3").await.unwrap();

        let confirmed = store
            .send_message(SendMessagePayload::text("c3", "hello"))
            .await
            .unwrap();

        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, confirmed.id);
        assert_eq!(messages[0].status, MessageStatus::Sent);
        assert_eq!(api.sent.lock().len(), 1);
        // Chat mit neuer Nachricht steht vorne
        assert_eq!(store.chats()[0].id, "c3");
        assert_eq!(store.chats()[1].id, "c1");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_the_list() {
        let (store, api) = store();
        store.fetch_single_chat("c1").await.unwrap();
        let mut rx = store.subscribe();

        let err = store
            .send_message(SendMessagePayload::text("c1", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Validation(ValidationError::EmptyMessage)));
        assert!(store.messages().is_empty());
        assert!(api.sent.lock().is_empty());
        match rx.try_recv().unwrap() {
            ChatEvent::Notice(notice) => assert_eq!(notice.level, NoticeLevel::Error),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_send_is_marked_and_can_be_retried() {
        let (store, api) = store();
        store.fetch_single_chat("c1").await.unwrap();
        *api.fail_send.lock() = true;

        store
            .send_message(SendMessagePayload::text("c1", "hello"))
            .await
            .unwrap_err();

        let failed = store.messages();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MessageStatus::Failed);

        *api.fail_send.lock() = false;
        let confirmed = store.retry_message(&failed[0].id).await.unwrap();

        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, confirmed.id);
        assert_eq!(messages[0].status, MessageStatus::Sent);
        assert!(matches!(
            store.retry_message(&failed[0].id).await,
            Err(ChatError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn deleting_chat_discards_failed_sends() {
        let (store, api) = store();
        store.fetch_chats().await.unwrap();
        store.fetch_single_chat("c1").await.unwrap();
        *api.fail_send.lock() = true;

        store
            .send_message(SendMessagePayload::text("c1", "lost"))
            .await
            .unwrap_err();
        let temp_id = store.messages()[0].id.clone();

        store.delete_chat("c1").await.unwrap();

        *api.fail_send.lock() = false;
        assert!(matches!(
            store.retry_message(&temp_id).await,
            Err(ChatError::UnknownMessage(_))
        ));
        assert_eq!(api.sent.lock().len(), 1);
    }

    #[test]
    fn echo_before_response_replaces_placeholder() {
        let mut messages = vec![Message {
            status: MessageStatus::Sending,
            ..message("tmp", "c1", ME, "hello")
        }];
        let echo = message("srv-1", "c1", ME, "hello");

        merge_incoming(&mut messages, &echo, true);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "srv-1");

        // HTTP-Antwort danach ändert nichts mehr an der Länge
        reconcile(&mut messages, "tmp", &echo);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn duplicate_delivery_replaces_in_place() {
        let mut messages = vec![message("m1", "c1", "u2", "hi")];
        merge_incoming(&mut messages, &message("m1", "c1", "u2", "hi (edited)"), false);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("hi (edited)"));
    }

    #[tokio::test]
    async fn new_chat_moves_to_front_preserving_order() {
        let (store, _) = store();
        store.fetch_chats().await.unwrap();

        store.add_new_chat(chat("c2"));
        let ids: Vec<_> = store.chats().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c2", "c1", "c3"]);

        store.create_chat(CreateChatPayload::direct("u2")).await.unwrap();
        assert_eq!(store.chats()[0].id, "c9");
    }

    #[tokio::test]
    async fn incoming_message_moves_chat_to_front() {
        let (store, _) = store();
        store.fetch_chats().await.unwrap();

        store.add_new_message("c3", message("m1", "c3", "u2", "hi"));

        let ids: Vec<_> = store.chats().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c3", "c1", "c2"]);
        assert_eq!(store.chats()[0].last_message.as_ref().unwrap().id, "m1");
    }

    #[tokio::test]
    async fn opening_a_chat_marks_it_read() {
        let (store, _) = store();
        store.increment_unread_count("c1");
        store.fetch_single_chat("c1").await.unwrap();
        assert_eq!(store.unread_count("c1"), 0);
        assert_eq!(store.open_chat_id().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn deleting_open_chat_closes_it() {
        let (store, _) = store();
        store.fetch_chats().await.unwrap();
        store.fetch_single_chat("c2").await.unwrap();
        store.add_typing_user("c2", "Alice");

        store.delete_chat("c2").await.unwrap();

        assert_eq!(store.open_chat_id(), None);
        assert!(store.chats().iter().all(|c| c.id != "c2"));
        assert!(!store.has_typing_entry("c2"));
    }

    #[tokio::test]
    async fn user_names_resolve_after_fetch() {
        let (store, _) = store();
        assert_eq!(store.user_name("u2"), None);
        store.fetch_all_users().await.unwrap();
        assert_eq!(store.user_name("u2").as_deref(), Some("Alice"));
    }
}
