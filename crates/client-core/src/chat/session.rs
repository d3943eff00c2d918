use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use super::stream::{NdjsonDecoder, ReplyAccumulator, StreamRecord};
use crate::config::{ClientConfig, ConfigError};
use crate::credentials::{CredentialStore, CredentialStoreError, USER_API_KEY_KEY, USER_TOKEN_KEY};
use crate::models::{ChatRequest, FALLBACK_REPLY, HistoryEntry, Message};

pub const CHAT_PATH: &str = "/chat/";
pub const API_KEY_HEADER: &str = "X-Goog-Api-Key";

/// What became of a `send_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send: blank text and no image.
    Ignored,
    /// Another send is still streaming; the conversation was left untouched.
    Busy,
    Completed,
    /// The placeholder now holds the fallback reply.
    Failed,
}

#[derive(Debug, Error)]
enum ChatTransportError {
    #[error("chat request failed: {0}")]
    Unavailable(String),
    #[error("chat endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// Streaming consultant conversation.
///
/// The transcript lives in a `watch` channel: the active send is its only
/// writer and observers read snapshots between updates. Only one send may be
/// outstanding; a second call while busy returns [`SendOutcome::Busy`].
pub struct ChatSession {
    http_client: reqwest::Client,
    chat_url: String,
    credentials: Arc<dyn CredentialStore>,
    api_key: RwLock<Option<String>>,
    user_location: RwLock<Option<String>>,
    conversation: watch::Sender<Vec<Message>>,
    busy: AtomicBool,
    ready: AtomicBool,
}

impl ChatSession {
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ConfigError> {
        // No overall timeout: a reply streams for as long as the server keeps writing.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        Ok(Self::with_http_client(config, credentials, http_client))
    }

    pub fn with_http_client(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let (conversation, _) = watch::channel(Vec::new());
        Self {
            http_client,
            chat_url: format!("{}{CHAT_PATH}", config.api_base_url.trim_end_matches('/')),
            credentials,
            api_key: RwLock::new(None),
            user_location: RwLock::new(config.user_location.clone()),
            conversation,
            busy: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Loads the optional stored API key and seeds the welcome message.
    /// Touches only the credential store, never the network.
    pub async fn initialize(&self) {
        match self.credentials.get(USER_API_KEY_KEY).await {
            Ok(Some(key)) if !key.trim().is_empty() => {
                *self.api_key.write().await = Some(key.trim().to_string());
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to load stored api key; continuing without it"),
        }

        self.conversation.send_replace(vec![Message::welcome()]);
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.conversation.subscribe()
    }

    pub async fn has_api_key(&self) -> bool {
        self.api_key.read().await.is_some()
    }

    /// Stores a bring-your-own API key; blank input clears it instead.
    pub async fn set_api_key(&self, key: &str) -> Result<(), CredentialStoreError> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return self.clear_api_key().await;
        }

        self.credentials.set(USER_API_KEY_KEY, trimmed).await?;
        *self.api_key.write().await = Some(trimmed.to_string());
        Ok(())
    }

    pub async fn clear_api_key(&self) -> Result<(), CredentialStoreError> {
        self.credentials.delete(USER_API_KEY_KEY).await?;
        *self.api_key.write().await = None;
        Ok(())
    }

    pub async fn set_user_location(&self, location: Option<String>) {
        *self.user_location.write().await = location;
    }

    /// Drops the transcript back to the welcome message. Refused while a send
    /// is streaming.
    pub fn reset(&self) -> bool {
        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            return false;
        };
        self.conversation.send_replace(vec![Message::welcome()]);
        true
    }

    pub async fn send_message(&self, text: &str, image: Option<String>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return SendOutcome::Ignored;
        }

        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            debug!("rejecting chat send while another reply is streaming");
            return SendOutcome::Busy;
        };

        let history: Vec<HistoryEntry> = self
            .conversation
            .borrow()
            .iter()
            .map(HistoryEntry::from)
            .collect();
        let user_message = Message::user(text, image);
        let placeholder = Message::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        self.conversation.send_modify(|messages| {
            messages.push(user_message);
            messages.push(placeholder);
        });

        let request = ChatRequest {
            message: text.to_string(),
            history,
            user_location: self.user_location.read().await.clone(),
        };
        info!(
            history_len = request.history.len(),
            has_location = request.user_location.is_some(),
            "sending chat message"
        );

        match self.stream_reply(&placeholder_id, &request).await {
            Ok(()) => {
                info!(message_id = %placeholder_id, "chat reply completed");
                SendOutcome::Completed
            }
            Err(err) => {
                warn!(error = %err, message_id = %placeholder_id, "chat reply failed");
                self.patch_message(&placeholder_id, |message| {
                    message.content = FALLBACK_REPLY.to_string();
                });
                SendOutcome::Failed
            }
        }
    }

    async fn stream_reply(
        &self,
        placeholder_id: &str,
        request: &ChatRequest,
    ) -> Result<(), ChatTransportError> {
        let mut builder = self.http_client.post(&self.chat_url).json(request);
        if let Some(token) = self.stored_token().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(api_key) = self.api_key.read().await.clone() {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ChatTransportError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatTransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut decoder = NdjsonDecoder::new();
        let mut reply = ReplyAccumulator::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ChatTransportError::StreamInterrupted(err.to_string()))?;
            self.apply_records(placeholder_id, &mut reply, decoder.push(&chunk));
        }
        self.apply_records(placeholder_id, &mut reply, decoder.finish());

        Ok(())
    }

    fn apply_records(
        &self,
        placeholder_id: &str,
        reply: &mut ReplyAccumulator,
        records: Vec<StreamRecord>,
    ) {
        for record in records {
            reply.apply(record);
            self.patch_message(placeholder_id, |message| {
                message.content.clone_from(&reply.text);
                message.products.clone_from(&reply.products);
            });
        }
    }

    fn patch_message(&self, message_id: &str, patch: impl FnOnce(&mut Message)) {
        self.conversation.send_modify(|messages| {
            if let Some(message) = messages.iter_mut().find(|message| message.id == message_id) {
                patch(message);
            }
        });
    }

    async fn stored_token(&self) -> Option<String> {
        match self.credentials.get(USER_TOKEN_KEY).await {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, "failed to read stored user token");
                None
            }
        }
    }
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
