//! Streaming chat client: keeps the transcript and folds the event stream
//! into the assistant's reply as it arrives.

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    backend::ChatTransport,
    credentials::CredentialStore,
    error::{VeoError, CREDENTIAL_MESSAGE},
    models::{ChatMessage, ChatTurn, Role},
    sse::{EventStreamDecoder, StreamEvent},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    gate: Option<Arc<dyn CredentialStore>>,
    state: watch::Sender<ChatState>,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self { transport, gate: None, state, in_flight: Mutex::new(None), next_id: AtomicU64::new(0) }
    }

    /// Refuse to send until `store` holds a key. The key itself is never sent.
    pub fn gated_by(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.gate = Some(store);
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> { self.state.borrow().messages.clone() }

    pub fn error(&self) -> Option<String> { self.state.borrow().error.clone() }

    pub fn is_loading(&self) -> bool { self.state.borrow().is_loading }

    pub fn set_error(&self, error: Option<String>) {
        self.state.send_modify(|s| s.error = error);
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> { self.state.subscribe() }

    /// Drop the transcript and any stored error.
    pub fn clear_messages(&self) {
        self.state.send_modify(|s| {
            s.messages.clear();
            s.error = None;
        });
    }

    /// Send `content` and stream the reply into the transcript. Any stream
    /// still running from an earlier call is cancelled first.
    pub async fn send(&self, content: &str) -> Result<(), VeoError> {
        if let Some(gate) = &self.gate {
            if gate.get_credential().is_none() {
                let err = VeoError::Credential(CREDENTIAL_MESSAGE.into());
                self.set_error(Some(err.to_string()));
                return Err(err);
            }
        }

        let stream_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.in_flight.lock().replace((stream_id, token.clone())) {
            previous.cancel();
        }

        let user = ChatMessage::new(Role::User, content);
        let mut history = Vec::new();
        self.state.send_modify(|s| {
            history = s.messages.iter().map(ChatMessage::turn).collect();
            s.messages.push(user);
            s.is_loading = true;
            s.error = None;
        });

        let mut placeholder = None;
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(VeoError::Cancelled),
            result = self.stream_reply(content, &history, &token, &mut placeholder) => result,
        };

        match &result {
            Ok(()) => debug!("Chat reply complete"),
            Err(VeoError::Cancelled) => {
                debug!("Chat stream superseded");
                if let Some(id) = placeholder {
                    self.state.send_modify(|s| s.messages.retain(|m| m.id != id || !m.content.is_empty()));
                }
            }
            Err(e) => {
                error!("❌ Chat error: {}", e);
                self.state.send_modify(|s| {
                    s.error = Some(e.to_string());
                    if let Some(id) = placeholder {
                        s.messages.retain(|m| m.id != id || !m.content.is_empty());
                    }
                });
            }
        }

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current == stream_id) {
            slot.take();
            self.state.send_modify(|s| s.is_loading = false);
        }
        result
    }

    async fn stream_reply(
        &self,
        content: &str,
        history: &[ChatTurn],
        token: &CancellationToken,
        placeholder: &mut Option<Uuid>,
    ) -> Result<(), VeoError> {
        let mut stream = self.transport.open_stream(content, history).await?;

        let assistant = ChatMessage::new(Role::Assistant, "");
        let id = assistant.id;
        *placeholder = Some(id);
        self.state.send_modify(|s| s.messages.push(assistant));

        let mut decoder = EventStreamDecoder::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for payload in decoder.push(&chunk) {
                if self.apply_event(id, &payload, token)? {
                    return Ok(());
                }
            }
        }
        if let Some(payload) = decoder.finish() {
            if self.apply_event(id, &payload, token)? {
                return Ok(());
            }
        }
        info!("Chat stream ended without a done marker");
        Ok(())
    }

    /// Fold one payload into the reply. Returns true on the `done` marker.
    fn apply_event(&self, id: Uuid, payload: &str, token: &CancellationToken) -> Result<bool, VeoError> {
        let Some(event) = StreamEvent::parse(payload) else { return Ok(false) };
        if token.is_cancelled() {
            return Err(VeoError::Cancelled);
        }
        match event {
            StreamEvent::Content { text } => self.update(id, |m| m.content.push_str(&text)),
            StreamEvent::Thinking { text } => {
                self.update(id, |m| m.thinking.get_or_insert_with(String::new).push_str(&text))
            }
            StreamEvent::Error { message } => return Err(VeoError::Remote(message)),
            StreamEvent::Done => return Ok(true),
        }
        Ok(false)
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut ChatMessage)) {
        self.state.send_modify(|s| {
            if let Some(message) = s.messages.iter_mut().find(|m| m.id == id) {
                f(message);
            }
        });
    }
}
