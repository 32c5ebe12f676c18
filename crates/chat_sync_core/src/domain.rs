//! crates/chat_sync_core/src/domain.rs
//!
//! Defines the core data structures of a chat session: messages, the ordered
//! conversation, and the aggregate session state the reconcilers mutate.

use crate::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The mood the session falls back to whenever no emotion is known.
pub const MOOD_FALLBACK: &str = "neutral";

/// The mood shown while a send is in flight.
pub const MOOD_THINKING: &str = "thinking";

/// Prefix shared by every client-generated message id.
pub const OPTIMISTIC_ID_PREFIX: &str = "temp-";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message, either server-issued or optimistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    pub role: Role,
    #[serde(default, deserialize_with = "lenient::text_or_empty")]
    pub content: String,
    /// Unreadable timestamps are dropped rather than failing the message.
    #[serde(
        default,
        deserialize_with = "lenient::timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub emotion: Option<String>,
    /// Marks the placeholder that is being filled by token events.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

impl Message {
    /// The optimistic copy of what the user just typed.
    pub fn optimistic_user(content: impl Into<String>) -> Self {
        Self {
            id: format!("{OPTIMISTIC_ID_PREFIX}user-{}", Uuid::new_v4()),
            role: Role::User,
            content: content.into(),
            created_at: Some(Utc::now()),
            emotion: None,
            streaming: false,
        }
    }

    /// An empty assistant reply that token events will fill in.
    pub fn placeholder_assistant() -> Self {
        Self {
            id: format!("{OPTIMISTIC_ID_PREFIX}assistant-{}", Uuid::new_v4()),
            role: Role::Assistant,
            content: String::new(),
            created_at: Some(Utc::now()),
            emotion: None,
            streaming: true,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(OPTIMISTIC_ID_PREFIX)
    }
}

/// The ordered message sequence. Insertion order is display order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Swaps the message with the given id for `replacement`, keeping its position.
    /// Returns `false` when no message carries that id.
    pub fn replace(&mut self, id: &str, replacement: Message) -> bool {
        match self.get_mut(id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Removes every message whose id is in `ids`.
    pub fn remove_ids(&mut self, ids: &[&str]) {
        self.messages.retain(|m| !ids.contains(&m.id.as_str()));
    }

    /// Number of messages still carrying client-generated ids.
    pub fn unconfirmed_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_optimistic()).count()
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
    }

    /// Emotion of the most recent assistant message that carries one.
    pub fn latest_assistant_emotion(&self) -> Option<&str> {
        latest_assistant_emotion(&self.messages)
    }
}

/// Scans from the end for the newest assistant message with an emotion.
pub fn latest_assistant_emotion(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| m.emotion.as_deref().filter(|e| !e.is_empty()))
}

/// A human-readable failure surfaced to the user. Only the latest one is kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No visitor identity could be obtained.
    #[error("could not start a session; refresh to try again")]
    Bootstrap,
    /// History for the active thread could not be fetched.
    #[error("could not load this thread; start a new one")]
    ThreadLoad,
    /// The server reported a failure inside the event stream.
    #[error("{0}")]
    Remote(String),
    /// The send request or its stream broke down.
    #[error("the assistant is unavailable right now; try again soon")]
    Transport,
}

impl SessionError {
    /// Builds the error for a stream `error` event, using the transport text when
    /// the server sent no message.
    pub fn remote(message: Option<String>) -> Self {
        match message {
            Some(text) if !text.trim().is_empty() => SessionError::Remote(text),
            _ => SessionError::Remote(SessionError::Transport.to_string()),
        }
    }
}

/// Everything the client knows about the current chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub visitor_id: Option<String>,
    pub thread_id: Option<String>,
    pub conversation: Conversation,
    pub mood: String,
    pub loading: bool,
    pub sending: bool,
    pub last_error: Option<SessionError>,
    /// The thread id whose history was last requested or already held in memory.
    pub last_loaded_thread: Option<String>,
}

impl SessionState {
    /// A fresh session with identities hydrated from storage.
    pub fn new(visitor_id: Option<String>, thread_id: Option<String>) -> Self {
        Self {
            visitor_id,
            thread_id,
            conversation: Conversation::default(),
            mood: MOOD_FALLBACK.to_string(),
            loading: true,
            sending: false,
            last_error: None,
            last_loaded_thread: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(None, None)
    }
}
