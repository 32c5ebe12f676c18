//! crates/chat_sync_core/src/protocol.rs
//!
//! Defines the request and response shapes exchanged with the chat service.

use crate::domain::Message;
use crate::lenient;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Header carrying the visitor identity in both directions.
pub const VISITOR_HEADER: &str = "X-Visitor-Id";

//=========================================================================================
// Requests
//=========================================================================================

/// Body of both the streaming and the buffered send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

//=========================================================================================
// Responses
//=========================================================================================

/// What the visitor bootstrap call returned. The header wins over the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorGrant {
    pub header_visitor_id: Option<String>,
    pub body_visitor_id: Option<String>,
}

impl VisitorGrant {
    pub fn visitor_id(&self) -> Option<&str> {
        non_empty(self.header_visitor_id.as_deref())
            .or_else(|| non_empty(self.body_visitor_id.as_deref()))
    }
}

/// Body of `POST /api/v1/visitors`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitorBody {
    #[serde(default, deserialize_with = "lenient::text")]
    pub visitor_id: Option<String>,
}

/// The history endpoint answers with either a bare list or an envelope.
/// Messages that do not decode are skipped individually.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadHistory {
    List(Vec<Message>),
    Envelope {
        messages: Vec<Message>,
        thread_id: Option<String>,
    },
    /// Any other JSON value; read as an empty history.
    Other(Value),
}

impl ThreadHistory {
    /// Decodes a history body. Bodies that are not JSON count as an empty history.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body)
            .map(Self::from_value)
            .unwrap_or(ThreadHistory::Other(Value::Null))
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            list @ Value::Array(_) => ThreadHistory::List(lenient::messages_from_value(list)),
            Value::Object(mut fields) => ThreadHistory::Envelope {
                messages: fields
                    .remove("messages")
                    .map(lenient::messages_from_value)
                    .unwrap_or_default(),
                thread_id: fields.remove("thread_id").and_then(lenient::text_from_value),
            },
            other => ThreadHistory::Other(other),
        }
    }

    /// Splits the payload into the message list and the optional thread correction.
    pub fn into_parts(self) -> (Vec<Message>, Option<String>) {
        match self {
            ThreadHistory::List(messages) => (messages, None),
            ThreadHistory::Envelope {
                messages,
                thread_id,
            } => (messages, thread_id.filter(|t| !t.is_empty())),
            ThreadHistory::Other(_) => (Vec::new(), None),
        }
    }
}

/// Body of the buffered `POST /api/v1/chat/messages`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SendResponse {
    #[serde(default, deserialize_with = "lenient::text")]
    pub visitor_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub thread_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::message_list")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, deserialize_with = "lenient::message")]
    pub message: Option<Message>,
    #[serde(default, deserialize_with = "lenient::message")]
    pub user_message: Option<Message>,
    #[serde(default, deserialize_with = "lenient::message")]
    pub assistant_message: Option<Message>,
}

/// A buffered reply together with the visitor header of its response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedReply {
    pub header_visitor_id: Option<String>,
    pub body: SendResponse,
}

/// The legal success shapes of a buffered reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyShape {
    /// A full conversation that replaces the local one.
    Replace(Vec<Message>),
    /// One message to append.
    Append(Message),
    /// Separate user and assistant messages, either of which may be missing.
    Pair {
        user: Option<Message>,
        assistant: Option<Message>,
    },
}

impl<'de> Deserialize<'de> for ThreadHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl SendResponse {
    /// Resolves the body into exactly one shape.
    ///
    /// | present                          | shape     |
    /// |----------------------------------|-----------|
    /// | non-empty `messages`             | `Replace` |
    /// | `message`                        | `Append`  |
    /// | anything else                    | `Pair`    |
    pub fn shape(&self) -> ReplyShape {
        match (&self.messages, &self.message) {
            (Some(messages), _) if !messages.is_empty() => ReplyShape::Replace(messages.clone()),
            (_, Some(message)) => ReplyShape::Append(message.clone()),
            _ => ReplyShape::Pair {
                user: self.user_message.clone(),
                assistant: self.assistant_message.clone(),
            },
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
