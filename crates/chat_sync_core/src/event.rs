//! crates/chat_sync_core/src/event.rs
//!
//! Turns parsed frames into typed stream events. Structured payloads that fail to
//! parse are read as absent, never as errors.

use crate::domain::Message;
use crate::frame::Frame;
use crate::lenient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Session corrections sent before the reply starts streaming.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetaPayload {
    #[serde(default, deserialize_with = "lenient::text")]
    pub visitor_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub thread_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub emotion: Option<String>,
    #[serde(default, deserialize_with = "lenient::message")]
    pub user_message: Option<Message>,
}

/// Terminal success payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DonePayload {
    #[serde(default, deserialize_with = "lenient::message")]
    pub assistant_message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Meta(MetaPayload),
    /// One chunk of reply text, possibly spanning several lines.
    Token(String),
    Done(DonePayload),
    /// Terminal failure, with the server's message when it sent one.
    Error(Option<String>),
    /// An event this client does not know about.
    Ignored(String),
}

impl StreamEvent {
    pub fn decode(frame: &Frame) -> Self {
        match frame.event.as_str() {
            "meta" => StreamEvent::Meta(parse_or_default(&frame.data())),
            "token" => StreamEvent::Token(token_text(frame)),
            "done" => StreamEvent::Done(parse_or_default(&frame.data())),
            "error" => {
                let text = frame.data();
                StreamEvent::Error((!text.is_empty()).then_some(text))
            }
            other => StreamEvent::Ignored(other.to_string()),
        }
    }
}

/// A token sent as `data:` followed by more data lines starts with a newline
/// that only exists because of the framing; that first empty line is dropped.
fn token_text(frame: &Frame) -> String {
    match frame.data_lines.as_slice() {
        [first, rest @ ..] if first.is_empty() && !rest.is_empty() => rest.join("\n"),
        _ => frame.data(),
    }
}

fn parse_or_default<T: DeserializeOwned + Default>(payload: &str) -> T {
    match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            debug!("Ignoring malformed stream payload: {}", e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameParser;
    use pretty_assertions::assert_eq;

    fn decode_one(raw: &str) -> StreamEvent {
        let frames = FrameParser::new().feed(raw.as_bytes());
        assert_eq!(frames.len(), 1);
        StreamEvent::decode(&frames[0])
    }

    #[test]
    fn decodes_meta_fields() {
        let event = decode_one(
            "event: meta\ndata: {\"visitor_id\":\"v1\",\"thread_id\":\"t1\",\"emotion\":\"curious\",\"user_message\":{\"id\":\"u1\",\"role\":\"user\",\"content\":\"hi\"}}\n\n",
        );
        match event {
            StreamEvent::Meta(meta) => {
                assert_eq!(meta.visitor_id.as_deref(), Some("v1"));
                assert_eq!(meta.thread_id.as_deref(), Some("t1"));
                assert_eq!(meta.emotion.as_deref(), Some("curious"));
                assert_eq!(meta.user_message.map(|m| m.id), Some("u1".to_string()));
            }
            other => panic!("expected meta, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_user_message_keeps_other_meta_fields() {
        let event = decode_one(
            "event: meta\ndata: {\"thread_id\":42,\"emotion\":\"curious\",\"user_message\":{\"id\":\"u1\",\"role\":\"narrator\"}}\n\n",
        );
        assert_eq!(
            event,
            StreamEvent::Meta(MetaPayload {
                visitor_id: None,
                thread_id: Some("42".into()),
                emotion: Some("curious".into()),
                user_message: None,
            })
        );
    }

    #[test]
    fn malformed_structured_payloads_become_empty() {
        assert_eq!(
            decode_one("event: meta\ndata: {not json\n\n"),
            StreamEvent::Meta(MetaPayload::default())
        );
        assert_eq!(
            decode_one("event: done\ndata: \n\n"),
            StreamEvent::Done(DonePayload::default())
        );
    }

    #[test]
    fn token_keeps_raw_text_and_newlines() {
        assert_eq!(
            decode_one("event: token\ndata: {\"not\": \"parsed\"}\n\n"),
            StreamEvent::Token("{\"not\": \"parsed\"}".into())
        );
        assert_eq!(
            decode_one("event: token\ndata: one\ndata: two\n\n"),
            StreamEvent::Token("one\ntwo".into())
        );
    }

    #[test]
    fn token_drops_leading_framing_line() {
        assert_eq!(
            decode_one("event: token\ndata:\ndata: next line\n\n"),
            StreamEvent::Token("next line".into())
        );
        assert_eq!(
            decode_one("event: token\ndata:\n\n"),
            StreamEvent::Token(String::new())
        );
    }

    #[test]
    fn error_payload_is_optional() {
        assert_eq!(
            decode_one("event: error\ndata: rate limited\n\n"),
            StreamEvent::Error(Some("rate limited".into()))
        );
        assert_eq!(decode_one("event: error\n\n"), StreamEvent::Error(None));
    }

    #[test]
    fn unknown_events_are_ignored() {
        assert_eq!(
            decode_one("event: heartbeat\ndata: {}\n\n"),
            StreamEvent::Ignored("heartbeat".into())
        );
        assert_eq!(
            decode_one("data: plain\n\n"),
            StreamEvent::Ignored("message".into())
        );
    }
}
