//! crates/chat_sync_core/src/lenient.rs
//!
//! Serde helpers for server values whose formatting varies between backends.
//! A value that cannot be read is treated as absent, and one unreadable message
//! is skipped without taking its siblings or the surrounding payload with it.

use crate::domain::Message;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

/// Timestamp layouts accepted without an offset; they are read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

//=========================================================================================
// Value-level readers
//=========================================================================================

/// Strings pass through; numbers are rendered. Anything else is absent.
pub(crate) fn text_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_timestamp(raw.trim()),
        Value::Number(number) => number
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub(crate) fn message_from_value(value: Value) -> Option<Message> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Skipping unreadable message: {}", e);
            None
        }
    }
}

/// Reads an array of messages, skipping the ones that do not decode.
/// A non-array value reads as no messages.
pub(crate) fn messages_from_value(value: Value) -> Vec<Message> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(message_from_value).collect(),
        _ => Vec::new(),
    }
}

//=========================================================================================
// `deserialize_with` adapters
//=========================================================================================

pub(crate) fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(text_from_value))
}

pub(crate) fn text_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(text(d)?.unwrap_or_default())
}

/// Message ids may arrive as strings or numbers; anything else rejects the message.
pub(crate) fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    text_from_value(Value::deserialize(d)?)
        .ok_or_else(|| D::Error::custom("message id must be a string or a number"))
}

pub(crate) fn timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?
        .as_ref()
        .and_then(timestamp_from_value))
}

pub(crate) fn message<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Message>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(message_from_value))
}

/// `null` or a missing list stays `None`; an array keeps its readable messages.
pub(crate) fn message_list<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Vec<Message>>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(value @ Value::Array(_)) => Some(messages_from_value(value)),
        _ => None,
    })
}
