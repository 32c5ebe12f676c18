//! crates/chat_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) the session engine depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of a specific HTTP client or storage surface.

use crate::protocol::{BufferedReply, SendRequest, ThreadHistory, VisitorGrant};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Server answered with status {status}")]
    Http { status: u16 },
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Could not decode response: {0}")]
    Decode(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Raw body chunks of an event-stream response.
pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

/// An opened event stream together with the visitor header of its response.
pub struct EventStream {
    pub header_visitor_id: Option<String>,
    pub body: ByteStream,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Storage key of the visitor identity.
pub const VISITOR_KEY: &str = "chat.visitor_id";
/// Storage key of the active thread identity.
pub const THREAD_KEY: &str = "chat.thread_id";

/// A durable string key-value surface.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;
}

/// The remote conversational service.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `POST /api/v1/visitors`
    async fn create_visitor(&self) -> PortResult<VisitorGrant>;

    /// `GET /api/v1/chat/threads/{thread_id}/messages?limit={limit}`
    async fn fetch_thread(&self, thread_id: &str, limit: u32) -> PortResult<ThreadHistory>;

    /// `POST /api/v1/chat/messages?stream=true`. Fails on a non-success status.
    async fn open_stream(
        &self,
        request: &SendRequest,
        visitor_id: Option<&str>,
    ) -> PortResult<EventStream>;

    /// `POST /api/v1/chat/messages`
    async fn send_message(
        &self,
        request: &SendRequest,
        visitor_id: Option<&str>,
    ) -> PortResult<BufferedReply>;
}

//=========================================================================================
// In-memory Identity Store
//=========================================================================================

/// An `IdentityStore` that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out holding the given pairs.
    pub fn with_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> PortResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|e| PortError::Storage(e.to_string()))
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
