//! services/chat_client/src/adapters/http.rs
//!
//! This module contains the HTTP adapter for the remote chat service.
//! It implements the `ChatApi` port from the `core` crate using `reqwest`.

use async_trait::async_trait;
use chat_sync_core::ports::{ChatApi, EventStream, PortError, PortResult};
use chat_sync_core::protocol::{
    BufferedReply, SendRequest, SendResponse, ThreadHistory, VisitorBody, VisitorGrant,
    VISITOR_HEADER,
};
use futures::StreamExt;
use reqwest::{header::ACCEPT, Client, RequestBuilder, Response, Url};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatApi` over HTTP.
#[derive(Clone)]
pub struct HttpChatAdapter {
    client: Client,
    base_url: Url,
}

impl HttpChatAdapter {
    /// Creates a new `HttpChatAdapter` rooted at `base_url`.
    pub fn new(client: Client, base_url: &str) -> PortResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PortError::Transport(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PortError::Transport(format!(
                "'{}' cannot be used as a base URL",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    /// Joins path segments onto the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn with_visitor(request: RequestBuilder, visitor_id: Option<&str>) -> RequestBuilder {
        match visitor_id {
            Some(id) => request.header(VISITOR_HEADER, id),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> PortResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn body(response: Response) -> PortResult<bytes::Bytes> {
        response
            .bytes()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))
    }
}

fn header_visitor_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get(VISITOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

//=========================================================================================
// `ChatApi` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatApi for HttpChatAdapter {
    async fn create_visitor(&self) -> PortResult<VisitorGrant> {
        let url = self.endpoint(&["api", "v1", "visitors"]);
        let response = Self::send(self.client.post(url)).await?;
        let header_visitor_id = header_visitor_id(&response);
        let body = Self::body(response).await?;
        // The header alone is enough; a missing or odd body is not an error.
        let body_visitor_id = serde_json::from_slice::<VisitorBody>(&body)
            .ok()
            .and_then(|b| b.visitor_id);
        Ok(VisitorGrant {
            header_visitor_id,
            body_visitor_id,
        })
    }

    async fn fetch_thread(&self, thread_id: &str, limit: u32) -> PortResult<ThreadHistory> {
        let url = self.endpoint(&["api", "v1", "chat", "threads", thread_id, "messages"]);
        let request = self.client.get(url).query(&[("limit", limit)]);
        let response = Self::send(request).await?;
        let body = Self::body(response).await?;
        Ok(ThreadHistory::from_body(&body))
    }

    async fn open_stream(
        &self,
        request: &SendRequest,
        visitor_id: Option<&str>,
    ) -> PortResult<EventStream> {
        let url = self.endpoint(&["api", "v1", "chat", "messages"]);
        let builder = self
            .client
            .post(url)
            .query(&[("stream", "true")])
            .header(ACCEPT, "text/event-stream")
            .json(request);
        let response = Self::send(Self::with_visitor(builder, visitor_id)).await?;
        debug!("Event stream opened with status {}", response.status());

        let header_visitor_id = header_visitor_id(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| PortError::Transport(e.to_string())))
            .boxed();
        Ok(EventStream {
            header_visitor_id,
            body,
        })
    }

    async fn send_message(
        &self,
        request: &SendRequest,
        visitor_id: Option<&str>,
    ) -> PortResult<BufferedReply> {
        let url = self.endpoint(&["api", "v1", "chat", "messages"]);
        let builder = self.client.post(url).json(request);
        let response = Self::send(Self::with_visitor(builder, visitor_id)).await?;
        let header_visitor_id = header_visitor_id(&response);
        let body = Self::body(response).await?;
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            SendResponse::default()
        } else {
            serde_json::from_slice(&body).map_err(|e| PortError::Decode(e.to_string()))?
        };
        Ok(BufferedReply {
            header_visitor_id,
            body,
        })
    }
}
