//! crates/chat_sync_core/src/session.rs
//!
//! The session engine. It owns the `SessionState`, drives the network through the
//! `ChatApi` port, feeds responses into the reconciler and carries out the
//! resulting identity-store effects.

use crate::domain::SessionState;
use crate::event::StreamEvent;
use crate::frame::FrameParser;
use crate::ports::{ChatApi, IdentityStore, PortResult, THREAD_KEY, VISITOR_KEY};
use crate::reconcile::{PendingSend, SendOutcome, SessionEffect};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Default number of history messages requested per thread.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// How replies are fetched from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Token-by-token over an event stream.
    Streaming,
    /// One request, one JSON response.
    Buffered,
}

/// Progress notifications for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Token(String),
    Mood(String),
    Finished(SendOutcome),
}

/// A chat session bound to one service and one identity store.
pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    store: Arc<dyn IdentityStore>,
    state: SessionState,
    mode: SendMode,
    history_limit: u32,
    updates: Option<UnboundedSender<SessionUpdate>>,
}

impl ChatSession {
    /// Creates a session with identities read from the store.
    pub async fn hydrate(api: Arc<dyn ChatApi>, store: Arc<dyn IdentityStore>) -> Self {
        let visitor_id = read_key(store.as_ref(), VISITOR_KEY).await;
        let thread_id = read_key(store.as_ref(), THREAD_KEY).await;
        info!(
            "Session hydrated (visitor: {}, thread: {})",
            visitor_id.is_some(),
            thread_id.as_deref().unwrap_or("none")
        );
        Self {
            api,
            store,
            state: SessionState::new(visitor_id, thread_id),
            mode: SendMode::Streaming,
            history_limit: DEFAULT_HISTORY_LIMIT,
            updates: None,
        }
    }

    pub fn with_mode(mut self, mode: SendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    /// Publishes `SessionUpdate`s on the given channel.
    pub fn with_updates(mut self, updates: UnboundedSender<SessionUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    //=====================================================================================
    // Bootstrap and history
    //=====================================================================================

    /// Makes sure a visitor identity exists. A no-op when one is already held.
    pub async fn ensure_visitor(&mut self) {
        if self.state.visitor_id.is_some() {
            self.state.loading = false;
            return;
        }
        info!("No visitor identity held; requesting one.");
        match self.api.create_visitor().await {
            Ok(grant) => {
                let (adopted, effects) = self.state.apply_visitor_grant(&grant);
                if !adopted {
                    warn!("Visitor bootstrap response carried no visitor id.");
                }
                self.run_effects(effects).await;
            }
            Err(e) => {
                error!("Visitor bootstrap failed: {}", e);
                self.state.fail_bootstrap();
            }
        }
    }

    /// Fetches the history of `thread_id` unless that id was already loaded.
    pub async fn load_thread(&mut self, thread_id: &str) {
        if !self.state.begin_thread_load(thread_id) {
            debug!("Thread {} already loaded; skipping fetch.", thread_id);
            return;
        }
        info!("Loading history for thread {}", thread_id);
        match self.api.fetch_thread(thread_id, self.history_limit).await {
            Ok(history) => {
                let mood_before = self.state.mood.clone();
                let effects = self.state.apply_history(thread_id, history);
                self.run_effects(effects).await;
                self.publish_mood_change(&mood_before);
            }
            Err(e) => {
                error!("Failed to load thread {}: {}", thread_id, e);
                self.state.fail_thread_load();
            }
        }
    }

    /// Loads the active thread, if any. Safe to call after every change.
    pub async fn sync_thread(&mut self) {
        if let Some(thread_id) = self.state.thread_id.clone() {
            self.load_thread(&thread_id).await;
        }
    }

    /// Drops the active thread and its messages; the visitor is kept.
    pub async fn start_new_thread(&mut self) {
        info!("Starting a new thread.");
        let effects = self.state.reset_thread();
        self.run_effects(effects).await;
    }

    //=====================================================================================
    // Sending
    //=====================================================================================

    /// Sends `input` using the configured mode.
    pub async fn submit(&mut self, input: &str) -> SendOutcome {
        match self.mode {
            SendMode::Streaming => self.send_streaming(input).await,
            SendMode::Buffered => self.send_buffered(input).await,
        }
    }

    /// One streaming send cycle.
    pub async fn send_streaming(&mut self, input: &str) -> SendOutcome {
        let Some(mut send) = self.state.begin_send(input) else {
            debug!("Submit rejected: blank input or a send already in flight.");
            return SendOutcome::Rejected;
        };
        self.publish(SessionUpdate::Mood(self.state.mood.clone()));

        let visitor_id = self.state.visitor_id.clone();
        let mut stream = match self
            .api
            .open_stream(send.request(), visitor_id.as_deref())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("Could not open the event stream: {}", e);
                return self.fail(send);
            }
        };

        let header_visitor_id = stream.header_visitor_id.take();
        let mut parser = FrameParser::new();
        'read: while let Some(chunk) = stream.body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Event stream broke off: {}", e);
                    return self.fail(send);
                }
            };
            for frame in parser.feed(&bytes) {
                let event = StreamEvent::decode(&frame);
                self.apply_event(&mut send, event, header_visitor_id.as_deref())
                    .await;
                if send.should_stop() {
                    break 'read;
                }
            }
        }
        if parser.pending_len() > 0 {
            debug!(
                "Discarding {} bytes of an unterminated frame.",
                parser.pending_len()
            );
        }

        let mood_before = self.state.mood.clone();
        let outcome = self.state.finish_stream(send);
        self.publish_mood_change(&mood_before);
        self.publish(SessionUpdate::Finished(outcome));
        outcome
    }

    /// One non-streaming send cycle.
    pub async fn send_buffered(&mut self, input: &str) -> SendOutcome {
        let Some(send) = self.state.begin_send(input) else {
            debug!("Submit rejected: blank input or a send already in flight.");
            return SendOutcome::Rejected;
        };
        self.publish(SessionUpdate::Mood(self.state.mood.clone()));

        let visitor_id = self.state.visitor_id.clone();
        let reply = match self
            .api
            .send_message(send.request(), visitor_id.as_deref())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!("Send failed: {}", e);
                return self.fail(send);
            }
        };

        let mood_before = self.state.mood.clone();
        let (outcome, effects) = self.state.apply_buffered_reply(send, reply);
        self.run_effects(effects).await;
        self.publish_mood_change(&mood_before);
        self.publish(SessionUpdate::Finished(outcome));
        outcome
    }

    async fn apply_event(
        &mut self,
        send: &mut PendingSend,
        event: StreamEvent,
        header_visitor_id: Option<&str>,
    ) {
        if let StreamEvent::Token(text) = &event {
            if !text.is_empty() && !send.is_done() {
                self.publish(SessionUpdate::Token(text.clone()));
            }
        }
        let mood_before = self.state.mood.clone();
        let effects = self.state.apply_stream_event(send, event, header_visitor_id);
        self.run_effects(effects).await;
        self.publish_mood_change(&mood_before);
    }

    fn fail(&mut self, send: PendingSend) -> SendOutcome {
        let outcome = self.state.abort_send(send);
        self.publish(SessionUpdate::Mood(self.state.mood.clone()));
        self.publish(SessionUpdate::Finished(outcome));
        outcome
    }

    //=====================================================================================
    // Effects and notifications
    //=====================================================================================

    async fn run_effects(&self, effects: Vec<SessionEffect>) {
        for effect in effects {
            let result = match &effect {
                SessionEffect::PersistVisitor(id) => self.store.set(VISITOR_KEY, id).await,
                SessionEffect::PersistThread(id) => self.store.set(THREAD_KEY, id).await,
                SessionEffect::ForgetThread => self.store.remove(THREAD_KEY).await,
            };
            if let Err(e) = result {
                warn!("Failed to persist {:?}: {}", effect, e);
            }
        }
    }

    fn publish(&self, update: SessionUpdate) {
        if let Some(updates) = &self.updates {
            // A dropped receiver only means nobody is watching.
            let _ = updates.send(update);
        }
    }

    fn publish_mood_change(&self, before: &str) {
        if self.state.mood != before {
            self.publish(SessionUpdate::Mood(self.state.mood.clone()));
        }
    }
}

async fn read_key(store: &dyn IdentityStore, key: &str) -> Option<String> {
    let value: PortResult<Option<String>> = store.get(key).await;
    match value {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Could not read {} from the identity store: {}", key, e);
            None
        }
    }
}
