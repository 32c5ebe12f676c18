//! crates/chat_sync_core/src/reconcile.rs
//!
//! The conversation state machine. Every function here is a synchronous
//! transition of `SessionState`; anything that must touch the identity store is
//! returned as a `SessionEffect` for the caller to carry out.
//!
//! A send moves through `IDLE -> SENDING -> STREAMING -> COMPLETED | FAILED -> IDLE`.
//! `begin_send` is the only way in and `finish_stream`, `abort_send` and
//! `apply_buffered_reply` are the only ways out; each of those clears `sending`.

use crate::domain::{
    latest_assistant_emotion, Message, Role, SessionError, SessionState, MOOD_FALLBACK,
    MOOD_THINKING,
};
use crate::event::{DonePayload, MetaPayload, StreamEvent};
use crate::protocol::{non_empty, BufferedReply, ReplyShape, SendRequest, ThreadHistory, VisitorGrant};
use tracing::{debug, warn};

/// A write the identity store must see after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    PersistVisitor(String),
    PersistThread(String),
    ForgetThread,
}

/// How a submit attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or another send in flight; nothing changed.
    Rejected,
    Completed,
    Failed,
}

/// Bookkeeping for the one send in flight.
#[derive(Debug, Clone)]
pub struct PendingSend {
    request: SendRequest,
    user_message: Message,
    assistant_id: String,
    was_new_thread: bool,
    done: bool,
    failed: bool,
}

impl PendingSend {
    /// The body to send to the server.
    pub fn request(&self) -> &SendRequest {
        &self.request
    }

    pub fn user_temp_id(&self) -> &str {
        &self.user_message.id
    }

    pub fn assistant_temp_id(&self) -> &str {
        &self.assistant_id
    }

    /// Set once an `error` event arrived; no further stream data may be applied.
    pub fn should_stop(&self) -> bool {
        self.failed
    }

    /// Set once a `done` event was applied.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl SessionState {
    //=====================================================================================
    // Send cycle
    //=====================================================================================

    /// Starts a send: appends the optimistic user message and the placeholder reply.
    /// Returns `None` without touching the state when the send must be rejected.
    pub fn begin_send(&mut self, input: &str) -> Option<PendingSend> {
        let text = input.trim();
        if text.is_empty() || self.sending {
            return None;
        }

        self.sending = true;
        self.last_error = None;
        self.mood = MOOD_THINKING.to_string();

        let user_message = Message::optimistic_user(text);
        let placeholder = Message::placeholder_assistant();
        let pending = PendingSend {
            request: SendRequest {
                message: text.to_string(),
                thread_id: self.thread_id.clone(),
            },
            user_message: user_message.clone(),
            assistant_id: placeholder.id.clone(),
            was_new_thread: self.thread_id.is_none(),
            done: false,
            failed: false,
        };
        self.conversation.push(user_message);
        self.conversation.push(placeholder);
        Some(pending)
    }

    /// Applies one decoded stream event. `header_visitor_id` is the visitor header of
    /// the stream response, used when `meta` carries no visitor of its own.
    pub fn apply_stream_event(
        &mut self,
        send: &mut PendingSend,
        event: StreamEvent,
        header_visitor_id: Option<&str>,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if send.failed {
            return effects;
        }
        match event {
            StreamEvent::Meta(meta) => self.apply_meta(send, meta, header_visitor_id, &mut effects),
            StreamEvent::Token(text) => self.apply_token(send, &text),
            StreamEvent::Done(payload) => self.apply_done(send, payload),
            StreamEvent::Error(message) => {
                self.last_error = Some(SessionError::remote(message));
                self.mood = MOOD_FALLBACK.to_string();
                self.conversation.remove_ids(&[send.assistant_temp_id()]);
                send.failed = true;
            }
            StreamEvent::Ignored(name) => debug!("Ignoring stream event '{}'", name),
        }
        effects
    }

    /// Ends a stream that ran out of data or stopped on an `error` event.
    pub fn finish_stream(&mut self, send: PendingSend) -> SendOutcome {
        if send.failed {
            self.sending = false;
            return SendOutcome::Failed;
        }
        if !send.done {
            warn!("Event stream ended without a done event; treating the reply as complete.");
        }
        if let Some(placeholder) = self.conversation.get_mut(&send.assistant_id) {
            placeholder.streaming = false;
        }
        self.settle_mood();
        self.sending = false;
        self.note_unconfirmed();
        SendOutcome::Completed
    }

    /// Rolls back both optimistic messages after a transport failure.
    pub fn abort_send(&mut self, send: PendingSend) -> SendOutcome {
        self.conversation
            .remove_ids(&[send.user_temp_id(), send.assistant_temp_id()]);
        self.mood = MOOD_FALLBACK.to_string();
        self.last_error = Some(SessionError::Transport);
        self.sending = false;
        SendOutcome::Failed
    }

    /// The server never confirmed some messages; they keep their client-side ids.
    fn note_unconfirmed(&self) {
        let unconfirmed = self.conversation.unconfirmed_count();
        if unconfirmed > 0 {
            debug!("{} message(s) still carry client-side ids.", unconfirmed);
        }
    }

    /// Reconciles the reply of a non-streaming send.
    pub fn apply_buffered_reply(
        &mut self,
        send: PendingSend,
        reply: BufferedReply,
    ) -> (SendOutcome, Vec<SessionEffect>) {
        let mut effects = Vec::new();
        let BufferedReply {
            header_visitor_id,
            body,
        } = reply;

        let visitor = non_empty(header_visitor_id.as_deref()).or(non_empty(body.visitor_id.as_deref()));
        self.adopt_visitor(visitor, &mut effects);
        self.adopt_thread(body.thread_id.as_deref(), send.was_new_thread, &mut effects);

        self.conversation
            .remove_ids(&[send.user_temp_id(), send.assistant_temp_id()]);
        match body.shape() {
            ReplyShape::Replace(messages) => {
                self.mood = latest_assistant_emotion(&messages)
                    .unwrap_or(MOOD_FALLBACK)
                    .to_string();
                self.conversation.replace_all(messages);
            }
            ReplyShape::Append(message) => {
                if message.role == Role::Assistant {
                    self.adopt_emotion(message.emotion.as_deref());
                }
                self.conversation.push(message);
            }
            ReplyShape::Pair { user, assistant } => {
                self.conversation
                    .push(user.unwrap_or_else(|| send.user_message.clone()));
                if let Some(assistant) = assistant {
                    self.adopt_emotion(assistant.emotion.as_deref());
                    self.conversation.push(assistant);
                }
            }
        }

        self.settle_mood();
        self.sending = false;
        self.note_unconfirmed();
        (SendOutcome::Completed, effects)
    }

    fn apply_meta(
        &mut self,
        send: &PendingSend,
        meta: MetaPayload,
        header_visitor_id: Option<&str>,
        effects: &mut Vec<SessionEffect>,
    ) {
        let visitor = non_empty(meta.visitor_id.as_deref()).or(non_empty(header_visitor_id));
        self.adopt_visitor(visitor, effects);
        self.adopt_thread(meta.thread_id.as_deref(), send.was_new_thread, effects);
        self.adopt_emotion(meta.emotion.as_deref());
        if let Some(user_message) = meta.user_message {
            self.conversation.replace(send.user_temp_id(), user_message);
        }
    }

    fn apply_token(&mut self, send: &PendingSend, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(placeholder) = self.conversation.get_mut(&send.assistant_id) {
            placeholder.content.push_str(text);
        }
    }

    fn apply_done(&mut self, send: &mut PendingSend, payload: DonePayload) {
        let Some(slot) = self.conversation.get_mut(&send.assistant_id) else {
            return;
        };
        let accumulated = std::mem::take(&mut slot.content);
        let mut reply = match payload.assistant_message {
            Some(message) => message,
            None => slot.clone(),
        };
        if reply.content.is_empty() {
            reply.content = accumulated;
        }
        reply.streaming = false;
        let emotion = reply.emotion.clone();
        *slot = reply;

        self.adopt_emotion(emotion.as_deref());
        send.done = true;
    }

    //=====================================================================================
    // Identity
    //=====================================================================================

    /// Adopts the visitor from a bootstrap response. Returns `false` and records a
    /// bootstrap error when the response carried no identity.
    pub fn apply_visitor_grant(&mut self, grant: &VisitorGrant) -> (bool, Vec<SessionEffect>) {
        let mut effects = Vec::new();
        self.loading = false;
        match grant.visitor_id() {
            Some(id) => {
                self.adopt_visitor(Some(id), &mut effects);
                (true, effects)
            }
            None => {
                self.last_error = Some(SessionError::Bootstrap);
                (false, effects)
            }
        }
    }

    pub fn fail_bootstrap(&mut self) {
        self.loading = false;
        self.last_error = Some(SessionError::Bootstrap);
    }

    fn adopt_visitor(&mut self, visitor_id: Option<&str>, effects: &mut Vec<SessionEffect>) {
        if let Some(id) = visitor_id {
            if self.visitor_id.as_deref() != Some(id) {
                self.visitor_id = Some(id.to_string());
                effects.push(SessionEffect::PersistVisitor(id.to_string()));
            }
        }
    }

    fn adopt_thread(
        &mut self,
        thread_id: Option<&str>,
        mark_loaded: bool,
        effects: &mut Vec<SessionEffect>,
    ) {
        let Some(id) = non_empty(thread_id) else {
            return;
        };
        if self.thread_id.as_deref() != Some(id) {
            self.thread_id = Some(id.to_string());
            effects.push(SessionEffect::PersistThread(id.to_string()));
        }
        if mark_loaded {
            self.last_loaded_thread = Some(id.to_string());
        }
    }

    //=====================================================================================
    // Thread history
    //=====================================================================================

    /// Claims the load of `thread_id`. Returns `false` when that id was already
    /// requested, in which case no request may be issued.
    pub fn begin_thread_load(&mut self, thread_id: &str) -> bool {
        if self.last_loaded_thread.as_deref() == Some(thread_id) {
            return false;
        }
        self.last_loaded_thread = Some(thread_id.to_string());
        true
    }

    /// Replaces the conversation with fetched history.
    pub fn apply_history(&mut self, requested: &str, history: ThreadHistory) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        let (messages, correction) = history.into_parts();
        self.mood = latest_assistant_emotion(&messages)
            .unwrap_or(MOOD_FALLBACK)
            .to_string();
        self.conversation.replace_all(messages);
        if let Some(corrected) = correction {
            if corrected != requested {
                self.adopt_thread(Some(&corrected), true, &mut effects);
            }
        }
        effects
    }

    pub fn fail_thread_load(&mut self) {
        self.last_error = Some(SessionError::ThreadLoad);
    }

    /// Forgets the active thread and its messages. The visitor is kept.
    pub fn reset_thread(&mut self) -> Vec<SessionEffect> {
        self.thread_id = None;
        self.last_loaded_thread = None;
        self.conversation.clear();
        self.mood = MOOD_FALLBACK.to_string();
        vec![SessionEffect::ForgetThread]
    }

    //=====================================================================================
    // Mood
    //=====================================================================================

    fn adopt_emotion(&mut self, emotion: Option<&str>) {
        if let Some(emotion) = non_empty(emotion) {
            self.mood = emotion.to_string();
        }
    }

    fn settle_mood(&mut self) {
        if self.mood == MOOD_THINKING {
            self.mood = MOOD_FALLBACK.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameParser;
    use crate::protocol::SendResponse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn message(id: &str, role: Role, content: &str, emotion: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            role,
            content: content.to_string(),
            created_at: None,
            emotion: emotion.map(str::to_string),
            streaming: false,
        }
    }

    fn run_stream(
        state: &mut SessionState,
        send: &mut PendingSend,
        raw: &str,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        for frame in FrameParser::new().feed(raw.as_bytes()) {
            if send.should_stop() {
                break;
            }
            effects.extend(state.apply_stream_event(send, StreamEvent::decode(&frame), None));
        }
        effects
    }

    fn reply(body: serde_json::Value) -> BufferedReply {
        BufferedReply {
            header_visitor_id: None,
            body: serde_json::from_value::<SendResponse>(body).unwrap(),
        }
    }

    #[test]
    fn begin_send_appends_optimistic_pair() {
        let mut state = SessionState::new(Some("v1".into()), None);
        state.last_error = Some(SessionError::ThreadLoad);

        let send = state.begin_send("  hi there  ").unwrap();

        assert!(state.sending);
        assert_eq!(state.mood, MOOD_THINKING);
        assert_eq!(state.last_error, None);
        assert_eq!(send.request().message, "hi there");
        assert_eq!(send.request().thread_id, None);
        let messages = state.conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi there");
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[1].streaming);
        assert_eq!(state.conversation.streaming_count(), 1);
    }

    #[test]
    fn submit_is_rejected_while_sending_or_blank() {
        let mut state = SessionState::default();
        assert!(state.begin_send("   ").is_none());
        assert!(state.conversation.is_empty());
        assert!(!state.sending);

        let _first = state.begin_send("one").unwrap();
        let before = state.clone();
        assert!(state.begin_send("two").is_none());
        assert_eq!(state, before);
    }

    #[test]
    fn streamed_reply_with_authoritative_done() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();

        let effects = run_stream(
            &mut state,
            &mut send,
            "event: meta\ndata: {\"thread_id\":\"t1\",\"emotion\":\"curious\"}\n\n\
             event: token\ndata: Hel\n\n\
             event: token\ndata: lo\n\n\
             event: done\ndata: {\"assistant_message\":{\"id\":\"m9\",\"role\":\"assistant\",\"content\":\"Hello\",\"emotion\":\"curious\"}}\n\n",
        );
        let outcome = state.finish_stream(send);

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(effects, vec![SessionEffect::PersistThread("t1".into())]);
        assert_eq!(state.thread_id.as_deref(), Some("t1"));
        assert_eq!(state.last_loaded_thread.as_deref(), Some("t1"));
        assert_eq!(state.mood, "curious");
        assert!(!state.sending);
        let last = state.conversation.last().unwrap();
        assert_eq!(last.id, "m9");
        assert_eq!(last.content, "Hello");
        assert!(!last.streaming);
        assert_eq!(state.conversation.streaming_count(), 0);
    }

    #[test]
    fn tokens_concatenate_when_done_has_no_message() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();
        let placeholder_id = send.assistant_temp_id().to_string();

        run_stream(
            &mut state,
            &mut send,
            "event: token\ndata: a\n\nevent: token\ndata: b\ndata: c\n\nevent: token\ndata: d\n\nevent: done\ndata: {}\n\n",
        );
        assert!(send.is_done());
        state.finish_stream(send);

        let reply = state.conversation.get(&placeholder_id).unwrap();
        assert_eq!(reply.content, "ab\ncd");
        assert!(!reply.streaming);
        assert_eq!(state.mood, crate::domain::MOOD_FALLBACK);
    }

    #[test]
    fn done_with_empty_content_keeps_streamed_text() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();
        run_stream(
            &mut state,
            &mut send,
            "event: token\ndata: streamed\n\nevent: done\ndata: {\"assistant_message\":{\"id\":\"a7\",\"role\":\"assistant\",\"content\":\"\",\"emotion\":\"smug\"}}\n\n",
        );
        state.finish_stream(send);

        let last = state.conversation.last().unwrap();
        assert_eq!(last.id, "a7");
        assert_eq!(last.content, "streamed");
        assert_eq!(state.mood, "smug");
    }

    #[test]
    fn meta_replaces_optimistic_user_message_and_visitor() {
        let mut state = SessionState::new(Some("old".into()), Some("t0".into()));
        state.last_loaded_thread = Some("t0".into());
        let mut send = state.begin_send("hey").unwrap();
        assert_eq!(send.request().thread_id.as_deref(), Some("t0"));

        let effects = state.apply_stream_event(
            &mut send,
            StreamEvent::Meta(MetaPayload {
                visitor_id: None,
                thread_id: Some("t0".into()),
                emotion: None,
                user_message: Some(message("u1", Role::User, "hey", None)),
            }),
            Some("new"),
        );

        assert_eq!(effects, vec![SessionEffect::PersistVisitor("new".into())]);
        assert_eq!(state.visitor_id.as_deref(), Some("new"));
        assert_eq!(state.conversation.messages()[0].id, "u1");
        assert_eq!(state.mood, MOOD_THINKING);
    }

    #[test]
    fn error_event_keeps_user_message_and_drops_placeholder() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();
        let user_id = send.user_temp_id().to_string();

        run_stream(
            &mut state,
            &mut send,
            "event: token\ndata: partial\n\nevent: error\ndata: rate limited\n\nevent: token\ndata: late\n\n",
        );
        assert!(send.should_stop());
        let outcome = state.finish_stream(send);

        assert_eq!(outcome, SendOutcome::Failed);
        assert_eq!(state.conversation.len(), 1);
        assert_eq!(state.conversation.messages()[0].id, user_id);
        assert!(state
            .conversation
            .messages()
            .iter()
            .all(|m| m.role != Role::Assistant));
        assert_eq!(
            state.last_error.as_ref().map(ToString::to_string).as_deref(),
            Some("rate limited")
        );
        assert_eq!(state.mood, MOOD_FALLBACK);
        assert!(!state.sending);
    }

    #[test]
    fn error_event_without_text_uses_default_message() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();
        state.apply_stream_event(&mut send, StreamEvent::Error(None), None);
        state.finish_stream(send);
        assert_eq!(
            state.last_error,
            Some(SessionError::Remote(SessionError::Transport.to_string()))
        );
    }

    #[test]
    fn transport_failure_rolls_back_both_messages() {
        let mut state = SessionState::default();
        state
            .conversation
            .push(message("old", Role::User, "earlier", None));
        let mut send = state.begin_send("hey").unwrap();
        state.apply_stream_event(&mut send, StreamEvent::Token("par".into()), None);

        let outcome = state.abort_send(send);

        assert_eq!(outcome, SendOutcome::Failed);
        assert_eq!(state.conversation.len(), 1);
        assert_eq!(state.conversation.messages()[0].id, "old");
        assert_eq!(state.conversation.unconfirmed_count(), 0);
        assert_eq!(state.last_error, Some(SessionError::Transport));
        assert_eq!(state.mood, MOOD_FALLBACK);
        assert!(!state.sending);
    }

    #[test]
    fn graceful_end_without_done_clears_streaming() {
        let mut state = SessionState::default();
        let mut send = state.begin_send("hey").unwrap();
        run_stream(&mut state, &mut send, "event: token\ndata: cut off\n\n");
        let outcome = state.finish_stream(send);

        assert_eq!(outcome, SendOutcome::Completed);
        let last = state.conversation.last().unwrap();
        assert_eq!(last.content, "cut off");
        assert!(!last.streaming);
    }

    #[test]
    fn buffered_pair_appends_both_messages_in_order() {
        let mut state = SessionState::default();
        let send = state.begin_send("hello").unwrap();

        let (outcome, effects) = state.apply_buffered_reply(
            send,
            reply(json!({
                "thread_id": "t5",
                "user_message": {"id": "u1", "role": "user", "content": "hello"},
                "assistant_message": {"id": "a1", "role": "assistant", "content": "meh", "emotion": "sad"}
            })),
        );

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(effects, vec![SessionEffect::PersistThread("t5".into())]);
        let ids: Vec<_> = state
            .conversation
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, ["u1", "a1"]);
        assert_eq!(state.mood, "sad");
        assert_eq!(state.last_loaded_thread.as_deref(), Some("t5"));
        assert!(!state.sending);
    }

    #[test]
    fn buffered_pair_keeps_local_user_message_when_server_omits_it() {
        let mut state = SessionState::default();
        let send = state.begin_send("hello").unwrap();
        let user_id = send.user_temp_id().to_string();

        state.apply_buffered_reply(
            send,
            reply(json!({"assistant_message": {"id": "a1", "role": "assistant", "content": "ok"}})),
        );

        let messages = state.conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, user_id);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].id, "a1");
        assert_eq!(state.mood, MOOD_FALLBACK);
        assert_eq!(state.conversation.unconfirmed_count(), 1);
    }

    #[test]
    fn buffered_full_list_replaces_conversation() {
        let mut state = SessionState::default();
        state
            .conversation
            .push(message("stale", Role::User, "gone", None));
        let send = state.begin_send("hello").unwrap();

        state.apply_buffered_reply(
            send,
            reply(json!({
                "messages": [
                    {"id": "a0", "role": "assistant", "content": "x", "emotion": "happy"},
                    {"id": "u1", "role": "user", "content": "hello"},
                    {"id": "a1", "role": "assistant", "content": "y"}
                ]
            })),
        );

        assert_eq!(state.conversation.len(), 3);
        assert_eq!(state.conversation.get("stale"), None);
        assert_eq!(state.mood, "happy");
    }

    #[test]
    fn buffered_single_message_is_appended() {
        let mut state = SessionState::default();
        let send = state.begin_send("hello").unwrap();
        let (_, effects) = state.apply_buffered_reply(
            send,
            BufferedReply {
                header_visitor_id: Some("hv".into()),
                body: serde_json::from_value(json!({
                    "visitor_id": "bv",
                    "message": {"id": "a1", "role": "assistant", "content": "sup", "emotion": "bored"}
                }))
                .unwrap(),
            },
        );

        assert_eq!(effects, vec![SessionEffect::PersistVisitor("hv".into())]);
        assert_eq!(state.conversation.len(), 1);
        assert_eq!(state.conversation.messages()[0].id, "a1");
        assert_eq!(state.mood, "bored");
    }

    #[test]
    fn thread_load_is_claimed_once_per_id() {
        let mut state = SessionState::default();
        assert!(state.begin_thread_load("t1"));
        assert!(!state.begin_thread_load("t1"));
        assert!(state.begin_thread_load("t2"));
        assert!(state.begin_thread_load("t1"));
    }

    #[test]
    fn history_replaces_conversation_and_recomputes_mood() {
        let mut state = SessionState::new(None, Some("t1".into()));
        state.mood = "angry".into();
        let effects = state.apply_history(
            "t1",
            ThreadHistory::List(vec![
                message("a1", Role::Assistant, "x", Some("sad")),
                message("a2", Role::Assistant, "y", None),
                message("u1", Role::User, "z", None),
            ]),
        );
        assert!(effects.is_empty());
        assert_eq!(state.conversation.len(), 3);
        assert_eq!(state.mood, "sad");

        state.apply_history("t1", ThreadHistory::List(Vec::new()));
        assert_eq!(state.mood, MOOD_FALLBACK);
    }

    #[test]
    fn history_envelope_corrects_thread_id() {
        let mut state = SessionState::new(None, Some("t1".into()));
        assert!(state.begin_thread_load("t1"));
        let effects = state.apply_history(
            "t1",
            ThreadHistory::Envelope {
                messages: Vec::new(),
                thread_id: Some("t1-canonical".into()),
            },
        );
        assert_eq!(
            effects,
            vec![SessionEffect::PersistThread("t1-canonical".into())]
        );
        assert_eq!(state.thread_id.as_deref(), Some("t1-canonical"));
        assert_eq!(state.last_loaded_thread.as_deref(), Some("t1-canonical"));
    }

    #[test]
    fn meta_with_naive_timestamp_is_applied() {
        let mut state = SessionState::new(Some("v1".into()), None);
        let mut send = state.begin_send("hello").unwrap();
        let effects = run_stream(
            &mut state,
            &mut send,
            "event: meta\ndata: {\"thread_id\":\"t1\",\"emotion\":\"curious\",\"user_message\":{\"id\":\"u1\",\"role\":\"user\",\"content\":\"hello\",\"created_at\":\"2024-05-01T10:00:00.123456\"}}\n\n",
        );

        assert_eq!(effects, vec![SessionEffect::PersistThread("t1".into())]);
        assert_eq!(state.thread_id.as_deref(), Some("t1"));
        assert_eq!(state.mood, "curious");
        let first = &state.conversation.messages()[0];
        assert_eq!(first.id, "u1");
        assert!(!first.is_optimistic());
        assert!(first.created_at.is_some());
    }

    #[test]
    fn history_with_naive_timestamps_is_kept() {
        let mut state = SessionState::new(None, Some("t1".into()));
        state.conversation.push(message("old", Role::User, "x", None));
        let history = ThreadHistory::from_body(
            br#"[{"id":"u1","role":"user","content":"hi","created_at":"2024-05-01 09:59:00"},
                {"id":"a1","role":"assistant","content":"hey","emotion":"sad","created_at":"2024-05-01T10:00:00"}]"#,
        );

        state.apply_history("t1", history);

        let ids: Vec<&str> = state
            .conversation
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["u1", "a1"]);
        assert_eq!(state.mood, "sad");
    }

    #[test]
    fn buffered_reply_with_naive_timestamp_completes() {
        let mut state = SessionState::new(Some("v1".into()), Some("t1".into()));
        let send = state.begin_send("hello").unwrap();
        let (outcome, _) = state.apply_buffered_reply(
            send,
            reply(json!({
                "user_message": {"id": "u1", "role": "user", "content": "hello", "created_at": "2024-05-01T10:00:00.5"},
                "assistant_message": {"id": "a1", "role": "assistant", "content": "hi", "created_at": "2024-05-01T10:00:01"}
            })),
        );
        assert_eq!(outcome, SendOutcome::Completed);
        let ids: Vec<&str> = state
            .conversation
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["u1", "a1"]);
    }

    #[test]
    fn reset_thread_keeps_visitor() {
        let mut state = SessionState::new(Some("v1".into()), Some("t1".into()));
        state.last_loaded_thread = Some("t1".into());
        state.mood = "sad".into();
        state
            .conversation
            .push(message("u1", Role::User, "x", None));

        let effects = state.reset_thread();

        assert_eq!(effects, vec![SessionEffect::ForgetThread]);
        assert_eq!(state.visitor_id.as_deref(), Some("v1"));
        assert_eq!(state.thread_id, None);
        assert_eq!(state.last_loaded_thread, None);
        assert!(state.conversation.is_empty());
        assert_eq!(state.mood, MOOD_FALLBACK);
    }

    #[test]
    fn visitor_grant_without_id_is_a_bootstrap_failure() {
        let mut state = SessionState::default();
        let (adopted, effects) = state.apply_visitor_grant(&VisitorGrant::default());
        assert!(!adopted);
        assert!(effects.is_empty());
        assert_eq!(state.last_error, Some(SessionError::Bootstrap));
        assert!(!state.loading);

        let (adopted, effects) = state.apply_visitor_grant(&VisitorGrant {
            header_visitor_id: None,
            body_visitor_id: Some("v9".into()),
        });
        assert!(adopted);
        assert_eq!(effects, vec![SessionEffect::PersistVisitor("v9".into())]);
    }
}
