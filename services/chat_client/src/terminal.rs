//! services/chat_client/src/terminal.rs
//!
//! Plain-text rendering and command parsing for the `chat` binary.

use chat_sync_core::domain::{Message, Role, SessionState};

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    NewThread,
    Quit,
    Send(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "/new" => Command::NewThread,
            "/quit" | "/exit" => Command::Quit,
            text => Command::Send(text),
        }
    }
}

pub fn render_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    match &message.emotion {
        Some(emotion) if message.role == Role::Assistant => {
            format!("{} [{}]: {}", speaker, emotion, message.content)
        }
        _ => format!("{}: {}", speaker, message.content),
    }
}

/// The reply to print after a completed send, unless the streamed tokens
/// already showed exactly that text.
pub fn unshown_reply<'a>(state: &'a SessionState, streamed: &str) -> Option<&'a Message> {
    state
        .conversation
        .last()
        .filter(|m| m.role == Role::Assistant && m.content != streamed)
}

/// The line printed after every operation: current mood plus any error.
pub fn status_line(state: &SessionState) -> String {
    match &state.last_error {
        Some(error) => format!("(mood: {}) error: {}", state.mood, error),
        None => format!("(mood: {})", state.mood),
    }
}
