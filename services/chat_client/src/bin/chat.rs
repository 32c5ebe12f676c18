//! services/chat_client/src/bin/chat.rs

use chat_client_lib::{
    adapters::{FileIdentityStore, HttpChatAdapter},
    config::Config,
    error::ClientError,
    terminal::{render_message, status_line, unshown_reply, Command},
};
use chat_sync_core::{ChatSession, SendOutcome, SessionUpdate};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Talking to {}", config.api_base_url);

    // --- 2. Initialize Adapters ---
    let client = reqwest::Client::builder().build()?;
    let api = Arc::new(HttpChatAdapter::new(client, &config.api_base_url)?);
    let store = Arc::new(FileIdentityStore::new(config.state_path.clone()));

    // --- 3. Hydrate the Session ---
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut session = ChatSession::hydrate(api, store)
        .await
        .with_mode(config.send_mode)
        .with_history_limit(config.history_limit)
        .with_updates(updates_tx);

    session.ensure_visitor().await;
    session.sync_thread().await;
    for message in session.state().conversation.messages() {
        println!("{}", render_message(message));
    }
    println!("{}", status_line(session.state()));

    // --- 4. Read Lines Until EOF or /quit ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::NewThread => {
                session.start_new_thread().await;
                println!("-- new thread --");
            }
            Command::Send(text) => {
                if session.state().visitor_id.is_none() {
                    session.ensure_visitor().await;
                }
                let mut streamed = String::new();
                let outcome = {
                    let submit = session.submit(text);
                    tokio::pin!(submit);
                    loop {
                        tokio::select! {
                            outcome = &mut submit => break outcome,
                            Some(update) = updates_rx.recv() => print_update(update, &mut streamed),
                        }
                    }
                };
                drain_updates(&mut updates_rx, &mut streamed);
                if outcome == SendOutcome::Completed {
                    if let Some(reply) = unshown_reply(session.state(), &streamed) {
                        println!("{}", render_message(reply));
                    }
                }
                session.sync_thread().await;
            }
        }
        drain_updates(&mut updates_rx, &mut String::new());
        println!("{}", status_line(session.state()));
    }

    info!("Goodbye.");
    Ok(())
}

fn drain_updates(updates: &mut UnboundedReceiver<SessionUpdate>, streamed: &mut String) {
    while let Ok(update) = updates.try_recv() {
        print_update(update, streamed);
    }
}

/// Prints tokens as they arrive and keeps a copy of what was shown.
fn print_update(update: SessionUpdate, streamed: &mut String) {
    let mut stdout = std::io::stdout();
    match update {
        SessionUpdate::Token(text) => {
            let _ = write!(stdout, "{}", text);
            streamed.push_str(&text);
        }
        SessionUpdate::Finished(SendOutcome::Completed) if !streamed.is_empty() => {
            let _ = writeln!(stdout);
        }
        SessionUpdate::Finished(_) | SessionUpdate::Mood(_) => {}
    }
    let _ = stdout.flush();
}
