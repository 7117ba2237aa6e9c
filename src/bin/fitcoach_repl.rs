//! Line-oriented host for the chat session.
//!
//! Reads commands from stdin and prints finished transcript messages to
//! stdout. Tracing output goes to stderr.
//!
//! ```text
//! fitcoach-repl [config.toml]
//!
//! /mode <general|foodLog|workoutLog|dietTemplate|workoutTemplate|analysis>
//! /meal <name>        select the meal for food logging
//! /voice <file>       send an audio file as a voice message
//! /save | /modify     answer a save point
//! /go | /dismiss      answer a navigation offer
//! /quit
//! anything else       sent as a text message
//! ```

use anyhow::Context;
use fitcoach::ConversationMode;
use fitcoach::config::CoachConfig;
use fitcoach::controller::{Affordance, AffordanceChoice, SessionSnapshot};
use fitcoach::credentials::KeyringStore;
use fitcoach::session::{ChatSession, UiNotice};
use fitcoach::transcript::MessageId;
use fitcoach::transcription::AudioClip;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fitcoach=info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(CoachConfig::default_config_path);
    let config = if path.exists() {
        CoachConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        CoachConfig::default()
    };

    let store = Arc::new(KeyringStore::new(config.auth.keyring_service.clone()));
    let (client, session) = ChatSession::spawn(&config, store)?;

    tokio::spawn(render(client.watch()));
    tokio::spawn(announce(client.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = line
            .split_once(' ')
            .map_or((line, ""), |(c, a)| (c, a.trim()));

        let result = match command {
            "/quit" => break,
            "/mode" => match arg.parse::<ConversationMode>() {
                Ok(mode) => client.switch_mode(mode).await,
                Err(e) => Err(e),
            },
            "/meal" => client.select_required_parameter(arg).await,
            "/voice" => match tokio::fs::read(arg).await {
                Ok(bytes) => {
                    client
                        .submit_voice(AudioClip::from_file_name(bytes, arg))
                        .await
                }
                Err(e) => {
                    eprintln!("cannot read {arg}: {e}");
                    continue;
                }
            },
            "/save" => client.resolve_affordance(AffordanceChoice::Save).await,
            "/modify" => client.resolve_affordance(AffordanceChoice::Modify).await,
            "/go" => client.resolve_affordance(AffordanceChoice::Accept).await,
            "/dismiss" => client.resolve_affordance(AffordanceChoice::Dismiss).await,
            _ => client.submit_text(line).await,
        };
        if let Err(e) = result {
            eprintln!("{e}");
        }
    }

    client.shutdown().await?;
    session.await.context("session task failed")?;
    Ok(())
}

/// Print each message once, when it is complete.
async fn render(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut printed: HashSet<MessageId> = HashSet::new();
    let mut reward = None;
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        for message in &snapshot.messages {
            if message.is_loader || !message.is_complete || !printed.insert(message.id) {
                continue;
            }
            let who = if message.is_user {
                "you"
            } else if message.is_error {
                "error"
            } else {
                "coach"
            };
            println!("[{who}] {}", message.text);
        }
        if snapshot.reward_points != reward {
            reward = snapshot.reward_points;
            if let Some(points) = reward {
                println!("[reward] {points} points");
            }
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

async fn announce(mut notices: broadcast::Receiver<UiNotice>) {
    loop {
        match notices.recv().await {
            Ok(UiNotice::AffordanceOffered(Affordance::SavePoint)) => {
                println!("(reply /save or /modify)");
            }
            Ok(UiNotice::AffordanceOffered(Affordance::Navigation { target })) => {
                println!("(open {target}? reply /go or /dismiss)");
            }
            Ok(UiNotice::NavigationRequested { target }) => println!("-> {target}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
