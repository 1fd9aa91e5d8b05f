use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings, ClientEvent, LogLevel, RealtimeClient};
use shared::domain::TranscriptEntry;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Flat TOML settings file; defaults to ./realtime.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    session_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    room: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Start,
    Stop,
    Transcript,
    Quit,
    Text(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Empty,
        "/start" => Input::Start,
        "/stop" => Input::Stop,
        "/transcript" => Input::Transcript,
        "/quit" | "/exit" => Input::Quit,
        text => Input::Text(text.to_string()),
    }
}

fn render_entry(entry: &TranscriptEntry) -> String {
    let marker = if entry.open { " ..." } else { "" };
    format!("{}: {}{marker}", entry.role.label(), entry.text)
}

/// Returns the entries that closed since the last call. `printed` tracks
/// which indices have already been shown.
fn newly_closed(printed: &mut Vec<bool>, entries: &[TranscriptEntry]) -> Vec<String> {
    printed.resize(entries.len().max(printed.len()), false);
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.open)
        .filter_map(|(index, entry)| {
            if printed[index] {
                return None;
            }
            printed[index] = true;
            Some(render_entry(entry))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(session_url) = args.session_url {
        settings.session_url = session_url;
    }
    if let Some(user_id) = args.user_id {
        settings.user_id = user_id;
    }
    if args.room.is_some() {
        settings.room = args.room;
    }

    let client = RealtimeClient::new(settings).context("failed to build realtime client")?;
    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        let mut printed = Vec::new();
        loop {
            match events.recv().await {
                Ok(ClientEvent::StateChanged(state)) => println!("[state] {state}"),
                Ok(ClientEvent::TranscriptChanged(entries)) => {
                    for line in newly_closed(&mut printed, &entries) {
                        println!("{line}");
                    }
                }
                Ok(ClientEvent::Log(line)) if line.level >= LogLevel::Info => println!("{line}"),
                Ok(ClientEvent::Log(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("commands: /start  /stop  /transcript  /quit  (anything else is sent as text)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {}
            Input::Start => {
                if let Err(err) = client.start().await {
                    println!("start failed: {err}");
                }
            }
            Input::Stop => {
                for failure in client.stop().await? {
                    println!("teardown: {failure}");
                }
            }
            Input::Transcript => {
                for entry in client.transcript() {
                    println!("{}", render_entry(&entry));
                }
            }
            Input::Quit => break,
            Input::Text(text) => {
                if !client.send_text(text).await? {
                    println!("not connected; use /start first");
                }
            }
        }
    }

    client.stop().await?;
    Ok(())
}
