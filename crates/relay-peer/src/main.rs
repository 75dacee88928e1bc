//! Chat relay peer entry point.
//!
//! Connects to a relay server, prints every [`relay_core::RelayEvent`] to
//! stdout, and sends stdin lines as chat until Ctrl-C, `/quit`, end of input,
//! or the server going away.
//!
//! # Usage
//!
//! ```text
//! relay-peer --name <NAME> [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML configuration file [default: relay-peer.toml]
//!   --server <HOST:PORT>     Relay server address (overrides the file)
//!   --name <NAME>            Display name (overrides the file; required somewhere)
//!   --download-dir <PATH>    Where received files are stored
//! ```
//!
//! # Console
//!
//! ```text
//! hello              → MSG|<name>: hello
//! /file ./notes.txt  → FILE|notes.txt|<size> + content
//! /quit              → disconnect
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_peer::infrastructure::network::session::PeerSession;
use relay_peer::infrastructure::storage::config::{load_config, PeerSettings};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Chat relay peer.
#[derive(Debug, Parser)]
#[command(name = "relay-peer", about = "Chat relay peer", version)]
struct Cli {
    /// TOML configuration file; missing file means built-in defaults.
    #[arg(long, default_value = "relay-peer.toml", env = "RELAY_PEER_CONFIG")]
    config: PathBuf,

    /// Relay server address as `host:port`.
    #[arg(long, env = "RELAY_SERVER")]
    server: Option<String>,

    /// Display name announced to the other peers.
    #[arg(long, env = "RELAY_NAME")]
    name: Option<String>,

    /// Directory received files are written to.
    #[arg(long, env = "RELAY_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file, applies overrides, and checks that a display
    /// name is known.
    fn into_settings(self) -> anyhow::Result<PeerSettings> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(server) = self.server {
            config.peer.server_address = server;
        }
        if let Some(name) = self.name {
            config.peer.display_name = name;
        }
        if let Some(dir) = self.download_dir {
            config.peer.download_dir = Some(dir);
        }
        config.validate().context("invalid settings")?;

        config.peer.display_name = config.peer.display_name.trim().to_string();
        if config.peer.display_name.is_empty() {
            bail!("a display name is required (--name, RELAY_NAME, or display_name in the config file)");
        }
        Ok(config.peer)
    }
}

// ── Console ───────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    SendFile(PathBuf),
    Quit,
    Nothing,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line.split_once(' ') {
        _ if line.is_empty() => Command::Nothing,
        _ if line == "/quit" => Command::Quit,
        Some(("/file", path)) if !path.trim().is_empty() => {
            Command::SendFile(PathBuf::from(path.trim()))
        }
        _ => Command::Chat(line.to_string()),
    }
}

async fn run_console(session: &PeerSession) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = session.disconnected() => return,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C; disconnecting");
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    error!("failed to read stdin: {e}");
                    return;
                }
            },
        };

        match parse_command(&line) {
            Command::Chat(text) => match session.send_text(&text).await {
                Ok(()) => println!("{}: {text}", session.display_name()),
                Err(e) => warn!("message not sent: {e}"),
            },
            Command::SendFile(path) => match session.send_file(&path).await {
                Ok(size) => println!("Sent {} ({size} bytes)", path.display()),
                Err(e) => warn!("file not sent: {e}"),
            },
            Command::Quit => return,
            Command::Nothing => {}
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (session, mut events) =
        PeerSession::connect(&settings.server_address, &settings.display_name, &settings)
            .await
            .with_context(|| format!("could not join {}", settings.server_address))?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });

    info!(
        server = %session.server_addr(),
        "connected as {}; type to chat, /file <path> to share, /quit to leave",
        session.display_name()
    );
    run_console(&session).await;

    session.shutdown().await;
    if let Err(e) = printer.await {
        warn!("event printer failed: {e}");
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
