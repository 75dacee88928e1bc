//! Chat relay server entry point.
//!
//! Binds the relay, prints every [`RelayEvent`] to stdout, and turns stdin
//! lines into operator actions until Ctrl-C, `/quit`, or end of input.
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML configuration file [default: relay-server.toml]
//!   --port <PORT>         Listening port (overrides the file)
//!   --bind <ADDR>         Bind address (overrides the file)
//!   --max-clients <N>     Admission bound (overrides the file)
//! ```
//!
//! # Operator console
//!
//! ```text
//! hello everyone      → MSG|Server: hello everyone   to every peer
//! /file ./notes.txt   → FILE|notes.txt|<size>|Server + content
//! /who                → list connected peers
//! /quit               → shut down
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_server::infrastructure::network::server::{RelayServer, ServerHandle};
use relay_server::infrastructure::storage::config::{load_config, ServerSettings};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Chat relay server.
///
/// Accepts up to five peers and relays chat lines and files between them.
#[derive(Debug, Parser)]
#[command(name = "relay-server", about = "Chat relay server", version)]
struct Cli {
    /// TOML configuration file; missing file means built-in defaults.
    #[arg(long, default_value = "relay-server.toml", env = "RELAY_SERVER_CONFIG")]
    config: PathBuf,

    /// TCP port to listen on.
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// IP address to bind to.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Maximum number of simultaneous peers.
    #[arg(long, env = "RELAY_MAX_CLIENTS")]
    max_clients: Option<usize>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    fn into_settings(self) -> anyhow::Result<ServerSettings> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(max_clients) = self.max_clients {
            config.server.max_clients = max_clients;
        }
        config.validate().context("invalid settings")?;
        Ok(config.server)
    }
}

// ── Operator console ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    SendFile(PathBuf),
    Who,
    Quit,
    Nothing,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Nothing;
    }
    match line.split_once(' ') {
        Some(("/file", path)) if !path.trim().is_empty() => {
            Command::SendFile(PathBuf::from(path.trim()))
        }
        _ if line == "/who" => Command::Who,
        _ if line == "/quit" => Command::Quit,
        _ => Command::Chat(line.to_string()),
    }
}

async fn run_console(handle: &ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = handle.stopped() => return,
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
            Command::Chat(text) => match handle.send_text(&text).await {
                Ok(report) => println!("Server: {text}  (to {} peer(s))", report.delivered),
                Err(e) => warn!("message not sent: {e}"),
            },
            Command::SendFile(path) => match handle.send_file(&path).await {
                Ok(recipients) => println!("Sent {} to {recipients} peer(s)", path.display()),
                Err(e) => warn!("file not sent: {e}"),
            },
            Command::Who => println!(
                "{} connection(s): {}",
                handle.connection_count(),
                handle.peers().join(", ")
            ),
            Command::Quit => return,
            Command::Nothing => {}
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (server, mut events) = RelayServer::bind(&settings)
        .await
        .context("failed to start relay server")?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C; shutting down");
                ctrl_c_handle.shutdown();
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("relay server ready; type to chat, /file <path> to share, /quit to stop");
    run_console(&handle).await;

    handle.shutdown();
    server_task.await.context("relay server task failed")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
