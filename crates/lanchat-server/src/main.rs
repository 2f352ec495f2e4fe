//! # lanchat
//!
//! Terminal front end for a LAN chat participant.
//!
//! Starts a [`Node`] (multicast chat, file transfer server, web UI) and
//! reads commands from stdin:
//! - plain text is sent as a chat message
//! - `/share <path>` shares a file
//! - `/files` lists shared files
//! - `/get <fileId> [dir]` downloads a file
//! - `/clear` removes this participant's files
//! - `/quit` leaves the chat
//!
//! Usage: `lanchat [display-name]`

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanchat_server::{Node, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lanchat_server=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting lanchat v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let mut config = NodeConfig::from_env();
    if let Some(name) = std::env::args().nth(1) {
        config = config.with_display_name(&name);
    }
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Start the node and mirror its transcript to stdout
    // -----------------------------------------------------------------------
    let node = Node::start(config).await?;
    for entry in node.transcript().snapshot().await {
        println!("{entry}");
    }
    node.on_transcript_appended(|entry| println!("{entry}")).await;

    // -----------------------------------------------------------------------
    // 4. Read commands until /quit, EOF or Ctrl+C
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&node, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
        }
    }

    node.shutdown().await;
    Ok(())
}

/// Execute one input line. Returns `false` when the user wants to leave.
async fn run_command(node: &Node, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/share" => match node.share_local_file(Path::new(rest)).await {
            Ok(record) => println!("Shared {} ({})", record.file_name, record.file_id),
            Err(e) => println!("Cannot share {rest}: {e}"),
        },
        "/files" => {
            for record in node.registry().list().await {
                println!(
                    "{}  {}  {} bytes  from {}",
                    record.file_id, record.file_name, record.size_bytes, record.owner
                );
            }
        }
        "/get" => {
            let (id, dir) = rest.split_once(' ').unwrap_or((rest, "."));
            match id.parse() {
                Ok(file_id) => match node.download_remote_file(&file_id, &PathBuf::from(dir.trim())).await {
                    Ok(path) => println!("Saved to {}", path.display()),
                    Err(e) => println!("Download failed: {e}"),
                },
                Err(_) => println!("Not a file id: {id}"),
            }
        }
        "/clear" => {
            if let Err(e) = node.clear_local_session().await {
                println!("Failed to clear session: {e}");
            }
        }
        _ => {
            if let Err(e) = node.send_local_message(line).await {
                println!("Failed to send message: {e}");
            }
        }
    }
    true
}
