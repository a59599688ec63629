//! Inspector bridge - Unix socket command server
//!
//! The inspector UI connects here and speaks newline-delimited JSON: each
//! line is one `action`-tagged command, answered with exactly one JSON
//! response line. A malformed line gets a `success: false` response rather
//! than a dropped connection.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use apitap_core::coordinator::{CoordinatorHandle, InspectorCommand, InspectorResponse};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/apitap.sock";

/// Get the socket path (can be overridden via env var)
pub fn socket_path() -> PathBuf {
    std::env::var("APITAP_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Start the bridge server. Returns the accept-loop task and a shutdown
/// sender.
pub async fn start_bridge(
    socket_path: PathBuf,
    handle: CoordinatorHandle,
) -> Result<(tokio::task::JoinHandle<()>, broadcast::Sender<()>), String> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .map_err(|e| format!("Failed to remove existing socket: {e}"))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| format!("Failed to bind socket at {}: {e}", socket_path.display()))?;
    info!("inspector bridge listening at {}", socket_path.display());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();

    let task = tokio::spawn(async move {
        let mut shutdown_rx = shutdown_tx_clone.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            debug!("inspector connected");
                            tokio::spawn(handle_connection(stream, handle.clone()));
                        }
                        Err(e) => {
                            error!("failed to accept inspector connection: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("inspector bridge shutting down");
                    break;
                }
            }
        }
        let _ = std::fs::remove_file(&socket_path);
    });

    Ok((task, shutdown_tx))
}

/// Serve one inspector connection: one command per line, one response per
/// command.
async fn handle_connection(stream: UnixStream, handle: CoordinatorHandle) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<InspectorCommand>(&line) {
            Ok(command) => handle.command(command).await,
            Err(err) => {
                warn!("invalid inspector command: {err}");
                InspectorResponse::failure(format!("invalid command: {err}"))
            }
        };

        let mut payload = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(err) => {
                error!("failed to serialize response: {err}");
                continue;
            }
        };
        payload.push('\n');

        if let Err(err) = write_half.write_all(payload.as_bytes()).await {
            debug!("inspector write failed: {err}");
            break;
        }
        let _ = write_half.flush().await;
    }

    debug!("inspector disconnected");
}
