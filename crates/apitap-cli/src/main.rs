//! Apitap daemon
//!
//! Attaches to a running Chromium-family browser over the DevTools protocol,
//! captures API-like HTTP(S) traffic for the foreground tab, and serves the
//! aggregated state to an inspector UI over a local command socket.
//!
//! Start the browser with `--remote-debugging-port=9222`, then run `apitap`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use apitap_core::coordinator::coordinator_channel;
use apitap_core::settings::SettingsStore;
use apitap_core::store::RequestStore;
use apitap_core::TabCoordinator;

mod bridge;
mod browser;

/// Apitap - capture API traffic from a browser tab
///
/// Connects to the browser's DevTools endpoint and records API-like requests
/// for the foreground tab. The inspector UI talks to the daemon over a Unix
/// socket.
#[derive(Parser, Debug)]
#[command(name = "apitap")]
#[command(version, about, long_about = None)]
struct Args {
    /// Browser DevTools endpoint (host:port of --remote-debugging-port)
    #[arg(short, long, default_value = "127.0.0.1:9222", env = "APITAP_BROWSER")]
    browser: String,

    /// Inspector bridge socket path
    #[arg(short, long, env = "APITAP_SOCKET")]
    socket: Option<PathBuf>,

    /// Settings file path (defaults to the platform data directory)
    #[arg(long, env = "APITAP_CONFIG")]
    config: Option<PathBuf>,

    /// Foreground-tab poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let settings = match args.config {
        Some(path) => SettingsStore::open(path),
        None => SettingsStore::open_default(),
    };
    let store = RequestStore::new();
    let (handle, events_rx) = coordinator_channel(256);

    let transport = match browser::ChromeTransport::connect(&args.browser, handle.clone()).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("Error: cannot reach browser at {}: {e}", args.browser);
            eprintln!("Start it with --remote-debugging-port and try again.");
            return ExitCode::FAILURE;
        }
    };

    let coordinator = TabCoordinator::new(Arc::clone(&transport), store, settings, events_rx);
    let worker = tokio::spawn(coordinator.run());

    let watcher = browser::spawn_foreground_watcher(
        Arc::clone(&transport),
        handle.clone(),
        Duration::from_millis(args.poll_ms.max(100)),
    );

    let socket_path = args.socket.unwrap_or_else(bridge::socket_path);
    let (bridge_task, shutdown_tx) = match bridge::start_bridge(socket_path, handle).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("apitap ready");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(());
    let _ = bridge_task.await;
    watcher.abort();
    worker.abort();

    ExitCode::SUCCESS
}
