use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tabpause::clock::SystemClock;
use tabpause::config::{self, Config};
use tabpause::event::DaemonEvent;
use tabpause::monitor::{MonitorSettings, SwitchMonitor};
use tabpause::{agent, bridge, logging, paths};

#[tokio::main]
async fn main() {
    logging::init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match paths::config_file_path() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("[config] {e:#}; using defaults without hot reload");
            None
        }
    };
    let initial_config = config_path
        .as_deref()
        .map(|path| {
            config::load_or_default(path).unwrap_or_else(|e| {
                log::warn!("[config] Error (using defaults): {e:#}");
                Config::default()
            })
        })
        .unwrap_or_default();

    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(64);

    // ── Background tasks ──────────────────────────────────────────────────────
    if let Some(path) = config_path {
        tokio::spawn(config::watch_config(path, event_tx.clone()));
    }

    let (host, bridge) = bridge::connect(
        tokio::io::stdin(),
        tokio::io::stdout(),
        event_tx.clone(),
        Duration::from_millis(initial_config.bridge.request_timeout_ms),
    );

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    log::info!("tabpause-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    let monitor = Arc::new(SwitchMonitor::new(
        host,
        SystemClock,
        MonitorSettings::from_config(&initial_config),
    ));
    agent::run(Arc::clone(&monitor), event_rx).await;

    // ── Teardown ──────────────────────────────────────────────────────────────
    bridge.close().await;
    log::info!("tabpause-daemon stopped");

    // A pending blocking read on stdin would otherwise hold the runtime open.
    std::process::exit(0);
}
