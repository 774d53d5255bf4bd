use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::event::DaemonEvent;
use crate::host::Host;
use crate::monitor::{MonitorSettings, Observation, SwitchMonitor};

/// Daemon event loop.
///
/// Host events are recorded in arrival order on this task; each trigger they
/// cause runs on its own task so later events are still observed while a
/// handshake is in flight. Returns after `Shutdown` or when every sender is
/// gone, with in-flight triggers aborted and the monitor's cooldown cancelled.
pub async fn run<H: Host, C: Clock>(
    monitor: Arc<SwitchMonitor<H, C>>,
    mut rx: mpsc::Receiver<DaemonEvent>,
) {
    let mut triggers = JoinSet::new();

    while let Some(evt) = rx.recv().await {
        // Reap finished triggers so the set does not grow unbounded.
        while let Some(done) = triggers.try_join_next() {
            if let Err(e) = done {
                if e.is_panic() {
                    log::error!("[agent] Trigger task panicked: {e}");
                }
            }
        }

        match evt {
            DaemonEvent::Host(event) => {
                if let Observation::ThresholdReached { count, target } = monitor.observe(&event) {
                    log::debug!("[agent] {count} switches; firing at {target:?}");
                    let monitor = Arc::clone(&monitor);
                    triggers.spawn(async move {
                        let outcome = monitor.fire(target).await;
                        if outcome.entered_cooldown() {
                            log::debug!("[agent] Trigger finished ({outcome:?}); cooling down");
                        } else {
                            log::debug!("[agent] Trigger finished ({outcome:?}); window kept");
                        }
                    });
                }
            }

            DaemonEvent::ConfigReloaded(config) => {
                log::info!("[config] Reloaded");
                monitor.apply_settings(MonitorSettings::from_config(&config));
            }

            DaemonEvent::Shutdown => {
                log::info!("[agent] Shutdown requested");
                break;
            }
        }
    }

    triggers.shutdown().await;
    monitor.shutdown();
    log::info!("[agent] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::HostEvent;
    use crate::protocol::TabId;
    use crate::testing::{run_pending, FakeHost, PageMode, TokioClock};
    use std::time::Duration;

    fn activated(id: u32) -> DaemonEvent {
        DaemonEvent::Host(HostEvent::TabActivated { tab_id: TabId(id) })
    }

    fn start(
        host: &FakeHost,
    ) -> (
        Arc<SwitchMonitor<FakeHost, TokioClock>>,
        mpsc::Sender<DaemonEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let monitor = Arc::new(SwitchMonitor::new(
            host.clone(),
            TokioClock::new(0),
            MonitorSettings::default(),
        ));
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(Arc::clone(&monitor), rx));
        (monitor, tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn host_events_drive_a_trigger() {
        let host = FakeHost::new();
        host.add_tab(1, "https://a.example", PageMode::Loaded);
        host.add_tab(2, "https://b.example", PageMode::Loaded);
        let (monitor, tx, handle) = start(&host);

        tx.send(activated(1)).await.unwrap();
        tx.send(activated(2)).await.unwrap();
        run_pending().await;

        assert_eq!(host.shows(TabId(2)).len(), 1);
        assert!(monitor.is_cooling());

        tx.send(DaemonEvent::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_observed_while_a_trigger_is_in_flight() {
        let host = FakeHost::new();
        host.add_tab(1, "https://a.example", PageMode::Loaded);
        host.add_tab(2, "https://b.example", PageMode::Loaded);
        host.set_latency(Duration::from_millis(500));
        let (monitor, tx, handle) = start(&host);

        tx.send(activated(1)).await.unwrap();
        tx.send(activated(2)).await.unwrap();
        tx.send(activated(1)).await.unwrap();
        run_pending().await;

        // PING then SHOW_OVERLAY, each 500ms; the second sleep is only
        // registered once the first one has fired.
        assert!(!monitor.is_cooling());
        tokio::time::advance(Duration::from_millis(500)).await;
        run_pending().await;
        assert!(host.shows(TabId(2)).is_empty());
        tokio::time::advance(Duration::from_millis(500)).await;
        run_pending().await;

        // Cooldown starts only once the handshake finishes, so both
        // threshold crossings fire.
        assert_eq!(host.shows(TabId(2)).len(), 1);
        assert_eq!(host.shows(TabId(1)).len(), 1);
        assert!(monitor.is_cooling());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn config_reload_applies_new_threshold() {
        let host = FakeHost::new();
        host.add_tab(1, "https://a.example", PageMode::Loaded);
        let (monitor, tx, handle) = start(&host);

        let mut config = Config::default();
        config.monitor.threshold = 4;
        tx.send(DaemonEvent::ConfigReloaded(config)).await.unwrap();
        for _ in 0..3 {
            tx.send(activated(1)).await.unwrap();
        }
        run_pending().await;

        assert_eq!(monitor.settings().threshold, 4);
        assert!(host.messages().is_empty());
        assert_eq!(monitor.window_len(), 3);

        tx.send(DaemonEvent::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_in_flight_triggers_and_cooldown() {
        let host = FakeHost::new();
        host.add_tab(1, "https://a.example", PageMode::Loaded);
        host.add_tab(2, "https://b.example", PageMode::Loaded);
        host.set_latency(Duration::from_secs(30));
        let (monitor, tx, handle) = start(&host);

        tx.send(activated(1)).await.unwrap();
        tx.send(activated(2)).await.unwrap();
        tx.send(DaemonEvent::Shutdown).await.unwrap();
        handle.await.unwrap();

        assert!(host.messages().is_empty());
        assert!(!monitor.is_cooling());
        assert_eq!(monitor.window_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_stops_the_loop() {
        let host = FakeHost::new();
        let (_monitor, tx, handle) = start(&host);
        drop(tx);
        handle.await.unwrap();
    }
}
