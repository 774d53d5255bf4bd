/// Liveness probe followed by on-demand injection of the content program.
///
/// The monitor never assumes the overlay controller is already present in a
/// tab: pages loaded before the extension was installed or updated have no
/// listener, and some pages refuse injection outright.
use anyhow::{Context, Result};
use std::time::Duration;

use crate::host::Host;
use crate::protocol::{TabId, TabMessage};

/// How the controller came to be ready in the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The tab answered the probe; nothing was injected.
    AlreadyLoaded,
    /// The probe failed, the program was injected and given time to settle.
    Injected,
}

/// Makes sure the overlay controller is listening in `tab_id`.
///
/// Sends `PING`; any reply (including an empty one) means the controller is
/// loaded. Otherwise injects `program` exactly once and waits `settle` for its
/// listeners to attach. Returns an error only when injection itself fails.
pub async fn ensure_controller<H: Host>(
    host: &H,
    tab_id: TabId,
    program: &str,
    settle: Duration,
) -> Result<Handshake> {
    match host.send_message(tab_id, &TabMessage::Ping).await {
        Ok(_) => return Ok(Handshake::AlreadyLoaded),
        Err(e) => log::debug!("[handshake] Tab {tab_id} did not answer PING: {e:#}"),
    }

    host.inject_script(tab_id, program)
        .await
        .with_context(|| format!("Failed to inject {program} into tab {tab_id}"))?;
    tokio::time::sleep(settle).await;
    log::info!("[handshake] Injected {program} into tab {tab_id}");
    Ok(Handshake::Injected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, PageMode};

    const SETTLE: Duration = Duration::from_millis(120);

    #[tokio::test(start_paused = true)]
    async fn loaded_tab_answers_ping_without_injection() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::Loaded);

        let outcome = ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();

        assert_eq!(outcome, Handshake::AlreadyLoaded);
        assert_eq!(host.injections(TabId(1)), 0);
        assert_eq!(host.pings(TabId(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_listener_still_counts_as_loaded() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::LoadedSilent);

        let outcome = ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();

        assert_eq!(outcome, Handshake::AlreadyLoaded);
        assert_eq!(host.injections(TabId(1)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_listener_causes_exactly_one_injection() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::Empty);

        let outcome = ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();

        assert_eq!(outcome, Handshake::Injected);
        assert_eq!(host.injections(TabId(1)), 1);
        assert_eq!(host.injected_programs(), vec!["content.js".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn injection_waits_for_settle_delay() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::Empty);

        let start = tokio::time::Instant::now();
        ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();

        assert!(start.elapsed() >= SETTLE);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_injection_fails_the_handshake() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::Blocked);

        let err = ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap_err();

        assert!(format!("{err:#}").contains("Failed to inject"));
        assert_eq!(host.injections(TabId(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_handshake_after_injection_finds_controller() {
        let host = FakeHost::new();
        host.add_tab(1, "https://example.com", PageMode::Empty);

        ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();
        let again = ensure_controller(&host, TabId(1), "content.js", SETTLE).await.unwrap();

        assert_eq!(again, Handshake::AlreadyLoaded);
        assert_eq!(host.injections(TabId(1)), 1);
    }
}
