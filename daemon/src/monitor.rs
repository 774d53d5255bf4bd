/// Rate detection over switch-like browser events.
///
/// Every tab activation, tab creation and window refocus is stamped into a
/// sliding window. When an activation or creation leaves at least
/// `threshold` stamps in the window, the monitor triggers: it resolves the
/// target tab, makes sure the overlay controller is loaded there, sends
/// `SHOW_OVERLAY`, then enters a cooldown during which switches are not even
/// recorded.
///
/// Window refocus only counts towards the rate; it never triggers by itself.
///
/// Cooldown is entered after the trigger's async work, not when the
/// threshold is crossed. Two events arriving while a trigger is still in its
/// handshake can therefore both trigger.
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, OverlayConfig};
use crate::event::HostEvent;
use crate::handshake::ensure_controller;
use crate::host::Host;
use crate::protocol::{is_injectable_url, TabId, TabMessage, WindowId};
use crate::window::SwitchWindow;

/// Everything the monitor reads from config.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub window_ms: u64,
    pub threshold: usize,
    pub cooldown: Duration,
    pub settle: Duration,
    pub content_script: String,
    pub overlay: OverlayConfig,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_ms: config.monitor.window_ms,
            threshold: config.monitor.effective_threshold(),
            cooldown: Duration::from_millis(config.monitor.cooldown_ms),
            settle: Duration::from_millis(config.monitor.settle_ms),
            content_script: config.monitor.content_script.clone(),
            overlay: config.overlay.clone(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Cooling,
    /// Focus moved to another application.
    FocusLeftBrowser,
}

/// Which tab a trigger should land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTarget {
    Tab(TabId),
    /// Whatever tab is active in the current window when the trigger runs.
    ActiveTab,
}

/// Synchronous half of event handling: what the event did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Ignored(IgnoreReason),
    Recorded { count: usize },
    ThresholdReached { count: usize, target: TriggerTarget },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFailure {
    /// The tab id no longer resolves to a live tab.
    TabLookup,
    /// A tab creation crossed the threshold but no tab is active.
    NoActiveTab,
    /// The controller was missing and could not be injected.
    Injection,
    /// `SHOW_OVERLAY` could not be delivered after the handshake.
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Delivered,
    /// Not an http(s) page; deliberately left alone.
    SkippedUnsupportedUrl,
    Failed(TriggerFailure),
}

impl TriggerOutcome {
    /// Whether this trigger put the monitor into cooldown.
    pub fn entered_cooldown(&self) -> bool {
        matches!(
            self,
            TriggerOutcome::Delivered
                | TriggerOutcome::Failed(TriggerFailure::Injection)
                | TriggerOutcome::Failed(TriggerFailure::Delivery)
        )
    }
}

/// Full result of handling one host event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Ignored(IgnoreReason),
    Recorded { count: usize },
    Triggered(TriggerOutcome),
}

struct MonitorState {
    window: SwitchWindow,
    cooling: bool,
    cooldown: Option<JoinHandle<()>>,
    cooldown_generation: u64,
    settings: MonitorSettings,
}

impl MonitorState {
    fn cancel_cooldown(&mut self) {
        if let Some(timer) = self.cooldown.take() {
            timer.abort();
        }
        self.cooldown_generation += 1;
    }
}

/// Owns the sliding window and cooldown for one browser profile.
///
/// Instances are fully independent; nothing is global.
pub struct SwitchMonitor<H, C = SystemClock> {
    host: H,
    clock: C,
    state: Arc<Mutex<MonitorState>>,
}

impl<H: Host, C: Clock> SwitchMonitor<H, C> {
    pub fn new(host: H, clock: C, settings: MonitorSettings) -> Self {
        Self {
            host,
            clock,
            state: Arc::new(Mutex::new(MonitorState {
                window: SwitchWindow::new(settings.window_ms),
                cooling: false,
                cooldown: None,
                cooldown_generation: 0,
                settings,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        lock_state(&self.state)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_cooling(&self) -> bool {
        self.lock().cooling
    }

    /// Number of stamps currently in the window (as of the last prune).
    pub fn window_len(&self) -> usize {
        self.lock().window.len()
    }

    pub fn settings(&self) -> MonitorSettings {
        self.lock().settings.clone()
    }

    /// Swaps in new settings. A running cooldown keeps its original length;
    /// the new window width applies from the next observation.
    pub fn apply_settings(&self, settings: MonitorSettings) {
        let mut state = self.lock();
        state.window.set_span(settings.window_ms);
        log::info!(
            "[monitor] Settings applied: window {}ms, threshold {}, cooldown {}ms",
            settings.window_ms,
            settings.threshold,
            settings.cooldown.as_millis()
        );
        state.settings = settings;
    }

    /// Records `event` in the window and reports whether it crossed the
    /// threshold. Performs no host calls.
    pub fn observe(&self, event: &HostEvent) -> Observation {
        let mut state = self.lock();
        if state.cooling {
            log::debug!("[monitor] Cooling; ignoring {event:?}");
            return Observation::Ignored(IgnoreReason::Cooling);
        }

        let target = match *event {
            HostEvent::TabActivated { tab_id } => Some(TriggerTarget::Tab(tab_id)),
            HostEvent::TabCreated => Some(TriggerTarget::ActiveTab),
            HostEvent::WindowFocusChanged { window_id } => {
                if window_id.is_none() {
                    return Observation::Ignored(IgnoreReason::FocusLeftBrowser);
                }
                None
            }
        };

        let count = state.window.record(self.clock.now_ms());
        let threshold = state.settings.threshold;
        log::debug!("[monitor] {event:?}; {count} in window (threshold {threshold})");

        match target {
            Some(target) if count >= threshold => Observation::ThresholdReached { count, target },
            _ => Observation::Recorded { count },
        }
    }

    /// Handles one host event end to end, including any trigger it causes.
    pub async fn handle(&self, event: HostEvent) -> SwitchOutcome {
        match self.observe(&event) {
            Observation::Ignored(reason) => SwitchOutcome::Ignored(reason),
            Observation::Recorded { count } => SwitchOutcome::Recorded { count },
            Observation::ThresholdReached { target, .. } => {
                SwitchOutcome::Triggered(self.fire(target).await)
            }
        }
    }

    pub async fn on_tab_activated(&self, tab_id: TabId) -> SwitchOutcome {
        self.handle(HostEvent::TabActivated { tab_id }).await
    }

    pub async fn on_tab_created(&self) -> SwitchOutcome {
        self.handle(HostEvent::TabCreated).await
    }

    /// Refocus only feeds the window; it never triggers.
    pub fn on_window_focus_changed(&self, window_id: WindowId) -> SwitchOutcome {
        match self.observe(&HostEvent::WindowFocusChanged { window_id }) {
            Observation::Ignored(reason) => SwitchOutcome::Ignored(reason),
            Observation::Recorded { count } | Observation::ThresholdReached { count, .. } => {
                SwitchOutcome::Recorded { count }
            }
        }
    }

    /// Resolves `target` to a tab and triggers on it.
    pub async fn fire(&self, target: TriggerTarget) -> TriggerOutcome {
        let tab_id = match target {
            TriggerTarget::Tab(tab_id) => tab_id,
            TriggerTarget::ActiveTab => match self.host.query_active_tab().await {
                Ok(Some(tab)) => tab.id,
                Ok(None) => {
                    log::info!("[monitor] Threshold reached but no tab is active");
                    return TriggerOutcome::Failed(TriggerFailure::NoActiveTab);
                }
                Err(e) => {
                    log::warn!("[monitor] Could not query the active tab: {e:#}");
                    return TriggerOutcome::Failed(TriggerFailure::NoActiveTab);
                }
            },
        };
        self.trigger(tab_id).await
    }

    /// Shows the overlay on `tab_id` and enters cooldown.
    ///
    /// Returns early, without cooldown, when the tab cannot be resolved or is
    /// not an http(s) page. Once the handshake has been attempted the
    /// cooldown is entered whatever the delivery result.
    pub async fn trigger(&self, tab_id: TabId) -> TriggerOutcome {
        let tab = match self.host.get_tab(tab_id).await {
            Ok(tab) => tab,
            Err(e) => {
                log::warn!("[monitor] Could not get tab {tab_id}: {e:#}");
                return TriggerOutcome::Failed(TriggerFailure::TabLookup);
            }
        };
        let url = tab.url.unwrap_or_default();
        if !is_injectable_url(&url) {
            log::info!("[monitor] Skip trigger: restricted or unsupported URL {url:?}");
            return TriggerOutcome::SkippedUnsupportedUrl;
        }

        let (payload, program, settle) = {
            let state = self.lock();
            (
                state.settings.overlay.payload(state.window.len()),
                state.settings.content_script.clone(),
                state.settings.settle,
            )
        };
        log::info!(
            "[monitor] Threshold reached ({} switches); showing overlay on {url}",
            payload.count.unwrap_or_default()
        );

        let outcome = match ensure_controller(&self.host, tab_id, &program, settle).await {
            Ok(_) => {
                let message = TabMessage::ShowOverlay { payload };
                match self.host.send_message(tab_id, &message).await {
                    Ok(_) => {
                        log::info!("[monitor] SHOW_OVERLAY sent to {url}");
                        TriggerOutcome::Delivered
                    }
                    Err(e) => {
                        log::warn!("[monitor] SHOW_OVERLAY to tab {tab_id} failed: {e:#}");
                        TriggerOutcome::Failed(TriggerFailure::Delivery)
                    }
                }
            }
            Err(e) => {
                log::warn!("[monitor] Handshake with tab {tab_id} failed: {e:#}");
                TriggerOutcome::Failed(TriggerFailure::Injection)
            }
        };

        if outcome.entered_cooldown() {
            self.enter_cooldown();
        }
        outcome
    }

    /// Sets `cooling`, empties the window and (re)starts the single cooldown timer.
    fn enter_cooldown(&self) {
        let mut state = self.lock();
        state.cooling = true;
        state.window.clear();
        state.cancel_cooldown();

        let generation = state.cooldown_generation;
        let deadline = Instant::now() + state.settings.cooldown;
        let weak: Weak<Mutex<MonitorState>> = Arc::downgrade(&self.state);

        state.cooldown = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut state = lock_state(&shared);
            if state.cooldown_generation == generation {
                state.cooling = false;
                state.cooldown = None;
                log::info!("[monitor] Cooldown ended");
            }
        }));
    }

    /// Cancels the cooldown timer and resets the window. Call before
    /// dropping the monitor's host connection.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.cancel_cooldown();
        state.cooling = false;
        state.window.clear();
        log::debug!("[monitor] Shut down");
    }
}

impl<H, C> Drop for SwitchMonitor<H, C> {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.cancel_cooldown();
    }
}

fn lock_state(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
