/// Per-page overlay controller.
///
/// Owns at most one overlay per page. A repeated show request refreshes the
/// existing overlay's text and timer instead of building a second one.
///
/// ```text
/// Absent --show (visible)--> Visible --timeout | close | Escape | hidden--> Absent
/// Absent --show (hidden)---> Deferred --page visible--> Visible
/// Visible --show--> Visible (text + timer refresh)
/// ```
///
/// Timers are tokio tasks, so the controller must be driven from inside a
/// tokio runtime.
pub mod page;
pub mod render;

use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::OverlayConfig;
use crate::protocol::{OverlayPayload, PingReply, TabMessage};

use page::{MountPoint, Page};
use render::{OVERLAY_ID, TEXT_ID, TITLE_ID};

pub const TEST_ARCHETYPE: &str = "Trickster";
pub const TEST_PROMPT: &str = "Manual test: overlay should show now.";
pub const TEST_DURATION_MS: u64 = 5_000;
pub const TEST_COUNT: u32 = 3;

/// Page-side timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySettings {
    /// Used when a payload has no (or a zero) duration.
    pub default_duration: Duration,
    /// Floor for the auto-hide delay.
    pub min_display: Duration,
    /// How long the page must stay hidden before the overlay is torn down.
    pub hidden_grace: Duration,
}

impl From<&OverlayConfig> for OverlaySettings {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            default_duration: Duration::from_millis(config.duration_ms),
            min_display: Duration::from_millis(config.min_display_ms),
            hidden_grace: Duration::from_millis(config.hidden_grace_ms),
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self::from(&OverlayConfig::default())
    }
}

impl OverlaySettings {
    /// Auto-hide delay for `payload`: its duration (or the default), but
    /// never shorter than `min_display`.
    pub fn hide_delay(&self, payload: &OverlayPayload) -> Duration {
        let requested = payload
            .duration_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_duration);
        requested.max(self.min_display)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    Absent,
    /// A show request is parked until the page becomes visible again.
    Deferred,
    Visible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Created,
    Updated,
    Deferred,
}

#[derive(Default)]
struct ControllerState {
    mounted: bool,
    keyframes_installed: bool,
    deferred: Option<OverlayPayload>,
    hide_timer: Option<JoinHandle<()>>,
    hide_generation: u64,
    visibility_check: Option<JoinHandle<()>>,
    visibility_generation: u64,
}

struct Inner<P> {
    page: P,
    settings: OverlaySettings,
    state: Mutex<ControllerState>,
}

impl<P: Page> Inner<P> {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_locked(&self, state: &mut ControllerState) {
        if state.mounted {
            self.page.remove(OVERLAY_ID);
            log::debug!("[overlay] Overlay removed");
        }
        state.mounted = false;
        if let Some(timer) = state.hide_timer.take() {
            timer.abort();
        }
        state.hide_generation += 1;
    }
}

/// Renders and maintains the overlay inside one page.
pub struct OverlayController<P: Page> {
    inner: Arc<Inner<P>>,
}

impl<P: Page> Clone for OverlayController<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Page> OverlayController<P> {
    pub fn new(page: P, settings: OverlaySettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                page,
                settings,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    pub fn page(&self) -> &P {
        &self.inner.page
    }

    pub fn phase(&self) -> OverlayPhase {
        let state = self.inner.lock();
        if state.mounted {
            OverlayPhase::Visible
        } else if state.deferred.is_some() {
            OverlayPhase::Deferred
        } else {
            OverlayPhase::Absent
        }
    }

    /// Dispatches a raw page message. Returns the reply to send back, if any.
    ///
    /// Anything that does not parse as a [`TabMessage`] is ignored.
    pub fn handle_raw(&self, raw: Value) -> Option<Value> {
        match serde_json::from_value::<TabMessage>(raw) {
            Ok(message) => self
                .handle_message(&message)
                .and_then(|reply| serde_json::to_value(reply).ok()),
            Err(e) => {
                log::debug!("[overlay] Ignoring unrecognised message: {e}");
                None
            }
        }
    }

    pub fn handle_message(&self, message: &TabMessage) -> Option<PingReply> {
        match message {
            TabMessage::Ping => Some(self.handle_ping()),
            TabMessage::ShowOverlay { payload } => {
                if let Err(e) = self.handle_show_overlay(payload.clone()) {
                    log::warn!("[overlay] Failed to show overlay: {e:#}");
                }
                None
            }
        }
    }

    /// Liveness probe. No side effects.
    pub fn handle_ping(&self) -> PingReply {
        PingReply::ALIVE
    }

    /// Shows `payload`, reusing the current overlay if there is one.
    ///
    /// On a hidden page the request is parked and replayed by
    /// [`on_visibility_change`](Self::on_visibility_change) once the page is
    /// visible; a later request replaces a parked one.
    pub fn handle_show_overlay(&self, payload: OverlayPayload) -> Result<ShowOutcome> {
        let inner = &self.inner;
        let mut state = inner.lock();

        if inner.page.is_hidden() {
            log::debug!("[overlay] Page hidden, deferring overlay until visible");
            state.deferred = Some(payload);
            return Ok(ShowOutcome::Deferred);
        }
        state.deferred = None;

        let outcome = if !state.mounted {
            self.mount(&mut state, &payload)?;
            ShowOutcome::Created
        } else if let Err(e) = self.refresh_text(&payload) {
            // Something in the page detached our elements.
            log::debug!("[overlay] Overlay went missing ({e:#}), rebuilding");
            inner.page.remove(OVERLAY_ID);
            state.mounted = false;
            self.mount(&mut state, &payload)?;
            ShowOutcome::Created
        } else {
            ShowOutcome::Updated
        };

        // Modal dialog: take focus so Escape reaches it.
        if let Err(e) = inner.page.focus(OVERLAY_ID) {
            log::debug!("[overlay] Could not focus overlay: {e:#}");
        }

        self.schedule_hide(&mut state, inner.settings.hide_delay(&payload));
        Ok(outcome)
    }

    fn mount(&self, state: &mut ControllerState, payload: &OverlayPayload) -> Result<()> {
        let page = &self.inner.page;
        let tree = render::overlay_tree(payload, page.prefers_reduced_motion());
        let target = if page.has_body() {
            MountPoint::Body
        } else {
            MountPoint::DocumentElement
        };
        page.append(target, tree)?;
        state.mounted = true;

        if !state.keyframes_installed {
            let target = if page.has_head() {
                MountPoint::Head
            } else {
                MountPoint::DocumentElement
            };
            match page.append(target, render::keyframes_style()) {
                Ok(()) => state.keyframes_installed = true,
                Err(e) => log::debug!("[overlay] Could not install keyframes: {e:#}"),
            }
        }
        Ok(())
    }

    fn refresh_text(&self, payload: &OverlayPayload) -> Result<()> {
        let page = &self.inner.page;
        page.set_text(TITLE_ID, &render::title_text(payload))?;
        page.set_text(TEXT_ID, &payload.prompt)
    }

    fn schedule_hide(&self, state: &mut ControllerState, delay: Duration) {
        if let Some(timer) = state.hide_timer.take() {
            timer.abort();
        }
        state.hide_generation += 1;
        let generation = state.hide_generation;
        let deadline = Instant::now() + delay;
        let weak = Arc::downgrade(&self.inner);

        state.hide_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = Weak::upgrade(&weak) else {
                return;
            };
            let mut state = inner.lock();
            if state.hide_generation == generation {
                state.hide_timer = None;
                inner.remove_locked(&mut state);
            }
        }));
    }

    /// Detaches the overlay and cancels its timer. No-op when absent.
    pub fn remove_overlay(&self) {
        let mut state = self.inner.lock();
        self.inner.remove_locked(&mut state);
    }

    /// Close control activated.
    pub fn on_close_activated(&self) {
        self.remove_overlay();
    }

    /// Key pressed while the overlay has focus.
    pub fn on_key_down(&self, key: &str) {
        if key == "Escape" {
            self.remove_overlay();
        }
    }

    /// Must be called whenever the page's visibility changes.
    ///
    /// Becoming visible replays a parked show request. Becoming hidden
    /// schedules a re-check after the grace period; the overlay is removed
    /// only if the page is still hidden then, so a quick switch away and
    /// back keeps it.
    pub fn on_visibility_change(&self) {
        let inner = &self.inner;
        if !inner.page.is_hidden() {
            let parked = inner.lock().deferred.take();
            if let Some(payload) = parked {
                if let Err(e) = self.handle_show_overlay(payload) {
                    log::warn!("[overlay] Failed to show deferred overlay: {e:#}");
                }
            }
            return;
        }

        let mut state = inner.lock();
        if let Some(check) = state.visibility_check.take() {
            check.abort();
        }
        state.visibility_generation += 1;
        let generation = state.visibility_generation;
        let deadline = Instant::now() + inner.settings.hidden_grace;
        let weak = Arc::downgrade(&self.inner);

        state.visibility_check = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = Weak::upgrade(&weak) else {
                return;
            };
            let mut state = inner.lock();
            if state.visibility_generation != generation {
                return;
            }
            state.visibility_check = None;
            if inner.page.is_hidden() {
                inner.remove_locked(&mut state);
            }
        }));
    }

    /// Manual hook: shows the overlay with fixed sample content, bypassing
    /// the switch monitor entirely.
    pub fn show_test_overlay(&self) -> Result<ShowOutcome> {
        self.handle_show_overlay(OverlayPayload {
            archetype: TEST_ARCHETYPE.to_string(),
            prompt: TEST_PROMPT.to_string(),
            duration_ms: Some(TEST_DURATION_MS),
            count: Some(TEST_COUNT),
        })
    }
}

impl<P> Drop for Inner<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.hide_timer.take() {
            timer.abort();
        }
        if let Some(check) = state.visibility_check.take() {
            check.abort();
        }
    }
}
