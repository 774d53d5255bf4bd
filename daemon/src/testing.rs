//! Scripted host and clock used by the unit tests.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::host::Host;
use crate::overlay::page::HeadlessPage;
use crate::overlay::{OverlayController, OverlaySettings};
use crate::protocol::{Tab, TabId, TabMessage};

/// What the fake finds inside a tab's page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// Overlay controller already listening.
    Loaded,
    /// A listener that accepts messages but never answers.
    LoadedSilent,
    /// No listener; injection succeeds.
    Empty,
    /// No listener; injection is refused.
    Blocked,
}

struct FakeTab {
    url: Option<String>,
    mode: PageMode,
    page: HeadlessPage,
    controller: Option<OverlayController<HeadlessPage>>,
    pings: usize,
    injections: usize,
    fail_delivery: bool,
}

#[derive(Default)]
struct FakeState {
    tabs: HashMap<TabId, FakeTab>,
    active: Option<TabId>,
    query_fails: bool,
    programs: Vec<String>,
    messages: Vec<(TabId, TabMessage)>,
    latency: Duration,
}

/// In-memory browser. Clones share state.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_tab(&self, id: u32, url: &str, mode: PageMode) {
        self.insert_tab(id, Some(url.to_string()), mode);
    }

    pub fn add_tab_without_url(&self, id: u32) {
        self.insert_tab(id, None, PageMode::Empty);
    }

    fn insert_tab(&self, id: u32, url: Option<String>, mode: PageMode) {
        let page = HeadlessPage::new();
        let controller = matches!(mode, PageMode::Loaded | PageMode::LoadedSilent)
            .then(|| OverlayController::new(page.clone(), OverlaySettings::default()));
        self.state().tabs.insert(
            TabId(id),
            FakeTab {
                url,
                mode,
                page,
                controller,
                pings: 0,
                injections: 0,
                fail_delivery: false,
            },
        );
    }

    pub fn set_active(&self, id: Option<u32>) {
        self.state().active = id.map(TabId);
    }

    pub fn fail_queries(&self) {
        self.state().query_fails = true;
    }

    /// SHOW_OVERLAY messages to `id` fail after the handshake.
    pub fn fail_delivery(&self, id: u32) {
        if let Some(tab) = self.state().tabs.get_mut(&TabId(id)) {
            tab.fail_delivery = true;
        }
    }

    /// Delay applied to every message round-trip.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn pings(&self, id: TabId) -> usize {
        self.state().tabs.get(&id).map_or(0, |t| t.pings)
    }

    pub fn injections(&self, id: TabId) -> usize {
        self.state().tabs.get(&id).map_or(0, |t| t.injections)
    }

    pub fn injected_programs(&self) -> Vec<String> {
        self.state().programs.clone()
    }

    pub fn messages(&self) -> Vec<(TabId, TabMessage)> {
        self.state().messages.clone()
    }

    /// Payloads of every SHOW_OVERLAY sent to `id`, in order.
    pub fn shows(&self, id: TabId) -> Vec<crate::protocol::OverlayPayload> {
        self.state()
            .messages
            .iter()
            .filter(|(tab, _)| *tab == id)
            .filter_map(|(_, m)| match m {
                TabMessage::ShowOverlay { payload } => Some(payload.clone()),
                TabMessage::Ping => None,
            })
            .collect()
    }

    pub fn page(&self, id: TabId) -> HeadlessPage {
        self.state().tabs[&id].page.clone()
    }
}

impl Host for FakeHost {
    async fn get_tab(&self, tab_id: TabId) -> Result<Tab> {
        let state = self.state();
        let tab = state
            .tabs
            .get(&tab_id)
            .ok_or_else(|| anyhow!("No tab with id: {tab_id}."))?;
        Ok(Tab { id: tab_id, url: tab.url.clone() })
    }

    async fn query_active_tab(&self) -> Result<Option<Tab>> {
        let state = self.state();
        if state.query_fails {
            bail!("tabs.query failed");
        }
        Ok(state.active.and_then(|id| {
            state.tabs.get(&id).map(|t| Tab { id, url: t.url.clone() })
        }))
    }

    async fn inject_script(&self, tab_id: TabId, program: &str) -> Result<()> {
        let mut state = self.state();
        state.programs.push(program.to_string());
        let tab = state
            .tabs
            .get_mut(&tab_id)
            .ok_or_else(|| anyhow!("No tab with id: {tab_id}."))?;
        tab.injections += 1;
        if tab.mode == PageMode::Blocked {
            bail!("Cannot access contents of the page.");
        }
        if tab.controller.is_none() {
            tab.controller = Some(OverlayController::new(tab.page.clone(), OverlaySettings::default()));
            tab.mode = PageMode::Loaded;
        }
        Ok(())
    }

    async fn send_message(&self, tab_id: TabId, message: &TabMessage) -> Result<Option<Value>> {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (controller, silent) = {
            let mut state = self.state();
            state.messages.push((tab_id, message.clone()));
            let tab = state
                .tabs
                .get_mut(&tab_id)
                .ok_or_else(|| anyhow!("No tab with id: {tab_id}."))?;
            if matches!(message, TabMessage::Ping) {
                tab.pings += 1;
            }
            if tab.fail_delivery && matches!(message, TabMessage::ShowOverlay { .. }) {
                bail!("The message port closed before a response was received.");
            }
            let Some(controller) = tab.controller.clone() else {
                bail!("Could not establish connection. Receiving end does not exist.");
            };
            (controller, tab.mode == PageMode::LoadedSilent)
        };

        let reply = controller.handle_raw(serde_json::to_value(message)?);
        Ok(if silent { None } else { reply })
    }
}

/// Millisecond clock that follows tokio's (pausable) time.
pub struct TokioClock {
    origin: tokio::time::Instant,
    base_ms: i64,
}

impl TokioClock {
    pub fn new(base_ms: i64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            base_ms,
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.base_ms + self.origin.elapsed().as_millis() as i64
    }
}

/// Lets spawned tasks woken by a time advance run to completion.
pub async fn run_pending() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
