use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::event::DaemonEvent;
use crate::protocol::OverlayPayload;

pub const DEFAULT_WINDOW_MS: u64 = 20_000;
pub const DEFAULT_THRESHOLD: u32 = 2;
/// A threshold of zero would trigger on every switch with an empty window.
pub const MIN_THRESHOLD: u32 = 1;
pub const DEFAULT_COOLDOWN_MS: u64 = 10_000;
pub const DEFAULT_SETTLE_MS: u64 = 120;
pub const DEFAULT_CONTENT_SCRIPT: &str = "content.js";

pub const DEFAULT_ARCHETYPE: &str = "Trickster";
pub const DEFAULT_PROMPT: &str = "Are you exploring—or escaping?";
pub const DEFAULT_DURATION_MS: u64 = 20_000;
pub const DEFAULT_MIN_DISPLAY_MS: u64 = 5_000;
pub const DEFAULT_HIDDEN_GRACE_MS: u64 = 500;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Root configuration structure. Deserialized from `config.toml` in the
/// per-user config directory (see [`crate::paths`]).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Rate detection and trigger knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorConfig {
    /// Width of the sliding observation window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Switches inside the window required to trigger. Clamped to >= 1.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Quiet period after a trigger, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Delay after injecting the content program before messaging it.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Content program handed to the host's script injection.
    #[serde(default = "default_content_script")]
    pub content_script: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            threshold: DEFAULT_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            content_script: DEFAULT_CONTENT_SCRIPT.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn effective_threshold(&self) -> usize {
        self.threshold.max(MIN_THRESHOLD) as usize
    }
}

/// What the overlay says and how long it stays up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_archetype")]
    pub archetype: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Requested display time sent with each trigger, in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Floor applied by the page side to any requested display time.
    #[serde(default = "default_min_display_ms")]
    pub min_display_ms: u64,
    /// How long a page must stay hidden before its overlay is torn down.
    #[serde(default = "default_hidden_grace_ms")]
    pub hidden_grace_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            archetype: DEFAULT_ARCHETYPE.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            duration_ms: DEFAULT_DURATION_MS,
            min_display_ms: DEFAULT_MIN_DISPLAY_MS,
            hidden_grace_ms: DEFAULT_HIDDEN_GRACE_MS,
        }
    }
}

impl OverlayConfig {
    /// Builds the payload for a trigger that saw `count` recent switches.
    pub fn payload(&self, count: usize) -> OverlayPayload {
        OverlayPayload {
            archetype: self.archetype.clone(),
            prompt: self.prompt.clone(),
            duration_ms: Some(self.duration_ms),
            count: Some(u32::try_from(count).unwrap_or(u32::MAX)),
        }
    }
}

/// Native-messaging transport settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound on a single host call round-trip, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            log::warn!("[config] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            log::warn!("[config] Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&watch_dir) {
        log::warn!("[config] Failed to create config directory {}: {e}", watch_dir.display());
        return;
    }

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        log::warn!("[config] Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("[config] Failed to reload config: {e:#}"),
            }
        }
    }
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

fn default_content_script() -> String {
    DEFAULT_CONTENT_SCRIPT.to_string()
}

fn default_archetype() -> String {
    DEFAULT_ARCHETYPE.to_string()
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_duration_ms() -> u64 {
    DEFAULT_DURATION_MS
}

fn default_min_display_ms() -> u64 {
    DEFAULT_MIN_DISPLAY_MS
}

fn default_hidden_grace_ms() -> u64 {
    DEFAULT_HIDDEN_GRACE_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
