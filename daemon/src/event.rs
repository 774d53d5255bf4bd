use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::protocol::{TabId, WindowId};

/// Switch-like events reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    /// The user activated another tab.
    #[serde(rename_all = "camelCase")]
    TabActivated { tab_id: TabId },
    /// A new tab was opened. The host does not say which one.
    TabCreated,
    /// Window focus moved; `WindowId::NONE` when it left the browser.
    #[serde(rename_all = "camelCase")]
    WindowFocusChanged { window_id: WindowId },
}

pub enum DaemonEvent {
    /// A host event arrived over the bridge.
    Host(HostEvent),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received or the browser closed the channel; the daemon should exit.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_events_parse_from_shim_json() {
        let activated: HostEvent =
            serde_json::from_value(json!({ "type": "tabActivated", "tabId": 12 })).unwrap();
        assert_eq!(activated, HostEvent::TabActivated { tab_id: TabId(12) });

        let created: HostEvent = serde_json::from_value(json!({ "type": "tabCreated" })).unwrap();
        assert_eq!(created, HostEvent::TabCreated);

        let focus: HostEvent =
            serde_json::from_value(json!({ "type": "windowFocusChanged", "windowId": -1 }))
                .unwrap();
        assert_eq!(focus, HostEvent::WindowFocusChanged { window_id: WindowId::NONE });
    }

    #[test]
    fn unknown_host_event_is_rejected() {
        assert!(serde_json::from_value::<HostEvent>(json!({ "type": "tabRemoved" })).is_err());
    }
}
