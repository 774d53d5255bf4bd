/// Wire types shared by the switch monitor, the overlay controller and the
/// extension shim.
///
/// Everything here serializes exactly as the extension side expects it:
/// camelCase field names, and the page messages tagged by an upper-case
/// `type` field (`{"type":"PING"}`, `{"type":"SHOW_OVERLAY","payload":{..}}`).
use serde::{Deserialize, Serialize};
use std::fmt;

/// Browser tab identifier as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser window identifier as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub i64);

impl WindowId {
    /// Sentinel reported when focus left the browser entirely.
    pub const NONE: WindowId = WindowId(-1);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// The subset of the host's tab object the monitor cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    /// Absent for tabs the extension is not allowed to see into.
    #[serde(default)]
    pub url: Option<String>,
}

/// Content of a single overlay display request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPayload {
    #[serde(default)]
    pub archetype: String,
    #[serde(default)]
    pub prompt: String,
    /// How long the overlay stays up, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Number of recent switches that led to this prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Messages the monitor sends into a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabMessage {
    /// Liveness probe; a loaded controller answers with [`PingReply`].
    #[serde(rename = "PING")]
    Ping,
    /// Render (or refresh) the overlay with `payload`.
    #[serde(rename = "SHOW_OVERLAY")]
    ShowOverlay { payload: OverlayPayload },
}

/// Reply to [`TabMessage::Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReply {
    pub alive: bool,
}

impl PingReply {
    pub const ALIVE: PingReply = PingReply { alive: true };
}

/// Returns true when `url` uses the `http` or `https` scheme.
///
/// Internal browser pages, extension pages and `file://` URLs either refuse
/// script injection or are not worth interrupting.
pub fn is_injectable_url(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
}
