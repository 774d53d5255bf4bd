/// Pure description of the overlay's UI tree.
///
/// Nothing here touches a page: [`overlay_tree`] maps a payload to a
/// [`UiNode`] tree which a [`Page`](super::page::Page) then materializes.
/// The tree also serializes to JSON for a page-side renderer; that renderer
/// lives outside this crate and nothing here sends the tree over the wire.
use serde::Serialize;

use crate::protocol::OverlayPayload;

pub const OVERLAY_ID: &str = "tabpause-overlay";
pub const CARD_ID: &str = "tabpause-card";
pub const TITLE_ID: &str = "tabpause-title";
pub const TEXT_ID: &str = "tabpause-text";
pub const BREATH_ID: &str = "tabpause-breath";
pub const CLOSE_ID: &str = "tabpause-close";
pub const KEYFRAMES_ID: &str = "tabpause-keyframes";

/// Highest z-index browsers honour; keeps the scrim above page content.
const TOP_LAYER: &str = "2147483647";
const FONT_STACK: &str = "ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial";
const BREATHE_ANIMATION: &str = "tabpause-breathe 4s ease-in-out infinite";
const KEYFRAMES_CSS: &str = "
@keyframes tabpause-breathe {
  0% { transform: scale(1); opacity: 0.8; }
  50% { transform: scale(2.8); opacity: 1; }
  100% { transform: scale(1); opacity: 0.8; }
}
";

/// DOM event a binding listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UiTrigger {
    Click,
    KeyDown { key: &'static str },
}

/// What the controller does when a binding fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UiAction {
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Binding {
    #[serde(flatten)]
    pub on: UiTrigger,
    pub action: UiAction,
}

/// One element of the overlay tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiNode {
    pub tag: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(&'static str, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub style: Vec<(&'static str, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            id: None,
            attributes: Vec::new(),
            style: Vec::new(),
            text: None,
            bindings: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: &'static str) -> Self {
        self.id = Some(id);
        self
    }

    pub fn attr(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push((name, value.into()));
        self
    }

    pub fn css(mut self, property: &'static str, value: impl Into<String>) -> Self {
        self.style.push((property, value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn on(mut self, on: UiTrigger, action: UiAction) -> Self {
        self.bindings.push(Binding { on, action });
        self
    }

    pub fn child(mut self, node: UiNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn style_value(&self, property: &str) -> Option<&str> {
        self.style
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the node with `id`, including `self`.
    pub fn find(&self, id: &str) -> Option<&UiNode> {
        if self.id == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut UiNode> {
        if self.id == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Number of nodes in this subtree carrying `id`.
    pub fn count(&self, id: &str) -> usize {
        let own = usize::from(self.id == Some(id));
        own + self.children.iter().map(|c| c.count(id)).sum::<usize>()
    }
}

/// Title line: `"{archetype} ({count})"`, or the archetype alone when the
/// payload carries no count.
pub fn title_text(payload: &OverlayPayload) -> String {
    match payload.count {
        Some(count) => format!("{} ({count})", payload.archetype),
        None => payload.archetype.clone(),
    }
}

/// Builds the modal overlay for `payload`.
///
/// The pulsing indicator is static when `reduced_motion` is set.
pub fn overlay_tree(payload: &OverlayPayload, reduced_motion: bool) -> UiNode {
    let title = UiNode::new("div")
        .with_id(TITLE_ID)
        .css("font-size", "14px")
        .css("font-weight", "700")
        .css("letter-spacing", "0.06em")
        .css("text-transform", "uppercase")
        .css("opacity", "0.7")
        .css("margin-bottom", "8px")
        .text(title_text(payload));

    let body = UiNode::new("div")
        .with_id(TEXT_ID)
        .css("font-size", "18px")
        .css("line-height", "1.4")
        .css("margin-bottom", "16px")
        .text(payload.prompt.clone());

    let mut breath = UiNode::new("div")
        .with_id(BREATH_ID)
        .attr("aria-hidden", "true")
        .css("width", "12px")
        .css("height", "12px")
        .css("margin", "8px auto 16px")
        .css("border-radius", "999px")
        .css("background", "#111");
    if !reduced_motion {
        breath = breath.css("animation", BREATHE_ANIMATION);
    }

    let close = UiNode::new("button")
        .with_id(CLOSE_ID)
        .attr("type", "button")
        .css("padding", "8px 12px")
        .css("border", "1px solid rgba(0,0,0,0.1)")
        .css("border-radius", "10px")
        .css("background", "#f7f7f7")
        .css("cursor", "pointer")
        .text("Close")
        .on(UiTrigger::Click, UiAction::Close);

    let buttons = UiNode::new("div")
        .css("display", "flex")
        .css("justify-content", "flex-end")
        .css("gap", "8px")
        .child(close);

    let card = UiNode::new("div")
        .with_id(CARD_ID)
        .css("width", "min(92vw, 420px)")
        .css("background", "white")
        .css("border-radius", "18px")
        .css("box-shadow", "0 10px 30px rgba(0,0,0,0.25)")
        .css("padding", "20px 18px 16px")
        .css("font-family", FONT_STACK)
        .css("color", "#111")
        .child(title)
        .child(body)
        .child(breath)
        .child(buttons);

    UiNode::new("div")
        .with_id(OVERLAY_ID)
        .attr("role", "dialog")
        .attr("aria-modal", "true")
        .attr("aria-labelledby", TITLE_ID)
        .attr("tabindex", "-1")
        .css("position", "fixed")
        .css("inset", "0")
        .css("background", "rgba(0,0,0,0.45)")
        .css("backdrop-filter", "blur(2px)")
        .css("display", "flex")
        .css("align-items", "center")
        .css("justify-content", "center")
        .css("z-index", TOP_LAYER)
        // Swallow clicks aimed at the page underneath.
        .css("pointer-events", "auto")
        .on(UiTrigger::KeyDown { key: "Escape" }, UiAction::Close)
        .child(card)
}

/// `<style>` element holding the breathing animation keyframes.
pub fn keyframes_style() -> UiNode {
    UiNode::new("style").with_id(KEYFRAMES_ID).text(KEYFRAMES_CSS)
}
