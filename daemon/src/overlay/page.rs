use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use super::render::UiNode;

/// Where a top-level element is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPoint {
    Body,
    Head,
    /// The document's root element; used when `<body>`/`<head>` are missing.
    DocumentElement,
}

/// The page context an [`OverlayController`](super::OverlayController) lives in.
///
/// Calls are synchronous and must not call back into the controller.
pub trait Page: Send + Sync + 'static {
    /// True while the tab is backgrounded or otherwise not visible.
    fn is_hidden(&self) -> bool;
    fn prefers_reduced_motion(&self) -> bool;
    fn has_body(&self) -> bool;
    fn has_head(&self) -> bool;
    /// Attaches `node` (and its subtree) under `parent`.
    fn append(&self, parent: MountPoint, node: UiNode) -> Result<()>;
    /// Replaces the text content of the element with `id`.
    fn set_text(&self, id: &str, text: &str) -> Result<()>;
    /// Moves input focus to the element with `id`.
    fn focus(&self, id: &str) -> Result<()>;
    /// Detaches the top-level element with `id`. Returns whether it existed.
    fn remove(&self, id: &str) -> bool;
}

#[derive(Debug)]
struct HeadlessDom {
    hidden: bool,
    reduced_motion: bool,
    body: bool,
    head: bool,
    roots: Vec<(MountPoint, UiNode)>,
    focused: Option<String>,
}

/// In-memory [`Page`] that keeps the attached trees as plain values.
///
/// Cloning shares the same document, so a test can keep a handle while the
/// controller owns another.
#[derive(Debug, Clone)]
pub struct HeadlessPage {
    dom: Arc<Mutex<HeadlessDom>>,
}

impl Default for HeadlessPage {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPage {
    /// A visible document with both `<head>` and `<body>`.
    pub fn new() -> Self {
        Self {
            dom: Arc::new(Mutex::new(HeadlessDom {
                hidden: false,
                reduced_motion: false,
                body: true,
                head: true,
                roots: Vec::new(),
                focused: None,
            })),
        }
    }

    /// A document that has not grown a `<body>` or `<head>` yet.
    pub fn bare() -> Self {
        let page = Self::new();
        {
            let mut dom = page.dom();
            dom.body = false;
            dom.head = false;
        }
        page
    }

    fn dom(&self) -> MutexGuard<'_, HeadlessDom> {
        self.dom.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.dom().hidden = hidden;
    }

    pub fn set_reduced_motion(&self, reduced: bool) {
        self.dom().reduced_motion = reduced;
    }

    /// Number of elements carrying `id` anywhere in the document.
    pub fn count(&self, id: &str) -> usize {
        self.dom().roots.iter().map(|(_, n)| n.count(id)).sum()
    }

    /// Copy of the element with `id`, if attached.
    pub fn node(&self, id: &str) -> Option<UiNode> {
        self.dom().roots.iter().find_map(|(_, n)| n.find(id)).cloned()
    }

    pub fn text_of(&self, id: &str) -> Option<String> {
        self.node(id).and_then(|n| n.text)
    }

    /// Mount point of the top-level element `id`.
    pub fn mounted_under(&self, id: &str) -> Option<MountPoint> {
        self.dom()
            .roots
            .iter()
            .find(|(_, n)| n.id == Some(id))
            .map(|(p, _)| *p)
    }

    pub fn focused(&self) -> Option<String> {
        self.dom().focused.clone()
    }
}

impl Page for HeadlessPage {
    fn is_hidden(&self) -> bool {
        self.dom().hidden
    }

    fn prefers_reduced_motion(&self) -> bool {
        self.dom().reduced_motion
    }

    fn has_body(&self) -> bool {
        self.dom().body
    }

    fn has_head(&self) -> bool {
        self.dom().head
    }

    fn append(&self, parent: MountPoint, node: UiNode) -> Result<()> {
        let mut dom = self.dom();
        match parent {
            MountPoint::Body if !dom.body => bail!("document has no body"),
            MountPoint::Head if !dom.head => bail!("document has no head"),
            _ => {}
        }
        dom.roots.push((parent, node));
        Ok(())
    }

    fn set_text(&self, id: &str, text: &str) -> Result<()> {
        let mut dom = self.dom();
        let node = dom
            .roots
            .iter_mut()
            .find_map(|(_, n)| n.find_mut(id))
            .ok_or_else(|| anyhow!("no element with id {id}"))?;
        node.text = Some(text.to_string());
        Ok(())
    }

    fn focus(&self, id: &str) -> Result<()> {
        let mut dom = self.dom();
        if !dom.roots.iter().any(|(_, n)| n.find(id).is_some()) {
            bail!("no element with id {id}");
        }
        dom.focused = Some(id.to_string());
        Ok(())
    }

    fn remove(&self, id: &str) -> bool {
        let mut dom = self.dom();
        let Some(index) = dom.roots.iter().position(|(_, n)| n.id == Some(id)) else {
            return false;
        };
        let (_, removed) = dom.roots.remove(index);
        if dom.focused.as_deref().is_some_and(|f| removed.find(f).is_some()) {
            dom.focused = None;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &'static str) -> UiNode {
        UiNode::new("div")
            .with_id(id)
            .child(UiNode::new("span").with_id("inner").text("hi"))
    }

    #[test]
    fn append_and_query() {
        let page = HeadlessPage::new();
        page.append(MountPoint::Body, node("root")).unwrap();
        assert_eq!(page.count("root"), 1);
        assert_eq!(page.text_of("inner").as_deref(), Some("hi"));
        assert_eq!(page.mounted_under("root"), Some(MountPoint::Body));
    }

    #[test]
    fn bare_document_rejects_body_and_head_mounts() {
        let page = HeadlessPage::bare();
        assert!(!page.has_body());
        assert!(page.append(MountPoint::Body, node("root")).is_err());
        assert!(page.append(MountPoint::Head, node("style")).is_err());
        assert!(page.append(MountPoint::DocumentElement, node("root")).is_ok());
    }

    #[test]
    fn set_text_on_missing_element_fails() {
        let page = HeadlessPage::new();
        assert!(page.set_text("nope", "x").is_err());
    }

    #[test]
    fn remove_clears_focus_inside_subtree() {
        let page = HeadlessPage::new();
        page.append(MountPoint::Body, node("root")).unwrap();
        page.focus("inner").unwrap();
        assert!(page.remove("root"));
        assert!(page.focused().is_none());
        assert!(!page.remove("root"));
    }

    #[test]
    fn clones_share_the_document() {
        let page = HeadlessPage::new();
        let other = page.clone();
        other.set_hidden(true);
        assert!(page.is_hidden());
    }
}
