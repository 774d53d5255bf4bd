use anyhow::Result;
use serde_json::Value;
use std::future::Future;

use crate::protocol::{Tab, TabId, TabMessage};

/// Capability calls the switch monitor makes against the browser.
///
/// Every call may fail for ordinary reasons (tab closed, no receiver in the
/// page, injection blocked); callers treat failures as non-fatal.
pub trait Host: Send + Sync + 'static {
    /// Resolves `tab_id` to a live tab.
    fn get_tab(&self, tab_id: TabId) -> impl Future<Output = Result<Tab>> + Send;

    /// Returns the active tab of the current window, if there is one.
    fn query_active_tab(&self) -> impl Future<Output = Result<Option<Tab>>> + Send;

    /// Loads the content program `program` into the tab.
    fn inject_script(&self, tab_id: TabId, program: &str) -> impl Future<Output = Result<()>> + Send;

    /// Delivers `message` to the tab's listener.
    ///
    /// `Ok(None)` means a listener received the message but did not answer.
    /// A tab without any listener fails with a "no receiver" error.
    fn send_message(
        &self,
        tab_id: TabId,
        message: &TabMessage,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;
}
