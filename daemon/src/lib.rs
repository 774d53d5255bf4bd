//! Tab-switch rate detector with a calming in-page overlay.
//!
//! The [`monitor::SwitchMonitor`] watches switch-like browser events, and
//! once they come too fast it makes sure an [`overlay::OverlayController`] is
//! loaded in the active page and asks it to show the overlay. In the daemon
//! the browser is reached through [`bridge::NativeHost`].

pub mod agent;
pub mod bridge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod event;
pub mod handshake;
pub mod host;
pub mod logging;
pub mod monitor;
pub mod overlay;
pub mod paths;
pub mod protocol;
pub mod window;

#[cfg(test)]
mod testing;
