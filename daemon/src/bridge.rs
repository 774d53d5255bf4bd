/// Native-messaging transport between the daemon and the browser shim.
///
/// The shim forwards host events to us and executes the capability calls we
/// send it, answering each with a `response` carrying the request's id. A
/// [`NativeHost`] turns those correlated round-trips back into the [`Host`]
/// trait; the [`Bridge`] owns the reader and writer tasks.
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec;
use crate::event::{DaemonEvent, HostEvent};
use crate::host::Host;
use crate::protocol::{Tab, TabId, TabMessage};

/// Messages arriving from the shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Inbound {
    Event {
        event: HostEvent,
    },
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Messages sent to the shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outbound {
    Request { id: u64, call: HostCall },
}

/// A single capability call, executed by the shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCall {
    #[serde(rename_all = "camelCase")]
    GetTab { tab_id: TabId },
    QueryActiveTab,
    #[serde(rename_all = "camelCase")]
    InjectScript { tab_id: TabId, file: String },
    #[serde(rename_all = "camelCase")]
    SendMessage { tab_id: TabId, message: TabMessage },
}

impl HostCall {
    fn name(&self) -> &'static str {
        match self {
            HostCall::GetTab { .. } => "getTab",
            HostCall::QueryActiveTab => "queryActiveTab",
            HostCall::InjectScript { .. } => "injectScript",
            HostCall::SendMessage { .. } => "sendMessage",
        }
    }
}

type Reply = oneshot::Sender<Result<Value>>;

/// Requests awaiting a response, keyed by id.
#[derive(Default)]
struct PendingCalls {
    calls: Mutex<HashMap<u64, Reply>>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Reply>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, id: u64, reply: Reply) {
        self.lock().insert(id, reply);
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn resolve(&self, id: u64, outcome: Result<Value>) {
        let Some(reply) = self.lock().remove(&id) else {
            log::debug!("[bridge] Response for unknown or expired request {id}");
            return;
        };
        let _ = reply.send(outcome);
    }

    fn fail_all(&self, reason: &str) {
        let drained: Vec<Reply> = self.lock().drain().map(|(_, reply)| reply).collect();
        if !drained.is_empty() {
            log::debug!("[bridge] Failing {} pending request(s): {reason}", drained.len());
        }
        for reply in drained {
            let _ = reply.send(Err(anyhow!("{reason}")));
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

struct Shared {
    outbound: mpsc::Sender<Outbound>,
    pending: Arc<PendingCalls>,
    next_id: AtomicU64,
    timeout: Duration,
}

/// [`Host`] backed by the native-messaging channel. Clones share the channel.
#[derive(Clone)]
pub struct NativeHost {
    shared: Arc<Shared>,
}

impl NativeHost {
    /// Sends `call` and waits for its response, bounded by the request timeout.
    pub async fn call(&self, call: HostCall) -> Result<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = call.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.insert(id, reply_tx);

        if self.shared.outbound.send(Outbound::Request { id, call }).await.is_err() {
            self.shared.pending.forget(id);
            bail!("{name}: native messaging channel is closed");
        }

        match tokio::time::timeout(self.shared.timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome.with_context(|| format!("{name} failed")),
            Ok(Err(_)) => bail!("{name}: bridge shut down before a response arrived"),
            Err(_) => {
                self.shared.pending.forget(id);
                bail!("{name} timed out after {}ms", self.shared.timeout.as_millis())
            }
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Host for NativeHost {
    async fn get_tab(&self, tab_id: TabId) -> Result<Tab> {
        let value = self.call(HostCall::GetTab { tab_id }).await?;
        serde_json::from_value(value).context("getTab returned an unexpected shape")
    }

    async fn query_active_tab(&self) -> Result<Option<Tab>> {
        let value = self.call(HostCall::QueryActiveTab).await?;
        serde_json::from_value(value).context("queryActiveTab returned an unexpected shape")
    }

    async fn inject_script(&self, tab_id: TabId, program: &str) -> Result<()> {
        self.call(HostCall::InjectScript {
            tab_id,
            file: program.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn send_message(&self, tab_id: TabId, message: &TabMessage) -> Result<Option<Value>> {
        let value = self
            .call(HostCall::SendMessage {
                tab_id,
                message: message.clone(),
            })
            .await?;
        Ok((!value.is_null()).then_some(value))
    }
}

/// The running reader and writer tasks.
pub struct Bridge {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    pending: Arc<PendingCalls>,
}

impl Bridge {
    /// Stops both tasks, waits for them, and fails every call still waiting.
    pub async fn close(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        self.pending.fail_all("bridge closed");
        log::info!("[bridge] Closed");
    }
}

/// Starts the transport over `reader`/`writer`.
///
/// Host events are forwarded to `events`. When the browser closes the
/// channel (EOF or a read error) a [`DaemonEvent::Shutdown`] follows.
pub fn connect<R, W>(
    reader: R,
    writer: W,
    events: mpsc::Sender<DaemonEvent>,
    timeout: Duration,
) -> (NativeHost, Bridge)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(32);
    let pending = Arc::new(PendingCalls::default());

    let mut handles = vec![];

    // ── Reader task ───────────────────────────────────────────────────────────
    handles.push(tokio::spawn(run_reader(
        reader,
        events,
        Arc::clone(&pending),
        stop_rx.clone(),
    )));

    // ── Writer task ───────────────────────────────────────────────────────────
    handles.push(tokio::spawn(run_writer(
        writer,
        outbound_rx,
        Arc::clone(&pending),
        stop_rx,
    )));

    let host = NativeHost {
        shared: Arc::new(Shared {
            outbound: outbound_tx,
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(0),
            timeout,
        }),
    };

    (
        host,
        Bridge {
            stop_tx,
            handles,
            pending,
        },
    )
}

async fn run_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    events: mpsc::Sender<DaemonEvent>,
    pending: Arc<PendingCalls>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = codec::read_frame(&mut reader) => frame,
            _ = stop_rx.changed() => return,
        };

        let body = match frame {
            Ok(Some(body)) => body,
            Ok(None) => {
                log::info!("[bridge] Browser closed the channel");
                break;
            }
            Err(e) => {
                log::warn!("[bridge] Read failed: {e:#}");
                break;
            }
        };

        match serde_json::from_slice::<Inbound>(&body) {
            Ok(Inbound::Event { event }) => {
                if events.send(DaemonEvent::Host(event)).await.is_err() {
                    return;
                }
            }
            Ok(Inbound::Response { id, ok, result, error }) => {
                let outcome = if ok {
                    Ok(result)
                } else {
                    Err(anyhow!(error.unwrap_or_else(|| "host call failed".to_string())))
                };
                pending.resolve(id, outcome);
            }
            Err(e) => log::warn!("[bridge] Ignoring malformed message: {e}"),
        }
    }

    pending.fail_all("native messaging channel closed");
    let _ = events.send(DaemonEvent::Shutdown).await;
}

async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    pending: Arc<PendingCalls>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            message = outbound_rx.recv() => message,
            _ = stop_rx.changed() => return,
        };
        let Some(message) = message else { return };

        if let Err(e) = codec::write_json(&mut writer, &message).await {
            let Outbound::Request { id, call } = &message;
            log::warn!("[bridge] Failed to send {} request {id}: {e:#}", call.name());
            pending.resolve(*id, Err(e));
        }
    }
}
