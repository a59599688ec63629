//! Browser-side CDP transport
//!
//! Concrete [`DebuggerTransport`] over a Chromium-family browser's DevTools
//! endpoint (`--remote-debugging-port`). One browser-level WebSocket carries
//! everything: commands are matched to responses through a pending-map of
//! oneshot channels, per-tab traffic is routed by the session id that
//! `Target.attachToTarget` hands out, and protocol events are fanned into the
//! coordinator queue. Foreground-tab resolution uses the `/json/list`
//! endpoint, which the browser orders by focus recency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use apitap_core::cdp::{methods, NetworkEvent};
use apitap_core::coordinator::{CoordinatorEvent, CoordinatorHandle};
use apitap_core::request::TabId;
use apitap_core::transport::{DebuggerTransport, TransportError};

type PendingMap = Arc<Mutex<HashMap<u64, (String, oneshot::Sender<Result<Value, TransportError>>)>>>;

/// Tab ↔ CDP session id mapping for attached targets.
#[derive(Default)]
struct SessionMap {
    by_tab: HashMap<TabId, String>,
    by_session: HashMap<String, TabId>,
}

impl SessionMap {
    fn insert(&mut self, tab_id: TabId, session_id: String) {
        self.by_session.insert(session_id.clone(), tab_id.clone());
        self.by_tab.insert(tab_id, session_id);
    }

    fn remove_tab(&mut self, tab_id: &TabId) -> Option<String> {
        let session_id = self.by_tab.remove(tab_id)?;
        self.by_session.remove(&session_id);
        Some(session_id)
    }

    fn remove_session(&mut self, session_id: &str) -> Option<TabId> {
        let tab_id = self.by_session.remove(session_id)?;
        self.by_tab.remove(&tab_id);
        Some(tab_id)
    }

    fn tab_for(&self, session_id: &str) -> Option<TabId> {
        self.by_session.get(session_id).cloned()
    }
}

/// One parsed WebSocket frame from the browser.
#[derive(Debug)]
enum Incoming {
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

/// Classify a raw frame. Anything unrecognized is dropped.
fn parse_incoming(text: &str) -> Option<Incoming> {
    let value: Value = serde_json::from_str(text).ok()?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error") {
            Some(error) => Err(error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown protocol error")
                .to_string()),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(Incoming::Response { id, result });
    }

    let method = value.get("method").and_then(Value::as_str)?.to_string();
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    let session_id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(String::from);
    Some(Incoming::Event {
        method,
        params,
        session_id,
    })
}

/// Pick the foreground tab from a `/json/list` payload: the first
/// `page`-type target, which the browser keeps in focus-recency order.
fn pick_foreground(targets: &[Value]) -> Option<TabId> {
    targets
        .iter()
        .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .and_then(|t| t.get("id").and_then(Value::as_str))
        .map(TabId::from)
}

/// Live connection to the browser's DevTools endpoint.
pub struct ChromeTransport {
    outbound_tx: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    sessions: Arc<Mutex<SessionMap>>,
    next_id: AtomicU64,
    http_base: String,
    client: reqwest::Client,
}

impl ChromeTransport {
    /// Connect to the browser at `endpoint` (host:port). Protocol events are
    /// fanned into `events` as they arrive.
    pub async fn connect(
        endpoint: &str,
        events: CoordinatorHandle,
    ) -> Result<Self, TransportError> {
        let http_base = format!("http://{endpoint}");
        let client = reqwest::Client::new();

        let version: Value = client
            .get(format!("{http_base}/json/version"))
            .send()
            .await
            .map_err(|e| TransportError::Protocol(format!("browser endpoint unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("bad /json/version payload: {e}")))?;

        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TransportError::Protocol("missing webSocketDebuggerUrl in /json/version".to_string())
            })?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| TransportError::Protocol(format!("websocket connect failed: {e}")))?;
        info!("connected to browser at {endpoint}");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(err) = ws_sink.send(message).await {
                    warn!("browser connection write failed: {err}");
                    break;
                }
            }
        });

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let sessions = Arc::new(Mutex::new(SessionMap::default()));

        let transport = Self {
            outbound_tx: outbound_tx.clone(),
            pending: Arc::clone(&pending),
            sessions: Arc::clone(&sessions),
            next_id: AtomicU64::new(1),
            http_base,
            client,
        };

        tokio::spawn(async move {
            while let Some(frame) = ws_stream.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("browser connection read failed: {err}");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        if let Some(incoming) = parse_incoming(&text) {
                            route_incoming(incoming, &pending, &sessions, &events).await;
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = outbound_tx.send(Message::Pong(payload));
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            warn!("browser connection closed");
            // Fail every in-flight command so callers unblock.
            let mut pending = pending.lock().await;
            for (_, (_, reply)) in pending.drain() {
                let _ = reply.send(Err(TransportError::NotConnected));
            }
        });

        // Target lifecycle notifications drive tab-closed events.
        transport
            .send_raw("Target.setDiscoverTargets", json!({"discover": true}), None)
            .await?;

        Ok(transport)
    }

    /// Send one protocol command and await its response.
    async fn send_raw(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, (method.to_string(), reply_tx));

        let mut frame = json!({"id": id, "method": method, "params": params});
        if let Some(session_id) = session_id {
            frame["sessionId"] = json!(session_id);
        }

        if self
            .outbound_tx
            .send(Message::Text(frame.to_string()))
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::NotConnected);
        }

        reply_rx.await.unwrap_or(Err(TransportError::NotConnected))
    }
}

/// Route one parsed frame: responses resolve their pending command, events go
/// to the coordinator.
async fn route_incoming(
    incoming: Incoming,
    pending: &PendingMap,
    sessions: &Arc<Mutex<SessionMap>>,
    events: &CoordinatorHandle,
) {
    match incoming {
        Incoming::Response { id, result } => {
            let Some((method, reply)) = pending.lock().await.remove(&id) else {
                return;
            };
            let result = result.map_err(|message| TransportError::CommandFailed {
                method,
                message,
            });
            let _ = reply.send(result);
        }
        Incoming::Event {
            method,
            params,
            session_id,
        } => match method.as_str() {
            "Target.targetDestroyed" => {
                let Some(target_id) = params.get("targetId").and_then(Value::as_str) else {
                    return;
                };
                let tab_id = TabId::from(target_id);
                sessions.lock().await.remove_tab(&tab_id);
                events.dispatch(CoordinatorEvent::TabClosed(tab_id)).await;
            }
            "Target.detachedFromTarget" => {
                // Host-initiated detach (tab crashed, DevTools opened).
                if let Some(session_id) = params.get("sessionId").and_then(Value::as_str) {
                    sessions.lock().await.remove_session(session_id);
                }
            }
            methods::FRAME_STARTED_LOADING => {
                let Some(session_id) = session_id else { return };
                let Some(tab_id) = sessions.lock().await.tab_for(&session_id) else {
                    return;
                };
                // The main frame's id equals the target id; subframe loads
                // are not navigations.
                if params.get("frameId").and_then(Value::as_str) == Some(tab_id.as_str()) {
                    events
                        .dispatch(CoordinatorEvent::NavigationStarted(tab_id))
                        .await;
                }
            }
            _ => {
                let Some(session_id) = session_id else { return };
                let Some(tab_id) = sessions.lock().await.tab_for(&session_id) else {
                    return;
                };
                if let Some(event) = NetworkEvent::parse(&method, params) {
                    events
                        .dispatch(CoordinatorEvent::Lifecycle { tab_id, event })
                        .await;
                }
            }
        },
    }
}

#[async_trait]
impl DebuggerTransport for ChromeTransport {
    async fn is_attached(&self, tab_id: &TabId) -> bool {
        self.sessions.lock().await.by_tab.contains_key(tab_id)
    }

    async fn attach(&self, tab_id: &TabId) -> Result<(), TransportError> {
        let result = self
            .send_raw(
                "Target.attachToTarget",
                json!({"targetId": tab_id.as_str(), "flatten": true}),
                None,
            )
            .await
            .map_err(|e| TransportError::AttachFailed(e.to_string()))?;

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TransportError::AttachFailed("attachToTarget returned no sessionId".to_string())
            })?;

        self.sessions
            .lock()
            .await
            .insert(tab_id.clone(), session_id.to_string());
        debug!(tab = %tab_id, "attached");
        Ok(())
    }

    async fn detach(&self, tab_id: &TabId) -> Result<(), TransportError> {
        let session_id = self
            .sessions
            .lock()
            .await
            .remove_tab(tab_id)
            .ok_or(TransportError::NotAttached)?;
        self.send_raw(
            "Target.detachFromTarget",
            json!({"sessionId": session_id}),
            None,
        )
        .await?;
        debug!(tab = %tab_id, "detached");
        Ok(())
    }

    async fn send_command(
        &self,
        tab_id: &TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let session_id = self
            .sessions
            .lock()
            .await
            .by_tab
            .get(tab_id)
            .cloned()
            .ok_or(TransportError::NotAttached)?;
        self.send_raw(method, params, Some(&session_id)).await
    }

    async fn foreground_tab(&self) -> Result<Option<TabId>, TransportError> {
        let targets: Vec<Value> = self
            .client
            .get(format!("{}/json/list", self.http_base))
            .send()
            .await
            .map_err(|e| TransportError::Protocol(format!("target list unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("bad /json/list payload: {e}")))?;
        Ok(pick_foreground(&targets))
    }
}

/// Watch the foreground tab and feed activation changes to the coordinator,
/// standing in for the host's tab-activation notifications.
pub fn spawn_foreground_watcher(
    transport: Arc<ChromeTransport>,
    events: CoordinatorHandle,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<TabId> = None;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match transport.foreground_tab().await {
                Ok(Some(tab_id)) => {
                    if last.as_ref() != Some(&tab_id) {
                        last = Some(tab_id.clone());
                        events.dispatch(CoordinatorEvent::TabActivated(tab_id)).await;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("foreground poll failed: {err}"),
            }
        }
    })
}
