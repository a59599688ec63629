//! Tab lifecycle coordinator
//!
//! Single owner of the active-tab reference and of attach/detach transitions.
//! The debugging attachment is a scarce, exclusive, host-enforced resource per
//! tab; funneling every transition through one worker prevents the
//! double-attach races the host would reject. The worker drains one mpsc
//! queue of typed events (tab changes, navigations, lifecycle events,
//! inspector commands) strictly in arrival order.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cdp::NetworkEvent;
use crate::error::{AppError, Result};
use crate::request::{CapturedRequest, TabId};
use crate::session::{AttachState, CaptureSession};
use crate::settings::{InspectorSettings, SettingsStore};
use crate::store::RequestStore;
use crate::transport::DebuggerTransport;

/// Everything that drives the coordinator worker.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A different tab came to the foreground
    TabActivated(TabId),
    /// A tab went away; its entries are dropped
    TabClosed(TabId),
    /// The tab started loading a new document
    NavigationStarted(TabId),
    /// A network lifecycle event, tagged with its originating tab
    Lifecycle { tab_id: TabId, event: NetworkEvent },
    /// An inspector command awaiting a reply
    Command {
        command: InspectorCommand,
        reply: oneshot::Sender<InspectorResponse>,
    },
}

/// Commands accepted from the inspector UI, `action`-tagged on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum InspectorCommand {
    /// Snapshot of the active tab's captured requests; lazily starts capture
    GetRequests,
    /// Clear the active tab's entries
    ClearRequests,
    /// Clear everything
    ClearAllRequests,
    /// Explicitly re-resolve the foreground tab and attach
    StartDebugging,
    GetSettings,
    UpdateSettings { settings: InspectorSettings },
}

/// Replies to inspector commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InspectorResponse {
    Requests {
        requests: Vec<CapturedRequest>,
    },
    Settings {
        settings: InspectorSettings,
    },
    Status {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl InspectorResponse {
    pub fn ok() -> Self {
        Self::Status {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self::Status {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Cloneable sender half for feeding the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Enqueue a fire-and-forget event.
    pub async fn dispatch(&self, event: CoordinatorEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("coordinator is gone; event dropped");
        }
    }

    /// Run an inspector command and await its reply. Never fails the caller:
    /// a dead worker yields a `success: false` status.
    pub async fn command(&self, command: InspectorCommand) -> InspectorResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = CoordinatorEvent::Command {
            command,
            reply: reply_tx,
        };
        if self.tx.send(event).await.is_err() {
            return InspectorResponse::failure("capture backend is shutting down");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| InspectorResponse::failure("capture backend dropped the command"))
    }
}

/// Create the coordinator queue.
pub fn coordinator_channel(capacity: usize) -> (CoordinatorHandle, mpsc::Receiver<CoordinatorEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (CoordinatorHandle { tx }, rx)
}

/// The coordinator worker. Owns the store, the settings, and at most one
/// capture session at a time.
pub struct TabCoordinator<T: DebuggerTransport> {
    transport: Arc<T>,
    store: RequestStore,
    settings: SettingsStore,
    active: Option<CaptureSession<T>>,
    events_rx: mpsc::Receiver<CoordinatorEvent>,
}

impl<T: DebuggerTransport> TabCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        store: RequestStore,
        settings: SettingsStore,
        events_rx: mpsc::Receiver<CoordinatorEvent>,
    ) -> Self {
        Self {
            transport,
            store,
            settings,
            active: None,
            events_rx,
        }
    }

    /// Drain the queue until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            self.process(event).await;
        }
        debug!("coordinator queue closed; shutting down");
        if let Some(session) = self.active.as_mut() {
            session.detach().await;
        }
    }

    async fn process(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::TabActivated(tab_id) => {
                // Best-effort: a tab that refuses attachment still becomes
                // the active tab, and the next navigation retries.
                if let Err(err) = self.activate(tab_id.clone()).await {
                    warn!(tab = %tab_id, "capture not started: {err}");
                }
            }
            CoordinatorEvent::TabClosed(tab_id) => self.on_tab_closed(tab_id).await,
            CoordinatorEvent::NavigationStarted(tab_id) => self.on_navigation(tab_id).await,
            CoordinatorEvent::Lifecycle { tab_id, event } => {
                if let Some(session) = self.active.as_ref() {
                    session.handle_event(&tab_id, event).await;
                }
            }
            CoordinatorEvent::Command { command, reply } => {
                let response = self.handle_command(command).await;
                let _ = reply.send(response);
            }
        }
    }

    /// Switch the capture session to a tab: detach the previous session
    /// (best-effort), then attach a fresh one.
    async fn activate(&mut self, tab_id: TabId) -> Result<()> {
        if let Some(session) = self.active.as_mut() {
            if session.tab_id() == &tab_id {
                // Same tab: attach is a no-op when already live.
                return session
                    .attach()
                    .await
                    .map_err(|e| AppError::AttachFailed(e.to_string()));
            }
            session.detach().await;
        }

        let mut session =
            CaptureSession::new(tab_id, Arc::clone(&self.transport), self.store.clone());
        let attached = session.attach().await;
        self.active = Some(session);
        attached.map_err(|e| AppError::AttachFailed(e.to_string()))
    }

    async fn on_tab_closed(&mut self, tab_id: TabId) {
        if self
            .active
            .as_ref()
            .map(|s| s.tab_id() == &tab_id)
            .unwrap_or(false)
        {
            if let Some(mut session) = self.active.take() {
                session.detach().await;
            }
        }
        self.store.clear_by_tab(&tab_id).await;
    }

    async fn on_navigation(&mut self, tab_id: TabId) {
        let is_active = self
            .active
            .as_ref()
            .map(|s| s.tab_id() == &tab_id)
            .unwrap_or(false);
        if !is_active {
            return;
        }

        if self.settings.clear_on_tab_refresh().await {
            self.store.clear_by_tab(&tab_id).await;
        }

        // Natural retry path for a tab that previously refused attachment.
        if let Some(session) = self.active.as_mut() {
            if session.state() == AttachState::Detached {
                if let Err(err) = session.attach().await {
                    debug!(tab = %tab_id, "re-attach on navigation failed: {err}");
                }
            }
        }
    }

    async fn handle_command(&mut self, command: InspectorCommand) -> InspectorResponse {
        match command {
            InspectorCommand::GetRequests => {
                if self.active.is_none() {
                    // Inspector opened before any tab event arrived: resolve
                    // the foreground tab and start capture lazily.
                    if let Err(err) = self.start_capture().await {
                        debug!("lazy capture start failed: {err}");
                    }
                }
                let requests = match self.active.as_ref() {
                    Some(session) => self.store.query_by_tab(session.tab_id()).await,
                    None => Vec::new(),
                };
                InspectorResponse::Requests { requests }
            }
            InspectorCommand::ClearRequests => match self.active.as_ref() {
                Some(session) => {
                    let tab_id = session.tab_id().clone();
                    self.store.clear_by_tab(&tab_id).await;
                    InspectorResponse::ok()
                }
                None => InspectorResponse::failure(AppError::NoActiveTab),
            },
            InspectorCommand::ClearAllRequests => {
                self.store.clear_all().await;
                InspectorResponse::ok()
            }
            InspectorCommand::StartDebugging => match self.start_capture().await {
                Ok(()) => InspectorResponse::ok(),
                Err(err) => InspectorResponse::failure(err),
            },
            InspectorCommand::GetSettings => InspectorResponse::Settings {
                settings: self.settings.get().await,
            },
            InspectorCommand::UpdateSettings { settings } => {
                match self.settings.replace(settings).await {
                    Ok(()) => InspectorResponse::ok(),
                    Err(err) => InspectorResponse::failure(err),
                }
            }
        }
    }

    /// Resolve the foreground tab and activate capture on it.
    async fn start_capture(&mut self) -> Result<()> {
        let tab_id = self
            .transport
            .foreground_tab()
            .await
            .map_err(AppError::from)?
            .ok_or(AppError::NoActiveTab)?;
        self.activate(tab_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::methods;
    use crate::test_support::{wait_until, MockTransport};
    use serde_json::json;

    struct Fixture {
        transport: Arc<MockTransport>,
        store: RequestStore,
        settings: SettingsStore,
        handle: CoordinatorHandle,
    }

    fn spawn_coordinator() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let store = RequestStore::new();
        let settings = SettingsStore::ephemeral();
        let (handle, rx) = coordinator_channel(64);
        let coordinator = TabCoordinator::new(
            Arc::clone(&transport),
            store.clone(),
            settings.clone(),
            rx,
        );
        tokio::spawn(coordinator.run());
        Fixture {
            transport,
            store,
            settings,
            handle,
        }
    }

    fn lifecycle(tab: &str, method: &str, params: serde_json::Value) -> CoordinatorEvent {
        CoordinatorEvent::Lifecycle {
            tab_id: TabId::from(tab),
            event: NetworkEvent::parse(method, params).unwrap(),
        }
    }

    fn initiation(tab: &str, id: &str, url: &str, http_method: &str, body: Option<&str>) -> CoordinatorEvent {
        let mut request = json!({"url": url, "method": http_method, "headers": {}});
        if let Some(b) = body {
            request["postData"] = json!(b);
        }
        lifecycle(
            tab,
            methods::REQUEST_WILL_BE_SENT,
            json!({"requestId": id, "request": request, "timestamp": 1.0, "type": "Fetch"}),
        )
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: InspectorCommand = serde_json::from_str("{\"action\":\"getRequests\"}").unwrap();
        assert_eq!(cmd, InspectorCommand::GetRequests);

        let cmd: InspectorCommand =
            serde_json::from_str("{\"action\":\"startDebugging\"}").unwrap();
        assert_eq!(cmd, InspectorCommand::StartDebugging);

        let cmd: InspectorCommand = serde_json::from_str(
            "{\"action\":\"updateSettings\",\"settings\":{\"clearOnTabRefresh\":false}}",
        )
        .unwrap();
        let InspectorCommand::UpdateSettings { settings } = cmd else {
            panic!("wrong variant");
        };
        assert!(!settings.clear_on_tab_refresh);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = serde_json::to_string(&InspectorResponse::ok()).unwrap();
        assert_eq!(ok, "{\"success\":true}");

        let failed = serde_json::to_string(&InspectorResponse::failure("no tab")).unwrap();
        assert!(failed.contains("\"success\":false"));
        assert!(failed.contains("\"error\":\"no tab\""));

        let empty = serde_json::to_string(&InspectorResponse::Requests { requests: vec![] }).unwrap();
        assert_eq!(empty, "{\"requests\":[]}");
    }

    #[tokio::test]
    async fn test_tab_activation_switches_attachment() {
        let fx = spawn_coordinator();
        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("a")))
            .await;
        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("b")))
            .await;

        let transport = Arc::clone(&fx.transport);
        assert!(
            wait_until(|| {
                let transport = Arc::clone(&transport);
                async move {
                    let attached = transport.attached_tabs().await;
                    attached.len() == 1 && attached.contains(&TabId::from("b"))
                }
            })
            .await
        );
    }

    #[tokio::test]
    async fn test_start_debugging_resolves_foreground_tab() {
        let fx = spawn_coordinator();
        fx.transport.set_foreground(Some(TabId::from("fg"))).await;

        let response = fx.handle.command(InspectorCommand::StartDebugging).await;
        let InspectorResponse::Status { success, error } = response else {
            panic!("wrong response shape");
        };
        assert!(success, "{error:?}");
        assert!(fx.transport.attached_tabs().await.contains(&TabId::from("fg")));
    }

    #[tokio::test]
    async fn test_start_debugging_without_tab_reports_error() {
        let fx = spawn_coordinator();

        let response = fx.handle.command(InspectorCommand::StartDebugging).await;
        let InspectorResponse::Status { success, error } = response else {
            panic!("wrong response shape");
        };
        assert!(!success);
        assert_eq!(error.as_deref(), Some("No debuggable tab available"));
    }

    #[tokio::test]
    async fn test_get_requests_lazily_starts_capture() {
        let fx = spawn_coordinator();
        fx.transport.set_foreground(Some(TabId::from("fg"))).await;

        let response = fx.handle.command(InspectorCommand::GetRequests).await;
        let InspectorResponse::Requests { requests } = response else {
            panic!("wrong response shape");
        };
        assert!(requests.is_empty());
        assert!(fx.transport.attached_tabs().await.contains(&TabId::from("fg")));
    }

    #[tokio::test]
    async fn test_get_requests_with_no_tab_is_empty_not_error() {
        let fx = spawn_coordinator();
        let response = fx.handle.command(InspectorCommand::GetRequests).await;
        let InspectorResponse::Requests { requests } = response else {
            panic!("wrong response shape");
        };
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn test_clear_requests_without_active_tab_fails_cleanly() {
        let fx = spawn_coordinator();
        let response = fx.handle.command(InspectorCommand::ClearRequests).await;
        let InspectorResponse::Status { success, .. } = response else {
            panic!("wrong response shape");
        };
        assert!(!success);
    }

    #[tokio::test]
    async fn test_refresh_clears_when_policy_enabled() {
        let fx = spawn_coordinator();
        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("a")))
            .await;
        fx.handle
            .dispatch(initiation("a", "1", "https://a.io/api/x", "GET", None))
            .await;
        fx.handle
            .dispatch(CoordinatorEvent::NavigationStarted(TabId::from("a")))
            .await;

        let store = fx.store.clone();
        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.is_empty().await }
            })
            .await
        );
    }

    #[tokio::test]
    async fn test_refresh_retains_when_policy_disabled() {
        let fx = spawn_coordinator();
        fx.settings
            .replace(InspectorSettings {
                clear_on_tab_refresh: false,
                ..Default::default()
            })
            .await
            .unwrap();

        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("a")))
            .await;
        fx.handle
            .dispatch(initiation("a", "1", "https://a.io/api/x", "GET", None))
            .await;
        fx.handle
            .dispatch(CoordinatorEvent::NavigationStarted(TabId::from("a")))
            .await;

        // Commands queue behind the navigation event, so this snapshot sees
        // its effect.
        let response = fx.handle.command(InspectorCommand::GetRequests).await;
        let InspectorResponse::Requests { requests } = response else {
            panic!("wrong response shape");
        };
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_on_inactive_tab_changes_nothing() {
        let fx = spawn_coordinator();
        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("a")))
            .await;
        fx.handle
            .dispatch(initiation("a", "1", "https://a.io/api/x", "GET", None))
            .await;
        fx.handle
            .dispatch(CoordinatorEvent::NavigationStarted(TabId::from("b")))
            .await;

        let response = fx.handle.command(InspectorCommand::GetRequests).await;
        let InspectorResponse::Requests { requests } = response else {
            panic!("wrong response shape");
        };
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_tab_closed_drops_entries_and_detaches() {
        let fx = spawn_coordinator();
        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(TabId::from("a")))
            .await;
        fx.handle
            .dispatch(initiation("a", "1", "https://a.io/api/x", "GET", None))
            .await;
        fx.handle
            .dispatch(CoordinatorEvent::TabClosed(TabId::from("a")))
            .await;

        let transport = Arc::clone(&fx.transport);
        assert!(
            wait_until(|| {
                let transport = Arc::clone(&transport);
                async move { transport.attached_tabs().await.is_empty() }
            })
            .await
        );
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_attach_retries_on_navigation() {
        let fx = spawn_coordinator();
        let tab = TabId::from("a");
        fx.transport.fail_attach(&tab).await;

        fx.handle
            .dispatch(CoordinatorEvent::TabActivated(tab.clone()))
            .await;
        // Host becomes debuggable again (e.g. left a protected page).
        let response = fx.handle.command(InspectorCommand::GetRequests).await;
        assert!(matches!(response, InspectorResponse::Requests { .. }));
        fx.transport.allow_attach(&tab).await;

        fx.handle
            .dispatch(CoordinatorEvent::NavigationStarted(tab.clone()))
            .await;

        let transport = Arc::clone(&fx.transport);
        assert!(
            wait_until(|| {
                let transport = Arc::clone(&transport);
                async move { transport.attached_tabs().await.contains(&TabId::from("a")) }
            })
            .await
        );
        assert_eq!(fx.transport.attach_attempts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_settings_round_trip_over_commands() {
        let fx = spawn_coordinator();

        let response = fx.handle.command(InspectorCommand::GetSettings).await;
        let InspectorResponse::Settings { settings } = response else {
            panic!("wrong response shape");
        };
        assert!(settings.clear_on_tab_refresh);

        let updated = InspectorSettings {
            clear_on_tab_refresh: false,
            dark_mode: true,
            saved_filters: vec!["auth".to_string()],
        };
        let response = fx
            .handle
            .command(InspectorCommand::UpdateSettings {
                settings: updated.clone(),
            })
            .await;
        assert!(matches!(
            response,
            InspectorResponse::Status { success: true, .. }
        ));
        assert_eq!(fx.settings.get().await, updated);
    }

    /// The full capture scenario: initiation, response, body, snapshot.
    #[tokio::test]
    async fn test_end_to_end_capture_flow() {
        let fx = spawn_coordinator();
        fx.transport.set_foreground(Some(TabId::from("t"))).await;
        fx.transport
            .respond_with(
                methods::NETWORK_GET_RESPONSE_BODY,
                json!({"body": "{\"ok\":true}", "base64Encoded": false}),
            )
            .await;

        let response = fx.handle.command(InspectorCommand::StartDebugging).await;
        assert!(matches!(
            response,
            InspectorResponse::Status { success: true, .. }
        ));

        fx.handle
            .dispatch(initiation(
                "t",
                "1",
                "https://a.io/api/login",
                "POST",
                Some("{\"u\":\"x\"}"),
            ))
            .await;
        fx.handle
            .dispatch(lifecycle(
                "t",
                methods::RESPONSE_RECEIVED,
                json!({"requestId": "1", "response": {"status": 200, "headers": {"content-type": "application/json"}}}),
            ))
            .await;
        fx.handle
            .dispatch(lifecycle(
                "t",
                methods::LOADING_FINISHED,
                json!({"requestId": "1"}),
            ))
            .await;

        let handle = fx.handle.clone();
        assert!(
            wait_until(|| {
                let handle = handle.clone();
                async move {
                    match handle.command(InspectorCommand::GetRequests).await {
                        InspectorResponse::Requests { requests } => requests
                            .first()
                            .map(|r| r.response_body.is_some())
                            .unwrap_or(false),
                        _ => false,
                    }
                }
            })
            .await
        );

        let InspectorResponse::Requests { requests } =
            fx.handle.command(InspectorCommand::GetRequests).await
        else {
            panic!("wrong response shape");
        };
        assert_eq!(requests.len(), 1);
        let record = &requests[0];
        assert_eq!(record.id, "1");
        assert_eq!(record.method, "POST");
        assert_eq!(record.status, 200);
        assert_eq!(record.request_body.as_deref(), Some("{\"u\":\"x\"}"));
        assert_eq!(record.response_body.as_deref(), Some("{\"ok\":true}"));
        assert_eq!(record.tab_id, TabId::from("t"));
    }
}
