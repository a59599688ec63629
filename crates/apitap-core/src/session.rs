//! Per-tab capture session
//!
//! Owns the debugging attachment for one tab: the attach/detach state
//! machine, the network-lifecycle event handlers, and the follow-up body
//! fetches. Event handling is fire-and-forget; host round trips run as
//! spawned continuations that re-validate store state when they complete,
//! since a detach or clear may have happened while they were in flight.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::cdp::{
    self, methods, LoadingFinished, NetworkEvent, RequestPaused, RequestPostDataResult,
    RequestWillBeSent, ResponseBodyResult, ResponseReceived,
};
use crate::filter::{self, RequestDescriptor};
use crate::request::{CapturedRequest, TabId};
use crate::store::RequestStore;
use crate::transport::{DebuggerTransport, TransportError};

/// Methods whose bodies are worth a follow-up fetch when initiation-time
/// capture came up empty.
const BODY_RECOVERY_METHODS: &[&str] = &["POST", "PUT", "PATCH"];

/// Attachment lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

/// The live attachment between the inspector and one tab's network lifecycle.
pub struct CaptureSession<T: DebuggerTransport> {
    tab_id: TabId,
    transport: Arc<T>,
    store: RequestStore,
    state: AttachState,
    intercepting: bool,
}

impl<T: DebuggerTransport> CaptureSession<T> {
    pub fn new(tab_id: TabId, transport: Arc<T>, store: RequestStore) -> Self {
        Self {
            tab_id,
            transport,
            store,
            state: AttachState::Detached,
            intercepting: false,
        }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    /// Whether request interception was granted on attach.
    pub fn is_intercepting(&self) -> bool {
        self.intercepting
    }

    /// Attach the debugger and enable lifecycle event delivery.
    ///
    /// A no-op when already attached (probed against the host first, since
    /// the host rejects double attachment). Interception is a capability
    /// negotiation: a host that rejects `Fetch.enable` still yields a working
    /// session, just with weaker request-body coverage.
    pub async fn attach(&mut self) -> Result<(), TransportError> {
        if matches!(self.state, AttachState::Attached | AttachState::Attaching) {
            return Ok(());
        }

        if self.transport.is_attached(&self.tab_id).await {
            self.state = AttachState::Attached;
            return Ok(());
        }

        self.state = AttachState::Attaching;
        if let Err(err) = self.transport.attach(&self.tab_id).await {
            self.state = AttachState::Detached;
            return Err(err);
        }

        if let Err(err) = self
            .transport
            .send_command(&self.tab_id, methods::NETWORK_ENABLE, json!({}))
            .await
        {
            // Without network events the attachment is useless; roll it back.
            let _ = self.transport.detach(&self.tab_id).await;
            self.state = AttachState::Detached;
            return Err(err);
        }

        if let Err(err) = self
            .transport
            .send_command(&self.tab_id, methods::PAGE_ENABLE, json!({}))
            .await
        {
            debug!(tab = %self.tab_id, "page events unavailable: {err}");
        }

        let fetch_params = json!({
            "patterns": [{"urlPattern": "*", "requestStage": "Request"}]
        });
        match self
            .transport
            .send_command(&self.tab_id, methods::FETCH_ENABLE, fetch_params)
            .await
        {
            Ok(_) => self.intercepting = true,
            Err(err) => {
                debug!(tab = %self.tab_id, "interception not granted: {err}");
                self.intercepting = false;
            }
        }

        self.state = AttachState::Attached;
        Ok(())
    }

    /// Detach from the tab. Failures are swallowed entirely; already-detached
    /// is not an error condition worth surfacing.
    pub async fn detach(&mut self) {
        if matches!(self.state, AttachState::Detached) {
            return;
        }
        self.state = AttachState::Detaching;
        if let Err(err) = self.transport.detach(&self.tab_id).await {
            debug!(tab = %self.tab_id, "detach ignored: {err}");
        }
        self.intercepting = false;
        self.state = AttachState::Detached;
    }

    /// Route one lifecycle event. Events for other tabs are ignored; the
    /// host's event subscription is process-global across attached targets.
    pub async fn handle_event(&self, tab_id: &TabId, event: NetworkEvent) {
        if tab_id != &self.tab_id {
            return;
        }
        match event {
            NetworkEvent::RequestWillBeSent(ev) => self.on_request_will_be_sent(ev).await,
            NetworkEvent::ResponseReceived(ev) => self.on_response_received(ev).await,
            NetworkEvent::LoadingFinished(ev) => self.on_loading_finished(ev).await,
            NetworkEvent::RequestPaused(ev) => self.on_request_paused(ev),
        }
    }

    async fn on_request_will_be_sent(&self, ev: RequestWillBeSent) {
        let descriptor = RequestDescriptor {
            url: &ev.request.url,
            method: &ev.request.method,
            headers: &ev.request.headers,
            script_initiated: ev.is_script_initiated(),
        };
        if !filter::admits(&descriptor) {
            return;
        }

        let timestamp_ms = ev.timestamp_ms();
        let method = ev.request.method;
        let record = CapturedRequest::from_initiation(
            ev.request_id.clone(),
            ev.request.url,
            method.clone(),
            timestamp_ms,
            ev.request.headers,
            ev.request.post_data,
            self.tab_id.clone(),
        );
        let needs_body_recovery = record.request_body.is_none()
            && BODY_RECOVERY_METHODS
                .iter()
                .any(|m| method.eq_ignore_ascii_case(m));
        self.store.put(record).await;

        if needs_body_recovery {
            let transport = Arc::clone(&self.transport);
            let store = self.store.clone();
            let tab_id = self.tab_id.clone();
            let request_id = ev.request_id;
            tokio::spawn(async move {
                recover_post_data(transport, store, tab_id, request_id).await;
            });
        }
    }

    async fn on_response_received(&self, ev: ResponseReceived) {
        self.store
            .mutate(&ev.request_id, |record| {
                // Status transitions from unset to final exactly once.
                if record.is_in_flight() {
                    record.status = ev.response.status;
                    record.response_headers = ev.response.headers;
                }
            })
            .await;
    }

    async fn on_loading_finished(&self, ev: LoadingFinished) {
        if !self.store.contains(&ev.request_id).await {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let store = self.store.clone();
        let tab_id = self.tab_id.clone();
        tokio::spawn(async move {
            fetch_response_body(transport, store, tab_id, ev.request_id).await;
        });
    }

    /// An intercepted exchange is resolved unconditionally, never blocked or
    /// modified. The interception payload sometimes carries a body that
    /// initiation-time capture missed (chunked/streamed payloads), recovered
    /// here by matching URL and method against an in-flight record.
    fn on_request_paused(&self, ev: RequestPaused) {
        let transport = Arc::clone(&self.transport);
        let store = self.store.clone();
        let tab_id = self.tab_id.clone();
        tokio::spawn(async move {
            let params = json!({"requestId": ev.request_id});
            if let Err(err) = transport
                .send_command(&tab_id, methods::FETCH_CONTINUE_REQUEST, params)
                .await
            {
                warn!(tab = %tab_id, "failed to continue intercepted request: {err}");
            }

            let Some(post_data) = ev.request.post_data else {
                return;
            };
            let candidates = store.query_by_tab(&tab_id).await;
            let matched = candidates.iter().find(|record| {
                record.request_body.is_none()
                    && record.url == ev.request.url
                    && record.method.eq_ignore_ascii_case(&ev.request.method)
            });
            if let Some(record) = matched {
                store
                    .mutate(&record.id, |r| {
                        if r.request_body.is_none() {
                            r.request_body = Some(post_data);
                        }
                    })
                    .await;
            }
        });
    }
}

/// Follow-up fetch of the raw post data for a request whose initiation event
/// carried no body. Failure is non-fatal: the body stays absent.
async fn recover_post_data<T: DebuggerTransport>(
    transport: Arc<T>,
    store: RequestStore,
    tab_id: TabId,
    request_id: String,
) {
    let params = json!({"requestId": request_id});
    match transport
        .send_command(&tab_id, methods::NETWORK_GET_REQUEST_POST_DATA, params)
        .await
    {
        Ok(value) => {
            let Ok(result) = serde_json::from_value::<RequestPostDataResult>(value) else {
                return;
            };
            store
                .mutate(&request_id, |record| {
                    if record.request_body.is_none() {
                        record.request_body = Some(result.post_data);
                    }
                })
                .await;
        }
        Err(err) => {
            debug!(tab = %tab_id, request = %request_id, "post data unavailable: {err}");
        }
    }
}

/// Follow-up fetch of the response body once loading finishes. The record may
/// have been cleared while this was in flight; `mutate` on a missing id is a
/// no-op, so the late completion is harmless.
async fn fetch_response_body<T: DebuggerTransport>(
    transport: Arc<T>,
    store: RequestStore,
    tab_id: TabId,
    request_id: String,
) {
    let params = json!({"requestId": request_id});
    match transport
        .send_command(&tab_id, methods::NETWORK_GET_RESPONSE_BODY, params)
        .await
    {
        Ok(value) => {
            let Ok(result) = serde_json::from_value::<ResponseBodyResult>(value) else {
                return;
            };
            let body = cdp::decode_body(result.body, result.base64_encoded);
            store
                .mutate(&request_id, |record| {
                    // Body attaches at most once, and only to a completed record.
                    if !record.is_in_flight() && record.response_body.is_none() {
                        record.response_body = Some(body);
                    }
                })
                .await;
        }
        Err(err) => {
            debug!(tab = %tab_id, request = %request_id, "response body unavailable: {err}");
        }
    }
}
