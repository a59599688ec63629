//! Shared test fixtures: a scriptable mock debugger host.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::request::TabId;
use crate::transport::{DebuggerTransport, TransportError};

/// A recorded `send_command` invocation.
#[derive(Debug, Clone)]
pub(crate) struct SentCommand {
    pub tab_id: TabId,
    pub method: String,
    pub params: Value,
}

/// Mock debugger host: canned command results, scriptable failures, and a
/// full log of everything sent.
#[derive(Default)]
pub(crate) struct MockTransport {
    attached: Mutex<HashSet<TabId>>,
    calls: Mutex<Vec<SentCommand>>,
    responses: Mutex<HashMap<String, Value>>,
    failing_methods: Mutex<HashSet<String>>,
    failing_attach: Mutex<HashSet<TabId>>,
    attach_attempts: Mutex<Vec<TabId>>,
    foreground: Mutex<Option<TabId>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned result for a command method.
    pub async fn respond_with(&self, method: &str, result: Value) {
        self.responses
            .lock()
            .await
            .insert(method.to_string(), result);
    }

    /// Make a command method fail.
    pub async fn fail_method(&self, method: &str) {
        self.failing_methods.lock().await.insert(method.to_string());
    }

    /// Make attach fail for a tab.
    pub async fn fail_attach(&self, tab_id: &TabId) {
        self.failing_attach.lock().await.insert(tab_id.clone());
    }

    /// Let a previously failing tab attach again.
    pub async fn allow_attach(&self, tab_id: &TabId) {
        self.failing_attach.lock().await.remove(tab_id);
    }

    /// Tabs passed to `attach`, in order, successful or not.
    pub async fn attach_attempts(&self) -> Vec<TabId> {
        self.attach_attempts.lock().await.clone()
    }

    pub async fn set_foreground(&self, tab_id: Option<TabId>) {
        *self.foreground.lock().await = tab_id;
    }

    pub async fn sent_commands(&self) -> Vec<SentCommand> {
        self.calls.lock().await.clone()
    }

    pub async fn sent_methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|c| c.method.clone())
            .collect()
    }

    pub async fn attached_tabs(&self) -> HashSet<TabId> {
        self.attached.lock().await.clone()
    }

    /// Pretend the host already has an attachment for this tab.
    pub async fn force_attached(&self, tab_id: &TabId) {
        self.attached.lock().await.insert(tab_id.clone());
    }
}

#[async_trait]
impl DebuggerTransport for MockTransport {
    async fn is_attached(&self, tab_id: &TabId) -> bool {
        self.attached.lock().await.contains(tab_id)
    }

    async fn attach(&self, tab_id: &TabId) -> Result<(), TransportError> {
        self.attach_attempts.lock().await.push(tab_id.clone());
        if self.failing_attach.lock().await.contains(tab_id) {
            return Err(TransportError::AttachFailed("tab not debuggable".to_string()));
        }
        let mut attached = self.attached.lock().await;
        if attached.contains(tab_id) {
            return Err(TransportError::AttachFailed("already attached".to_string()));
        }
        attached.insert(tab_id.clone());
        Ok(())
    }

    async fn detach(&self, tab_id: &TabId) -> Result<(), TransportError> {
        if !self.attached.lock().await.remove(tab_id) {
            return Err(TransportError::NotAttached);
        }
        Ok(())
    }

    async fn send_command(
        &self,
        tab_id: &TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.calls.lock().await.push(SentCommand {
            tab_id: tab_id.clone(),
            method: method.to_string(),
            params,
        });

        if self.failing_methods.lock().await.contains(method) {
            return Err(TransportError::CommandFailed {
                method: method.to_string(),
                message: "rejected by host".to_string(),
            });
        }

        Ok(self
            .responses
            .lock()
            .await
            .get(method)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn foreground_tab(&self) -> Result<Option<TabId>, TransportError> {
        Ok(self.foreground.lock().await.clone())
    }
}

/// Poll an async condition until it holds or a short deadline passes. Used to
/// observe the fire-and-forget continuation tasks the session spawns.
pub(crate) async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
