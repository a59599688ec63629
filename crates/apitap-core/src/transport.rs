//! Debugger transport seam
//!
//! The capture pipeline never talks to a browser directly; it drives a
//! [`DebuggerTransport`]. The daemon provides a CDP WebSocket implementation,
//! tests provide a mock. Events flow the other way (the transport owner feeds
//! them into the coordinator queue), so this trait only covers the
//! command-and-attach surface.

use async_trait::async_trait;
use serde_json::Value;

use crate::request::TabId;

/// Errors that can occur talking to the debugger host.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected to a browser")]
    NotConnected,

    #[error("Not attached to tab")]
    NotAttached,

    #[error("Failed to attach: {0}")]
    AttachFailed(String),

    #[error("Command {method} failed: {message}")]
    CommandFailed { method: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for String {
    fn from(err: TransportError) -> String {
        err.to_string()
    }
}

/// Command surface of the debugger host, per tab.
///
/// The host enforces exclusive attachment per tab; callers probe
/// `is_attached` before attaching to avoid double-attach errors.
#[async_trait]
pub trait DebuggerTransport: Send + Sync + 'static {
    /// Liveness probe: is a debugging attachment active for this tab?
    async fn is_attached(&self, tab_id: &TabId) -> bool;

    /// Attach the debugger to a tab.
    async fn attach(&self, tab_id: &TabId) -> Result<(), TransportError>;

    /// Detach from a tab. Already-detached is not an error worth surfacing;
    /// callers discard the result.
    async fn detach(&self, tab_id: &TabId) -> Result<(), TransportError>;

    /// Send a protocol command scoped to an attached tab and await its result.
    async fn send_command(
        &self,
        tab_id: &TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError>;

    /// Resolve the current foreground tab, if any.
    async fn foreground_tab(&self) -> Result<Option<TabId>, TransportError>;
}
