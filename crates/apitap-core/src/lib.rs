//! Apitap Core Library
//!
//! Capture pipeline for the Apitap inspector: attach to a browser tab's
//! debugging interface, filter API-like traffic, correlate asynchronous
//! request/response/body events into single records, and serve the aggregated
//! state to an inspector UI on demand. Everything here is independent of the
//! concrete browser transport; the daemon supplies one via
//! [`transport::DebuggerTransport`].
//!
//! # Modules
//!
//! - [`request`] - Captured request data model and tab identifiers
//! - [`filter`] - Admission heuristic for API-like requests
//! - [`store`] - In-memory request table, keyed by request id
//! - [`cdp`] - DevTools Protocol types and body decoding
//! - [`transport`] - Debugger transport trait seam
//! - [`session`] - Per-tab capture session state machine
//! - [`coordinator`] - Active-tab coordinator and inspector commands
//! - [`settings`] - Persisted inspector settings
//! - [`error`] - Error types

pub mod cdp;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod request;
pub mod session;
pub mod settings;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use cdp::NetworkEvent;
pub use coordinator::{
    coordinator_channel, CoordinatorEvent, CoordinatorHandle, InspectorCommand, InspectorResponse,
    TabCoordinator,
};
pub use error::{AppError, Result};
pub use request::{CapturedRequest, TabId};
pub use session::{AttachState, CaptureSession};
pub use settings::{InspectorSettings, SettingsStore};
pub use store::RequestStore;
pub use transport::{DebuggerTransport, TransportError};
