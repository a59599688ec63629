//! Captured request data model
//!
//! One [`CapturedRequest`] per observed HTTP exchange, keyed by the request id
//! the debugger host assigns. Wire shape is camelCase so the inspector UI sees
//! the same JSON it consumed from the extension original.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a browser tab (a DevTools page target id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub String);

impl TabId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Header map as delivered by the debugger host (original casing preserved).
pub type Headers = HashMap<String, String>;

/// One observed HTTP exchange.
///
/// `status == 0` means the response has not arrived yet (in-flight). `status`
/// is set exactly once; `response_body` attaches at most once and only after
/// `status` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Identifier assigned by the debugger host; primary key of the store
    pub id: String,
    pub url: String,
    pub method: String,
    /// HTTP status; 0 while in-flight
    pub status: u16,
    /// Capture time in milliseconds, monotonic per session
    pub timestamp: u64,
    pub request_headers: Headers,
    /// Empty until the response arrives
    pub response_headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Originating tab, used for partitioning and clears
    pub tab_id: TabId,
}

impl CapturedRequest {
    /// Build a record from a request-initiation event. Starts in-flight.
    pub fn from_initiation(
        id: String,
        url: String,
        method: String,
        timestamp_ms: u64,
        request_headers: Headers,
        request_body: Option<String>,
        tab_id: TabId,
    ) -> Self {
        Self {
            id,
            url,
            method,
            status: 0,
            timestamp: timestamp_ms,
            request_headers,
            response_headers: Headers::new(),
            request_body,
            response_body: None,
            tab_id,
        }
    }

    /// Whether the response has not been received yet.
    pub fn is_in_flight(&self) -> bool {
        self.status == 0
    }
}
