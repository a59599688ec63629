//! DevTools Protocol types
//!
//! The slice of the Chrome DevTools Protocol this crate speaks: method name
//! constants, the network lifecycle event payloads, and body decoding. Only
//! the fields the capture pipeline reads are modeled; everything else in a
//! payload is ignored on deserialization.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

/// Command and event method names.
pub mod methods {
    pub const NETWORK_ENABLE: &str = "Network.enable";
    pub const NETWORK_GET_RESPONSE_BODY: &str = "Network.getResponseBody";
    pub const NETWORK_GET_REQUEST_POST_DATA: &str = "Network.getRequestPostData";
    pub const PAGE_ENABLE: &str = "Page.enable";
    pub const FETCH_ENABLE: &str = "Fetch.enable";
    pub const FETCH_CONTINUE_REQUEST: &str = "Fetch.continueRequest";

    pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
    pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
    pub const LOADING_FINISHED: &str = "Network.loadingFinished";
    pub const REQUEST_PAUSED: &str = "Fetch.requestPaused";
    pub const FRAME_STARTED_LOADING: &str = "Page.frameStartedLoading";
}

/// Resource type attached to `Network.requestWillBeSent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    WebSocket,
    #[serde(other)]
    Other,
}

/// Request initiator metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: String,
}

/// The request half of an initiation or interception event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: RequestPayload,
    /// Monotonic seconds since an arbitrary session origin
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub resource_type: Option<ResourceType>,
    pub initiator: Option<Initiator>,
}

impl RequestWillBeSent {
    /// Capture time in milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        (self.timestamp * 1000.0) as u64
    }

    /// Fetch/XHR traffic or a script initiator, as opposed to a navigation.
    pub fn is_script_initiated(&self) -> bool {
        matches!(
            self.resource_type,
            Some(ResourceType::Fetch) | Some(ResourceType::Xhr)
        ) || self
            .initiator
            .as_ref()
            .map(|i| i.kind.eq_ignore_ascii_case("script"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub response: ResponsePayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
}

/// `Fetch.requestPaused`. The request id here is a Fetch-domain id, not
/// the Network-domain id, so body recovery matches by URL and method instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPaused {
    pub request_id: String,
    pub request: RequestPayload,
}

/// Result of `Network.getResponseBody`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBodyResult {
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}

/// Result of `Network.getRequestPostData`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPostDataResult {
    pub post_data: String,
}

/// A network lifecycle event the capture session reacts to.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    RequestWillBeSent(RequestWillBeSent),
    ResponseReceived(ResponseReceived),
    LoadingFinished(LoadingFinished),
    RequestPaused(RequestPaused),
}

impl NetworkEvent {
    /// Parse a raw (method, params) pair into a typed lifecycle event.
    ///
    /// Returns `None` for methods the pipeline does not handle and for
    /// payloads that fail to deserialize: a malformed event from the host is
    /// dropped, never an error.
    pub fn parse(method: &str, params: Value) -> Option<Self> {
        let parsed = match method {
            methods::REQUEST_WILL_BE_SENT => {
                serde_json::from_value(params).map(Self::RequestWillBeSent)
            }
            methods::RESPONSE_RECEIVED => serde_json::from_value(params).map(Self::ResponseReceived),
            methods::LOADING_FINISHED => serde_json::from_value(params).map(Self::LoadingFinished),
            methods::REQUEST_PAUSED => serde_json::from_value(params).map(Self::RequestPaused),
            _ => return None,
        };

        match parsed {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!("dropping malformed {method} event: {err}");
                None
            }
        }
    }
}

/// Decode a possibly transport-encoded body.
///
/// Falls back to the raw payload when the base64 decode fails or the decoded
/// bytes are not valid UTF-8; a partial record beats no record.
pub fn decode_body(body: String, base64_encoded: bool) -> String {
    if !base64_encoded {
        return body;
    }
    match BASE64.decode(body.as_bytes()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => body,
        },
        Err(err) => {
            tracing::debug!("response body base64 decode failed: {err}");
            body
        }
    }
}
