//! Admission filter for observed requests
//!
//! Plain page navigations and static asset loads are noise; the union of
//! heuristics below catches most programmatic API traffic without waiting for
//! the response content type (which arrives too late to decide whether to
//! track the request at all). Pure and total: no state, no side effects.

use crate::request::Headers;

/// Path segments that mark a URL as API-like.
const API_PATH_MARKERS: &[&str] = &["/api/", "/v1/", "/v2/", "/graphql", "/rest/"];

/// Methods that imply programmatic, state-changing traffic.
const STATE_CHANGING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// Request-initiation descriptor, as seen before any response exists.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub headers: &'a Headers,
    /// Fetch/XHR resource type or a script initiator, as opposed to a
    /// navigation/document load
    pub script_initiated: bool,
}

/// Decide whether a request-initiation event is worth retaining.
///
/// Admits HTTP(S) requests matching at least one of: an API-like path marker,
/// a JSON request content type, a script-driven initiator, or a state-changing
/// method. The union deliberately leans broad (any POST anywhere is admitted)
/// rather than miss programmatic traffic it cannot yet classify.
pub fn admits(descriptor: &RequestDescriptor<'_>) -> bool {
    if !is_http(descriptor.url) {
        return false;
    }

    has_api_path_marker(descriptor.url)
        || has_json_content_type(descriptor.headers)
        || descriptor.script_initiated
        || is_state_changing(descriptor.method)
}

fn is_http(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Check the path portion of the URL for an API-like marker.
fn has_api_path_marker(url: &str) -> bool {
    let path = path_of(url).to_ascii_lowercase();
    API_PATH_MARKERS.iter().any(|marker| path.contains(marker))
}

/// Everything from the first `/` after the authority, query string included.
fn path_of(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "",
    }
}

fn has_json_content_type(headers: &Headers) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type")
            && value.to_ascii_lowercase().contains("application/json")
    })
}

fn is_state_changing(method: &str) -> bool {
    STATE_CHANGING_METHODS
        .iter()
        .any(|m| method.eq_ignore_ascii_case(m))
}
