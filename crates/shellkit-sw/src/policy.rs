//! Response classification and the caching decision.
//!
//! Only a confirmed, fully visible `200` is ever written to the cache. Every
//! other outcome (partial content, redirects, errors, opaque cross-origin
//! responses, transport failures) leaves the existing entry alone.

use http::Method;
use shellkit_net::{NetError, Response, ResponseType};
use url::Url;

/// What a network attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Status 200 with a visible body.
    Complete,
    /// Other 2xx statuses (204, 206, ...).
    Partial,
    /// 3xx.
    Redirect,
    /// 4xx.
    ClientError,
    /// 5xx.
    ServerError,
    /// No response at all.
    NetworkError,
    /// Cross-origin no-cors response; status cannot be verified.
    Opaque,
}

impl ResponseClass {
    /// Classify a response that arrived.
    pub fn of_response(response: &Response) -> Self {
        if response.response_type == ResponseType::Opaque {
            return Self::Opaque;
        }
        let status = response.status;
        if status == http::StatusCode::OK {
            Self::Complete
        } else if status.is_success() {
            Self::Partial
        } else if status.is_redirection() {
            Self::Redirect
        } else if status.is_client_error() {
            Self::ClientError
        } else if status.is_server_error() {
            Self::ServerError
        } else {
            // 1xx never reaches a fetch caller; treat it as unusable.
            Self::NetworkError
        }
    }
}

/// Classify the outcome of a network attempt.
pub fn classify(result: &Result<Response, NetError>) -> ResponseClass {
    match result {
        Ok(response) => ResponseClass::of_response(response),
        Err(_) => ResponseClass::NetworkError,
    }
}

/// Whether a response of this class may be written to the cache.
pub fn should_cache(class: ResponseClass) -> bool {
    class == ResponseClass::Complete
}

/// Only safe reads are intercepted; submissions always go straight to the network.
pub fn is_interceptable_method(method: &Method) -> bool {
    *method == Method::GET
}

/// Only HTTP(S) requests are intercepted; extension, `data:` and `blob:`
/// URLs are left to the host.
pub fn is_interceptable_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
