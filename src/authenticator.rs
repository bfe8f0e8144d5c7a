//! Authenticator hooks (spec.md SS6: "authenticator (user + proxy)").

use crate::header::Headers;
use crate::request::Request;
use crate::response::Response;

/// Supplies credentials in response to a 401/407 challenge.
///
/// Returning `None` means "give up" — the unauthenticated response is
/// returned to the caller as-is instead of retrying.
pub trait Authenticator: Send + Sync {
    /// Build a follow-up `Headers` (to merge into the retried request) in
    /// response to a challenge carried by `response`.
    fn authenticate(&self, request: &Request, response: &Response) -> Option<Headers>;
}

/// An authenticator that never authenticates — the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _request: &Request, _response: &Response) -> Option<Headers> {
        None
    }
}

/// HTTP Basic authentication, applied unconditionally on challenge.
pub struct BasicAuthenticator {
    header_value: String,
}

impl BasicAuthenticator {
    pub fn new(username: &str, password: &str) -> BasicAuthenticator {
        use base64::Engine;
        let raw = format!("{}:{}", username, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        BasicAuthenticator {
            header_value: format!("Basic {}", encoded),
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, _request: &Request, response: &Response) -> Option<Headers> {
        let header_name = if response.status().as_u16() == 407 {
            "Proxy-Authorization"
        } else {
            "Authorization"
        };
        let mut headers = Headers::new();
        headers.push_str(header_name, &self.header_value).ok()?;
        Some(headers)
    }
}
