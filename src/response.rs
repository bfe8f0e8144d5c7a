//! Response data model (SPEC_FULL.md SS3).

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use http::StatusCode;

use crate::header::Headers;
use crate::request::Request;
use crate::tls::Handshake;

/// The wire protocol a [`Response`] was received over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
    Http2,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http10 => "http/1.0",
            Protocol::Http11 => "http/1.1",
            Protocol::Http2 => "h2",
        }
    }
}

/// The response body: a stream the caller must read to completion (or
/// close early) before the underlying connection is eligible for reuse.
///
/// Dropping without reading is safe — the owning exchange treats that as
/// "close", per SS5 ("Close of a response body also signals that the
/// exchange is complete").
pub struct ResponseBody {
    reader: Box<dyn Read + Send>,
    byte_size: Option<u64>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ResponseBody {
    pub fn new(reader: impl Read + Send + 'static, byte_size: Option<u64>) -> ResponseBody {
        ResponseBody {
            reader: Box::new(reader),
            byte_size,
            on_close: None,
        }
    }

    pub(crate) fn with_on_close(mut self, on_close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.byte_size
    }

    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

/// A response to a [`Request`].
pub struct Response {
    request: Arc<Request>,
    protocol: Protocol,
    status: StatusCode,
    status_message: String,
    headers: Headers,
    body: Option<ResponseBody>,
    handshake: Option<Handshake>,
    sent_at_millis: i64,
    received_at_millis: i64,
    cache_response: Option<Box<Response>>,
    network_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
}

impl Response {
    pub fn builder(request: Arc<Request>, protocol: Protocol, status: StatusCode) -> ResponseBuilder {
        ResponseBuilder {
            request,
            protocol,
            status,
            status_message: String::new(),
            headers: Headers::new(),
            body: None,
            handshake: None,
            sent_at_millis: 0,
            received_at_millis: 0,
            cache_response: None,
            network_response: None,
            prior_response: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&mut self) -> Option<&mut ResponseBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Swaps in a transformed body (gunzipped, cache-tee'd, …), used by
    /// interceptors that rewrap the body a lower layer produced.
    pub(crate) fn replace_body(&mut self, body: Option<ResponseBody>) {
        self.body = body;
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Records when the request was sent / the response arrived, set by
    /// the call-server interceptor once the exchange completes (the codec
    /// itself has no wall-clock notion).
    pub(crate) fn set_timing(&mut self, sent_at_millis: i64, received_at_millis: i64) {
        self.sent_at_millis = sent_at_millis;
        self.received_at_millis = received_at_millis;
    }

    pub(crate) fn set_handshake(&mut self, handshake: Handshake) {
        self.handshake = Some(handshake);
    }

    /// Attaches the network response that produced this one, used by the
    /// cache interceptor when a 304 is served alongside a refreshed cache
    /// entry (spec.md SS4.6).
    pub(crate) fn set_network_response(&mut self, response: Response) {
        self.network_response = Some(Box::new(response.strip_body()));
    }

    pub fn sent_at_millis(&self) -> i64 {
        self.sent_at_millis
    }

    pub fn received_at_millis(&self) -> i64 {
        self.received_at_millis
    }

    pub fn cache_response(&self) -> Option<&Response> {
        self.cache_response.as_deref()
    }

    pub fn network_response(&self) -> Option<&Response> {
        self.network_response.as_deref()
    }

    pub fn prior_response(&self) -> Option<&Response> {
        self.prior_response.as_deref()
    }

    /// True for the 1xx/204/304/HEAD cases in SS4.4 that never carry a body.
    pub fn is_no_body_status(&self) -> bool {
        self.status.is_informational() || self.status == StatusCode::NO_CONTENT || self.status == StatusCode::NOT_MODIFIED
    }

    /// A shallow copy without bodies, used when stashing `prior_response`/
    /// `network_response`/`cache_response` links (the nested responses do
    /// not themselves carry a readable body, per OkHttp-style design).
    pub(crate) fn strip_body(&self) -> Response {
        Response {
            request: self.request.clone(),
            protocol: self.protocol,
            status: self.status,
            status_message: self.status_message.clone(),
            headers: self.headers.clone(),
            body: None,
            handshake: self.handshake.clone(),
            sent_at_millis: self.sent_at_millis,
            received_at_millis: self.received_at_millis,
            cache_response: self.cache_response.clone(),
            network_response: self.network_response.clone(),
            prior_response: self.prior_response.clone(),
        }
    }
}

impl Clone for Response {
    fn clone(&self) -> Self {
        self.strip_body()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("protocol", &self.protocol)
            .field("status", &self.status)
            .field("url", &self.request.url())
            .finish()
    }
}

/// Builds a [`Response`].
pub struct ResponseBuilder {
    request: Arc<Request>,
    protocol: Protocol,
    status: StatusCode,
    status_message: String,
    headers: Headers,
    body: Option<ResponseBody>,
    handshake: Option<Handshake>,
    sent_at_millis: i64,
    received_at_millis: i64,
    cache_response: Option<Box<Response>>,
    network_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
}

impl ResponseBuilder {
    pub fn status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = message.into();
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn timing(mut self, sent_at_millis: i64, received_at_millis: i64) -> Self {
        self.sent_at_millis = sent_at_millis;
        self.received_at_millis = received_at_millis;
        self
    }

    pub fn cache_response(mut self, response: Response) -> Self {
        self.cache_response = Some(Box::new(response.strip_body()));
        self
    }

    pub fn network_response(mut self, response: Response) -> Self {
        self.network_response = Some(Box::new(response.strip_body()));
        self
    }

    pub fn prior_response(mut self, response: Response) -> Self {
        self.prior_response = Some(Box::new(response.strip_body()));
        self
    }

    pub fn build(self) -> Response {
        Response {
            request: self.request,
            protocol: self.protocol,
            status: self.status,
            status_message: self.status_message,
            headers: self.headers,
            body: self.body,
            handshake: self.handshake,
            sent_at_millis: self.sent_at_millis,
            received_at_millis: self.received_at_millis,
            cache_response: self.cache_response,
            network_response: self.network_response,
            prior_response: self.prior_response,
        }
    }
}
