//! The RFC 6455 §4 opening handshake: a GET dialed and written directly
//! over a freshly connected carrier, bypassing the normal interceptor
//! chain entirely (cache/retry/redirect/bridge don't apply to a protocol
//! upgrade) — grounded on the same `h1::write_request_head`/
//! `h1::read_response_head` pair the ordinary HTTP/1 exchange path uses,
//! and on `connect::Connector`/`route::RoutePlanner` for dialing.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::client::ClientConfig;
use crate::connection::Carrier;
use crate::error::Error;
use crate::h1;
use crate::header::Headers;
use crate::request::Request;
use crate::route::{Address, Protocol};
use crate::websocket::deflate::{self, DeflateConfig};

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Dials `request.url()` directly and performs the opening handshake,
/// returning the raw carrier (now solely owned by the WebSocket) plus the
/// negotiated `permessage-deflate` parameters, if any.
pub fn open(config: &ClientConfig, request: &Request) -> Result<(Carrier, Option<DeflateConfig>), Error> {
    if request.headers().contains("sec-websocket-extensions") {
        return Err(Error::protocol(ExplicitExtensionsHeader));
    }

    let address = address_for(config, request);
    let routes = config.route_planner.plan(&address)?;
    let (connection, route) = config.connector.connect_any(&routes)?;
    config.route_planner.record_success(&route);

    let key = generate_key();
    let headers = build_headers(request, &key)?;

    let mut carrier = connection.into_carrier()?;
    h1::write_request_head(&mut carrier, &Method::GET, request.url(), &headers).map_err(Error::io)?;
    carrier.flush().map_err(Error::io)?;

    let head = h1::read_response_head(&mut carrier)?;
    if head.status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::protocol(UnexpectedStatus(head.status.as_u16())));
    }
    let upgraded_to_websocket = head.headers.get("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    let connection_upgraded = head.headers.get("connection").map(|v| v.to_ascii_lowercase().contains("upgrade")).unwrap_or(false);
    if !upgraded_to_websocket || !connection_upgraded {
        return Err(Error::protocol(MissingUpgradeHeaders));
    }

    let accept = head.headers.get("sec-websocket-accept").ok_or_else(|| Error::protocol(MissingAccept))?;
    if accept != expected_accept(&key) {
        return Err(Error::protocol(AcceptMismatch));
    }

    let deflate_config = match head.headers.get("sec-websocket-extensions") {
        Some(value) => deflate::negotiate(value)?,
        None => None,
    };

    Ok((carrier, deflate_config))
}

/// Only HTTP/1.1 is offered — a WebSocket upgrade can't ride an ALPN-
/// negotiated `h2` connection — and `tls_config`'s ALPN list is narrowed
/// to match, so the handshake never lands on a connection this module
/// can't detach a plain carrier from.
fn address_for(config: &ClientConfig, request: &Request) -> Address {
    let url = request.url();
    let scheme = url.scheme().http_equivalent();
    let mut address = Address::new(scheme, url.host(), url.port());
    address.dns = config.dns.clone();
    address.socket_options = config.socket_options;
    address.proxy_selector = config.proxy_selector.clone();
    address.protocols = vec![Protocol::Http11];
    if let Some(tls_config) = &address.tls_config {
        address.tls_config = Some(tls_config.clone().with_alpn_protocols(vec![b"http/1.1".to_vec()]));
    }
    address
}

fn build_headers(request: &Request, key: &str) -> Result<Headers, Error> {
    let mut headers = request.headers().clone();
    headers.set(http::header::HOST, HeaderValue::from_str(&request.url().host_header()).map_err(Error::protocol)?);
    headers.set(http::header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.set(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.set(
        HeaderName::from_static("sec-websocket-key"),
        HeaderValue::from_str(key).map_err(Error::protocol)?,
    );
    headers.set(HeaderName::from_static("sec-websocket-version"), HeaderValue::from_static("13"));
    headers.set(
        HeaderName::from_static("sec-websocket-extensions"),
        HeaderValue::from_static("permessage-deflate; client_max_window_bits"),
    );
    Ok(headers)
}

fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    BASE64.encode(raw)
}

fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[derive(Debug)]
struct ExplicitExtensionsHeader;

impl std::fmt::Display for ExplicitExtensionsHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sec-WebSocket-Extensions is negotiated by the client, not set by the caller")
    }
}

impl std::error::Error for ExplicitExtensionsHeader {}

#[derive(Debug)]
struct UnexpectedStatus(u16);

impl std::fmt::Display for UnexpectedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected 101 Switching Protocols, got {}", self.0)
    }
}

impl std::error::Error for UnexpectedStatus {}

#[derive(Debug)]
struct MissingUpgradeHeaders;

impl std::fmt::Display for MissingUpgradeHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("101 response missing Upgrade: websocket / Connection: Upgrade")
    }
}

impl std::error::Error for MissingUpgradeHeaders {}

#[derive(Debug)]
struct MissingAccept;

impl std::fmt::Display for MissingAccept {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("101 response missing Sec-WebSocket-Accept")
    }
}

impl std::error::Error for MissingAccept {}

#[derive(Debug)]
struct AcceptMismatch;

impl std::fmt::Display for AcceptMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sec-WebSocket-Accept did not match the expected digest of our key")
    }
}

impl std::error::Error for AcceptMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_the_rfc6455_example_accept() {
        // RFC 6455 §1.3's worked example.
        assert_eq!(expected_accept("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
