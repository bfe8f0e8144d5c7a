#![deny(missing_debug_implementations)]

//! # waypoint
//!
//! A synchronous HTTP/1.1, HTTP/2, and WebSocket client engine.
//!
//! waypoint drives blocking sockets directly rather than wrapping an async
//! runtime: every [`Call`](call::Call) either blocks the calling thread in
//! [`Call::execute`](call::Call::execute) or hands itself to the client's
//! bounded [`Dispatcher`](dispatcher::Dispatcher) via
//! [`Call::enqueue`](call::Call::enqueue). Requests flow through a small,
//! fixed [interceptor](interceptor) chain — retry/redirect, header
//! bridging, disk response caching, connection acquisition, then the wire
//! codec itself — mirroring OkHttp's `RealInterceptorChain` more closely
//! than the teacher's own `tower`-`Service` stack, which this crate's
//! blocking design has no use for.
//!
//! ## Modules
//!
//! - [`client`]: [`Client`]/[`ClientBuilder`], the user-facing entry point.
//! - [`request`]/[`response`]: the data model exchanged with the wire.
//! - [`body`]: request/response payload abstraction.
//! - [`interceptor`]: the Chain of Responsibility driving every call.
//! - [`pool`]/[`route`]/[`connect`]/[`connection`]: connection reuse and
//!   establishment (SPEC_FULL.md SS4.3/SS4.4).
//! - [`h1`]/[`h2`]: the two wire codecs.
//! - [`cache`]: the on-disk, journaled response cache.
//! - [`websocket`]: RFC 6455 framing over an upgraded connection.
//! - [`tls`]/[`dns`]/[`cookie`]/[`authenticator`]/[`event_listener`]:
//!   pluggable collaborators configured on [`ClientBuilder`].

pub mod authenticator;
pub mod body;
pub mod cache;
pub mod call;
pub mod client;
pub mod connect;
pub mod connection;
pub mod cookie;
pub mod dispatcher;
pub mod dns;
pub mod error;
pub mod event_listener;
pub mod exchange;
pub mod h1;
pub mod h2;
pub mod header;
pub mod interceptor;
pub mod pool;
pub mod public_suffix;
pub mod request;
pub mod response;
pub mod route;
pub mod tls;
pub mod url;
pub mod websocket;

pub use authenticator::Authenticator;
pub use body::Body;
pub use cache::ResponseCache;
pub use call::{Call, Cancellation};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use cookie::{Cookie, CookieJar};
pub use error::{Error, Kind as ErrorKind};
pub use event_listener::EventListener;
pub use header::Headers;
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBody};
pub use url::Url;
pub use websocket::{Message, WebSocket, WebSocketListener};
