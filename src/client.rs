//! Client configuration and entry point (spec.md SS6 "User surface").
//!
//! `ClientConfig` is the single immutable value every interceptor and
//! subsystem reads from; `ClientBuilder` is the typed setter surface over
//! it, consumed once by `ClientBuilder::build()` — mirroring the
//! teacher's own split between a builder type and the frozen config it
//! produces.

use std::sync::Arc;
use std::time::Duration;

use crate::authenticator::{Authenticator, NoAuthenticator};
use crate::cache::ResponseCache;
use crate::connect::Connector;
use crate::cookie::{CookieJar, InMemoryCookieJar};
use crate::dispatcher::Dispatcher;
use crate::dns::{Dns, SystemDns};
use crate::error::Error;
use crate::event_listener::{EventListener, NoopEventListener};
use crate::exchange::Timeouts;
use crate::interceptor::{self, Interceptor};
use crate::pool::{Pool, PoolConfig};
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::route::{Protocol, ProxySelector, RoutePlanner, SocketOptions, StaticProxy};
use crate::tls::TlsConfig;
use crate::url::Url;
use crate::websocket::{WebSocket, WebSocketListener};

/// The frozen configuration shared by every call. Built once via
/// [`ClientBuilder`], never mutated afterward — reads from many threads
/// never need to synchronize on it.
pub struct ClientConfig {
    pub(crate) timeouts: Timeouts,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) connect_timeout: Duration,
    pub(crate) ping_interval: Option<Duration>,
    pub(crate) retry_on_connection_failure: bool,
    pub(crate) follow_redirects: bool,
    pub(crate) follow_ssl_redirects: bool,
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) socket_options: SocketOptions,
    pub(crate) tls_config: TlsConfig,
    pub(crate) dns: Arc<dyn Dns>,
    pub(crate) proxy_selector: Arc<dyn ProxySelector>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) proxy_authenticator: Arc<dyn Authenticator>,
    pub(crate) cookie_jar: Arc<dyn CookieJar>,
    pub(crate) cache: Option<Arc<ResponseCache>>,
    pub(crate) event_listener: Arc<dyn EventListener>,
    pub(crate) user_agent: String,
    pub(crate) application_interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) network_interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) pool: Arc<Pool>,
    pub(crate) route_planner: Arc<RoutePlanner>,
    pub(crate) connector: Arc<Connector>,
}

/// Builds a [`Client`]. Setters are taken by value and returned, in the
/// teacher's own builder style (`hyper::client::Builder`).
pub struct ClientBuilder {
    timeouts: Timeouts,
    call_timeout: Option<Duration>,
    connect_timeout: Duration,
    ping_interval: Option<Duration>,
    retry_on_connection_failure: bool,
    follow_redirects: bool,
    follow_ssl_redirects: bool,
    protocols: Vec<Protocol>,
    socket_options: SocketOptions,
    tls_config: TlsConfig,
    dns: Arc<dyn Dns>,
    proxy_selector: Arc<dyn ProxySelector>,
    authenticator: Arc<dyn Authenticator>,
    proxy_authenticator: Arc<dyn Authenticator>,
    cookie_jar: Arc<dyn CookieJar>,
    cache: Option<Arc<ResponseCache>>,
    event_listener: Arc<dyn EventListener>,
    user_agent: String,
    application_interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    pool_config: PoolConfig,
    max_concurrent_calls: usize,
    max_concurrent_per_host: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            timeouts: Timeouts::default(),
            call_timeout: None,
            connect_timeout: Duration::from_secs(10),
            ping_interval: None,
            retry_on_connection_failure: true,
            follow_redirects: true,
            follow_ssl_redirects: false,
            protocols: vec![Protocol::H2, Protocol::Http11],
            socket_options: SocketOptions::default(),
            tls_config: TlsConfig::default(),
            dns: Arc::new(SystemDns),
            proxy_selector: Arc::new(StaticProxy(crate::route::Proxy::Direct)),
            authenticator: Arc::new(NoAuthenticator),
            proxy_authenticator: Arc::new(NoAuthenticator),
            cookie_jar: Arc::new(InMemoryCookieJar::new()),
            cache: None,
            event_listener: Arc::new(NoopEventListener),
            user_agent: format!("waypoint/{}", env!("CARGO_PKG_VERSION")),
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            pool_config: PoolConfig::default(),
            max_concurrent_calls: 64,
            max_concurrent_per_host: 5,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn read_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.read = dur;
        self
    }

    pub fn write_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.write = dur;
        self
    }

    pub fn connect_timeout(mut self, dur: Duration) -> Self {
        self.connect_timeout = dur;
        self
    }

    pub fn call_timeout(mut self, dur: Duration) -> Self {
        self.call_timeout = Some(dur);
        self
    }

    pub fn ping_interval(mut self, dur: Duration) -> Self {
        self.ping_interval = Some(dur);
        self
    }

    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.follow_ssl_redirects = follow;
        self
    }

    /// Ordered protocol preference (SS6 "protocol list (ordered
    /// preference)"). Must include at least one protocol.
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.tls_config = config;
        self
    }

    pub fn dns(mut self, dns: impl Dns + 'static) -> Self {
        self.dns = Arc::new(dns);
        self
    }

    pub fn proxy_selector(mut self, selector: impl ProxySelector + 'static) -> Self {
        self.proxy_selector = Arc::new(selector);
        self
    }

    pub fn proxy(mut self, proxy: crate::route::Proxy) -> Self {
        self.proxy_selector = Arc::new(StaticProxy(proxy));
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn proxy_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.proxy_authenticator = Arc::new(authenticator);
        self
    }

    pub fn cookie_jar(mut self, jar: impl CookieJar + 'static) -> Self {
        self.cookie_jar = Arc::new(jar);
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn event_listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.event_listener = Arc::new(listener);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn add_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.application_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn add_network_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.network_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn max_idle_connections(mut self, n: usize) -> Self {
        self.pool_config.max_idle_connections = n;
        self
    }

    pub fn keep_alive(mut self, dur: Duration) -> Self {
        self.pool_config.keep_alive = dur;
        self
    }

    pub fn max_concurrent_calls(mut self, n: usize) -> Self {
        self.max_concurrent_calls = n;
        self
    }

    pub fn max_concurrent_per_host(mut self, n: usize) -> Self {
        self.max_concurrent_per_host = n;
        self
    }

    pub fn build(self) -> Client {
        let config = Arc::new(ClientConfig {
            timeouts: self.timeouts,
            call_timeout: self.call_timeout,
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
            retry_on_connection_failure: self.retry_on_connection_failure,
            follow_redirects: self.follow_redirects,
            follow_ssl_redirects: self.follow_ssl_redirects,
            protocols: self.protocols,
            socket_options: self.socket_options,
            tls_config: self.tls_config,
            dns: self.dns,
            proxy_selector: self.proxy_selector,
            authenticator: self.authenticator,
            proxy_authenticator: self.proxy_authenticator,
            cookie_jar: self.cookie_jar,
            cache: self.cache,
            event_listener: self.event_listener,
            user_agent: self.user_agent,
            application_interceptors: self.application_interceptors,
            network_interceptors: self.network_interceptors,
            pool: Arc::new(Pool::new(self.pool_config)),
            route_planner: Arc::new(RoutePlanner::new()),
            connector: Arc::new(Connector {
                connect_timeout: self.connect_timeout,
            }),
        });
        let interceptors = interceptor::default_chain(&config);
        let dispatcher = Dispatcher::new(self.max_concurrent_calls, self.max_concurrent_per_host);
        Client {
            config,
            interceptors: Arc::new(interceptors),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// The user-facing client (spec.md SS4.1 "Call"). Cheap to clone — every
/// field is an `Arc`, matching the teacher's `Client<C, B>` handle shape.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    dispatcher: Arc<Dispatcher>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn new() -> Client {
        ClientBuilder::new().build()
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        Request::builder(url)
    }

    /// Starts a one-shot call. The returned [`Call`] executes or enqueues
    /// exactly once (spec.md SS4.1 "a call is a one-shot execution").
    pub fn call(&self, request: Request) -> crate::call::Call {
        crate::call::Call::new(request, self.config.clone(), self.interceptors.clone(), self.dispatcher.clone())
    }

    /// Convenience for the common case: build and execute in one step.
    pub fn execute(&self, request: Request) -> Result<Response, Error> {
        self.call(request).execute()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Evicts idle connections past their keep-alive, to be driven by a
    /// background timer; returns the delay until the next sweep is due.
    pub fn prune_connections(&self) -> Option<Duration> {
        self.config.pool.prune()
    }

    /// Performs the WebSocket opening handshake against `request.url()`
    /// (a `ws`/`wss` URL) and hands the upgraded connection to a
    /// background I/O thread, which drives `listener`'s callbacks until
    /// the connection closes (spec.md §4.7).
    pub fn new_web_socket(&self, request: Request, listener: impl WebSocketListener + 'static) -> Result<Arc<WebSocket>, Error> {
        WebSocket::connect(self.config.clone(), request, Arc::new(listener))
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}
