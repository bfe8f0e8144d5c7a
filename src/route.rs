//! Route data model and planning (SPEC_FULL.md SS4.3).
//!
//! `Address` aggregates everything that determines whether two routes are
//! pool-compatible; `Route` adds the concrete socket address and proxy for
//! one connect attempt. Grounded on the teacher's `HttpConnector` field set
//! (`client/connect/http.rs`: `happy_eyeballs_timeout`, `set_keepalive`,
//! `set_nodelay`, `set_connect_timeout`), generalized from a single TCP
//! connector into a full route planner.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::dns::{interleave, Dns, SystemDns};
use crate::tls::TlsConfig;
use crate::url::Scheme;

/// How to reach the origin: directly, or via an HTTP CONNECT / SOCKS proxy.
#[derive(Clone)]
pub enum Proxy {
    Direct,
    Http { host: String, port: u16 },
    Socks { host: String, port: u16 },
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy::Direct => f.write_str("Proxy::Direct"),
            Proxy::Http { host, port } => write!(f, "Proxy::Http({}:{})", host, port),
            Proxy::Socks { host, port } => write!(f, "Proxy::Socks({}:{})", host, port),
        }
    }
}

/// Selects a proxy for a given URL. `None` from `select` means "no proxy
/// configured for this URL" (falls through to direct).
pub trait ProxySelector: Send + Sync {
    fn select(&self, scheme: Scheme, host: &str) -> Proxy;
}

/// Always resolves to a single, explicitly configured proxy (or direct).
#[derive(Clone)]
pub struct StaticProxy(pub Proxy);

impl ProxySelector for StaticProxy {
    fn select(&self, _scheme: Scheme, _host: &str) -> Proxy {
        self.0.clone()
    }
}

/// Socket-level tuning applied to every connection to this address
/// (SPEC_FULL.md SS12, via `socket2`).
#[derive(Clone, Copy, Debug)]
pub struct SocketOptions {
    pub tcp_nodelay: bool,
    pub keepalive: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            tcp_nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Everything that determines pool compatibility between two connections
/// (spec.md SS3: "Two routes sharing the same address are pool-compatible").
#[derive(Clone)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub dns: Arc<dyn Dns>,
    pub socket_options: SocketOptions,
    pub tls_config: Option<TlsConfig>,
    pub protocols: Vec<Protocol>,
    pub proxy_selector: Arc<dyn ProxySelector>,
}

/// Protocols the client is willing to negotiate, in preference order
/// (spec.md SS6 "protocol list (ordered preference)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http11,
    H2,
}

impl Address {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Address {
        let host = host.into();
        Address {
            host,
            port,
            scheme,
            dns: Arc::new(SystemDns),
            socket_options: SocketOptions::default(),
            tls_config: if scheme.is_tls() {
                Some(TlsConfig::default())
            } else {
                None
            },
            protocols: vec![Protocol::H2, Protocol::Http11],
            proxy_selector: Arc::new(StaticProxy(Proxy::Direct)),
        }
    }

    /// Two addresses are pool-compatible iff host, port, scheme and the
    /// effective TLS configuration match (spec.md SS3).
    pub fn is_pool_compatible_with(&self, other: &Address) -> bool {
        self.host == other.host && self.port == other.port && self.scheme == other.scheme
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}://{}:{})", if self.scheme.is_tls() { "tls" } else { "tcp" }, self.host, self.port)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.is_pool_compatible_with(other)
    }
}

/// One concrete attempt target: an address, a resolved socket address, and
/// the proxy used to reach it.
#[derive(Clone)]
pub struct Route {
    pub address: Address,
    pub socket_address: SocketAddr,
    pub proxy: Proxy,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Route({} via {:?} proxy={:?})", self.socket_address, self.address, self.proxy)
    }
}

/// Plans candidate routes for an address: proxy resolution, DNS, IP-family
/// interleaving, and "previously successful route first" ordering
/// (spec.md SS4.3).
pub struct RoutePlanner {
    last_successful: std::sync::Mutex<Option<SocketAddr>>,
}

impl RoutePlanner {
    pub fn new() -> RoutePlanner {
        RoutePlanner {
            last_successful: std::sync::Mutex::new(None),
        }
    }

    /// Produce the ordered candidate route sequence for `address`.
    pub fn plan(&self, address: &Address) -> Result<Vec<Route>, crate::error::Error> {
        let proxy = address.proxy_selector.select(address.scheme, &address.host);

        let (resolve_host, resolve_port) = match &proxy {
            Proxy::Direct | Proxy::Socks { .. } => (address.host.clone(), address.port),
            Proxy::Http { host, port } => (host.clone(), *port),
        };

        let ips: Vec<IpAddr> = if let Ok(direct) = resolve_host.parse::<IpAddr>() {
            vec![direct]
        } else {
            address.dns.lookup(&resolve_host)?
        };
        let ips = interleave(ips);

        let mut routes: Vec<Route> = ips
            .into_iter()
            .map(|ip| Route {
                address: address.clone(),
                socket_address: SocketAddr::new(ip, resolve_port),
                proxy: proxy.clone(),
            })
            .collect();

        let last = *self.last_successful.lock().unwrap();
        if let Some(last) = last {
            if let Some(pos) = routes.iter().position(|r| r.socket_address == last) {
                let preferred = routes.remove(pos);
                routes.insert(0, preferred);
            }
        }

        Ok(routes)
    }

    pub fn record_success(&self, route: &Route) {
        *self.last_successful.lock().unwrap() = Some(route.socket_address);
    }
}

impl Default for RoutePlanner {
    fn default() -> Self {
        RoutePlanner::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_direct_ip_literal() {
        let addr = Address::new(Scheme::Http, "127.0.0.1", 80);
        let planner = RoutePlanner::new();
        let routes = planner.plan(&addr).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].socket_address.port(), 80);
    }

    #[test]
    fn prefers_last_successful_route() {
        let addr = Address::new(Scheme::Http, "127.0.0.1", 80);
        let planner = RoutePlanner::new();
        let routes = planner.plan(&addr).unwrap();
        planner.record_success(&routes[0]);
        let routes2 = planner.plan(&addr).unwrap();
        assert_eq!(routes2[0].socket_address, routes[0].socket_address);
    }
}
