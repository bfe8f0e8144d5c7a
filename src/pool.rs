//! Connection pool (spec.md SS4.3 "Connection reuse").
//!
//! Grounded on the teacher's `client/pool.rs` `Pool<T>`: a mutex-guarded
//! list of idle/shared connections, pruned by a background idle-timeout
//! sweep rather than on every checkout. HTTP/1.1 connections are handed
//! out exclusively (checked back in when the exchange finishes); HTTP/2
//! connections are handed out by reference and shared across concurrent
//! exchanges up to the peer's stream limit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::RealConnection;
use crate::route::{Address, Protocol, Route};

/// Tuning for the pool (spec.md SS6 "connection pool options").
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_idle_connections: usize,
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle_connections: 5,
            keep_alive: Duration::from_secs(5 * 60),
        }
    }
}

/// Holds every live [`RealConnection`] this client has established,
/// regardless of whether it is presently idle, in use, or shared.
pub struct Pool {
    config: PoolConfig,
    connections: Mutex<Vec<Arc<RealConnection>>>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Pool {
        Pool {
            config,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Find a pool-compatible connection that can still accept an
    /// exchange: for HTTP/1.1, one with no outstanding transmitter; for
    /// HTTP/2, any connection not yet GOAWAY'd, shared across callers.
    pub fn acquire(&self, address: &Address) -> Option<Arc<RealConnection>> {
        let connections = self.connections.lock().unwrap();
        let candidate = connections.iter().find(|c| {
            c.route.address.is_pool_compatible_with(address)
                && c.is_healthy()
                && match c.protocol {
                    Protocol::Http11 => c.transmitter_count() == 0,
                    Protocol::H2 => true,
                }
        })?;
        candidate.acquire_transmitter();
        Some(candidate.clone())
    }

    /// Adds a newly connected `RealConnection` to the pool, already
    /// holding one transmitter for the exchange that triggered the
    /// connect.
    pub fn put(&self, connection: Arc<RealConnection>) {
        connection.acquire_transmitter();
        self.connections.lock().unwrap().push(connection);
    }

    /// Returns a transmitter after an exchange completes. HTTP/1.1
    /// connections become eligible for reuse immediately; HTTP/2
    /// connections remain shared regardless.
    pub fn release(&self, connection: &Arc<RealConnection>) {
        if connection.release_transmitter() == 0 {
            connection.mark_idle_now();
        }
    }

    /// Every known route, most-recently-used last, used to record a
    /// successful route for the planner's "prefer last successful" rule.
    pub fn record_route_success(&self, planner: &crate::route::RoutePlanner, route: &Route) {
        planner.record_success(route);
    }

    /// Evicts connections that are closed, over the per-address idle cap,
    /// or idle longer than `keep_alive`. Returns how long to wait before
    /// the next sweep is needed, or `None` if the pool is empty.
    pub fn prune(&self) -> Option<Duration> {
        let mut connections = self.connections.lock().unwrap();
        connections.retain(|c| c.is_healthy() || c.transmitter_count() > 0);

        let mut idle_indices: Vec<usize> = connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.transmitter_count() == 0)
            .map(|(i, _)| i)
            .collect();
        idle_indices.sort_by_key(|&i| std::cmp::Reverse(connections[i].idle_duration()));

        let mut next_eviction = None;
        let mut kept_idle = 0usize;
        let mut to_close = Vec::new();
        for &i in &idle_indices {
            let idle = connections[i].idle_duration();
            if idle >= self.config.keep_alive || kept_idle >= self.config.max_idle_connections {
                to_close.push(i);
            } else {
                kept_idle += 1;
                let remaining = self.config.keep_alive - idle;
                next_eviction = Some(next_eviction.map_or(remaining, |n: Duration| n.min(remaining)));
            }
        }
        for &i in to_close.iter().rev() {
            connections[i].mark_closed();
        }
        connections.retain(|c| !c.is_closed() || c.transmitter_count() > 0);

        if next_eviction.is_none() && !connections.is_empty() {
            next_eviction = Some(Duration::from_secs(1));
        }
        next_eviction
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn idle_connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.transmitter_count() == 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{Proxy, SocketOptions};
    use crate::tls::TlsConfig;
    use crate::url::Scheme;
    use std::net::TcpListener;

    fn local_route() -> Route {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::mem::forget(listener);
        let address = Address {
            host: "127.0.0.1".to_owned(),
            port,
            scheme: Scheme::Http,
            dns: Arc::new(crate::dns::SystemDns),
            socket_options: SocketOptions::default(),
            tls_config: None::<TlsConfig>,
            protocols: vec![Protocol::Http11],
            proxy_selector: Arc::new(crate::route::StaticProxy(Proxy::Direct)),
        };
        Route {
            socket_address: std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port),
            address,
            proxy: Proxy::Direct,
        }
    }

    #[test]
    fn http1_connection_is_exclusive() {
        let pool = Pool::new(PoolConfig::default());
        let route = local_route();
        let tcp = std::net::TcpStream::connect(route.socket_address).unwrap_or_else(|_| {
            panic!("expected local listener to accept");
        });
        let conn = Arc::new(RealConnection::new_plain(tcp, Protocol::Http11, route.clone()));
        pool.put(conn.clone());
        assert!(pool.acquire(&route.address).is_none());
        pool.release(&conn);
        assert!(pool.acquire(&route.address).is_some());
    }
}
