//! Connect interceptor: acquires the physical connection an exchange will
//! run over (spec.md SS4.1 point 5, SS4.3 "Connection reuse").
//!
//! Grounded on the teacher's `client/connect` + `client/pool.rs` split:
//! first check the pool for a reusable connection to an equivalent
//! [`Address`], otherwise plan routes and dial a fresh one via
//! [`Connector::connect_any`] (SS4.3/SS4.4's staggered fast-fallback).
//! This interceptor does not itself retry on connect failure — that is
//! `retry_and_follow_up`'s job, one layer up the chain.

use std::sync::Arc;
use std::time::Instant;

use crate::client::ClientConfig;
use crate::connection::RealConnection;
use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::response::Response;
use crate::route::Address;
use crate::url::Url;

pub struct ConnectInterceptor;

impl Interceptor for ConnectInterceptor {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error> {
        let request = chain.take_request();
        let client = chain.client();
        let address = address_for(client, request.url());

        let (connection, reused) = match client.pool.acquire(&address) {
            Some(connection) => (connection, true),
            None => (dial(client, &address)?, false),
        };
        client.event_listener.connection_acquired(reused);

        let result = chain.proceed_with_connection(request, connection.clone());
        client.pool.release(&connection);
        client.event_listener.connection_released();
        result
    }
}

/// Resolves candidate routes and connects the first one that succeeds,
/// adding it to the pool already holding a transmitter for this exchange.
fn dial(client: &ClientConfig, address: &Address) -> Result<Arc<RealConnection>, Error> {
    client.event_listener.dns_start(&address.host);
    let routes = client.route_planner.plan(address)?;
    client.event_listener.dns_end(&address.host, &[]);

    let started = Instant::now();
    client.event_listener.connect_start(&routes[0]);
    let (connection, route) = client.connector.connect_any(&routes).map_err(|e| {
        client.event_listener.connect_failed(&routes[0], started.elapsed());
        e
    })?;
    client.event_listener.connect_end(&route, started.elapsed());
    client.route_planner.record_success(&route);

    let connection = Arc::new(connection);
    client.pool.put(connection.clone());
    Ok(connection)
}

fn address_for(client: &ClientConfig, url: &Url) -> Address {
    Address {
        host: url.host().to_owned(),
        port: url.port(),
        scheme: url.scheme(),
        dns: client.dns.clone(),
        socket_options: client.socket_options,
        tls_config: if url.scheme().is_tls() { Some(client.tls_config.clone()) } else { None },
        protocols: client.protocols.clone(),
        proxy_selector: client.proxy_selector.clone(),
    }
}
