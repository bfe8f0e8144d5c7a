//! The interceptor chain (spec.md SS4.1, SS9 "Chain of Responsibility").
//!
//! Grounded on the teacher's `client/middleware` tower `Service` stack,
//! reworked from async `Service::call` into a blocking `Chain::proceed`
//! modeled after OkHttp's `RealInterceptorChain`: each interceptor takes
//! ownership of `chain`'s request, does its work, and calls
//! `chain.proceed(request)` to hand off to the next link. Recursion depth
//! is bounded by the fixed, small interceptor count (five to seven),
//! never by retry or redirect count — those loop *within*
//! `retry_and_follow_up`, not by recursing.

pub mod bridge;
pub mod call_server;
pub mod cache;
pub mod connect;
pub mod retry_and_follow_up;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::client::ClientConfig;
use crate::connection::RealConnection;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// One link in the chain. Implementors call `chain.take_request()` to get
/// an owned request to inspect or rebuild, then call `chain.proceed(..)`
/// exactly once — except the terminal interceptor (`call_server`), which
/// produces the `Response` directly instead.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error>;
}

/// The shared, per-call state threaded through every interceptor.
pub struct Chain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    index: usize,
    request: Option<Request>,
    client: &'a ClientConfig,
    cancel: Arc<AtomicBool>,
    call_start: Instant,
    connection: Option<Arc<RealConnection>>,
}

impl<'a> Chain<'a> {
    /// Drives `request` through the whole chain, returning whatever the
    /// last interceptor (`call_server`) returns.
    pub fn start(
        interceptors: &'a [Arc<dyn Interceptor>],
        request: Request,
        client: &'a ClientConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<Response, Error> {
        if interceptors.is_empty() {
            panic!("interceptor chain must end in a terminal interceptor");
        }
        let mut chain = Chain {
            interceptors,
            index: 1,
            request: Some(request),
            client,
            cancel,
            call_start: Instant::now(),
            connection: None,
        };
        interceptors[0].intercept(&mut chain)
    }

    /// Peek the current request without taking ownership.
    pub fn request(&self) -> &Request {
        self.request.as_ref().expect("request already taken from this chain")
    }

    /// Take ownership of the current request — the only way to get at a
    /// body that cannot be cloned (SS4.1 "one-shot bodies").
    pub fn take_request(&mut self) -> Request {
        self.request.take().expect("request already taken from this chain")
    }

    pub fn client(&self) -> &ClientConfig {
        self.client
    }

    pub fn cancel_flag(&self) -> &Arc<AtomicBool> {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn call_start(&self) -> Instant {
        self.call_start
    }

    pub fn connection(&self) -> Option<&Arc<RealConnection>> {
        self.connection.as_ref()
    }

    /// Hands `request` to the next interceptor, carrying this chain's
    /// acquired connection forward unchanged.
    pub fn proceed(&self, request: Request) -> Result<Response, Error> {
        self.proceed_inner(request, self.connection.clone())
    }

    /// Like `proceed`, but also attaches a newly acquired connection for
    /// downstream interceptors (used by `connect`).
    pub fn proceed_with_connection(&self, request: Request, connection: Arc<RealConnection>) -> Result<Response, Error> {
        self.proceed_inner(request, Some(connection))
    }

    fn proceed_inner(&self, request: Request, connection: Option<Arc<RealConnection>>) -> Result<Response, Error> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::canceled());
        }
        if self.index >= self.interceptors.len() {
            panic!("the terminal interceptor must not call proceed");
        }
        let mut next = Chain {
            interceptors: self.interceptors,
            index: self.index + 1,
            request: Some(request),
            client: self.client,
            cancel: self.cancel.clone(),
            call_start: self.call_start,
            connection,
        };
        self.interceptors[self.index].intercept(&mut next)
    }
}

/// Assembles the default interceptor pipeline in wire order (spec.md
/// SS4.1): user interceptors, then retry/follow-up, bridge, cache,
/// connect, user network interceptors, call-server.
pub fn default_chain(client: &ClientConfig) -> Vec<Arc<dyn Interceptor>> {
    let mut chain: Vec<Arc<dyn Interceptor>> = Vec::new();
    chain.extend(client.application_interceptors.iter().cloned());
    chain.push(Arc::new(retry_and_follow_up::RetryAndFollowUpInterceptor));
    chain.push(Arc::new(bridge::BridgeInterceptor));
    chain.push(Arc::new(cache::CacheInterceptor));
    chain.push(Arc::new(connect::ConnectInterceptor));
    chain.extend(client.network_interceptors.iter().cloned());
    chain.push(Arc::new(call_server::CallServerInterceptor));
    chain
}
