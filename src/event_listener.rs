//! Call lifecycle observation (spec.md SS6 "event listener"; ambient
//! logging per SPEC_FULL.md SS11 — `tracing` covers internal diagnostics,
//! this trait covers user-observable lifecycle events).

use std::net::SocketAddr;
use std::time::Duration;

use crate::route::Route;
use crate::url::Url;

/// Observes a call's lifecycle. All methods have no-op defaults; implement
/// only the ones of interest. Every callback must be non-blocking — it
/// runs on the dispatcher or connection thread driving the call.
pub trait EventListener: Send + Sync {
    fn call_start(&self, _url: &Url) {}
    fn dns_start(&self, _hostname: &str) {}
    fn dns_end(&self, _hostname: &str, _addresses: &[SocketAddr]) {}
    fn connect_start(&self, _route: &Route) {}
    fn connect_end(&self, _route: &Route, _duration: Duration) {}
    fn connect_failed(&self, _route: &Route, _duration: Duration) {}
    fn connection_acquired(&self, _reused: bool) {}
    fn connection_released(&self) {}
    fn cache_hit(&self, _url: &Url) {}
    fn cache_miss(&self, _url: &Url) {}
    fn cache_conditional_hit(&self, _url: &Url) {}
    fn retry(&self, _url: &Url, _attempt: u32) {}
    fn redirect(&self, _from: &Url, _to: &Url) {}
    fn call_end(&self) {}
    fn call_failed(&self, _error: &crate::error::Error) {}
}

/// A listener that does nothing; the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}
