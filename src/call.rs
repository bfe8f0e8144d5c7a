//! A one-shot call: either a blocking `execute()` or a dispatcher-backed
//! `enqueue(callback)` (spec.md SS4.1).
//!
//! Rust's ownership already gives the "executed exactly once" invariant
//! the teacher's `RealCall` enforces with a runtime flag: `execute`/
//! `enqueue` both take `self` by value, so calling either a second time is
//! a compile error rather than a runtime `IllegalStateException`.
//! Cancellation still needs a handle obtainable before that move, hence
//! [`Cancellation`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::ClientConfig;
use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;

/// A cloneable cancellation switch for a [`Call`], obtainable before the
/// call is consumed by `execute`/`enqueue` (SS4.1 "cancel() is idempotent").
#[derive(Clone)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Call {
    request: Request,
    config: Arc<ClientConfig>,
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    dispatcher: Arc<crate::dispatcher::Dispatcher>,
    cancel: Arc<AtomicBool>,
}

impl Call {
    pub(crate) fn new(
        request: Request,
        config: Arc<ClientConfig>,
        interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
        dispatcher: Arc<crate::dispatcher::Dispatcher>,
    ) -> Call {
        Call {
            request,
            config,
            interceptors,
            dispatcher,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation(&self) -> Cancellation {
        Cancellation(self.cancel.clone())
    }

    /// Blocks until the response headers are ready, or the call fails.
    /// The response body, if any, must still be read or closed by the
    /// caller before the underlying connection is reusable.
    pub fn execute(self) -> Result<Response, Error> {
        self.config.event_listener.call_start(self.request.url());
        let result = Chain::start(&self.interceptors, self.request, &self.config, self.cancel);
        report(&self.config, &result);
        result
    }

    /// Hands the call to the client's dispatcher; `on_response` runs on a
    /// dispatcher worker thread once the response (or failure) is ready.
    pub fn enqueue(self, on_response: impl FnOnce(Result<Response, Error>) + Send + 'static) {
        let host = self.request.url().host().to_owned();
        let Call {
            request,
            config,
            interceptors,
            dispatcher,
            cancel,
        } = self;
        let job: Box<dyn FnOnce() + Send> = Box::new(move || {
            config.event_listener.call_start(request.url());
            let result = Chain::start(&interceptors, request, &config, cancel);
            report(&config, &result);
            on_response(result);
        });
        dispatcher.enqueue(host, job);
    }
}

fn report(config: &ClientConfig, result: &Result<Response, Error>) {
    match result {
        Ok(_) => config.event_listener.call_end(),
        Err(e) => config.event_listener.call_failed(e),
    }
}
