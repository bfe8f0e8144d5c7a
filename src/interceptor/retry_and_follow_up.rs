//! Retry-on-failure and redirect/follow-up policy (spec.md SS4.1).
//!
//! Grounded on the teacher's `client/retry` + OkHttp's `RetryAndFollowUpInterceptor`:
//! one loop owns both concerns because a redirect and a connection-level
//! retry are, from the caller's perspective, the same thing — "send this
//! request again, possibly adjusted, without the caller seeing an error".
//! The loop never recurses; it models "try again" as iteration, so its
//! stack depth does not grow with retry or redirect count (SS9).

use std::sync::Arc;

use http::{Method, StatusCode};

use crate::authenticator::Authenticator;
use crate::body::EmptyBody;
use crate::error::Error;
use crate::header::{Headers, Name};
use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;

/// Hard ceiling on redirects/auth retries per call (spec.md SS4.1).
const MAX_FOLLOW_UPS: u32 = 20;

pub struct RetryAndFollowUpInterceptor;

impl Interceptor for RetryAndFollowUpInterceptor {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error> {
        // `take_request` moves the caller's original request — including any
        // one-shot body — out of the chain so the very first send transmits
        // the real body rather than a stand-in. `try_clone` below, not this
        // move, is what determines whether a later attempt can be retried.
        let mut current = chain.take_request();
        let mut follow_ups = 0u32;

        loop {
            let backup = current.try_clone();

            match chain.proceed(current) {
                Ok(mut response) => {
                    if let Some(next) = self.follow_up(&response, chain, follow_ups)? {
                        follow_ups += 1;
                        if follow_ups > MAX_FOLLOW_UPS {
                            return Ok(response);
                        }
                        response.take_body();
                        chain.client().event_listener.redirect(response.request().url(), next.url());
                        current = next;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if !e.is_canceled() && chain.client().retry_on_connection_failure && e.is_retryable_kind() {
                        if let Some(retry_request) = backup {
                            chain.client().event_listener.retry(retry_request.url(), follow_ups);
                            current = retry_request;
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl RetryAndFollowUpInterceptor {
    /// Decide the next request to send given `response`, or `None` if the
    /// response should be returned to the caller as-is.
    fn follow_up(&self, response: &Response, chain: &Chain, follow_ups: u32) -> Result<Option<Request>, Error> {
        let _ = follow_ups;
        let client = chain.client();
        let status = response.status();

        match status.as_u16() {
            401 | 407 => {
                if !client.follow_redirects {
                    return Ok(None);
                }
                let authenticator: &Arc<dyn Authenticator> = if status.as_u16() == 407 {
                    &client.proxy_authenticator
                } else {
                    &client.authenticator
                };
                let Some(extra) = authenticator.authenticate(response.request(), response) else {
                    return Ok(None);
                };
                let base = response.request();
                let Some(body) = base.body().try_clone() else {
                    return Ok(None);
                };
                let mut headers = base.headers().clone();
                merge_headers(&mut headers, &extra);
                Ok(Some(base.with_url(base.url().clone(), headers, body)))
            }
            300..=399 if status != StatusCode::NOT_MODIFIED => {
                if !client.follow_redirects {
                    return Ok(None);
                }
                let Some(location) = response.headers().get("location") else {
                    return Ok(None);
                };
                let target = response.request().url().resolve(location)?;

                if target.scheme().is_tls() != response.request().url().scheme().is_tls() && !client.follow_ssl_redirects {
                    return Ok(None);
                }

                let base = response.request();
                let same_origin = base.url().is_same_origin(&target);
                let (method, body): (Method, Box<dyn crate::body::Body>) = match status.as_u16() {
                    // spec.md SS4.1: "303 converts to GET and drops the body
                    // unless the method is PROPFIND" (which keeps both, like
                    // a 307/308); HEAD stays HEAD rather than becoming GET.
                    303 if base.method().as_str() == "PROPFIND" => {
                        let Some(body) = base.body().try_clone() else {
                            return Ok(None);
                        };
                        (base.method().clone(), body)
                    }
                    303 => {
                        if base.method() == Method::HEAD {
                            (Method::HEAD, Box::new(EmptyBody))
                        } else {
                            (Method::GET, Box::new(EmptyBody))
                        }
                    }
                    307 | 308 => {
                        let Some(body) = base.body().try_clone() else {
                            return Ok(None);
                        };
                        (base.method().clone(), body)
                    }
                    _ => (base.method().clone(), Box::new(EmptyBody)),
                };

                let mut headers = base.headers().clone();
                if !same_origin {
                    headers.remove("authorization");
                    headers.remove("cookie");
                }
                headers.remove("host");
                headers.remove("content-length");
                headers.remove("transfer-encoding");

                Ok(Some(base.with_url_and_method(target, method, headers, body)))
            }
            _ => Ok(None),
        }
    }
}

fn merge_headers(into: &mut Headers, extra: &Headers) {
    for (name, value) in extra.iter() {
        if let Name::Regular(n) = name {
            into.set(n.clone(), value.clone());
        }
    }
}
