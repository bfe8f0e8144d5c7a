//! Cache interceptor (spec.md SS4.1 point 4, SS4.6 "Cache interceptor
//! policy").
//!
//! Grounded on OkHttp's `CacheInterceptor`/`CacheStrategy` — the RFC 7234
//! subset spec.md SS4.6 names: a cached response is served as-is while
//! fresh, revalidated with conditional headers once stale, or bypassed
//! entirely for non-cacheable methods and `no-store` responses. Disk
//! storage itself lives in [`crate::cache::ResponseCache`]; this
//! interceptor only decides *whether* to read or write it.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::cache::{CachedResponse, ResponseCache};
use crate::error::Error;
use crate::header::Headers;
use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::{Protocol, Response, ResponseBody};
use crate::url::Url;

pub struct CacheInterceptor;

impl Interceptor for CacheInterceptor {
    fn intercept(&self, chain: &mut Chain) -> Result<Response, Error> {
        let request = chain.take_request();
        let client = chain.client();

        let Some(cache) = client.cache.clone() else {
            return chain.proceed(request);
        };
        cache.stats().note_request();

        if !is_cacheable_method(request.method()) {
            if invalidates(request.method()) {
                let _ = cache.invalidate(request.url());
            }
            return chain.proceed(request);
        }

        let url = request.url().clone();
        let request_cc = CacheControl::parse(request.headers());
        let cached = cache.get(&url);
        let strategy = Strategy::compute(&request_cc, cached.as_ref(), now_millis());

        match strategy {
            Strategy::UseCache => {
                let cached = cached.expect("UseCache implies a cache hit");
                cache.stats().note_hit();
                client.event_listener.cache_hit(&url);
                Ok(response_from_cache(request, cached))
            }
            Strategy::Disallow => {
                cache.stats().note_network();
                Ok(gateway_timeout(request))
            }
            Strategy::Conditional(validators) => {
                cache.stats().note_network();
                client.event_listener.cache_conditional_hit(&url);
                let request_for_hit = request.try_clone();
                let mut conditional = request;
                for (name, value) in validators {
                    conditional
                        .headers_mut()
                        .set(HeaderName::from_static(name), HeaderValue::from_str(&value).map_err(Error::protocol)?);
                }
                let network_response = chain.proceed(conditional)?;
                if network_response.status() == StatusCode::NOT_MODIFIED {
                    let received_at = network_response.received_at_millis();
                    cache.update_after_not_modified(&url, network_response.headers(), received_at).map_err(Error::io)?;
                    let refreshed = cache.get(&url).expect("update_after_not_modified just wrote this entry");
                    let request_for_hit = request_for_hit.expect("GET/QUERY requests carry a replayable (empty) body");
                    let mut served = response_from_cache(request_for_hit, refreshed);
                    served.set_network_response(network_response);
                    Ok(served)
                } else {
                    store_response(&cache, &url, network_response)
                }
            }
            Strategy::Forward => {
                cache.stats().note_network();
                client.event_listener.cache_miss(&url);
                let network_response = chain.proceed(request)?;
                store_response(&cache, &url, network_response)
            }
        }
    }
}

fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || method.as_str().eq_ignore_ascii_case("QUERY")
}

fn invalidates(method: &Method) -> bool {
    matches!(method.as_str(), "POST" | "PATCH" | "PUT" | "DELETE" | "MOVE")
}

fn is_cacheable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 203 | 204 | 300 | 301 | 404 | 405 | 410 | 414 | 501)
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Builds the response served straight from disk, or (with
/// `set_network_response` applied by the caller) the merged result of a
/// successful revalidation.
fn response_from_cache(request: Request, cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let len = cached.body.len() as u64;
    Response::builder(Arc::new(request), cached.protocol, status)
        .status_message(cached.status_message)
        .headers(cached.headers)
        .body(ResponseBody::new(Cursor::new(cached.body), Some(len)))
        .timing(cached.sent_at_millis, cached.received_at_millis)
        .build()
}

fn gateway_timeout(request: Request) -> Response {
    Response::builder(Arc::new(request), Protocol::Http11, StatusCode::GATEWAY_TIMEOUT)
        .status_message("Unsatisfiable Request (only-if-cached)")
        .body(ResponseBody::new(std::io::empty(), Some(0)))
        .build()
}

/// Stores a cacheable network response and hands the caller back a fresh
/// body reader over the bytes just buffered — the network body can only
/// be read once, and both the cache write and the caller need its bytes.
fn store_response(cache: &Arc<ResponseCache>, url: &Url, mut response: Response) -> Result<Response, Error> {
    let response_cc = CacheControl::parse(response.headers());
    if !is_cacheable_status(response.status()) || response_cc.no_store {
        let _ = cache.invalidate(url);
        return Ok(response);
    }
    let Some(mut body) = response.take_body() else {
        return Ok(response);
    };
    let bytes = body.read_to_vec().map_err(Error::io)?;
    drop(body);

    let _ = cache.put(
        url,
        response.status().as_u16(),
        response.status_message(),
        response.headers(),
        response.protocol(),
        response.sent_at_millis(),
        response.received_at_millis(),
        &bytes,
    );

    let len = bytes.len() as u64;
    response.replace_body(Some(ResponseBody::new(Cursor::new(bytes), Some(len))));
    Ok(response)
}

#[derive(Default)]
struct CacheControl {
    no_cache: bool,
    no_store: bool,
    max_age: Option<i64>,
    max_stale: Option<i64>,
    min_fresh: Option<i64>,
    only_if_cached: bool,
}

impl CacheControl {
    fn parse(headers: &Headers) -> CacheControl {
        let mut cc = CacheControl::default();
        for directive in headers.get("cache-control").unwrap_or("").split(',') {
            let directive = directive.trim();
            let (name, value) = match directive.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "only-if-cached" => cc.only_if_cached = true,
                "max-age" => cc.max_age = value.and_then(|v| v.parse().ok()),
                "max-stale" => cc.max_stale = Some(value.and_then(|v| v.parse().ok()).unwrap_or(i64::MAX)),
                "min-fresh" => cc.min_fresh = value.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
        if headers.get("pragma").map(|v| v.eq_ignore_ascii_case("no-cache")).unwrap_or(false) {
            cc.no_cache = true;
        }
        cc
    }
}

enum Strategy {
    UseCache,
    Conditional(Vec<(&'static str, String)>),
    Forward,
    Disallow,
}

impl Strategy {
    fn compute(request_cc: &CacheControl, cached: Option<&CachedResponse>, now: i64) -> Strategy {
        let Some(cached) = cached else {
            return if request_cc.only_if_cached { Strategy::Disallow } else { Strategy::Forward };
        };

        let response_cc = CacheControl::parse(&cached.headers);
        if response_cc.no_store {
            return if request_cc.only_if_cached { Strategy::Disallow } else { Strategy::Forward };
        }
        if request_cc.no_cache {
            return if request_cc.only_if_cached { Strategy::Disallow } else { conditional_or_forward(cached) };
        }

        let age = age_seconds(cached, now);
        let freshness = freshness_seconds(cached, &response_cc);
        let max_stale = request_cc.max_stale.unwrap_or(0);
        let min_fresh = request_cc.min_fresh.unwrap_or(0);

        if let Some(max_age) = request_cc.max_age {
            if age > max_age {
                return if request_cc.only_if_cached { Strategy::Disallow } else { conditional_or_forward(cached) };
            }
        }

        if age + min_fresh < freshness + max_stale {
            return Strategy::UseCache;
        }

        if request_cc.only_if_cached {
            return Strategy::Disallow;
        }
        conditional_or_forward(cached)
    }
}

fn conditional_or_forward(cached: &CachedResponse) -> Strategy {
    let mut validators = Vec::new();
    if let Some(etag) = cached.headers.get("etag") {
        validators.push(("if-none-match", etag.to_owned()));
    }
    if let Some(last_modified) = cached.headers.get("last-modified") {
        validators.push(("if-modified-since", last_modified.to_owned()));
    } else if let Some(date) = cached.headers.get("date") {
        validators.push(("if-modified-since", date.to_owned()));
    }
    if validators.is_empty() {
        Strategy::Forward
    } else {
        Strategy::Conditional(validators)
    }
}

fn age_seconds(cached: &CachedResponse, now: i64) -> i64 {
    let base = (now - cached.received_at_millis).max(0) / 1000;
    let age_header = cached.headers.get("age").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
    base + age_header.max(0)
}

/// Freshness lifetime per RFC 7234 SS4.2.1: explicit `max-age`, then
/// `Expires`, then the `Last-Modified` heuristic (10% of the age at the
/// time the response was served), defaulting to "already stale".
fn freshness_seconds(cached: &CachedResponse, response_cc: &CacheControl) -> i64 {
    if let Some(max_age) = response_cc.max_age {
        return max_age;
    }
    let served_at = cached
        .headers
        .get("date")
        .and_then(parse_http_date_millis)
        .unwrap_or(cached.received_at_millis);
    if let Some(expires) = cached.headers.get("expires").and_then(parse_http_date_millis) {
        return ((expires - served_at) / 1000).max(0);
    }
    if let Some(last_modified) = cached.headers.get("last-modified").and_then(parse_http_date_millis) {
        if served_at > last_modified {
            return (served_at - last_modified) / 1000 / 10;
        }
    }
    0
}

fn parse_http_date_millis(value: &str) -> Option<i64> {
    let when = httpdate::parse_http_date(value).ok()?;
    Some(when.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0))
}
