//! Request data model (SPEC_FULL.md SS3).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::body::{Body, EmptyBody};
use crate::header::Headers;
use crate::url::Url;

/// A user-built HTTP request: method, URL, headers and an optional body.
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Box<dyn Body>,
    tags: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Request {
    pub fn builder(url: Url) -> RequestBuilder {
        RequestBuilder {
            method: Method::GET,
            url,
            headers: Headers::new(),
            body: None,
            tags: HashMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &dyn Body {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> &mut dyn Body {
        self.body.as_mut()
    }

    pub fn has_body(&self) -> bool {
        self.body.byte_size() != Some(0)
    }

    /// Per-call opaque storage, keyed by type, set via
    /// `RequestBuilder::tag`. Mirrors the "tag keys are type-identity"
    /// resolution from SPEC_FULL.md SS10.
    pub fn tag<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.tags
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a request equivalent to `self` but with a fresh copy of the
    /// body producer, used by the retry/redirect interceptor when
    /// re-entering the chain. Only valid for non-one-shot bodies — callers
    /// must check `body().is_one_shot()` first.
    pub(crate) fn with_url(&self, url: Url, headers: Headers, body: Box<dyn Body>) -> Request {
        Request {
            method: self.method.clone(),
            url,
            headers,
            body,
            tags: self.tags.clone(),
        }
    }

    pub(crate) fn with_method(&self, method: Method, headers: Headers, body: Box<dyn Body>) -> Request {
        Request {
            method,
            url: self.url.clone(),
            headers,
            body,
            tags: self.tags.clone(),
        }
    }

    /// Like `with_url`/`with_method` combined, for redirects that change
    /// both (e.g. a 303 turning a POST into a GET at the `Location`).
    pub(crate) fn with_url_and_method(&self, url: Url, method: Method, headers: Headers, body: Box<dyn Body>) -> Request {
        Request {
            method,
            url,
            headers,
            body,
            tags: self.tags.clone(),
        }
    }

    /// A fresh, independent copy for a retry re-entry into the chain.
    /// `None` if the body can't be replayed (SS4.1 "request is not a
    /// one-shot body").
    pub(crate) fn try_clone(&self) -> Option<Request> {
        let body = self.body.try_clone()?;
        Some(Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            tags: self.tags.clone(),
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Builds a [`Request`].
pub struct RequestBuilder {
    method: Method,
    url: Url,
    headers: Headers,
    body: Option<Box<dyn Body>>,
    tags: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        let _ = self.headers.push_str(name, value);
        self
    }

    pub fn body(mut self, body: impl Body + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    pub fn tag<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.tags.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body.unwrap_or_else(|| Box::new(EmptyBody)),
            tags: self.tags,
        }
    }
}
