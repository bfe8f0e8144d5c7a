//! Cookie jar (external collaborator, spec.md SS6) with RFC 6265 parsing.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::url::Url;

/// A single cookie, as stored in a jar.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires_at_millis: Option<i64>,
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Parse a `Set-Cookie` header value against the URL that produced it.
    pub fn parse(url: &Url, header_value: &str) -> Option<Cookie> {
        let mut parts = header_value.split(';');
        let name_value = parts.next()?.trim();
        let (name, value) = name_value.split_once('=')?;
        if name.trim().is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.trim().to_owned(),
            value: value.trim().to_owned(),
            domain: url.host().to_owned(),
            path: default_path(url.path()),
            expires_at_millis: None,
            host_only: true,
            secure: false,
            http_only: false,
        };

        for attr in parts {
            let attr = attr.trim();
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    cookie.domain = val.trim().trim_start_matches('.').to_ascii_lowercase();
                    cookie.host_only = false;
                }
                "path" if !val.is_empty() => cookie.path = val.trim().to_owned(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "max-age" => {
                    if let Ok(secs) = val.trim().parse::<i64>() {
                        cookie.expires_at_millis = Some(now_millis() + secs * 1000);
                    }
                }
                "expires" if cookie.expires_at_millis.is_none() => {
                    if let Ok(when) = httpdate::parse_http_date(val.trim()) {
                        let millis = when
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_millis() as i64)
                            .unwrap_or(0);
                        cookie.expires_at_millis = Some(millis);
                    }
                }
                _ => {}
            }
        }

        Some(cookie)
    }

    pub fn is_expired(&self, now_millis_value: i64) -> bool {
        matches!(self.expires_at_millis, Some(exp) if exp <= now_millis_value)
    }

    fn matches(&self, url: &Url) -> bool {
        if self.secure && !url.scheme().is_tls() {
            return false;
        }
        let host = url.host();
        let domain_matches = if self.host_only {
            host == self.domain
        } else {
            host == self.domain || host.ends_with(&format!(".{}", self.domain))
        };
        domain_matches && path_matches(&self.path, url.path())
    }
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => request_path[..idx].to_owned(),
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    if request_path.starts_with(cookie_path) {
        if cookie_path.ends_with('/') {
            return true;
        }
        return request_path.as_bytes().get(cookie_path.len()) == Some(&b'/');
    }
    false
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Pluggable cookie storage, consulted by the bridge interceptor (SS4.1).
pub trait CookieJar: Send + Sync {
    fn save_from_response(&self, url: &Url, cookies: Vec<Cookie>);
    fn load_for_request(&self, url: &Url) -> Vec<Cookie>;
}

/// An in-memory jar; the default when no jar is configured.
#[derive(Default)]
pub struct InMemoryCookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl InMemoryCookieJar {
    pub fn new() -> InMemoryCookieJar {
        InMemoryCookieJar::default()
    }
}

impl CookieJar for InMemoryCookieJar {
    fn save_from_response(&self, _url: &Url, cookies: Vec<Cookie>) {
        let mut store = self.cookies.lock().unwrap();
        let now = now_millis();
        for incoming in cookies {
            store.retain(|c| !(c.name == incoming.name && c.domain == incoming.domain && c.path == incoming.path));
            if !incoming.is_expired(now) {
                store.push(incoming);
            }
        }
    }

    fn load_for_request(&self, url: &Url) -> Vec<Cookie> {
        let now = now_millis();
        let mut store = self.cookies.lock().unwrap();
        store.retain(|c| !c.is_expired(now));
        store
            .iter()
            .filter(|c| c.matches(url))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_set_cookie() {
        let url = Url::parse("https://example.com/a/b").unwrap();
        let c = Cookie::parse(&url, "sid=abc123; Path=/; Secure; HttpOnly").unwrap();
        assert_eq!(c.name, "sid");
        assert_eq!(c.value, "abc123");
        assert!(c.secure);
        assert!(c.http_only);
    }

    #[test]
    fn jar_round_trips() {
        let jar = InMemoryCookieJar::new();
        let url = Url::parse("https://example.com/a/b").unwrap();
        let c = Cookie::parse(&url, "sid=abc123").unwrap();
        jar.save_from_response(&url, vec![c]);
        let loaded = jar.load_for_request(&url);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value, "abc123");
    }

    #[test]
    fn secure_cookie_not_sent_over_plaintext() {
        let jar = InMemoryCookieJar::new();
        let https = Url::parse("https://example.com/").unwrap();
        let c = Cookie::parse(&https, "sid=abc; Secure").unwrap();
        jar.save_from_response(&https, vec![c]);
        let http = Url::parse("http://example.com/").unwrap();
        assert!(jar.load_for_request(&http).is_empty());
    }
}
