//! URL data model (SPEC_FULL.md SS3).
//!
//! Wraps the `url` crate for parsing, IDNA and percent-encoding, and layers
//! on top the pieces the `url` crate does not give us: an explicit
//! http/https/ws/wss scheme restriction, an insertion-ordered query
//! multimap, and public-suffix-aware domain queries.

use std::fmt;

use crate::error::{Error, Kind};
use crate::public_suffix::PublicSuffixList;

/// The wire scheme of a [`Url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    /// Whether this scheme carries a TLS handshake.
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    /// Whether this scheme is a WebSocket upgrade target.
    pub fn is_web_socket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }

    /// The default port for this scheme.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http | Scheme::Ws => 80,
            Scheme::Https | Scheme::Wss => 443,
        }
    }

    fn parse(s: &str) -> Option<Scheme> {
        match s {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    /// The scheme this one upgrades to when following a redirect that
    /// switches between plain HTTP framing and a WebSocket upgrade carrier.
    pub fn http_equivalent(self) -> Scheme {
        match self {
            Scheme::Ws => Scheme::Http,
            Scheme::Wss => Scheme::Https,
            other => other,
        }
    }
}

/// A URL: scheme, canonical host, port, encoded path, ordered query
/// parameters and fragment.
///
/// Invariant: `Url::parse(&url.to_string())` round-trips to an equal value
/// (SS3 "canonical form is stable under round-trip parse/serialize").
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Url {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

impl Url {
    /// Parse a URL string, restricted to the http/https/ws/wss schemes.
    pub fn parse(input: &str) -> Result<Url, Error> {
        let parsed = url::Url::parse(input).map_err(|e| Error::protocol(e))?;
        let scheme = Scheme::parse(parsed.scheme())
            .ok_or_else(|| Error::protocol(InvalidUrl("unsupported scheme")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::protocol(InvalidUrl("missing host")))?
            .to_ascii_lowercase();
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());
        let path = if parsed.path().is_empty() {
            "/".to_owned()
        } else {
            parsed.path().to_owned()
        };
        let query = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let fragment = parsed.fragment().map(str::to_owned);

        Ok(Url {
            scheme,
            host,
            port,
            path,
            query,
            fragment,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when `port` equals the scheme's default and would be omitted
    /// from the canonical serialization.
    pub fn port_is_default(&self) -> bool {
        self.port == self.scheme.default_port()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ordered query parameters, duplicates preserved, insertion order kept.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// `scheme://host[:port]` — the authority used as the `:authority`
    /// pseudo-header and the `Host` header's base.
    pub fn host_header(&self) -> String {
        if self.port_is_default() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Path plus query string, as sent on the request line / `:path`.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.encoded_query())
        }
    }

    fn encoded_query(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.query.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(&percent_encode_query(k));
            out.push('=');
            out.push_str(&percent_encode_query(v));
        }
        out
    }

    /// Returns a copy of this URL with one query parameter appended.
    pub fn with_query_param(&self, key: &str, value: &str) -> Url {
        let mut next = self.clone();
        next.query.push((key.to_owned(), value.to_owned()));
        next
    }

    /// Resolve a `Location` header value (absolute or relative) against
    /// this URL, per the redirect policy in SS4.1.
    pub fn resolve(&self, location: &str) -> Result<Url, Error> {
        let base = url::Url::parse(&self.to_string()).map_err(|e| Error::protocol(e))?;
        let resolved = base
            .join(location)
            .map_err(|e| Error::protocol(e))?;
        Url::parse(resolved.as_str())
    }

    /// True when `self` and `other` share scheme, host and port — i.e. they
    /// are pool-compatible per the Route invariant in SS3.
    pub fn is_same_origin(&self, other: &Url) -> bool {
        self.scheme == other.scheme && self.host == other.host && self.port == other.port
    }

    /// Registrable domain (`example.com` out of `foo.example.com`) using
    /// the embedded public suffix list (SS6).
    pub fn top_private_domain(&self) -> Option<String> {
        PublicSuffixList::get().effective_tld_plus_one(&self.host)
    }
}

fn percent_encode_query(s: &str) -> String {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
    const ASCII_SET: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');
    utf8_percent_encode(s, ASCII_SET).to_string()
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.host)?;
        if !self.port_is_default() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.encoded_query())?;
        }
        if let Some(ref frag) = self.fragment {
            write!(f, "#{}", frag)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Url({})", self)
    }
}

#[derive(Debug)]
struct InvalidUrl(&'static str);

impl fmt::Display for InvalidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for InvalidUrl {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let u = Url::parse("https://Example.com:443/a/b?x=1&y=2#frag").unwrap();
        assert_eq!(u.host(), "example.com");
        assert!(u.port_is_default());
        let again = Url::parse(&u.to_string()).unwrap();
        assert_eq!(u, again);
    }

    #[test]
    fn preserves_query_order_and_duplicates() {
        let u = Url::parse("http://h/?b=2&a=1&b=3").unwrap();
        assert_eq!(
            u.query_pairs(),
            &[
                ("b".to_owned(), "2".to_owned()),
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "3".to_owned()),
            ]
        );
    }

    #[test]
    fn resolves_relative_redirect() {
        let u = Url::parse("http://h/a/b").unwrap();
        let r = u.resolve("/c").unwrap();
        assert_eq!(r.path(), "/c");
        assert_eq!(r.host(), "h");
    }
}
