//! Ordered header list (SPEC_FULL.md SS3).
//!
//! Reuses `http::HeaderName`/`http::HeaderValue` for case-insensitive
//! comparison and valid-byte enforcement (the teacher's own types for this),
//! but keeps our own `Vec` instead of `http::HeaderMap` — `HeaderMap` does
//! not preserve insertion order across distinct names, which the HTTP/2
//! pseudo-header invariant (`:method` etc. before regular headers) needs.

use std::fmt;

use http::{HeaderName, HeaderValue};

/// A header name: either an HTTP/2 pseudo-header (`:method`, `:scheme`,
/// `:authority`, `:path`, `:status`) or a regular field name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Pseudo(PseudoName),
    Regular(HeaderName),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PseudoName {
    Method,
    Scheme,
    Authority,
    Path,
    Status,
}

impl PseudoName {
    pub fn as_str(self) -> &'static str {
        match self {
            PseudoName::Method => ":method",
            PseudoName::Scheme => ":scheme",
            PseudoName::Authority => ":authority",
            PseudoName::Path => ":path",
            PseudoName::Status => ":status",
        }
    }
}

impl Name {
    pub fn as_str(&self) -> &str {
        match self {
            Name::Pseudo(p) => p.as_str(),
            Name::Regular(n) => n.as_str(),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self, Name::Pseudo(_))
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HeaderName> for Name {
    fn from(n: HeaderName) -> Name {
        Name::Regular(n)
    }
}

/// An ordered, duplicate-preserving sequence of `(name, value)` pairs.
///
/// Names compare case-insensitively; `get_all` returns every match in
/// insertion order. Pseudo-headers, when present, are kept ahead of
/// regular headers by construction (`push_pseudo` is only ever called
/// before `push`/`push_regular` by the HTTP/2 codec).
#[derive(Clone, Default)]
pub struct Headers {
    entries: Vec<(Name, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn push(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((Name::Regular(name), value));
    }

    pub fn push_pseudo(&mut self, name: PseudoName, value: HeaderValue) {
        self.entries.push((Name::Pseudo(name), value));
    }

    pub fn push_str(&mut self, name: &str, value: &str) -> Result<(), http::Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.push(name, value);
        Ok(())
    }

    /// The first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .filter_map(|(_, v)| v.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
    }

    /// Remove every entry named `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.as_str().eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Remove every entry named `name` and push a single new value, keeping
    /// the original position of the first removed entry when possible.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        self.remove(name.as_str());
        self.push(name, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    /// Pseudo-headers first (wire order for HTTP/2 HEADERS frames), then
    /// regular headers in their original insertion order.
    pub fn iter_wire_order(&self) -> impl Iterator<Item = (&Name, &HeaderValue)> {
        let pseudo = self.entries.iter().filter(|(n, _)| n.is_pseudo());
        let regular = self.entries.iter().filter(|(n, _)| !n.is_pseudo());
        pseudo.chain(regular).map(|(n, v)| (n, v))
    }

    /// True iff every pair in `earlier` also appears (by name+value) in
    /// `self`, at least as many times — the "monotonic augmentation"
    /// invariant from SS8.
    pub fn is_superset_of(&self, earlier: &Headers) -> bool {
        for (name, value) in &earlier.entries {
            let count_here = self
                .entries
                .iter()
                .filter(|(n, v)| n == name && v == value)
                .count();
            let count_earlier = earlier
                .entries
                .iter()
                .filter(|(n, v)| n == name && v == value)
                .count();
            if count_here < count_earlier {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(n, v)| {
            format!("{}: {}", n.as_str(), v.to_str().unwrap_or("<binary>"))
        })).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order_and_duplicates() {
        let mut h = Headers::new();
        h.push_str("X-A", "1").unwrap();
        h.push_str("x-b", "2").unwrap();
        h.push_str("X-A", "3").unwrap();
        let names: Vec<&str> = h.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["X-A", "x-b", "X-A"]);
        let all: Vec<&str> = h.get_all("x-a").collect();
        assert_eq!(all, vec!["1", "3"]);
    }

    #[test]
    fn pseudo_headers_sort_first_on_wire() {
        let mut h = Headers::new();
        h.push_str("user-agent", "x").unwrap();
        h.push_pseudo(PseudoName::Method, HeaderValue::from_static("GET"));
        let first = h.iter_wire_order().next().unwrap();
        assert_eq!(first.0.as_str(), ":method");
    }

    #[test]
    fn superset_check() {
        let mut a = Headers::new();
        a.push_str("x", "1").unwrap();
        let mut b = a.clone();
        b.push_str("y", "2").unwrap();
        assert!(b.is_superset_of(&a));
        assert!(!a.is_superset_of(&b));
    }
}
