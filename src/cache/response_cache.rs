//! HTTP-response-shaped wrapping of [`DiskLruCache`] (spec.md SS3 "Cache
//! entry", SS4.6 "Cache interceptor policy").
//!
//! Keys are `sha256(canonical url)`, hex-encoded (SS3); value index 0 is
//! serialized metadata (status line + headers), index 1 is the raw body
//! bytes — matching the `.0`/`.1` file-per-key layout spec.md names.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::cache::DiskLruCache;
use crate::header::Headers;
use crate::response::Protocol;
use crate::url::Url;

const VALUE_COUNT: usize = 2;
const APP_VERSION: u32 = 1;

/// A response reconstructed from the disk cache, before the caller
/// attaches the real `Request` it answers (the cache interceptor does
/// that, since it already holds one).
pub struct CachedResponse {
    pub status: u16,
    pub status_message: String,
    pub headers: Headers,
    pub protocol: Protocol,
    pub sent_at_millis: i64,
    pub received_at_millis: i64,
    pub body: Vec<u8>,
}

/// Hit/miss counters observed by the cache interceptor (spec.md SS8 seed
/// scenario 2: "network count", "hit count").
#[derive(Default)]
pub struct CacheStats {
    request_count: AtomicU64,
    network_count: AtomicU64,
    hit_count: AtomicU64,
}

impl CacheStats {
    pub fn note_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_network(&self) {
        self.network_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn network_count(&self) -> u64 {
        self.network_count.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }
}

/// The on-disk response cache (spec.md SS4.6).
pub struct ResponseCache {
    store: DiskLruCache,
    stats: CacheStats,
}

impl ResponseCache {
    pub fn open(dir: impl AsRef<Path>, max_size: u64) -> io::Result<ResponseCache> {
        Ok(ResponseCache {
            store: DiskLruCache::open(dir, max_size, VALUE_COUNT, APP_VERSION)?,
            stats: CacheStats::default(),
        })
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn key_for(url: &Url) -> String {
        let digest = Sha256::digest(url.to_string().as_bytes());
        hex(&digest)
    }

    pub fn get(&self, url: &Url) -> Option<CachedResponse> {
        let key = Self::key_for(url);
        let snapshot = self.store.get(&key)?;
        let mut meta_raw = Vec::new();
        snapshot.file(0).ok()?.read_to_end(&mut meta_raw).ok()?;
        let mut body = Vec::new();
        snapshot.file(1).ok()?.read_to_end(&mut body).ok()?;
        let meta = Metadata::deserialize(&meta_raw)?;
        Some(CachedResponse {
            status: meta.status,
            status_message: meta.status_message,
            headers: meta.headers,
            protocol: meta.protocol,
            sent_at_millis: meta.sent_at_millis,
            received_at_millis: meta.received_at_millis,
            body,
        })
    }

    pub fn put(
        &self,
        url: &Url,
        status: u16,
        status_message: &str,
        headers: &Headers,
        protocol: Protocol,
        sent_at_millis: i64,
        received_at_millis: i64,
        body: &[u8],
    ) -> io::Result<()> {
        let key = Self::key_for(url);
        let Some(mut editor) = self.store.edit(&key) else {
            return Ok(());
        };
        let meta = Metadata {
            status,
            status_message: status_message.to_owned(),
            headers: headers.clone(),
            protocol,
            sent_at_millis,
            received_at_millis,
        };
        editor.new_sink(0)?.write_all(&meta.serialize())?;
        editor.new_sink(1)?.write_all(body)?;
        editor.commit()
    }

    /// On a `304` validation response, merge the fresh headers into the
    /// stored entry while keeping the cached body (spec.md SS4.6 "combine
    /// cached body with fresh headers").
    pub fn update_after_not_modified(&self, url: &Url, fresh_headers: &Headers, received_at_millis: i64) -> io::Result<()> {
        let Some(cached) = self.get(url) else { return Ok(()) };
        let mut merged = cached.headers.clone();
        for (name, _) in fresh_headers.iter() {
            merged.remove(name.as_str());
        }
        for (name, value) in fresh_headers.iter() {
            if let crate::header::Name::Regular(n) = name {
                merged.push(n.clone(), value.clone());
            }
        }
        self.put(
            url,
            cached.status,
            &cached.status_message,
            &merged,
            cached.protocol,
            cached.sent_at_millis,
            received_at_millis,
            &cached.body,
        )
    }

    /// Invalidate any cached entry for `url` (spec.md SS4.6: "POST/PATCH/
    /// PUT/DELETE/MOVE invalidate the cached URL").
    pub fn invalidate(&self, url: &Url) -> io::Result<()> {
        self.store.remove(&Self::key_for(url))?;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.store.size()
    }
}

struct Metadata {
    status: u16,
    status_message: String,
    headers: Headers,
    protocol: Protocol,
    sent_at_millis: i64,
    received_at_millis: i64,
}

impl Metadata {
    fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("{}\n", self.status));
        out.push_str(&format!("{}\n", self.status_message));
        out.push_str(&format!("{}\n", self.protocol.as_str()));
        out.push_str(&format!("{}\n", self.sent_at_millis));
        out.push_str(&format!("{}\n", self.received_at_millis));
        let entries: Vec<_> = self.headers.iter().collect();
        out.push_str(&format!("{}\n", entries.len()));
        for (name, value) in entries {
            out.push_str(name.as_str());
            out.push('\t');
            out.push_str(value.to_str().unwrap_or(""));
            out.push('\n');
        }
        out.into_bytes()
    }

    fn deserialize(raw: &[u8]) -> Option<Metadata> {
        let text = std::str::from_utf8(raw).ok()?;
        let mut lines = text.lines();
        let status: u16 = lines.next()?.parse().ok()?;
        let status_message = lines.next()?.to_owned();
        let protocol = match lines.next()? {
            "http/1.0" => Protocol::Http10,
            "h2" => Protocol::Http2,
            _ => Protocol::Http11,
        };
        let sent_at_millis: i64 = lines.next()?.parse().ok()?;
        let received_at_millis: i64 = lines.next()?.parse().ok()?;
        let count: usize = lines.next()?.parse().ok()?;
        let mut headers = Headers::new();
        for _ in 0..count {
            let line = lines.next()?;
            let (name, value) = line.split_once('\t')?;
            let _ = headers.push_str(name, value);
        }
        Some(Metadata {
            status,
            status_message,
            headers,
            protocol,
            sent_at_millis,
            received_at_millis,
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_cached_response() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1 << 20).unwrap();
        let url = Url::parse("https://example.com/a").unwrap();
        let mut headers = Headers::new();
        headers.push_str("Last-Modified", "yesterday").unwrap();
        cache
            .put(&url, 200, "OK", &headers, Protocol::Http11, 1, 2, b"ABC.1")
            .unwrap();

        let cached = cache.get(&url).unwrap();
        assert_eq!(cached.status, 200);
        assert_eq!(cached.body, b"ABC.1");
        assert_eq!(cached.headers.get("last-modified"), Some("yesterday"));
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1 << 20).unwrap();
        let url = Url::parse("https://example.com/a").unwrap();
        cache
            .put(&url, 200, "OK", &Headers::new(), Protocol::Http11, 0, 0, b"x")
            .unwrap();
        cache.invalidate(&url).unwrap();
        assert!(cache.get(&url).is_none());
    }
}
