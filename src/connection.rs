//! A single physical transport: either an HTTP/1.1 carrier or a shared
//! HTTP/2 connection (spec.md SS-GLOSSARY "Carrier").
//!
//! `is_closed`/`is_healthy` follow the teacher's `PooledStream` pattern in
//! `client/pool.rs` (an `AtomicBool` flipped on the first I/O error, checked
//! by the pool before handing a connection back out) generalized to cover
//! the two wire protocols this engine supports.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::h2::connection::H2Connection;
use crate::route::{Protocol, Route};
use crate::tls::{Handshake, Stream};

/// Either a plaintext or TLS-wrapped byte stream, plus the handshake record
/// when TLS was used.
pub enum Carrier {
    Plain(TcpStream),
    Tls(Stream, Handshake),
}

impl Carrier {
    pub fn try_clone(&self) -> std::io::Result<TcpStream> {
        match self {
            Carrier::Plain(s) => s.try_clone(),
            Carrier::Tls(s, _) => s.try_clone(),
        }
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        match self {
            Carrier::Plain(_) => None,
            Carrier::Tls(_, h) => Some(h),
        }
    }

    /// Used by the WebSocket reader loop to poll for a frame without
    /// blocking forever, so the writer side of the loop still gets a turn
    /// to drain the outgoing queue and send scheduled pings.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        match self {
            Carrier::Plain(s) => s.set_read_timeout(dur),
            Carrier::Tls(s, _) => s.set_read_timeout(dur),
        }
    }
}

impl std::io::Read for Carrier {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Carrier::Plain(s) => std::io::Read::read(s, buf),
            Carrier::Tls(s, _) => std::io::Read::read(s, buf),
        }
    }
}

impl std::io::Write for Carrier {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Carrier::Plain(s) => std::io::Write::write(s, buf),
            Carrier::Tls(s, _) => std::io::Write::write(s, buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Carrier::Plain(s) => std::io::Write::flush(s),
            Carrier::Tls(s, _) => std::io::Write::flush(s),
        }
    }
}

/// Per-protocol connection state. HTTP/1.1 connections hand the raw
/// carrier to one h1 exchange at a time (SS3 "at most one request in
/// flight"); HTTP/2 connections multiplex many streams over a shared
/// `H2Connection` (SS3 "up to `SETTINGS_MAX_CONCURRENT_STREAMS`").
pub enum Transport {
    Http1(Mutex<Carrier>),
    Http2(H2Connection),
}

/// A pooled, physical connection to one [`Route`] (spec.md SS3).
pub struct RealConnection {
    pub route: Route,
    pub protocol: Protocol,
    transport: Transport,
    is_closed: AtomicBool,
    idle_since_nanos: AtomicU64,
    created_at: Instant,
    successful_count: AtomicU64,
    /// Outstanding transmitters (spec.md SS-GLOSSARY "Transmitter"): at
    /// most one for HTTP/1, any number bounded by the peer's
    /// `SETTINGS_MAX_CONCURRENT_STREAMS` for HTTP/2.
    transmitters: AtomicU64,
}

impl RealConnection {
    pub fn new_plain(tcp: TcpStream, protocol: Protocol, route: Route) -> RealConnection {
        RealConnection::new(Carrier::Plain(tcp), protocol, route)
    }

    pub fn new_tls(stream: Stream, handshake: Handshake, protocol: Protocol, route: Route) -> RealConnection {
        RealConnection::new(Carrier::Tls(stream, handshake), protocol, route)
    }

    fn new(carrier: Carrier, protocol: Protocol, route: Route) -> RealConnection {
        let transport = match protocol {
            Protocol::H2 => Transport::Http2(H2Connection::new(carrier, true)),
            Protocol::Http11 => Transport::Http1(Mutex::new(carrier)),
        };
        RealConnection {
            route,
            protocol,
            transport,
            is_closed: AtomicBool::new(false),
            idle_since_nanos: AtomicU64::new(0),
            created_at: Instant::now(),
            successful_count: AtomicU64::new(0),
            transmitters: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    /// True when this connection can still accept a new exchange:
    /// HTTP/1.1 connections accept one at a time when idle; HTTP/2
    /// connections accept one while under their stream cap and not GOAWAY'd.
    pub fn is_healthy(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match &self.transport {
            Transport::Http1(_) => true,
            Transport::Http2(h2) => !h2.is_shutdown(),
        }
    }

    pub fn note_success(&self) {
        self.successful_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successful_count(&self) -> u64 {
        self.successful_count.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn mark_idle_now(&self) {
        let nanos = self.created_at.elapsed().as_nanos() as u64;
        self.idle_since_nanos.store(nanos, Ordering::Relaxed);
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        let marked = self.idle_since_nanos.load(Ordering::Relaxed);
        let now = self.created_at.elapsed().as_nanos() as u64;
        std::time::Duration::from_nanos(now.saturating_sub(marked))
    }

    /// Registers a new exchange on this connection, returning the count
    /// held immediately after. HTTP/1.1 callers must only do this when
    /// `transmitter_count() == 0`; the pool enforces that invariant.
    pub fn acquire_transmitter(&self) -> u64 {
        self.transmitters.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release_transmitter(&self) -> u64 {
        let prev = self.transmitters.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "released a transmitter that was never acquired");
        prev - 1
    }

    pub fn transmitter_count(&self) -> u64 {
        self.transmitters.load(Ordering::Acquire)
    }

    /// The TLS handshake record, when this connection's carrier is `Tls`.
    /// HTTP/2 connections don't expose their carrier past construction, so
    /// this is always `None` for them; only an ambient nicety either way.
    pub fn handshake(&self) -> Option<Handshake> {
        match &self.transport {
            Transport::Http1(carrier) => carrier.lock().unwrap().handshake().cloned(),
            Transport::Http2(_) => None,
        }
    }

    /// Detaches the underlying carrier for a WebSocket upgrade (SS4.7): once
    /// the 101 response is accepted, this connection leaves the pool's
    /// bookkeeping entirely and its socket becomes the WebSocket's own.
    /// Only ever called on a freshly dialed, never-pooled HTTP/1.1
    /// connection, so a poisoned mutex here would mean a bug elsewhere.
    pub fn into_carrier(self) -> Result<Carrier, Error> {
        match self.transport {
            Transport::Http1(carrier) => Ok(carrier.into_inner().expect("carrier mutex poisoned")),
            Transport::Http2(_) => Err(Error::protocol(Http2NotUpgradable)),
        }
    }
}

#[derive(Debug)]
struct Http2NotUpgradable;

impl std::fmt::Display for Http2NotUpgradable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebSocket upgrade requires an HTTP/1.1 connection")
    }
}

impl std::error::Error for Http2NotUpgradable {}

impl std::fmt::Debug for RealConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealConnection")
            .field("route", &self.route)
            .field("protocol", &self.protocol)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}
