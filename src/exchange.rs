//! Exchange orchestrator: drives one request/response across whichever
//! wire protocol the acquired connection speaks (spec.md SS4.4, SS4.5).
//!
//! The call-server interceptor owns an `Exchange` for the lifetime of one
//! attempt against one connection. Retries and redirects create a new
//! `Exchange` against a (possibly different) connection rather than
//! reusing this one, matching the teacher's `Http1xxResponseData`/
//! `HttpCodec` relationship where a codec is bound to a single stream.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::connection::{Carrier, RealConnection, Transport};
use crate::error::{Error, Kind, TimeoutKind};
use crate::h1::{self, RequestBodyWriter, ResponseBodyMode, State};
use crate::h2::frame::ErrorCode;
use crate::h2::pairs_to_headers;
use crate::h2::stream::{Http2Stream, StreamEvent};
use crate::header::{Headers, Name, PseudoName};
use crate::request::Request;
use crate::response::{Protocol, Response, ResponseBody};
use crate::url::Url;

/// Per-exchange read/write deadlines (SS4.1's connect/read/write/call
/// budgets, minus connect which the connector already enforces).
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
        }
    }
}

/// One request/response pair carried out over an already-acquired
/// connection.
pub enum Exchange {
    H1(H1Exchange),
    H2(H2Exchange),
}

impl Exchange {
    pub fn new(connection: Arc<RealConnection>, timeouts: Timeouts) -> Exchange {
        match connection.transport() {
            Transport::Http1(_) => Exchange::H1(H1Exchange { connection, timeouts, state: State::Idle }),
            Transport::Http2(_) => Exchange::H2(H2Exchange { connection, timeouts, stream: None }),
        }
    }

    /// Sends the request line/headers and body, then reads and returns
    /// the final (non-1xx) response head plus a readable body.
    ///
    /// `on_informational` is invoked for each 1xx response observed before
    /// the final one (SS4.4 Expect-100-continue); returning `false` stops
    /// the body from being written (the server rejected the Expect).
    pub fn execute(
        &mut self,
        request: &mut Request,
        url: &Url,
        headers: &Headers,
        cancel: &Arc<AtomicBool>,
        mut on_informational: impl FnMut(u16) -> bool,
    ) -> Result<Response, Error> {
        match self {
            Exchange::H1(ex) => ex.execute(request, url, headers, cancel, &mut on_informational),
            Exchange::H2(ex) => ex.execute(request, url, headers, cancel, &mut on_informational),
        }
    }

    pub fn connection(&self) -> &Arc<RealConnection> {
        match self {
            Exchange::H1(ex) => &ex.connection,
            Exchange::H2(ex) => &ex.connection,
        }
    }
}

pub struct H1Exchange {
    connection: Arc<RealConnection>,
    timeouts: Timeouts,
    state: State,
}

impl H1Exchange {
    fn execute(
        &mut self,
        request: &mut Request,
        url: &Url,
        headers: &Headers,
        cancel: &Arc<AtomicBool>,
        on_informational: &mut dyn FnMut(u16) -> bool,
    ) -> Result<Response, Error> {
        let Transport::Http1(carrier_lock) = self.connection.transport() else {
            unreachable!("H1Exchange over a non-HTTP/1 connection");
        };
        let mut guard = carrier_lock.lock().unwrap();
        apply_read_write_timeouts(&mut guard, self.timeouts)?;
        let carrier = &mut *guard;

        self.state = State::OpenRequestBody;
        h1::write_request_head(&mut *carrier, request.method(), url, headers).map_err(Error::io)?;

        let expects_continue = headers.get("expect").map(|v| v.eq_ignore_ascii_case("100-continue")).unwrap_or(false);

        if expects_continue {
            carrier.flush().map_err(Error::io)?;
            loop {
                match h1::read_response_head_timing_out_as(&mut *carrier, self.timeouts.read) {
                    Ok(head) if head.status.as_u16() == 100 => break,
                    Ok(head) if head.status.is_informational() => {
                        on_informational(head.status.as_u16());
                        continue;
                    }
                    // A final (non-1xx) response arrived instead of the
                    // expected "100 Continue": the server rejected the
                    // Expect, so the body is never sent (SS4.4 "non-100 ->
                    // skip body") and this is the real response — it must
                    // not be mistaken for a status line and re-read.
                    Ok(head) => {
                        drop(carrier);
                        return self.finish(request, head, guard);
                    }
                    // SS4.4 "timeout -> write body anyway": the server
                    // neither confirmed nor rejected within the write
                    // timeout, so proceed as if it had confirmed.
                    Err(e) if e.kind() == Kind::Timeout(TimeoutKind::Read) => break,
                    Err(e) => return Err(e),
                }
            }
        }

        self.state = State::WritingRequestBody;
        if request.has_body() {
            write_body(&mut *carrier, request, headers)?;
        }
        carrier.flush().map_err(Error::io)?;

        self.state = State::ReadResponseHeaders;
        let mut head = h1::read_response_head(&mut *carrier)?;
        while head.status.is_informational() {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::canceled());
            }
            on_informational(head.status.as_u16());
            head = h1::read_response_head(&mut *carrier)?;
        }

        drop(carrier);
        self.finish(request, head, guard)
    }

    /// Builds the final [`Response`] for `head`, releasing `guard` (and
    /// returning the connection to the pool or closing it, per the
    /// framing mode) before handing the body reader to the caller.
    fn finish(
        &mut self,
        request: &mut Request,
        head: h1::ResponseHead,
        guard: std::sync::MutexGuard<'_, Carrier>,
    ) -> Result<Response, Error> {
        self.state = State::OpenResponseBody;
        let mode = h1::response_body_mode(request.method(), head.status, &head.headers);
        let connection_close = head
            .headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
            || matches!(mode, ResponseBodyMode::UntilClose);

        drop(guard);

        self.state = State::ReadingResponseBody;
        let body = make_h1_body(self.connection.clone(), mode, connection_close);

        let protocol = match head.protocol {
            Protocol::Http10 => Protocol::Http10,
            _ => Protocol::Http11,
        };

        self.state = State::Closed;
        Ok(Response::builder(Arc::new(request_snapshot(request)), protocol, head.status)
            .status_message(head.status_message)
            .headers(head.headers)
            .body(body)
            .build())
    }
}

fn write_body(carrier: &mut Carrier, request: &mut Request, headers: &Headers) -> Result<(), Error> {
    let chunked = headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false);
    if chunked {
        let mut writer = RequestBodyWriter::chunked(carrier);
        request.body_mut().write_to(&mut writer).map_err(Error::io)?;
        writer.finish(&Headers::new())
    } else {
        let length = request.body().byte_size().unwrap_or(0);
        let mut writer = RequestBodyWriter::fixed(carrier, length);
        request.body_mut().write_to(&mut writer).map_err(Error::io)?;
        writer.finish(&Headers::new())
    }
}

/// Reads from an HTTP/1.1 connection's shared carrier one call at a time,
/// re-acquiring the connection's mutex per `read` — the exchange that
/// produced this body no longer holds the lock once headers are parsed.
struct ConnectionReader {
    connection: Arc<RealConnection>,
}

impl Read for ConnectionReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Transport::Http1(carrier_lock) = self.connection.transport() else {
            unreachable!("ConnectionReader over a non-HTTP/1 connection");
        };
        let mut carrier = carrier_lock.lock().unwrap();
        carrier.read(buf)
    }
}

/// A body reader bounded to a declared `Content-Length`.
struct FixedReader {
    inner: ConnectionReader,
    remaining: u64,
}

impl Read for FixedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// A `Transfer-Encoding: chunked` body reader, mirroring
/// `h1::ChunkedBodyReader`'s state machine but owning its source instead
/// of borrowing it, since `ResponseBody` needs a `'static` reader.
struct ChunkedReader {
    inner: ConnectionReader,
    state: ChunkedState,
}

#[derive(Clone, Copy)]
enum ChunkedState {
    Size,
    Data(u64),
    DataCrlf,
    Trailers,
    Done,
}

impl ChunkedReader {
    fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.inner.read(&mut byte)?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "chunked body truncated"));
            }
            if byte[0] == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.state {
                ChunkedState::Done => return Ok(0),
                ChunkedState::Size => {
                    let line = self.read_line()?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_str, 16).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                    self.state = if size == 0 { ChunkedState::Trailers } else { ChunkedState::Data(size) };
                }
                ChunkedState::Data(0) => self.state = ChunkedState::DataCrlf,
                ChunkedState::Data(remaining) => {
                    let cap = (buf.len() as u64).min(remaining) as usize;
                    if cap == 0 {
                        return Ok(0);
                    }
                    let n = self.inner.read(&mut buf[..cap])?;
                    if n == 0 {
                        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "chunked body truncated"));
                    }
                    self.state = ChunkedState::Data(remaining - n as u64);
                    return Ok(n);
                }
                ChunkedState::DataCrlf => {
                    let _ = self.read_line()?;
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let line = self.read_line()?;
                    if line.is_empty() {
                        self.state = ChunkedState::Done;
                        return Ok(0);
                    }
                }
            }
        }
    }
}

fn make_h1_body(connection: Arc<RealConnection>, mode: ResponseBodyMode, should_close: bool) -> ResponseBody {
    let byte_size = match mode {
        ResponseBodyMode::NoBody => Some(0),
        ResponseBodyMode::Fixed(len) => Some(len),
        _ => None,
    };
    let reader: Box<dyn Read + Send> = match mode {
        ResponseBodyMode::NoBody => Box::new(std::io::empty()),
        ResponseBodyMode::Fixed(len) => Box::new(FixedReader { inner: ConnectionReader { connection: connection.clone() }, remaining: len }),
        ResponseBodyMode::Chunked => Box::new(ChunkedReader { inner: ConnectionReader { connection: connection.clone() }, state: ChunkedState::Size }),
        ResponseBodyMode::UntilClose => Box::new(ConnectionReader { connection: connection.clone() }),
    };
    ResponseBody::new(reader, byte_size).with_on_close(move || {
        if should_close {
            connection.mark_closed();
        } else {
            connection.mark_idle_now();
        }
    })
}

pub struct H2Exchange {
    connection: Arc<RealConnection>,
    timeouts: Timeouts,
    stream: Option<Arc<Http2Stream>>,
}

impl H2Exchange {
    fn execute(
        &mut self,
        request: &mut Request,
        url: &Url,
        headers: &Headers,
        cancel: &Arc<AtomicBool>,
        on_informational: &mut dyn FnMut(u16) -> bool,
    ) -> Result<Response, Error> {
        let Transport::Http2(h2) = self.connection.transport() else {
            unreachable!("H2Exchange over a non-HTTP/2 connection");
        };

        let mut wire_headers = Headers::new();
        wire_headers.push_pseudo(PseudoName::Method, http::HeaderValue::from_str(request.method().as_str()).map_err(Error::protocol)?);
        wire_headers.push_pseudo(PseudoName::Scheme, http::HeaderValue::from_static(if url.scheme().is_tls() { "https" } else { "http" }));
        wire_headers.push_pseudo(PseudoName::Authority, http::HeaderValue::from_str(&url.host_header()).map_err(Error::protocol)?);
        wire_headers.push_pseudo(PseudoName::Path, http::HeaderValue::from_str(&url.path_and_query()).map_err(Error::protocol)?);
        for (name, value) in headers.iter() {
            if let Name::Regular(n) = name {
                wire_headers.push(n.clone(), value.clone());
            }
        }

        let has_body = request.has_body();
        let stream = h2.open_stream(&wire_headers, !has_body)?;
        self.stream = Some(stream.clone());

        if has_body {
            let mut buf = Vec::new();
            request.body_mut().write_to(&mut buf).map_err(Error::io)?;
            h2.send_data(&stream, &buf, true)?;
        }

        loop {
            if cancel.load(Ordering::Relaxed) {
                h2.reset_stream(&stream, ErrorCode::CANCEL)?;
                return Err(Error::canceled());
            }
            match stream.recv_event(self.timeouts.read)? {
                StreamEvent::Headers { pairs, end_stream } => {
                    let response_headers = pairs_to_headers(pairs)?;
                    let status = response_headers
                        .iter()
                        .find_map(|(n, v)| matches!(n, Name::Pseudo(PseudoName::Status)).then(|| v.clone()))
                        .ok_or_else(|| Error::protocol(MissingStatus))?;
                    let status_str = status.to_str().map_err(Error::protocol)?;
                    let status_code = http::StatusCode::from_bytes(status_str.as_bytes()).map_err(Error::protocol)?;

                    if status_code.is_informational() {
                        on_informational(status_code.as_u16());
                        continue;
                    }

                    let body = if end_stream {
                        ResponseBody::new(std::io::empty(), Some(0))
                    } else {
                        h2_body(stream.clone())
                    };

                    return Ok(Response::builder(Arc::new(request_snapshot(request)), Protocol::Http2, status_code)
                        .headers(response_headers)
                        .body(body)
                        .build());
                }
                StreamEvent::Reset { error_code } => return Err(Error::http2_reset(error_code.0)),
                StreamEvent::ConnectionClosed => return Err(Error::protocol(ConnectionClosedMidExchange)),
                StreamEvent::Data { .. } => continue,
            }
        }
    }
}

fn h2_body(stream: Arc<Http2Stream>) -> ResponseBody {
    let reader = H2BodyReader { stream, buffered: Bytes::new(), done: false };
    ResponseBody::new(reader, None)
}

struct H2BodyReader {
    stream: Arc<Http2Stream>,
    buffered: Bytes,
    done: bool,
}

impl Read for H2BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if !self.buffered.is_empty() {
                let n = self.buffered.len().min(buf.len());
                buf[..n].copy_from_slice(&self.buffered[..n]);
                self.buffered = self.buffered.slice(n..);
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            match self.stream.recv_event(Duration::from_secs(60)) {
                Ok(StreamEvent::Data { chunk, end_stream }) => {
                    self.buffered = chunk;
                    self.done = end_stream;
                    if self.buffered.is_empty() && self.done {
                        return Ok(0);
                    }
                }
                Ok(StreamEvent::Reset { error_code }) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("stream reset: {}", error_code.0)))
                }
                Ok(StreamEvent::ConnectionClosed) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"))
                }
                Ok(StreamEvent::Headers { .. }) => continue,
                Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, e)),
            }
        }
    }
}

fn apply_read_write_timeouts(carrier: &mut Carrier, timeouts: Timeouts) -> Result<(), Error> {
    match carrier {
        Carrier::Plain(tcp) => {
            tcp.set_read_timeout(Some(timeouts.read)).map_err(Error::io)?;
            tcp.set_write_timeout(Some(timeouts.write)).map_err(Error::io)?;
        }
        Carrier::Tls(stream, _) => {
            stream.set_read_timeout(Some(timeouts.read)).map_err(Error::io)?;
            stream.set_write_timeout(Some(timeouts.write)).map_err(Error::io)?;
        }
    }
    Ok(())
}

fn request_snapshot(request: &Request) -> Request {
    request
        .try_clone()
        .unwrap_or_else(|| request.with_method(request.method().clone(), request.headers().clone(), Box::new(crate::body::EmptyBody)))
}

#[derive(Debug)]
struct MissingStatus;

impl std::fmt::Display for MissingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HTTP/2 response headers missing :status")
    }
}

impl std::error::Error for MissingStatus {}

#[derive(Debug)]
struct ConnectionClosedMidExchange;

impl std::fmt::Display for ConnectionClosedMidExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("connection closed before the response completed")
    }
}

impl std::error::Error for ConnectionClosedMidExchange {}
