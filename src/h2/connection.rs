//! A shared HTTP/2 connection: one physical [`Carrier`] multiplexing many
//! [`Http2Stream`]s (spec.md SS3, SS4.5).
//!
//! The teacher delegates this entirely to an external `h2` crate and never
//! implements it; this module is new. The single-reader-thread-owns-the-
//! socket shape is grounded on the blocking-I/O idiom in the teacher's own
//! `client/pool.rs` (one thread per connection doing blocking reads) rather
//! than on any async reactor design.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::connection::Carrier;
use crate::error::Error;
use crate::h2::flow_control::FlowWindow;
use crate::h2::frame::{flags, Frame, FrameHeader, FrameType, ErrorCode, CLIENT_PREFACE, FRAME_HEADER_LEN};
use crate::h2::hpack::Hpack;
use crate::h2::ping::{Action as PingAction, Config as PingConfig, PingManager};
use crate::h2::settings::Settings;
use crate::h2::stream::{Http2Stream, StreamEvent, StreamIdAllocator, StreamState};
use crate::header::{Headers, Name, PseudoName};

use std::io::{Read, Write};

/// A header block received via PUSH_PROMISE, queued for the caller to
/// accept or cancel (SS4.5 "server push observation").
pub struct PushedStream {
    pub promised_stream_id: u32,
    pub request_headers: Vec<(String, String)>,
}

struct Inner {
    carrier: Mutex<Carrier>,
    streams: Mutex<HashMap<u32, Arc<Http2Stream>>>,
    stream_ids: StreamIdAllocator,
    encoder: Mutex<Hpack>,
    decoder: Mutex<Hpack>,
    our_settings: Mutex<Settings>,
    peer_settings: Mutex<Settings>,
    connection_send_window: Mutex<FlowWindow>,
    connection_recv_window: Mutex<FlowWindow>,
    ping: Mutex<PingManager>,
    goaway_received: AtomicBool,
    last_good_stream_id: AtomicU32,
    pending_pushes: Mutex<Vec<PushedStream>>,
}

/// A shared HTTP/2 connection handle. Cheaply cloned; all clones refer to
/// the same underlying connection.
#[derive(Clone)]
pub struct H2Connection {
    inner: Arc<Inner>,
}

impl H2Connection {
    /// Perform the client preface + SETTINGS handshake and spawn the
    /// reader thread that will own the carrier for the connection's life.
    pub fn new(carrier: Carrier, _client: bool) -> H2Connection {
        let inner = Arc::new(Inner {
            carrier: Mutex::new(carrier),
            streams: Mutex::new(HashMap::new()),
            stream_ids: StreamIdAllocator::new(),
            encoder: Mutex::new(Hpack::new(4096)),
            decoder: Mutex::new(Hpack::new(4096)),
            our_settings: Mutex::new(Settings::client_defaults()),
            peer_settings: Mutex::new(Settings::default()),
            connection_send_window: Mutex::new(FlowWindow::new(65_535)),
            connection_recv_window: Mutex::new(FlowWindow::new(65_535)),
            ping: Mutex::new(PingManager::new(PingConfig::default())),
            goaway_received: AtomicBool::new(false),
            last_good_stream_id: AtomicU32::new(u32::MAX),
            pending_pushes: Mutex::new(Vec::new()),
        });

        let connection = H2Connection { inner };
        connection.send_preface_and_settings();

        let reader_handle = connection.clone();
        std::thread::spawn(move || reader_handle.run_reader_loop());

        connection
    }

    fn send_preface_and_settings(&self) {
        let mut carrier = self.inner.carrier.lock().unwrap();
        let _ = carrier.write_all(CLIENT_PREFACE);
        let settings = self.inner.our_settings.lock().unwrap().as_params();
        let mut out = BytesMut::new();
        Frame::Settings { ack: false, params: settings }.write(&mut out);
        let _ = carrier.write_all(&out);
        let _ = carrier.flush();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.goaway_received.load(Ordering::Acquire)
    }

    pub fn take_pushed_streams(&self) -> Vec<PushedStream> {
        std::mem::take(&mut *self.inner.pending_pushes.lock().unwrap())
    }

    /// Open a new client-initiated stream and send its HEADERS frame.
    pub fn open_stream(&self, headers: &Headers, end_stream: bool) -> Result<Arc<Http2Stream>, Error> {
        let id = self.inner.stream_ids.next();
        let initial_send = self.inner.peer_settings.lock().unwrap().initial_window_size;
        let initial_recv = self.inner.our_settings.lock().unwrap().initial_window_size;
        let stream = Arc::new(Http2Stream::new(id, initial_send, initial_recv));
        stream.set_state(StreamState::Open);
        self.inner.streams.lock().unwrap().insert(id, stream.clone());
        self.inner.ping.lock().unwrap().note_stream_opened();

        let wire_headers: Vec<_> = headers.iter_wire_order().map(|(n, v)| (n.clone(), v.clone())).collect();
        let block = self.inner.encoder.lock().unwrap().encode(&wire_headers);
        self.write_frame(Frame::Headers {
            stream_id: id,
            header_block: block,
            end_stream,
            end_headers: true,
        })?;

        if end_stream {
            stream.set_state(StreamState::HalfClosedLocal);
        }
        Ok(stream)
    }

    /// Send one DATA frame for `stream`, respecting both the stream and
    /// connection send windows (blocks briefly, retrying, if the window is
    /// currently exhausted — SS4.1's write budget still applies to the
    /// call overall).
    pub fn send_data(&self, stream: &Http2Stream, chunk: &[u8], end_stream: bool) -> Result<(), Error> {
        let max_frame = self.inner.peer_settings.lock().unwrap().max_frame_size as usize;
        for piece in chunk.chunks(max_frame.max(1)) {
            self.wait_for_window(stream, piece.len() as u32)?;
            self.write_frame(Frame::Data {
                stream_id: stream.id,
                data: Bytes::copy_from_slice(piece),
                end_stream: false,
            })?;
            stream.send_window.lock().unwrap().consume(piece.len() as u32);
            self.inner.connection_send_window.lock().unwrap().consume(piece.len() as u32);
        }
        if end_stream {
            self.write_frame(Frame::Data {
                stream_id: stream.id,
                data: Bytes::new(),
                end_stream: true,
            })?;
            stream.set_state(StreamState::HalfClosedLocal);
        }
        Ok(())
    }

    fn wait_for_window(&self, stream: &Http2Stream, needed: u32) -> Result<(), Error> {
        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        loop {
            let stream_ok = stream.send_window.lock().unwrap().can_send(needed);
            let conn_ok = self.inner.connection_send_window.lock().unwrap().can_send(needed);
            if stream_ok && conn_ok {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(Error::timeout(crate::error::TimeoutKind::Write, Duration::from_secs(30)));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn reset_stream(&self, stream: &Http2Stream, error_code: ErrorCode) -> Result<(), Error> {
        stream.set_state(StreamState::Closed);
        self.write_frame(Frame::RstStream { stream_id: stream.id, error_code })
    }

    fn write_frame(&self, frame: Frame) -> Result<(), Error> {
        let mut out = BytesMut::new();
        frame.write(&mut out);
        let mut carrier = self.inner.carrier.lock().unwrap();
        carrier.write_all(&out).map_err(Error::io)?;
        carrier.flush().map_err(Error::io)
    }

    /// Runs for the connection's lifetime on its own thread, reading and
    /// dispatching frames. Exits when the carrier errors or a GOAWAY with
    /// no more work is observed.
    fn run_reader_loop(self) {
        loop {
            match self.read_one_frame() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => {
                    self.shut_down_all_streams();
                    break;
                }
            }
        }
    }

    fn shut_down_all_streams(&self) {
        self.inner.goaway_received.store(true, Ordering::Release);
        let streams = self.inner.streams.lock().unwrap();
        for stream in streams.values() {
            stream.set_state(StreamState::Closed);
            stream.push_event(StreamEvent::ConnectionClosed);
        }
    }

    /// Reads and dispatches exactly one frame. Returns `Ok(false)` on a
    /// graceful EOF.
    fn read_one_frame(&self) -> Result<bool, Error> {
        let mut header_buf = [0u8; FRAME_HEADER_LEN];
        {
            let mut carrier = self.inner.carrier.lock().unwrap();
            match read_exact_or_eof(&mut *carrier, &mut header_buf)? {
                false => return Ok(false),
                true => {}
            }
        }
        let header = FrameHeader::parse(&header_buf)?;
        let mut payload = vec![0u8; header.length as usize];
        {
            let mut carrier = self.inner.carrier.lock().unwrap();
            carrier.read_exact(&mut payload).map_err(Error::io)?;
        }
        let frame = Frame::parse(&header, Bytes::from(payload))?;
        self.dispatch(frame)?;
        Ok(true)
    }

    fn dispatch(&self, frame: Frame) -> Result<(), Error> {
        match frame {
            Frame::Settings { ack, params } => self.on_settings(ack, params)?,
            Frame::Ping { ack, payload } => self.on_ping(ack, payload)?,
            Frame::WindowUpdate { stream_id, increment } => self.on_window_update(stream_id, increment)?,
            Frame::GoAway { last_stream_id, error_code, .. } => self.on_goaway(last_stream_id, error_code),
            Frame::Headers { stream_id, header_block, end_stream, .. } => {
                self.on_headers(stream_id, header_block, end_stream)?
            }
            Frame::Data { stream_id, data, end_stream } => self.on_data(stream_id, data, end_stream)?,
            Frame::RstStream { stream_id, error_code } => self.on_rst_stream(stream_id, error_code),
            Frame::PushPromise { promised_stream_id, header_block, .. } => {
                self.on_push_promise(promised_stream_id, header_block)?
            }
            Frame::Priority { .. } | Frame::Continuation { .. } => {}
        }
        Ok(())
    }

    fn on_settings(&self, ack: bool, params: Vec<(u16, u32)>) -> Result<(), Error> {
        if ack {
            return Ok(());
        }
        let delta = self.inner.peer_settings.lock().unwrap().apply(&params);
        if delta != 0 {
            let streams = self.inner.streams.lock().unwrap();
            for stream in streams.values() {
                stream.send_window.lock().unwrap().apply_settings_delta(delta);
            }
        }
        self.write_frame(Frame::Settings { ack: true, params: Vec::new() })
    }

    fn on_ping(&self, ack: bool, payload: [u8; 8]) -> Result<(), Error> {
        if ack {
            self.inner.ping.lock().unwrap().on_ping_ack();
            return Ok(());
        }
        self.write_frame(Frame::Ping { ack: true, payload })
    }

    fn on_window_update(&self, stream_id: u32, increment: u32) -> Result<(), Error> {
        if stream_id == 0 {
            self.inner.connection_send_window.lock().unwrap().increment(increment)?;
        } else if let Some(stream) = self.inner.streams.lock().unwrap().get(&stream_id) {
            stream.send_window.lock().unwrap().increment(increment)?;
        }
        Ok(())
    }

    fn on_goaway(&self, last_stream_id: u32, _error_code: ErrorCode) {
        self.inner.goaway_received.store(true, Ordering::Release);
        self.inner.last_good_stream_id.store(last_stream_id, Ordering::Release);
        let streams = self.inner.streams.lock().unwrap();
        for (&id, stream) in streams.iter() {
            if id > last_stream_id {
                stream.push_event(StreamEvent::Reset { error_code: ErrorCode::REFUSED_STREAM });
            }
        }
    }

    fn on_headers(&self, stream_id: u32, header_block: Bytes, end_stream: bool) -> Result<(), Error> {
        let pairs = self.inner.decoder.lock().unwrap().decode(header_block)?;
        if let Some(stream) = self.inner.streams.lock().unwrap().get(&stream_id) {
            if end_stream {
                stream.set_state(StreamState::HalfClosedRemote);
            }
            stream.push_event(StreamEvent::Headers { pairs, end_stream });
        }
        Ok(())
    }

    fn on_data(&self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<(), Error> {
        let len = data.len() as u32;
        let should_bdp_ping = self.inner.ping.lock().unwrap().on_data_received(len);
        if should_bdp_ping {
            self.inner.ping.lock().unwrap().note_bdp_ping_sent();
            self.write_frame(Frame::Ping { ack: false, payload: [0; 8] })?;
        }

        if let Some(stream) = self.inner.streams.lock().unwrap().get(&stream_id) {
            let increment = stream.recv_window.lock().unwrap().consume_recv(len);
            if let Some(increment) = increment {
                self.write_frame(Frame::WindowUpdate { stream_id, increment })?;
            }
            if end_stream {
                stream.set_state(StreamState::HalfClosedRemote);
            }
            stream.push_event(StreamEvent::Data { chunk: data, end_stream });
        }

        let increment = self.inner.connection_recv_window.lock().unwrap().consume_recv(len);
        if let Some(increment) = increment {
            self.write_frame(Frame::WindowUpdate { stream_id: 0, increment })?;
        }
        Ok(())
    }

    fn on_rst_stream(&self, stream_id: u32, error_code: ErrorCode) {
        if let Some(stream) = self.inner.streams.lock().unwrap().get(&stream_id) {
            stream.set_state(StreamState::Closed);
            stream.push_event(StreamEvent::Reset { error_code });
        }
        self.inner.ping.lock().unwrap().note_stream_closed();
    }

    fn on_push_promise(&self, promised_stream_id: u32, header_block: Bytes) -> Result<(), Error> {
        let pairs = self.inner.decoder.lock().unwrap().decode(header_block)?;
        self.inner.pending_pushes.lock().unwrap().push(PushedStream {
            promised_stream_id,
            request_headers: pairs,
        });
        Ok(())
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, Error> {
    let mut read = 0;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..]).map_err(Error::io)?;
        if n == 0 {
            return Ok(read == 0);
        }
        read += n;
    }
    Ok(true)
}

/// Converts wire-decoded `(name, value)` string pairs back into our typed
/// [`Headers`], classifying the leading-colon names as pseudo-headers.
pub fn pairs_to_headers(pairs: Vec<(String, String)>) -> Result<Headers, Error> {
    let mut headers = Headers::new();
    for (name, value) in pairs {
        match name.as_str() {
            ":method" => headers.push_pseudo(PseudoName::Method, http::HeaderValue::from_str(&value).map_err(Error::protocol)?),
            ":scheme" => headers.push_pseudo(PseudoName::Scheme, http::HeaderValue::from_str(&value).map_err(Error::protocol)?),
            ":authority" => headers.push_pseudo(PseudoName::Authority, http::HeaderValue::from_str(&value).map_err(Error::protocol)?),
            ":path" => headers.push_pseudo(PseudoName::Path, http::HeaderValue::from_str(&value).map_err(Error::protocol)?),
            ":status" => headers.push_pseudo(PseudoName::Status, http::HeaderValue::from_str(&value).map_err(Error::protocol)?),
            _ => headers.push_str(&name, &value).map_err(Error::protocol)?,
        }
    }
    Ok(headers)
}
