//! RFC 6455 WebSocket client over an upgraded HTTP/1.1 connection
//! (spec.md §4.7).
//!
//! A single background thread drives the connection after the handshake
//! completes: `rustls::StreamOwned` requires `&mut self` for both read and
//! write and isn't `Sync`, so a true two-thread reader/writer split (the
//! way a plain `TcpStream` could be handled via `try_clone`) isn't
//! available once TLS is in the mix. Instead the carrier's read timeout is
//! set short and one loop cooperatively services incoming frames, the
//! outgoing queue, and the ping schedule in turn — the same cooperative,
//! poll-with-a-deadline style this crate already uses for call
//! cancellation (`exchange.rs`). The push-model listener trait is
//! grounded on the callback-based `WebSocketHandler` pattern used
//! elsewhere in the retrieval pack for frame-driven connections.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rand::Rng;

use crate::client::ClientConfig;
use crate::connection::Carrier;
use crate::error::Error;
use crate::request::Request;

pub mod deflate;
pub mod frame;
mod handshake;

use deflate::{DeflateConfig, Deflater, Inflater};
use frame::Opcode;

/// Default bound on the outgoing queue (spec.md §4.7: "default 16 MiB").
pub const DEFAULT_MAX_QUEUE_SIZE: u64 = 16 * 1024 * 1024;

/// How long a background-thread read blocks before the loop re-checks the
/// outgoing queue, the ping schedule, and the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One complete, reassembled message delivered to a listener.
#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// Push-model callbacks driven by the background I/O thread as frames
/// arrive. Every method has a no-op default so a listener only overrides
/// what it cares about, the same shape as OkHttp's `WebSocketListener`.
pub trait WebSocketListener: Send + Sync {
    fn on_open(&self, _ws: &Arc<WebSocket>) {}
    fn on_message(&self, _ws: &Arc<WebSocket>, _message: Message) {}
    fn on_closing(&self, _ws: &Arc<WebSocket>, _code: u16, _reason: &str) {}
    fn on_closed(&self, _ws: &Arc<WebSocket>, _code: u16, _reason: &str) {}
    fn on_failure(&self, _ws: &Arc<WebSocket>, _error: &Error) {}
}

enum OutgoingItem {
    Text(String),
    Binary(Vec<u8>),
    Close(u16, String),
}

impl OutgoingItem {
    fn byte_len(&self) -> u64 {
        match self {
            OutgoingItem::Text(s) => s.len() as u64,
            OutgoingItem::Binary(b) => b.len() as u64,
            OutgoingItem::Close(_, reason) => 2 + reason.len() as u64,
        }
    }
}

/// A live WebSocket connection (spec.md §4.7). Cheap to share: every
/// mutating operation only enqueues work for the background thread.
pub struct WebSocket {
    outgoing_tx: crossbeam_channel::Sender<OutgoingItem>,
    queued_bytes: AtomicU64,
    max_queue_size: u64,
    canceled: AtomicBool,
    closing: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocket {
    /// Performs the opening handshake and starts the background I/O
    /// thread. Returns once the 101 response has been validated and
    /// `permessage-deflate` negotiated — `on_open` fires from the
    /// background thread just after this returns.
    pub fn connect(config: Arc<ClientConfig>, request: Request, listener: Arc<dyn WebSocketListener>) -> Result<Arc<WebSocket>, Error> {
        let (carrier, deflate_config) = handshake::open(&config, &request)?;
        carrier.set_read_timeout(Some(POLL_INTERVAL)).map_err(Error::io)?;

        let (outgoing_tx, outgoing_rx) = crossbeam_channel::unbounded();
        let ws = Arc::new(WebSocket {
            outgoing_tx,
            queued_bytes: AtomicU64::new(0),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            canceled: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            thread: Mutex::new(None),
        });

        let ping_interval = config.ping_interval;
        let thread_ws = ws.clone();
        let handle = thread::Builder::new()
            .name("waypoint-websocket".to_owned())
            .spawn(move || run_loop(carrier, deflate_config, listener, thread_ws, outgoing_rx, ping_interval))
            .map_err(Error::io)?;
        *ws.thread.lock().unwrap() = Some(handle);

        Ok(ws)
    }

    /// Enqueues a text message. Returns `false` once the outgoing queue
    /// would exceed `max_queue_size` bytes — the message is dropped, not
    /// buffered further.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.enqueue(OutgoingItem::Text(text.into()))
    }

    /// Enqueues a binary message.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.enqueue(OutgoingItem::Binary(data.into()))
    }

    /// Initiates a graceful close: enqueues a Close frame with `code` and
    /// `reason`. Returns `false` if a close was already initiated.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.enqueue(OutgoingItem::Close(code, reason.into()))
    }

    /// Immediately tears down the connection without a close handshake.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    fn enqueue(&self, item: OutgoingItem) -> bool {
        let len = item.byte_len();
        let total_after = self.queued_bytes.fetch_add(len, Ordering::AcqRel) + len;
        if total_after > self.max_queue_size {
            self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        self.outgoing_tx.send(item).is_ok()
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("queued_bytes", &self.queued_bytes.load(Ordering::Relaxed))
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish()
    }
}

/// First frame of a not-yet-finished fragmented message: its opcode, its
/// RSV1 bit (compression applies to the whole message, decided by the
/// first frame only), and the payload accumulated so far.
struct InProgressMessage {
    opcode: Opcode,
    rsv1: bool,
    payload: Vec<u8>,
}

enum Disposition {
    Continue,
    Stop,
}

fn run_loop(
    mut carrier: Carrier,
    deflate_config: Option<DeflateConfig>,
    listener: Arc<dyn WebSocketListener>,
    ws: Arc<WebSocket>,
    outgoing_rx: Receiver<OutgoingItem>,
    ping_interval: Option<Duration>,
) {
    let mut deflater = deflate_config.map(|c| Deflater::new(c.client_no_context_takeover));
    let mut inflater = deflate_config.map(|c| Inflater::new(c.server_no_context_takeover));

    listener.on_open(&ws);

    let result = drive(&mut carrier, &mut deflater, &mut inflater, &listener, &ws, &outgoing_rx, ping_interval);
    if let Err(error) = result {
        listener.on_failure(&ws, &error);
    }

    let _ = carrier.flush();
    drop(carrier);
}

fn drive(
    carrier: &mut Carrier,
    deflater: &mut Option<Deflater>,
    inflater: &mut Option<Inflater>,
    listener: &Arc<dyn WebSocketListener>,
    ws: &Arc<WebSocket>,
    outgoing_rx: &Receiver<OutgoingItem>,
    ping_interval: Option<Duration>,
) -> Result<(), Error> {
    let mut read_buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    let mut in_progress: Option<InProgressMessage> = None;
    let mut own_close_sent = false;
    let mut last_ping_sent: Option<Instant> = None;
    let mut awaiting_pong = false;

    loop {
        if ws.canceled.load(Ordering::Acquire) {
            return Ok(());
        }

        while let Ok(item) = outgoing_rx.try_recv() {
            let len = item.byte_len();
            match item {
                OutgoingItem::Text(text) => write_message(carrier, deflater, Opcode::Text, text.as_bytes())?,
                OutgoingItem::Binary(data) => write_message(carrier, deflater, Opcode::Binary, &data)?,
                OutgoingItem::Close(code, reason) => {
                    write_control_frame(carrier, Opcode::Close, &frame::encode_close_payload(code, &reason))?;
                    own_close_sent = true;
                }
            }
            ws.queued_bytes.fetch_sub(len, Ordering::AcqRel);
        }

        if let Some(interval) = ping_interval {
            match last_ping_sent {
                Some(sent) if awaiting_pong => {
                    if sent.elapsed() >= interval {
                        write_control_frame(carrier, Opcode::Close, &frame::encode_close_payload(1000, "ping timeout"))?;
                        listener.on_closed(ws, 1000, "ping timeout");
                        return Ok(());
                    }
                }
                Some(sent) if sent.elapsed() < interval => {}
                _ => {
                    write_control_frame(carrier, Opcode::Ping, b"")?;
                    last_ping_sent = Some(Instant::now());
                    awaiting_pong = true;
                }
            }
        }

        match carrier.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => read_buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(Error::io(e)),
        }

        loop {
            match frame::parse(&read_buf)? {
                None => break,
                Some((raw, consumed)) => {
                    read_buf.drain(..consumed);
                    let disposition = handle_frame(raw, &mut in_progress, inflater, carrier, listener, ws, &mut own_close_sent, &mut awaiting_pong)?;
                    if matches!(disposition, Disposition::Stop) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_frame(
    raw: frame::RawFrame,
    in_progress: &mut Option<InProgressMessage>,
    inflater: &mut Option<Inflater>,
    carrier: &mut Carrier,
    listener: &Arc<dyn WebSocketListener>,
    ws: &Arc<WebSocket>,
    own_close_sent: &mut bool,
    awaiting_pong: &mut bool,
) -> Result<Disposition, Error> {
    match raw.opcode {
        Opcode::Continuation => {
            let Some(msg) = in_progress else {
                return Err(Error::protocol(UnexpectedContinuation));
            };
            msg.payload.extend_from_slice(&raw.payload);
            if raw.fin {
                let msg = in_progress.take().expect("checked above");
                deliver_message(msg, inflater, listener, ws)?;
            }
            Ok(Disposition::Continue)
        }
        Opcode::Text | Opcode::Binary => {
            if in_progress.is_some() {
                return Err(Error::protocol(UnfinishedMessage));
            }
            if raw.fin {
                deliver_message(
                    InProgressMessage { opcode: raw.opcode, rsv1: raw.rsv1, payload: raw.payload },
                    inflater,
                    listener,
                    ws,
                )?;
            } else {
                *in_progress = Some(InProgressMessage { opcode: raw.opcode, rsv1: raw.rsv1, payload: raw.payload });
            }
            Ok(Disposition::Continue)
        }
        Opcode::Ping => {
            write_control_frame(carrier, Opcode::Pong, &raw.payload)?;
            Ok(Disposition::Continue)
        }
        Opcode::Pong => {
            *awaiting_pong = false;
            Ok(Disposition::Continue)
        }
        Opcode::Close => {
            let (code, reason) = frame::parse_close_payload(&raw.payload)?.unwrap_or((1005, String::new()));
            listener.on_closing(ws, code, &reason);
            if !*own_close_sent {
                write_control_frame(carrier, Opcode::Close, &frame::encode_close_payload(code, &reason))?;
                *own_close_sent = true;
            }
            listener.on_closed(ws, code, &reason);
            Ok(Disposition::Stop)
        }
    }
}

fn deliver_message(msg: InProgressMessage, inflater: &mut Option<Inflater>, listener: &Arc<dyn WebSocketListener>, ws: &Arc<WebSocket>) -> Result<(), Error> {
    let payload = if msg.rsv1 {
        let inflater = inflater.as_mut().ok_or_else(|| Error::protocol(UnexpectedRsv1))?;
        inflater.inflate(&msg.payload)?
    } else {
        msg.payload
    };
    let message = match msg.opcode {
        Opcode::Text => Message::Text(String::from_utf8(payload).map_err(Error::protocol)?),
        Opcode::Binary => Message::Binary(payload),
        _ => unreachable!("only Text/Binary start a message"),
    };
    listener.on_message(ws, message);
    Ok(())
}

/// Writes one data frame, compressing the payload (and setting RSV1)
/// first if `permessage-deflate` was negotiated for this direction.
fn write_message(carrier: &mut Carrier, deflater: &mut Option<Deflater>, opcode: Opcode, payload: &[u8]) -> Result<(), Error> {
    let (rsv1, framed_payload) = match deflater {
        Some(deflater) => (true, deflater.deflate(payload)?),
        None => (false, payload.to_vec()),
    };
    let mut out = Vec::with_capacity(framed_payload.len() + 14);
    frame::write(&mut out, true, rsv1, opcode, &framed_payload, random_mask_key());
    carrier.write_all(&out).map_err(Error::io)?;
    carrier.flush().map_err(Error::io)
}

/// Control frames (spec.md §4.7) are never compressed and never
/// fragmented.
fn write_control_frame(carrier: &mut Carrier, opcode: Opcode, payload: &[u8]) -> Result<(), Error> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    frame::write(&mut out, true, false, opcode, payload, random_mask_key());
    carrier.write_all(&out).map_err(Error::io)?;
    carrier.flush().map_err(Error::io)
}

fn random_mask_key() -> [u8; 4] {
    rand::thread_rng().gen()
}

#[derive(Debug)]
struct UnexpectedContinuation;

impl std::fmt::Display for UnexpectedContinuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("continuation frame with no message in progress")
    }
}

impl std::error::Error for UnexpectedContinuation {}

#[derive(Debug)]
struct UnfinishedMessage;

impl std::fmt::Display for UnfinishedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("new data frame arrived before the previous message's continuation finished")
    }
}

impl std::error::Error for UnfinishedMessage {}

#[derive(Debug)]
struct UnexpectedRsv1;

impl std::fmt::Display for UnexpectedRsv1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RSV1 set but permessage-deflate was not negotiated")
    }
}

impl std::error::Error for UnexpectedRsv1 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_item_byte_len_matches_payload() {
        assert_eq!(OutgoingItem::Text("hello".to_owned()).byte_len(), 5);
        assert_eq!(OutgoingItem::Binary(vec![1, 2, 3]).byte_len(), 3);
    }

    #[test]
    fn enqueue_rejects_once_over_budget() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let ws = WebSocket {
            outgoing_tx: tx,
            queued_bytes: AtomicU64::new(0),
            max_queue_size: 4,
            canceled: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            thread: Mutex::new(None),
        };
        assert!(ws.send_text("ab"));
        assert!(!ws.send_text("abc"));
        drop(rx);
    }
}
