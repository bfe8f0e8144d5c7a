//! A single HTTP/2 stream's state machine (RFC 7540 SS5.1, SPEC_FULL.md
//! SS4.5) and the event channel a blocking caller waits on for its
//! response.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Error, TimeoutKind};
use crate::h2::flow_control::FlowWindow;
use crate::h2::frame::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// An event delivered from the connection's reader to a stream's owner.
#[derive(Debug)]
pub enum StreamEvent {
    Headers { pairs: Vec<(String, String)>, end_stream: bool },
    Data { chunk: Bytes, end_stream: bool },
    Reset { error_code: ErrorCode },
    ConnectionClosed,
}

/// One HTTP/2 stream, owned jointly by the connection's reader thread
/// (which pushes events) and the thread driving the call (which reads
/// them and writes request DATA frames).
pub struct Http2Stream {
    pub id: u32,
    state: Mutex<StreamState>,
    pub send_window: Mutex<FlowWindow>,
    pub recv_window: Mutex<FlowWindow>,
    events_tx: Sender<StreamEvent>,
    events_rx: Receiver<StreamEvent>,
    received_headers: AtomicU32,
}

impl Http2Stream {
    pub fn new(id: u32, initial_send_window: u32, initial_recv_window: u32) -> Http2Stream {
        let (events_tx, events_rx) = bounded(64);
        Http2Stream {
            id,
            state: Mutex::new(StreamState::Idle),
            send_window: Mutex::new(FlowWindow::new(initial_send_window)),
            recv_window: Mutex::new(FlowWindow::new(initial_recv_window)),
            events_tx,
            events_rx,
            received_headers: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: StreamState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Called by the connection reader thread to hand an event to whoever
    /// is driving this stream. Never blocks indefinitely: the channel is
    /// bounded but generously sized, and a full channel indicates the
    /// caller abandoned the stream, so the event is simply dropped.
    pub fn push_event(&self, event: StreamEvent) {
        if matches!(event, StreamEvent::Headers { .. }) {
            self.received_headers.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.events_tx.try_send(event);
    }

    /// Block for the next event, honoring `timeout` (SS4.1's per-read
    /// budget).
    pub fn recv_event(&self, timeout: Duration) -> Result<StreamEvent, Error> {
        self.events_rx
            .recv_timeout(timeout)
            .map_err(|_| Error::timeout(TimeoutKind::Read, timeout))
    }

    pub fn header_block_count(&self) -> u32 {
        self.received_headers.load(Ordering::Relaxed)
    }
}

/// Allocates client-initiated stream ids: odd, strictly increasing, starting
/// at 3 (RFC 7540 SS5.1.1 — id 1 is reserved for an HTTP/1.1 Upgrade).
pub struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    pub fn new() -> StreamIdAllocator {
        StreamIdAllocator { next: AtomicU32::new(3) }
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(2, Ordering::SeqCst)
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        StreamIdAllocator::new()
    }
}
