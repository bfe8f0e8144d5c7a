//! Polymorphic request/response bodies (SPEC_FULL.md SS3, DESIGN NOTES SS9).
//!
//! `Body` is the capability set the original source's `ClientRequestBody`/
//! `ClientResponseBody` pair collapses to: a content type, a known-or-not
//! byte size, a way to stream bytes into a sink, and two flags controlling
//! retry/duplex behavior. Concrete variants below cover the common cases;
//! callers may implement `Body` directly for anything else.

mod bytes_body;
mod file_body;
mod multipart;
mod streamed;

pub use bytes_body::BytesBody;
pub use file_body::FileBody;
pub use multipart::{MultipartBody, MultipartPart};
pub use streamed::StreamedBody;

use std::io::{self, Read, Write};

/// A request or response payload.
///
/// `byte_size` returning `None` means "unknown length" (chunked framing on
/// the wire); `is_one_shot` bodies cannot be replayed and therefore cannot
/// be retried or followed across a redirect (SS4.1).
pub trait Body: Send {
    /// The `Content-Type` header value this body should be sent with, if any.
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// The exact byte length, if known ahead of writing.
    fn byte_size(&self) -> Option<u64>;

    /// Write the full body to `sink`.
    fn write_to(&mut self, sink: &mut dyn Write) -> io::Result<()>;

    /// Duplex bodies may still be writing while the response is read
    /// (used by WebSocket upgrade and streaming uploads); non-duplex
    /// bodies are fully written before the response is read.
    fn is_duplex(&self) -> bool {
        false
    }

    /// One-shot bodies can be written exactly once: retries and redirects
    /// that would require re-sending the body are not possible.
    fn is_one_shot(&self) -> bool {
        false
    }

    /// A fresh, independent copy of this body for a retry or redirect
    /// re-entry into the chain. `None` means "cannot be replayed" — the
    /// retry/redirect interceptor then treats the request as one-shot
    /// regardless of `is_one_shot`.
    fn try_clone(&self) -> Option<Box<dyn Body>> {
        None
    }
}

/// An empty body: zero bytes, known length, never one-shot.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBody;

impl Body for EmptyBody {
    fn byte_size(&self) -> Option<u64> {
        Some(0)
    }

    fn write_to(&mut self, _sink: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> Option<Box<dyn Body>> {
        Some(Box::new(EmptyBody))
    }
}

/// Copies from `reader` to `sink` in fixed-size chunks, used by every
/// streaming body variant.
pub(crate) fn copy_all(reader: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64> {
    let mut buf = [0u8; 8 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}
