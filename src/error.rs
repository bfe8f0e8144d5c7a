//! Error and Result types returned throughout the engine.
//!
//! Every failure surfaced to a caller is tagged with a [`Kind`] rather than
//! represented by a distinct Rust type per failure mode — callers match on
//! `error.kind()` instead of downcasting. The tag set matches the error
//! classification used by the retry policy (`interceptor::retry_and_follow_up`).

use std::fmt;
use std::io;
use std::time::Duration;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// An error produced by the client engine.
///
/// Distinguish error conditions with [`Error::kind`], not by downcasting —
/// the concrete cause is available via `source()` for diagnostics only.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// The classification of an [`Error`], per SPEC_FULL.md SS7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Underlying socket or file I/O failure.
    Io,
    /// A configured deadline elapsed.
    Timeout(TimeoutKind),
    /// The call was explicitly canceled; never retried.
    Canceled,
    /// Malformed status line, frame, chunk, header, or HPACK input.
    Protocol,
    /// TLS handshake or certificate verification failure.
    Tls,
    /// DNS resolution failed for every candidate address.
    UnknownHost,
    /// The TCP (or tunnel) connect attempt failed.
    Connect,
    /// An HTTP/2 stream was reset; carries the peer's error code.
    Http2StreamReset(u32),
}

/// Which timeout budget expired (SS4.1 "Four independent budgets").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Establishing the TCP/TLS connection took too long.
    Connect,
    /// Waiting on a read took too long.
    Read,
    /// Waiting on a write took too long.
    Write,
    /// The call's overall deadline elapsed.
    Call,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// The classification of this error.
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// True for [`Kind::Canceled`] — never retried, regardless of any other rule.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// Retryability per SS4.1's retry policy, independent of whether a next
    /// route exists (that decision lives in the retry interceptor).
    pub fn is_retryable_kind(&self) -> bool {
        match self.inner.kind {
            Kind::Canceled => false,
            Kind::Protocol => false,
            Kind::Tls => false,
            Kind::Io | Kind::UnknownHost | Kind::Connect => true,
            Kind::Timeout(TimeoutKind::Connect) => true,
            Kind::Timeout(_) => false,
            Kind::Http2StreamReset(code) => code == crate::h2::frame::ErrorCode::REFUSED_STREAM.0,
        }
    }

    pub(crate) fn io(cause: io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    /// Like [`Error::io`], but a socket deadline expiring (`WouldBlock` /
    /// `TimedOut`, which is what `set_read_timeout`/`set_write_timeout`
    /// produce on elapse) is reported as `Kind::Timeout(kind)` instead of
    /// `Kind::Io`, so callers waiting on a specific budget can tell the two
    /// apart.
    pub(crate) fn io_timeout(cause: io::Error, kind: TimeoutKind, after: Duration) -> Error {
        match cause.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::timeout(kind, after),
            _ => Error::io(cause),
        }
    }

    pub(crate) fn timeout(kind: TimeoutKind, after: Duration) -> Error {
        Error::new(Kind::Timeout(kind)).with(TimedOut { after })
    }

    pub(crate) fn canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(crate) fn protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Protocol).with(cause)
    }

    pub(crate) fn tls<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Tls).with(cause)
    }

    pub(crate) fn unknown_host<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::UnknownHost).with(cause)
    }

    pub(crate) fn connect(cause: io::Error) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn http2_reset(code: u32) -> Error {
        Error::new(Kind::Http2StreamReset(code))
    }
}

#[derive(Debug)]
struct TimedOut {
    after: Duration,
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out after {:?}", self.after)
    }
}

impl std::error::Error for TimedOut {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("waypoint::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Io => f.write_str("I/O error"),
            Kind::Timeout(TimeoutKind::Connect) => f.write_str("connect timed out"),
            Kind::Timeout(TimeoutKind::Read) => f.write_str("read timed out"),
            Kind::Timeout(TimeoutKind::Write) => f.write_str("write timed out"),
            Kind::Timeout(TimeoutKind::Call) => f.write_str("call timed out"),
            Kind::Canceled => f.write_str("call canceled"),
            Kind::Protocol => f.write_str("protocol error"),
            Kind::Tls => f.write_str("TLS error"),
            Kind::UnknownHost => f.write_str("unknown host"),
            Kind::Connect => f.write_str("connect error"),
            Kind::Http2StreamReset(code) => write!(f, "stream reset, error code {}", code),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as _)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::io(e)
    }
}

/// A list of errors suppressed while retrying on alternate routes.
///
/// The outermost call wrapper keeps the first error plus this list, per
/// SS7 "Propagation".
#[derive(Debug, Default)]
pub struct SuppressedErrors(pub(crate) Vec<Error>);

impl SuppressedErrors {
    pub(crate) fn push(&mut self, e: Error) {
        self.0.push(e);
    }

    /// Prior route attempts' errors, oldest first.
    pub fn as_slice(&self) -> &[Error] {
        &self.0
    }
}
