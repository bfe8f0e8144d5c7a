//! Status-line/header parsing and response body framing readers (spec.md
//! SS4.4 "Response body framing").

use std::io::{self, Read};

use http::{Method, StatusCode};

use crate::error::Error;
use crate::header::Headers;
use crate::response::Protocol;

const MAX_HEAD_SIZE: usize = 256 * 1024;

/// A parsed status line plus header block.
pub struct ResponseHead {
    pub protocol: Protocol,
    pub status: StatusCode,
    pub status_message: String,
    pub headers: Headers,
}

/// Read and parse one status-line-plus-headers block, terminated by a
/// blank line. Used both for the final response and for each 1xx
/// informational response preceding it (SS4.4 Expect-100-continue).
pub fn read_response_head<R: Read>(reader: &mut R) -> Result<ResponseHead, Error> {
    parse_response_head(reader, Error::io)
}

/// Like [`read_response_head`], but a socket read timing out is reported as
/// `Kind::Timeout(TimeoutKind::Read)` rather than `Kind::Io` — used while
/// waiting on a `100 Continue` (SS4.4), where the two are handled
/// differently.
pub fn read_response_head_timing_out_as(
    reader: &mut impl Read,
    after: std::time::Duration,
) -> Result<ResponseHead, Error> {
    parse_response_head(reader, move |e| Error::io_timeout(e, crate::error::TimeoutKind::Read, after))
}

fn parse_response_head<R: Read>(
    reader: &mut R,
    on_io_err: impl Fn(std::io::Error) -> Error,
) -> Result<ResponseHead, Error> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).map_err(&on_io_err)?;
        if n == 0 {
            return Err(Error::protocol(UnexpectedEof));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(Error::protocol(HeadTooLarge));
        }
    }

    let mut header_storage = [httparse::EMPTY_HEADER; 128];
    let mut parsed = httparse::Response::new(&mut header_storage);
    let status = match parsed.parse(&buf) {
        Ok(httparse::Status::Complete(_)) => parsed.code.unwrap_or(0),
        _ => return Err(Error::protocol(MalformedStatusLine)),
    };

    let protocol = match parsed.version {
        Some(0) => Protocol::Http10,
        _ => Protocol::Http11,
    };
    let status = StatusCode::from_u16(status).map_err(Error::protocol)?;
    let status_message = parsed.reason.unwrap_or("").to_owned();

    let mut headers = Headers::new();
    for h in parsed.headers.iter() {
        headers.push_str(h.name, std::str::from_utf8(h.value).map_err(Error::protocol)?).map_err(Error::protocol)?;
    }

    Ok(ResponseHead { protocol, status, status_message, headers })
}

/// Which body framing applies, decided in the order given in spec.md
/// SS4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBodyMode {
    NoBody,
    Chunked,
    Fixed(u64),
    /// "unknown length" — body ends at connection close; the connection
    /// is not reusable afterwards.
    UntilClose,
}

pub fn response_body_mode(method: &Method, status: StatusCode, headers: &Headers) -> ResponseBodyMode {
    if method == Method::HEAD || status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return ResponseBodyMode::NoBody;
    }
    if let Some(te) = headers.get("transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return ResponseBodyMode::Chunked;
        }
    }
    if let Some(len) = headers.get("content-length") {
        if let Ok(len) = len.trim().parse::<u64>() {
            return ResponseBodyMode::Fixed(len);
        }
    }
    ResponseBodyMode::UntilClose
}

/// Reads exactly `remaining` bytes then stops reporting EOF.
pub struct FixedLengthBodyReader<'a> {
    inner: &'a mut dyn Read,
    remaining: u64,
}

impl<'a> FixedLengthBodyReader<'a> {
    pub fn new(inner: &'a mut dyn Read, length: u64) -> Self {
        FixedLengthBodyReader { inner, remaining: length }
    }
}

impl<'a> Read for FixedLengthBodyReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Reads until the underlying stream reaches EOF; the connection this
/// reads from must be closed afterwards (spec.md SS4.4).
pub struct UntilCloseBodyReader<'a> {
    inner: &'a mut dyn Read,
}

impl<'a> UntilCloseBodyReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        UntilCloseBodyReader { inner }
    }
}

impl<'a> Read for UntilCloseBodyReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    ChunkSize,
    ChunkData(u64),
    ChunkDataCrlf,
    Trailers,
    Done,
}

/// Decodes `Transfer-Encoding: chunked`, capturing trailers after the
/// terminal chunk (spec.md SS8 "Chunked reader with zero chunks and
/// trailers preserves trailers").
pub struct ChunkedBodyReader<'a> {
    inner: &'a mut dyn Read,
    state: ChunkedState,
    trailers: Headers,
}

impl<'a> ChunkedBodyReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        ChunkedBodyReader {
            inner,
            state: ChunkedState::ChunkSize,
            trailers: Headers::new(),
        }
    }

    /// Trailers observed after the terminal chunk; empty until `read`
    /// has returned `Ok(0)`.
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.inner.read(&mut byte)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunked body truncated"));
            }
            if byte[0] == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<'a> Read for ChunkedBodyReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.state {
                ChunkedState::Done => return Ok(0),
                ChunkedState::ChunkSize => {
                    let line = self.read_line()?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.state = if size == 0 {
                        ChunkedState::Trailers
                    } else {
                        ChunkedState::ChunkData(size)
                    };
                }
                ChunkedState::ChunkData(0) => {
                    self.state = ChunkedState::ChunkDataCrlf;
                }
                ChunkedState::ChunkData(remaining) => {
                    let cap = (buf.len() as u64).min(remaining) as usize;
                    if cap == 0 {
                        return Ok(0);
                    }
                    let n = self.inner.read(&mut buf[..cap])?;
                    if n == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunked body truncated"));
                    }
                    self.state = ChunkedState::ChunkData(remaining - n as u64);
                    return Ok(n);
                }
                ChunkedState::ChunkDataCrlf => {
                    let _ = self.read_line()?;
                    self.state = ChunkedState::ChunkSize;
                }
                ChunkedState::Trailers => {
                    let line = self.read_line()?;
                    if line.is_empty() {
                        self.state = ChunkedState::Done;
                        return Ok(0);
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        let _ = self.trailers.push_str(name.trim(), value.trim());
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct UnexpectedEof;

impl std::fmt::Display for UnexpectedEof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("connection closed before response headers were complete")
    }
}

impl std::error::Error for UnexpectedEof {}

#[derive(Debug)]
struct HeadTooLarge;

impl std::fmt::Display for HeadTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("response head exceeded the maximum size")
    }
}

impl std::error::Error for HeadTooLarge {}

#[derive(Debug)]
struct MalformedStatusLine;

impl std::fmt::Display for MalformedStatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("malformed HTTP/1 status line")
    }
}

impl std::error::Error for MalformedStatusLine {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_status_line_and_headers() {
        let mut cursor = Cursor::new(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n".to_vec());
        let head = read_response_head(&mut cursor).unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.status_message, "OK");
        assert_eq!(head.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn chunked_reader_yields_bytes_and_trailers() {
        let mut cursor = Cursor::new(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trail: yes\r\n\r\n".to_vec());
        let mut reader = ChunkedBodyReader::new(&mut cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Wikipedia");
        assert_eq!(reader.trailers().get("x-trail"), Some("yes"));
    }

    #[test]
    fn chunked_reader_with_zero_chunks_preserves_trailers() {
        let mut cursor = Cursor::new(b"0\r\nX-Trail: yes\r\n\r\n".to_vec());
        let mut reader = ChunkedBodyReader::new(&mut cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(reader.trailers().get("x-trail"), Some("yes"));
    }

    #[test]
    fn fixed_length_reader_stops_at_declared_length() {
        let mut cursor = Cursor::new(b"hello-extra".to_vec());
        let mut reader = FixedLengthBodyReader::new(&mut cursor, 5);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn no_body_for_head_and_204() {
        let headers = Headers::new();
        assert_eq!(response_body_mode(&Method::HEAD, StatusCode::OK, &headers), ResponseBodyMode::NoBody);
        assert_eq!(response_body_mode(&Method::GET, StatusCode::NO_CONTENT, &headers), ResponseBodyMode::NoBody);
    }
}
