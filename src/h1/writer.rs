//! Request-line/header emission and body framing writers (spec.md SS4.4
//! "Request body framing").

use std::io::{self, Write};

use http::Method;

use crate::error::Error;
use crate::header::Headers;
use crate::url::Url;

/// Write the request line and header block (not the body) to `sink`.
///
/// HTTP/1 requests never carry pseudo-headers; `headers` is expected to
/// hold only regular fields (the bridge interceptor is responsible for
/// `Host`, `Content-Length`/`Transfer-Encoding`, etc. before this runs).
pub fn write_request_head(sink: &mut dyn Write, method: &Method, url: &Url, headers: &Headers) -> io::Result<()> {
    write!(sink, "{} {} HTTP/1.1\r\n", method, url.path_and_query())?;
    for (name, value) in headers.iter() {
        sink.write_all(name.as_str().as_bytes())?;
        sink.write_all(b": ")?;
        sink.write_all(value.as_bytes())?;
        sink.write_all(b"\r\n")?;
    }
    sink.write_all(b"\r\n")?;
    Ok(())
}

/// A request body writer, framed either as fixed-length or chunked
/// (spec.md SS4.4).
pub enum RequestBodyWriter<'a> {
    Fixed { sink: &'a mut dyn Write, remaining: u64 },
    Chunked { sink: &'a mut dyn Write },
}

impl<'a> RequestBodyWriter<'a> {
    pub fn fixed(sink: &'a mut dyn Write, length: u64) -> Self {
        RequestBodyWriter::Fixed { sink, remaining: length }
    }

    pub fn chunked(sink: &'a mut dyn Write) -> Self {
        RequestBodyWriter::Chunked { sink }
    }

    /// Finish the body: for chunked framing, emit the terminal `0\r\n`
    /// chunk plus optional trailers (spec.md SS4.4 "close emits
    /// `0\r\n\r\n` plus optional trailers"). For fixed framing, verify the
    /// exact declared length was written.
    pub fn finish(self, trailers: &Headers) -> Result<(), Error> {
        match self {
            RequestBodyWriter::Fixed { remaining, .. } => {
                if remaining != 0 {
                    return Err(Error::protocol(ShortBody));
                }
                Ok(())
            }
            RequestBodyWriter::Chunked { sink } => {
                sink.write_all(b"0\r\n").map_err(Error::io)?;
                for (name, value) in trailers.iter() {
                    write!(sink, "{}: ", name.as_str()).map_err(Error::io)?;
                    sink.write_all(value.as_bytes()).map_err(Error::io)?;
                    sink.write_all(b"\r\n").map_err(Error::io)?;
                }
                sink.write_all(b"\r\n").map_err(Error::io)?;
                Ok(())
            }
        }
    }
}

impl<'a> Write for RequestBodyWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RequestBodyWriter::Fixed { sink, remaining } => {
                if buf.len() as u64 > *remaining {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "request body exceeds declared Content-Length"));
                }
                sink.write_all(buf)?;
                *remaining -= buf.len() as u64;
                Ok(buf.len())
            }
            RequestBodyWriter::Chunked { sink } => {
                if buf.is_empty() {
                    return Ok(0);
                }
                write!(sink, "{:x}\r\n", buf.len())?;
                sink.write_all(buf)?;
                sink.write_all(b"\r\n")?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RequestBodyWriter::Fixed { sink, .. } => sink.flush(),
            RequestBodyWriter::Chunked { sink } => sink.flush(),
        }
    }
}

#[derive(Debug)]
struct ShortBody;

impl std::fmt::Display for ShortBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("request body shorter than declared Content-Length")
    }
}

impl std::error::Error for ShortBody {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_request_line_and_headers() {
        let mut buf = Vec::new();
        let url = Url::parse("http://example.com/a/b?x=1").unwrap();
        let mut headers = Headers::new();
        headers.push_str("Host", "example.com").unwrap();
        write_request_head(&mut buf, &Method::GET, &url, &headers).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("GET /a/b?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn chunked_body_frames_each_write() {
        let mut buf = Vec::new();
        {
            let mut writer = RequestBodyWriter::chunked(&mut buf);
            writer.write_all(b"hi").unwrap();
            writer.finish(&Headers::new()).unwrap();
        }
        assert_eq!(&buf, b"2\r\nhi\r\n0\r\n\r\n");
    }

    #[test]
    fn fixed_body_rejects_overrun() {
        let mut buf = Vec::new();
        let mut writer = RequestBodyWriter::fixed(&mut buf, 2);
        assert!(writer.write_all(b"abc").is_err());
    }
}
