//! HTTP/2 frame format (RFC 7540 SS4, SPEC_FULL.md SS4.5).
//!
//! Frame header layout and the type/flag/error-code constants are grounded
//! on the wire format the teacher's (vendored, h2-crate-backed) HTTP/2
//! support targets; the codec itself is new since the teacher delegates
//! framing to an external crate rather than implementing it.

use std::convert::TryFrom;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

pub const FRAME_HEADER_LEN: usize = 9;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_UPPER_BOUND: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Error> {
        Ok(match v {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => return Err(Error::protocol(UnknownFrameType(other))),
        })
    }
}

#[derive(Debug)]
struct UnknownFrameType(u8);

impl fmt::Display for UnknownFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown HTTP/2 frame type {:#x}", self.0)
    }
}

impl std::error::Error for UnknownFrameType {}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// The parsed 9-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Result<FrameHeader, Error> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(Error::protocol(ShortFrameHeader));
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        let frame_type = FrameType::try_from(buf[3])?;
        let flags = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Ok(FrameHeader {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.frame_type as u8);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

#[derive(Debug)]
struct ShortFrameHeader;

impl fmt::Display for ShortFrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("frame header shorter than 9 bytes")
    }
}

impl std::error::Error for ShortFrameHeader {}

/// A decoded frame payload, paired with its stream id and flags.
#[derive(Debug)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        header_block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        header_block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        header_block: Bytes,
        end_headers: bool,
    },
}

impl Frame {
    /// Parse a single frame whose header has already been stripped from
    /// `payload` (caller reads exactly `header.length` bytes first).
    pub fn parse(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, Error> {
        use flags::*;
        Ok(match header.frame_type {
            FrameType::Data => {
                let data = strip_padding(&mut payload, header.flags)?;
                Frame::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.flags & END_STREAM != 0,
                }
            }
            FrameType::Headers => {
                let mut body = strip_padding(&mut payload, header.flags)?;
                if header.flags & PRIORITY != 0 {
                    if body.len() < 5 {
                        return Err(Error::protocol(ShortFrame));
                    }
                    body.advance(5);
                }
                Frame::Headers {
                    stream_id: header.stream_id,
                    header_block: body,
                    end_stream: header.flags & END_STREAM != 0,
                    end_headers: header.flags & END_HEADERS != 0,
                }
            }
            FrameType::Priority => Frame::Priority {
                stream_id: header.stream_id,
            },
            FrameType::RstStream => {
                if payload.len() < 4 {
                    return Err(Error::protocol(ShortFrame));
                }
                Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: ErrorCode(payload.get_u32()),
                }
            }
            FrameType::Settings => {
                if header.flags & ACK != 0 {
                    Frame::Settings {
                        ack: true,
                        params: Vec::new(),
                    }
                } else {
                    if payload.len() % 6 != 0 {
                        return Err(Error::protocol(ShortFrame));
                    }
                    let mut params = Vec::with_capacity(payload.len() / 6);
                    while payload.has_remaining() {
                        let id = payload.get_u16();
                        let value = payload.get_u32();
                        params.push((id, value));
                    }
                    Frame::Settings { ack: false, params }
                }
            }
            FrameType::PushPromise => {
                let mut body = strip_padding(&mut payload, header.flags)?;
                if body.len() < 4 {
                    return Err(Error::protocol(ShortFrame));
                }
                let promised_stream_id = body.get_u32() & 0x7fff_ffff;
                Frame::PushPromise {
                    stream_id: header.stream_id,
                    promised_stream_id,
                    header_block: body,
                    end_headers: header.flags & END_HEADERS != 0,
                }
            }
            FrameType::Ping => {
                if payload.len() != 8 {
                    return Err(Error::protocol(ShortFrame));
                }
                let mut p = [0u8; 8];
                p.copy_from_slice(&payload);
                Frame::Ping {
                    ack: header.flags & ACK != 0,
                    payload: p,
                }
            }
            FrameType::GoAway => {
                if payload.len() < 8 {
                    return Err(Error::protocol(ShortFrame));
                }
                let last_stream_id = payload.get_u32() & 0x7fff_ffff;
                let error_code = ErrorCode(payload.get_u32());
                Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                }
            }
            FrameType::WindowUpdate => {
                if payload.len() < 4 {
                    return Err(Error::protocol(ShortFrame));
                }
                Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: payload.get_u32() & 0x7fff_ffff,
                }
            }
            FrameType::Continuation => Frame::Continuation {
                stream_id: header.stream_id,
                header_block: payload,
                end_headers: header.flags & END_HEADERS != 0,
            },
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        use flags::*;
        match self {
            Frame::Data { stream_id, data, end_stream } => {
                FrameHeader {
                    length: data.len() as u32,
                    frame_type: FrameType::Data,
                    flags: if *end_stream { END_STREAM } else { 0 },
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(data);
            }
            Frame::Headers { stream_id, header_block, end_stream, end_headers } => {
                let mut flags = 0;
                if *end_stream {
                    flags |= END_STREAM;
                }
                if *end_headers {
                    flags |= END_HEADERS;
                }
                FrameHeader {
                    length: header_block.len() as u32,
                    frame_type: FrameType::Headers,
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(header_block);
            }
            Frame::Priority { stream_id } => {
                FrameHeader {
                    length: 5,
                    frame_type: FrameType::Priority,
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(0);
                out.put_u8(16);
            }
            Frame::RstStream { stream_id, error_code } => {
                FrameHeader {
                    length: 4,
                    frame_type: FrameType::RstStream,
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(error_code.0);
            }
            Frame::Settings { ack, params } => {
                FrameHeader {
                    length: if *ack { 0 } else { (params.len() * 6) as u32 },
                    frame_type: FrameType::Settings,
                    flags: if *ack { ACK } else { 0 },
                    stream_id: 0,
                }
                .write(out);
                if !*ack {
                    for (id, value) in params {
                        out.put_u16(*id);
                        out.put_u32(*value);
                    }
                }
            }
            Frame::PushPromise { stream_id, promised_stream_id, header_block, end_headers } => {
                FrameHeader {
                    length: 4 + header_block.len() as u32,
                    frame_type: FrameType::PushPromise,
                    flags: if *end_headers { END_HEADERS } else { 0 },
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(promised_stream_id & 0x7fff_ffff);
                out.extend_from_slice(header_block);
            }
            Frame::Ping { ack, payload } => {
                FrameHeader {
                    length: 8,
                    frame_type: FrameType::Ping,
                    flags: if *ack { ACK } else { 0 },
                    stream_id: 0,
                }
                .write(out);
                out.extend_from_slice(payload);
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                FrameHeader {
                    length: 8 + debug_data.len() as u32,
                    frame_type: FrameType::GoAway,
                    flags: 0,
                    stream_id: 0,
                }
                .write(out);
                out.put_u32(*last_stream_id & 0x7fff_ffff);
                out.put_u32(error_code.0);
                out.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate { stream_id, increment } => {
                FrameHeader {
                    length: 4,
                    frame_type: FrameType::WindowUpdate,
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(*increment & 0x7fff_ffff);
            }
            Frame::Continuation { stream_id, header_block, end_headers } => {
                FrameHeader {
                    length: header_block.len() as u32,
                    frame_type: FrameType::Continuation,
                    flags: if *end_headers { END_HEADERS } else { 0 },
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(header_block);
            }
        }
    }
}

fn strip_padding(payload: &mut Bytes, frame_flags: u8) -> Result<Bytes, Error> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload.split_off(0));
    }
    if payload.is_empty() {
        return Err(Error::protocol(ShortFrame));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::protocol(ShortFrame));
    }
    let content_len = payload.len() - pad_len;
    Ok(payload.split_to(content_len))
}

#[derive(Debug)]
struct ShortFrame;

impl fmt::Display for ShortFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("frame payload shorter than its fixed fields require")
    }
}

impl std::error::Error for ShortFrame {}

/// A 32-bit HTTP/2 error code (RFC 7540 SS7). Stored as a tuple so callers
/// can compare against the peer's raw value without an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NO_ERROR: ErrorCode = ErrorCode(0x0);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(0x1);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(0x2);
    pub const FLOW_CONTROL_ERROR: ErrorCode = ErrorCode(0x3);
    pub const SETTINGS_TIMEOUT: ErrorCode = ErrorCode(0x4);
    pub const STREAM_CLOSED: ErrorCode = ErrorCode(0x5);
    pub const FRAME_SIZE_ERROR: ErrorCode = ErrorCode(0x6);
    pub const REFUSED_STREAM: ErrorCode = ErrorCode(0x7);
    pub const CANCEL: ErrorCode = ErrorCode(0x8);
    pub const COMPRESSION_ERROR: ErrorCode = ErrorCode(0x9);
    pub const CONNECT_ERROR: ErrorCode = ErrorCode(0xa);
    pub const ENHANCE_YOUR_CALM: ErrorCode = ErrorCode(0xb);
    pub const INADEQUATE_SECURITY: ErrorCode = ErrorCode(0xc);
    pub const HTTP_1_1_REQUIRED: ErrorCode = ErrorCode(0xd);
}

pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_settings_frame() {
        let mut buf = BytesMut::new();
        let frame = Frame::Settings {
            ack: false,
            params: vec![(0x3, 100), (0x4, 65535)],
        };
        frame.write(&mut buf);
        let header = FrameHeader::parse(&buf).unwrap();
        let payload = buf.split_off(FRAME_HEADER_LEN).freeze();
        let parsed = Frame::parse(&header, payload).unwrap();
        match parsed {
            Frame::Settings { ack, params } => {
                assert!(!ack);
                assert_eq!(params, vec![(0x3, 100), (0x4, 65535)]);
            }
            _ => panic!("wrong frame"),
        }
    }

    #[test]
    fn rejects_window_update_high_bit() {
        let mut buf = BytesMut::new();
        buf.put_u32(0x8000_0005);
        let header = FrameHeader {
            length: 4,
            frame_type: FrameType::WindowUpdate,
            flags: 0,
            stream_id: 1,
        };
        let parsed = Frame::parse(&header, buf.freeze()).unwrap();
        match parsed {
            Frame::WindowUpdate { increment, .. } => assert_eq!(increment, 5),
            _ => panic!("wrong frame"),
        }
    }
}
