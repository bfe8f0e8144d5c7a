//! `permessage-deflate` (RFC 7692), negotiated transparently and rejecting
//! anything the client doesn't understand (spec.md SS4.7: "rejecting
//! unknown parameters, `client_max_window_bits` unconditionally, and
//! `server_max_window_bits` outside [8,15]").
//!
//! Grounded on the crate's existing use of `flate2` for gzip response
//! bodies (the bridge interceptor) — same crate, raw-deflate mode instead
//! of the gzip wrapper, operated in the streaming `Compress`/`Decompress`
//! mode RFC 7692 requires (one sync-flush per message, optionally resetting
//! the window when `no_context_takeover` was negotiated).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::Error;

/// The negotiated extension parameters for one WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct DeflateConfig {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
}

/// Parses a `Sec-WebSocket-Extensions` response header value, returning
/// `None` if the server didn't offer `permessage-deflate`. Any parameter
/// this client doesn't support makes the whole negotiation fail loudly
/// (SS4.7) rather than silently falling back to an uncompressed stream the
/// server doesn't know it's using.
pub fn negotiate(header_value: &str) -> Result<Option<DeflateConfig>, Error> {
    for offer in header_value.split(',') {
        let mut parts = offer.split(';').map(str::trim);
        let Some(name) = parts.next() else { continue };
        if !name.eq_ignore_ascii_case("permessage-deflate") {
            continue;
        }

        let mut config = DeflateConfig {
            client_no_context_takeover: false,
            server_no_context_takeover: false,
        };
        for param in parts {
            let (key, value) = match param.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim().trim_matches('"'))),
                None => (param.trim(), None),
            };
            match key.to_ascii_lowercase().as_str() {
                "client_no_context_takeover" => config.client_no_context_takeover = true,
                "server_no_context_takeover" => config.server_no_context_takeover = true,
                // The server is asking us to cap our own compression
                // window; this client always deflates at the default
                // window size and has no way to honor a server-imposed
                // one, so the parameter is rejected regardless of value.
                "client_max_window_bits" => return Err(Error::protocol(ClientMaxWindowBitsUnsupported)),
                "server_max_window_bits" => check_window_bits(value)?,
                "" => {}
                other => return Err(Error::protocol(UnsupportedExtensionParam(other.to_owned()))),
            }
        }
        return Ok(Some(config));
    }
    Ok(None)
}

fn check_window_bits(value: Option<&str>) -> Result<(), Error> {
    let Some(value) = value else { return Ok(()) };
    let bits: u8 = value.parse().map_err(|_| Error::protocol(InvalidWindowBits(value.to_owned())))?;
    if (8..=15).contains(&bits) {
        Ok(())
    } else {
        Err(Error::protocol(InvalidWindowBits(value.to_owned())))
    }
}

/// RFC 7692 §7.2.1: after a sync flush, a trailing empty deflate block
/// (`00 00 ff ff`) is always produced; senders strip it and receivers must
/// re-append it before inflating.
const SYNC_FLUSH_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Per-direction compressor for outgoing messages.
pub struct Deflater {
    compress: Compress,
    no_context_takeover: bool,
}

impl Deflater {
    pub fn new(no_context_takeover: bool) -> Deflater {
        Deflater {
            compress: Compress::new(Compression::default(), false),
            no_context_takeover,
        }
    }

    /// Compresses one whole message payload, stripping the sync-flush tail
    /// (the peer's inflate re-appends it) and resetting the window first if
    /// context takeover was disabled for this direction.
    pub fn deflate(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.no_context_takeover {
            self.compress.reset();
        }
        let mut out = Vec::with_capacity(payload.len());
        self.compress
            .compress_vec(payload, &mut out, FlushCompress::Sync)
            .map_err(Error::protocol)?;
        if out.ends_with(&SYNC_FLUSH_TAIL) {
            out.truncate(out.len() - SYNC_FLUSH_TAIL.len());
        }
        Ok(out)
    }
}

/// Per-direction decompressor for incoming messages.
pub struct Inflater {
    decompress: Decompress,
    no_context_takeover: bool,
}

impl Inflater {
    pub fn new(no_context_takeover: bool) -> Inflater {
        Inflater {
            decompress: Decompress::new(false),
            no_context_takeover,
        }
    }

    pub fn inflate(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.no_context_takeover {
            self.decompress.reset(false);
        }
        let mut input = Vec::with_capacity(payload.len() + SYNC_FLUSH_TAIL.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&SYNC_FLUSH_TAIL);

        let mut out = Vec::with_capacity(payload.len() * 3 + 64);
        loop {
            let produced_before = out.len();
            let status = self
                .decompress
                .decompress_vec(&input, &mut out, FlushDecompress::Sync)
                .map_err(Error::protocol)?;
            if status == Status::StreamEnd || out.len() == produced_before {
                break;
            }
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct UnsupportedExtensionParam(String);

impl std::fmt::Display for UnsupportedExtensionParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported permessage-deflate parameter {:?}", self.0)
    }
}

impl std::error::Error for UnsupportedExtensionParam {}

#[derive(Debug)]
struct InvalidWindowBits(String);

impl std::fmt::Display for InvalidWindowBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window bits {:?} outside the supported [8,15] range", self.0)
    }
}

impl std::error::Error for InvalidWindowBits {}

#[derive(Debug)]
struct ClientMaxWindowBitsUnsupported;

impl std::fmt::Display for ClientMaxWindowBitsUnsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("server offered client_max_window_bits, which this client cannot honor")
    }
}

impl std::error::Error for ClientMaxWindowBitsUnsupported {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let mut deflater = Deflater::new(false);
        let mut inflater = Inflater::new(false);
        let message = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = deflater.deflate(&message).unwrap();
        let decompressed = inflater.inflate(&compressed).unwrap();
        assert_eq!(decompressed, message);
    }

    #[test]
    fn negotiates_plain_permessage_deflate() {
        let config = negotiate("permessage-deflate").unwrap().unwrap();
        assert!(!config.client_no_context_takeover);
    }

    #[test]
    fn rejects_out_of_range_window_bits() {
        assert!(negotiate("permessage-deflate; server_max_window_bits=20").is_err());
    }

    #[test]
    fn rejects_client_max_window_bits_even_in_range() {
        assert!(negotiate("permessage-deflate; client_max_window_bits=12").is_err());
    }

    #[test]
    fn accepts_server_max_window_bits_in_range() {
        assert!(negotiate("permessage-deflate; server_max_window_bits=12").is_ok());
    }

    #[test]
    fn rejects_unknown_parameter() {
        assert!(negotiate("permessage-deflate; mystery=1").is_err());
    }
}
