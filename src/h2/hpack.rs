//! HPACK header compression (RFC 7541, SPEC_FULL.md SS4.5).
//!
//! The teacher's HTTP/2 support delegates to an external `h2` crate and
//! never implements HPACK directly; this module is new, built against the
//! static table and Huffman code in RFC 7541 Appendix A/B.

use std::collections::VecDeque;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use http::HeaderValue;

use crate::error::Error;
use crate::h2::huffman;
use crate::header::Name;

const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// A per-connection dynamic table (one for encoding, one for decoding).
/// Entries are stored newest-first per RFC 7541 SS2.3.2.
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> DynamicTable {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + 32
    }

    pub fn insert(&mut self, name: String, value: String) {
        let entry_size = Self::entry_size(&name, &value);
        self.entries.push_front((name, value));
        self.size += entry_size;
        self.evict();
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= Self::entry_size(&name, &value),
                None => break,
            }
        }
    }

    fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }

    fn find(&self, name: &str, value: &str) -> Option<(usize, bool)> {
        self.entries
            .iter()
            .position(|(n, v)| n == name && v == value)
            .map(|i| (i, true))
            .or_else(|| self.entries.iter().position(|(n, _)| n == name).map(|i| (i, false)))
    }
}

/// Per-connection HPACK state: one `Hpack` per direction.
pub struct Hpack {
    table: DynamicTable,
}

impl Hpack {
    pub fn new(max_dynamic_table_size: usize) -> Hpack {
        Hpack {
            table: DynamicTable::new(max_dynamic_table_size),
        }
    }

    pub fn set_max_dynamic_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Encode a header list, using the static table where possible and
    /// literal-with-incremental-indexing for everything else. Never emits
    /// Huffman-coded strings (simpler, always valid, costs a little size).
    pub fn encode(&mut self, headers: &[(Name, HeaderValue)]) -> Bytes {
        let mut out = BytesMut::new();
        for (name, value) in headers {
            let name_str = name.as_str();
            let value_str = value.to_str().unwrap_or("");

            if let Some(index) = static_index(name_str, value_str) {
                encode_integer(&mut out, 0x80, 7, index as u64);
                continue;
            }

            if let Some((index, full_match)) = self.table.find(name_str, value_str) {
                if full_match {
                    encode_integer(&mut out, 0x80, 7, (STATIC_TABLE.len() + index + 1) as u64);
                    continue;
                }
                encode_integer(&mut out, 0x40, 6, (STATIC_TABLE.len() + index + 1) as u64);
                encode_string(&mut out, value_str);
                self.table.insert(name_str.to_owned(), value_str.to_owned());
                continue;
            }

            out.put_u8(0x40);
            encode_string(&mut out, name_str);
            encode_string(&mut out, value_str);
            self.table.insert(name_str.to_owned(), value_str.to_owned());
        }
        out.freeze()
    }

    /// Decode a header block fragment into `(name, value)` pairs, in wire
    /// order (pseudo-headers first, per the sender's framing).
    pub fn decode(&mut self, mut block: Bytes) -> Result<Vec<(String, String)>, Error> {
        let mut out = Vec::new();
        while block.has_remaining() {
            let first = block[0];
            if first & 0x80 != 0 {
                let index = decode_integer(&mut block, 7)?;
                let (name, value) = self.lookup(index as usize)?;
                out.push((name, value));
            } else if first & 0x40 != 0 {
                let index = decode_integer(&mut block, 6)?;
                let name = if index == 0 {
                    decode_string(&mut block)?
                } else {
                    self.lookup(index as usize)?.0
                };
                let value = decode_string(&mut block)?;
                self.table.insert(name.clone(), value.clone());
                out.push((name, value));
            } else if first & 0x20 != 0 {
                let max_size = decode_integer(&mut block, 5)?;
                self.table.set_max_size(max_size as usize);
            } else {
                // Literal without indexing (0000xxxx) and never-indexed
                // (0001xxxx) share the same 4-bit prefix and wire shape;
                // we don't distinguish them past decoding since neither
                // updates the dynamic table.
                let index = decode_integer(&mut block, 4)?;
                let name = if index == 0 {
                    decode_string(&mut block)?
                } else {
                    self.lookup(index as usize)?.0
                };
                let value = decode_string(&mut block)?;
                out.push((name, value));
            }
        }
        Ok(out)
    }

    fn lookup(&self, index: usize) -> Result<(String, String), Error> {
        if index == 0 {
            return Err(Error::protocol(InvalidIndex(index)));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name.to_owned(), value.to_owned()));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or(Error::protocol(InvalidIndex(index)))
    }
}

fn static_index(name: &str, value: &str) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| *n == name && *v == value && !v.is_empty())
        .map(|i| i + 1)
}

fn encode_integer(out: &mut BytesMut, prefix_bits_value: u8, prefix_bits: u8, mut value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(prefix_bits_value | value as u8);
        return;
    }
    out.put_u8(prefix_bits_value | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.put_u8(((value % 128) as u8) | 0x80);
        value /= 128;
    }
    out.put_u8(value as u8);
}

fn decode_integer(buf: &mut Bytes, prefix_bits: u8) -> Result<u64, Error> {
    if buf.is_empty() {
        return Err(Error::protocol(Truncated));
    }
    let max_prefix = (1u64 << prefix_bits) - 1;
    let first = buf.get_u8() as u64;
    let mut value = first & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if buf.is_empty() {
            return Err(Error::protocol(Truncated));
        }
        let byte = buf.get_u8();
        value += ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(value)
}

/// Encode a string literal, Huffman-coding it when that's smaller (the
/// usual case for header values), per RFC 7541 SS5.2.
fn encode_string(out: &mut BytesMut, s: &str) {
    let huffman_len = huffman::encoded_length(s.as_bytes());
    if huffman_len < s.len() {
        encode_integer(out, 0x80, 7, huffman_len as u64);
        out.extend_from_slice(&huffman::encode(s.as_bytes()));
    } else {
        encode_integer(out, 0x00, 7, s.len() as u64);
        out.extend_from_slice(s.as_bytes());
    }
}

fn decode_string(buf: &mut Bytes) -> Result<String, Error> {
    if buf.is_empty() {
        return Err(Error::protocol(Truncated));
    }
    let is_huffman = buf[0] & 0x80 != 0;
    let len = decode_integer(buf, 7)? as usize;
    if buf.len() < len {
        return Err(Error::protocol(Truncated));
    }
    let raw = buf.split_to(len);
    if is_huffman {
        let bytes = huffman::decode(&raw)?;
        String::from_utf8(bytes).map_err(|e| Error::protocol(e))
    } else {
        String::from_utf8(raw.to_vec()).map_err(|e| Error::protocol(e))
    }
}

#[derive(Debug)]
struct InvalidIndex(usize);

impl fmt::Display for InvalidIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid HPACK index {}", self.0)
    }
}

impl std::error::Error for InvalidIndex {}

#[derive(Debug)]
struct Truncated;

impl fmt::Display for Truncated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("truncated HPACK integer")
    }
}

impl std::error::Error for Truncated {}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{PseudoName};
    use http::HeaderValue;

    #[test]
    fn static_table_hit_roundtrips() {
        let mut enc = Hpack::new(4096);
        let headers = vec![(Name::Pseudo(PseudoName::Method), HeaderValue::from_static("GET"))];
        let wire = enc.encode(&headers);
        assert_eq!(wire.len(), 1);

        let mut dec = Hpack::new(4096);
        let decoded = dec.decode(wire).unwrap();
        assert_eq!(decoded, vec![(":method".to_owned(), "GET".to_owned())]);
    }

    #[test]
    fn dynamic_table_learns_new_header() {
        let mut enc = Hpack::new(4096);
        let name = Name::Regular(http::HeaderName::from_static("x-trace-id"));
        let headers = vec![(name, HeaderValue::from_static("abc"))];
        let wire = enc.encode(&headers);

        let mut dec = Hpack::new(4096);
        let decoded = dec.decode(wire).unwrap();
        assert_eq!(decoded, vec![("x-trace-id".to_owned(), "abc".to_owned())]);

        let wire2 = enc.encode(&headers);
        let decoded2 = dec.decode(wire2).unwrap();
        assert_eq!(decoded2, vec![("x-trace-id".to_owned(), "abc".to_owned())]);
    }

    #[test]
    fn dynamic_table_evicts_to_respect_max_size() {
        let mut table = DynamicTable::new(40);
        table.insert("a".repeat(10), "b".repeat(10));
        assert_eq!(table.entries.len(), 0);
    }
}
