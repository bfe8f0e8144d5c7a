use std::io::{self, Write};

use bytes::Bytes;

use super::Body;

/// An in-memory body; replayable, so it is never one-shot.
#[derive(Debug, Clone)]
pub struct BytesBody {
    content_type: Option<String>,
    data: Bytes,
}

impl BytesBody {
    pub fn new(data: impl Into<Bytes>) -> BytesBody {
        BytesBody {
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> BytesBody {
        self.content_type = Some(content_type.into());
        self
    }
}

impl Body for BytesBody {
    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn byte_size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn write_to(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.data)
    }

    fn try_clone(&self) -> Option<Box<dyn Body>> {
        Some(Box::new(self.clone()))
    }
}
