use std::io::{self, Read, Write};

use super::{copy_all, Body};

/// A body sourced from an arbitrary reader.
///
/// Streamed bodies are one-shot unless constructed with a known,
/// replayable source — the engine has no way to rewind an arbitrary
/// `Read`, so `is_one_shot` defaults to `true` whenever `byte_size` is
/// unknown, matching the retry policy in SS4.1 ("request is not a one-shot
/// body").
pub struct StreamedBody {
    content_type: Option<String>,
    byte_size: Option<u64>,
    reader: Box<dyn Read + Send>,
    one_shot: bool,
}

impl StreamedBody {
    /// A body of unknown length, read once; not retryable or followable.
    pub fn unsized_one_shot(reader: impl Read + Send + 'static) -> StreamedBody {
        StreamedBody {
            content_type: None,
            byte_size: None,
            reader: Box::new(reader),
            one_shot: true,
        }
    }

    /// A body whose length is known ahead of time and whose reader can be
    /// re-created on retry by the caller wrapping a factory; since this
    /// type only holds one concrete reader, mark it one-shot=false only
    /// when the caller knows the same `StreamedBody` value won't be reused
    /// after a failed write (the chain always constructs a fresh `Body`
    /// per attempt in that case).
    pub fn sized(reader: impl Read + Send + 'static, byte_size: u64) -> StreamedBody {
        StreamedBody {
            content_type: None,
            byte_size: Some(byte_size),
            reader: Box::new(reader),
            one_shot: false,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> StreamedBody {
        self.content_type = Some(content_type.into());
        self
    }
}

impl Body for StreamedBody {
    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn byte_size(&self) -> Option<u64> {
        self.byte_size
    }

    fn write_to(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        copy_all(self.reader.as_mut(), sink)?;
        Ok(())
    }

    fn is_one_shot(&self) -> bool {
        self.one_shot
    }
}
