use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{copy_all, Body};

/// A body backed by a file on disk; replayable by reopening the path, so it
/// is never one-shot, even though each `write_to` call reopens the file.
#[derive(Debug, Clone)]
pub struct FileBody {
    content_type: Option<String>,
    path: PathBuf,
    len: u64,
}

impl FileBody {
    pub fn new(path: impl AsRef<Path>) -> io::Result<FileBody> {
        let path = path.as_ref().to_owned();
        let len = std::fs::metadata(&path)?.len();
        Ok(FileBody {
            content_type: None,
            path,
            len,
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> FileBody {
        self.content_type = Some(content_type.into());
        self
    }
}

impl Body for FileBody {
    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn byte_size(&self) -> Option<u64> {
        Some(self.len)
    }

    fn write_to(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        let mut file = File::open(&self.path)?;
        copy_all(&mut file, sink)?;
        Ok(())
    }

    fn try_clone(&self) -> Option<Box<dyn Body>> {
        Some(Box::new(self.clone()))
    }
}
