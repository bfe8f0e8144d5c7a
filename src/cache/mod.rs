//! Disk LRU cache: a crash-safe, journaled, content-addressed on-disk
//! key/value store with byte-size LRU eviction (spec.md SS4.6).
//!
//! This is new relative to the teacher (`hyper` has no on-disk cache);
//! grounded on the journal/edit/snapshot design spelled out in spec.md
//! SS3/SS4.6 itself (an OkHttp-`DiskLruCache`-shaped engine), using
//! `std::fs`/`std::sync::Mutex` in the teacher's own blocking-I/O idiom.

mod entry;
mod response_cache;

pub use response_cache::{CacheStats, CachedResponse, ResponseCache};

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use entry::{clean_file, dirty_file, is_valid_key, Entry};

const MAGIC: &str = "libcore.io.DiskLruCache";
const VERSION: &str = "1";
const JOURNAL_FILE: &str = "journal";
const JOURNAL_FILE_TMP: &str = "journal.tmp";
const JOURNAL_FILE_BACKUP: &str = "journal.bkp";
const REBUILD_THRESHOLD: usize = 2000;

const DIRTY: &str = "DIRTY";
const CLEAN: &str = "CLEAN";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

struct State {
    entries: HashMap<String, Entry>,
    lru_order: Vec<String>,
    journal: Option<File>,
    /// Number of journal body lines written since the last rebuild —
    /// used to decide when a rebuild pays for itself (spec.md SS4.6
    /// "After 2000 journal entries").
    redundant_op_count: usize,
    size: u64,
}

struct Shared {
    dir: PathBuf,
    max_size: u64,
    value_count: usize,
    app_version: u32,
    state: Mutex<State>,
}

/// A crash-safe, journaled on-disk LRU cache (spec.md SS4.6).
#[derive(Clone)]
pub struct DiskLruCache {
    inner: Arc<Shared>,
}

impl DiskLruCache {
    pub fn open(dir: impl AsRef<Path>, max_size: u64, value_count: usize, app_version: u32) -> io::Result<DiskLruCache> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;

        let backup = dir.join(JOURNAL_FILE_BACKUP);
        let journal_path = dir.join(JOURNAL_FILE);
        if backup.exists() {
            if journal_path.exists() {
                let _ = fs::remove_file(&backup);
            } else {
                fs::rename(&backup, &journal_path)?;
            }
        }

        let shared = Arc::new(Shared {
            dir,
            max_size,
            value_count,
            app_version,
            state: Mutex::new(State {
                entries: HashMap::new(),
                lru_order: Vec::new(),
                journal: None,
                redundant_op_count: 0,
                size: 0,
            }),
        });

        let cache = DiskLruCache { inner: shared };
        if journal_path.exists() {
            match cache.read_journal(&journal_path) {
                Ok(()) => {
                    cache.delete_dangling_dirty_files()?;
                    cache.open_journal_for_append()?;
                    return Ok(cache);
                }
                Err(_) => {
                    // Invalid header or corrupt body: wipe and start fresh
                    // (spec.md SS4.6 "Startup recovery").
                    for entry in fs::read_dir(&cache.inner.dir)? {
                        let entry = entry?;
                        let _ = fs::remove_file(entry.path());
                    }
                }
            }
        }
        cache.rebuild_journal_locked(&mut cache.inner.state.lock().unwrap())?;
        cache.open_journal_for_append()?;
        Ok(cache)
    }

    fn read_journal(&self, path: &Path) -> io::Result<()> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let magic = lines.next().ok_or_else(eof)??;
        let version = lines.next().ok_or_else(eof)??;
        let _app_version = lines.next().ok_or_else(eof)??;
        let value_count_line = lines.next().ok_or_else(eof)??;
        let blank = lines.next().ok_or_else(eof)??;
        if magic != MAGIC || version != VERSION || !blank.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad journal header"));
        }
        let value_count: usize = value_count_line
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad journal header"))?;
        if value_count != self.inner.value_count {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "value count mismatch"));
        }

        let mut state = self.inner.state.lock().unwrap();
        let mut line_count = 0usize;
        for line in lines {
            let line = line?;
            line_count += 1;
            self.process_journal_line(&mut state, &line)?;
        }
        state.redundant_op_count = line_count.saturating_sub(state.entries.len());
        state.size = state.entries.values().map(|e| e.total_length()).sum();
        Ok(())
    }

    fn process_journal_line(&self, state: &mut State, line: &str) -> io::Result<()> {
        let mut parts = line.splitn(2, ' ');
        let op = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");

        match op {
            CLEAN => {
                let mut fields = rest.split(' ');
                let key = fields.next().unwrap_or("").to_owned();
                let lengths: Vec<i64> = fields.map(|f| f.parse().unwrap_or(0)).collect();
                if !state.entries.contains_key(&key) {
                    state.lru_order.push(key.clone());
                }
                let entry = state
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(key.clone(), self.inner.value_count));
                entry.has_clean = true;
                entry.editing = false;
                if lengths.len() == self.inner.value_count {
                    entry.clean_lengths = lengths;
                }
                touch(&mut state.lru_order, &key);
            }
            DIRTY => {
                let key = rest.to_owned();
                if !state.entries.contains_key(&key) {
                    state.lru_order.push(key.clone());
                }
                let entry = state
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(key.clone(), self.inner.value_count));
                entry.editing = true;
            }
            REMOVE => {
                let key = rest.to_owned();
                state.entries.remove(&key);
                state.lru_order.retain(|k| k != &key);
            }
            READ => {
                touch(&mut state.lru_order, rest);
            }
            _ => {}
        }
        Ok(())
    }

    fn delete_dangling_dirty_files(&self) -> io::Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        let dangling: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.editing && !e.has_clean)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dangling {
            for i in 0..self.inner.value_count {
                let _ = fs::remove_file(dirty_file(&self.inner.dir, key, i));
            }
            state.entries.remove(key);
            state.lru_order.retain(|k| k != key);
        }
        // An entry left DIRTY with a prior CLEAN just reverts to clean;
        // its dirty temp files (if any) are stale and removed too.
        for entry in state.entries.values_mut() {
            if entry.editing && entry.has_clean {
                entry.editing = false;
                for i in 0..self.inner.value_count {
                    let key = entry.key.clone();
                    let _ = fs::remove_file(dirty_file(&self.inner.dir, &key, i));
                }
            }
        }
        Ok(())
    }

    fn open_journal_for_append(&self) -> io::Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.inner.dir.join(JOURNAL_FILE))?;
        state.journal = Some(file);
        Ok(())
    }

    fn append_journal_line(&self, state: &mut State, line: &str) -> io::Result<()> {
        if let Some(journal) = state.journal.as_mut() {
            writeln!(journal, "{}", line)?;
            journal.flush()?;
        }
        state.redundant_op_count += 1;
        if self.journal_rebuild_required(state) {
            self.rebuild_journal_locked(state)?;
        }
        Ok(())
    }

    fn journal_rebuild_required(&self, state: &State) -> bool {
        state.redundant_op_count >= REBUILD_THRESHOLD && state.redundant_op_count >= state.entries.len()
    }

    /// Writes a fresh journal containing only CLEAN lines for currently
    /// indexed entries (spec.md SS4.6 "Rebuilds").
    fn rebuild_journal_locked(&self, state: &mut State) -> io::Result<()> {
        let tmp_path = self.inner.dir.join(JOURNAL_FILE_TMP);
        {
            let mut tmp = File::create(&tmp_path)?;
            writeln!(tmp, "{}", MAGIC)?;
            writeln!(tmp, "{}", VERSION)?;
            writeln!(tmp, "{}", self.inner.app_version)?;
            writeln!(tmp, "{}", self.inner.value_count)?;
            writeln!(tmp)?;
            for key in &state.lru_order {
                if let Some(entry) = state.entries.get(key) {
                    if entry.has_clean {
                        let lengths: Vec<String> = entry.clean_lengths.iter().map(|l| l.to_string()).collect();
                        writeln!(tmp, "{} {} {}", CLEAN, key, lengths.join(" "))?;
                    }
                }
            }
            tmp.flush()?;
        }

        let journal_path = self.inner.dir.join(JOURNAL_FILE);
        let backup_path = self.inner.dir.join(JOURNAL_FILE_BACKUP);
        if journal_path.exists() {
            fs::rename(&journal_path, &backup_path)?;
        }
        fs::rename(&tmp_path, &journal_path)?;
        let _ = fs::remove_file(&backup_path);

        state.journal = Some(OpenOptions::new().create(true).append(true).open(&journal_path)?);
        state.redundant_op_count = 0;
        Ok(())
    }

    /// Look up `key`; returns `None` on a miss or while another editor
    /// holds the key (spec.md SS4.6 "Snapshot").
    pub fn get(&self, key: &str) -> Option<Snapshot> {
        if !is_valid_key(key) {
            return None;
        }
        let mut state = self.inner.state.lock().unwrap();
        let entry = state.entries.get_mut(key)?;
        if !entry.has_clean || entry.zombie {
            return None;
        }
        entry.readers += 1;
        let lengths = entry.clean_lengths.clone();
        let files = (0..self.inner.value_count).map(|i| clean_file(&self.inner.dir, key, i)).collect();
        touch(&mut state.lru_order, key);
        let _ = self.append_journal_line(&mut state, &format!("{} {}", READ, key));

        Some(Snapshot {
            cache: self.inner.clone(),
            key: key.to_owned(),
            lengths,
            files,
        })
    }

    /// Begin editing `key`; returns `None` if another editor is already
    /// active for it (spec.md SS4.6 "at most one editor per key at a
    /// time").
    pub fn edit(&self, key: &str) -> Option<Editor> {
        if !is_valid_key(key) {
            return None;
        }
        let mut state = self.inner.state.lock().unwrap();
        if let Some(existing) = state.entries.get(key) {
            if existing.editing || existing.zombie {
                return None;
            }
        }
        let seq = {
            let entry = state
                .entries
                .entry(key.to_owned())
                .or_insert_with(|| Entry::new(key.to_owned(), self.inner.value_count));
            if !state.lru_order.contains(&key.to_owned()) {
                state.lru_order.push(key.to_owned());
            }
            entry.editing = true;
            entry.sequence_number += 1;
            entry.sequence_number
        };
        let _ = self.append_journal_line(&mut state, &format!("{} {}", DIRTY, key));

        Some(Editor {
            cache: self.inner.clone(),
            key: key.to_owned(),
            sequence_number: seq,
            written: vec![false; self.inner.value_count],
            done: false,
        })
    }

    fn commit_edit(&self, key: &str, lengths: Vec<u64>) -> io::Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        for i in 0..self.inner.value_count {
            let dirty = dirty_file(&self.inner.dir, key, i);
            let clean = clean_file(&self.inner.dir, key, i);
            if dirty.exists() {
                fs::rename(&dirty, &clean)?;
            }
        }
        let old_total = state.entries.get(key).map(|e| e.total_length()).unwrap_or(0);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.clean_lengths = lengths.iter().map(|&l| l as i64).collect();
            entry.has_clean = true;
            entry.editing = false;
            entry.sequence_number += 1;
        }
        let new_total = state.entries.get(key).map(|e| e.total_length()).unwrap_or(0);
        state.size = state.size - old_total + new_total;

        let lengths_str: Vec<String> = lengths.iter().map(|l| l.to_string()).collect();
        self.append_journal_line(&mut state, &format!("{} {} {}", CLEAN, key, lengths_str.join(" ")))?;
        self.trim_to_size_locked(&mut state)?;
        Ok(())
    }

    fn abort_edit(&self, key: &str) -> io::Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        for i in 0..self.inner.value_count {
            let _ = fs::remove_file(dirty_file(&self.inner.dir, key, i));
        }
        let had_clean = state.entries.get(key).map(|e| e.has_clean).unwrap_or(false);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.editing = false;
        }
        if had_clean {
            Ok(())
        } else {
            state.entries.remove(key);
            state.lru_order.retain(|k| k != key);
            self.append_journal_line(&mut state, &format!("{} {}", REMOVE, key))
        }
    }

    /// Removes `key`. If readers or an editor are still active, the entry
    /// is zombified: unlinked from the LRU now, files removed once the
    /// last reader closes (spec.md SS4.6 "Concurrency").
    pub fn remove(&self, key: &str) -> io::Result<bool> {
        let mut state = self.inner.state.lock().unwrap();
        let still_referenced = match state.entries.get_mut(key) {
            Some(entry) => {
                let referenced = entry.readers > 0 || entry.editing;
                if referenced {
                    entry.zombie = true;
                } else {
                    let total = entry.total_length();
                    state.size -= total;
                }
                Some(referenced)
            }
            None => None,
        };
        let Some(referenced) = still_referenced else {
            return Ok(false);
        };
        state.lru_order.retain(|k| k != key);
        if !referenced {
            state.entries.remove(key);
            for i in 0..self.inner.value_count {
                let _ = fs::remove_file(clean_file(&self.inner.dir, key, i));
            }
        }
        self.append_journal_line(&mut state, &format!("{} {}", REMOVE, key))?;
        Ok(true)
    }

    fn release_reader(&self, key: &str) {
        let mut state = self.inner.state.lock().unwrap();
        let should_delete = if let Some(entry) = state.entries.get_mut(key) {
            entry.readers = entry.readers.saturating_sub(1);
            entry.zombie && entry.readers == 0
        } else {
            false
        };
        if should_delete {
            state.entries.remove(key);
            for i in 0..self.inner.value_count {
                let _ = fs::remove_file(clean_file(&self.inner.dir, key, i));
            }
        }
    }

    fn trim_to_size_locked(&self, state: &mut State) -> io::Result<()> {
        while state.size > self.inner.max_size {
            let Some(oldest) = state.lru_order.iter().find(|k| {
                state.entries.get(*k).map(|e| e.has_clean && !e.zombie).unwrap_or(false)
            }).cloned() else {
                break;
            };
            let total = state.entries.get(&oldest).map(|e| e.total_length()).unwrap_or(0);
            state.entries.remove(&oldest);
            state.lru_order.retain(|k| k != &oldest);
            state.size -= total;
            for i in 0..self.inner.value_count {
                let _ = fs::remove_file(clean_file(&self.inner.dir, &oldest, i));
            }
            self.append_journal_line(state, &format!("{} {}", REMOVE, oldest))?;
        }
        Ok(())
    }

    /// Total bytes tracked across all CLEAN entries.
    pub fn size(&self) -> u64 {
        self.inner.state.lock().unwrap().size
    }

    /// Forces eviction down to `max_size`, used by tests and by the
    /// scheduler that serializes trim-to-size (spec.md SS5).
    pub fn flush(&self) -> io::Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        self.trim_to_size_locked(&mut state)
    }
}

fn touch(order: &mut Vec<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        let k = order.remove(pos);
        order.push(k);
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "journal header truncated")
}

/// A read handle on one committed value, open against the version that
/// was CLEAN when `get` was called (spec.md SS5 "snapshot isolation per
/// reader").
pub struct Snapshot {
    cache: Arc<Shared>,
    key: String,
    lengths: Vec<i64>,
    files: Vec<PathBuf>,
}

impl Snapshot {
    pub fn lengths(&self) -> &[i64] {
        &self.lengths
    }

    pub fn file(&self, index: usize) -> io::Result<File> {
        File::open(&self.files[index])
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let cache = DiskLruCache { inner: self.cache.clone() };
        cache.release_reader(&self.key);
    }
}

/// A write handle on one key; at most one is outstanding per key at a
/// time (spec.md SS4.6 "Editor").
pub struct Editor {
    cache: Arc<Shared>,
    key: String,
    sequence_number: u64,
    written: Vec<bool>,
    done: bool,
}

impl Editor {
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Opens a writable handle to value `index`'s dirty temp file.
    pub fn new_sink(&mut self, index: usize) -> io::Result<File> {
        self.written[index] = true;
        File::create(dirty_file(&self.cache.dir, &self.key, index))
    }

    /// Atomically renames each written `.tmp` to its clean name and
    /// records a `CLEAN` journal line (spec.md SS4.6 "commit").
    pub fn commit(mut self) -> io::Result<()> {
        self.done = true;
        let cache = DiskLruCache { inner: self.cache.clone() };
        let mut lengths = Vec::with_capacity(self.written.len());
        for i in 0..self.written.len() {
            let path = dirty_file(&self.cache.dir, &self.key, i);
            let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            lengths.push(len);
        }
        cache.commit_edit(&self.key, lengths)
    }

    /// Deletes `.tmp` files; writes `REMOVE` if the entry had no prior
    /// CLEAN commit (spec.md SS4.6 "abort").
    pub fn abort(mut self) -> io::Result<()> {
        self.done = true;
        let cache = DiskLruCache { inner: self.cache.clone() };
        cache.abort_edit(&self.key)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.done {
            let cache = DiskLruCache { inner: self.cache.clone() };
            let _ = cache.abort_edit(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_value(editor: &mut Editor, index: usize, data: &[u8]) {
        let mut f = editor.new_sink(index).unwrap();
        f.write_all(data).unwrap();
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024, 2, 1).unwrap();
        let mut editor = cache.edit("key1").unwrap();
        write_value(&mut editor, 0, b"meta");
        write_value(&mut editor, 1, b"body-bytes");
        editor.commit().unwrap();

        let snapshot = cache.get("key1").unwrap();
        let mut body = String::new();
        snapshot.file(1).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "body-bytes");
    }

    #[test]
    fn eviction_drops_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 10, 1, 1).unwrap();
        for key in ["a", "b", "c"] {
            let mut editor = cache.edit(key).unwrap();
            write_value(&mut editor, 0, b"12345");
            editor.commit().unwrap();
        }
        assert!(cache.size() <= 10);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reopening_recovers_committed_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskLruCache::open(dir.path(), 1024, 1, 1).unwrap();
            let mut editor = cache.edit("k").unwrap();
            write_value(&mut editor, 0, b"hello");
            editor.commit().unwrap();
        }
        let cache = DiskLruCache::open(dir.path(), 1024, 1, 1).unwrap();
        let snapshot = cache.get("k").unwrap();
        let mut body = String::new();
        snapshot.file(0).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello");
    }

    #[test]
    fn dangling_dirty_entry_is_cleaned_up_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskLruCache::open(dir.path(), 1024, 1, 1).unwrap();
            let mut editor = cache.edit("k").unwrap();
            write_value(&mut editor, 0, b"partial");
            std::mem::forget(editor);
        }
        let cache = DiskLruCache::open(dir.path(), 1024, 1, 1).unwrap();
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn rejects_invalid_key_on_edit_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024, 1, 1).unwrap();
        assert!(cache.edit("has space").is_none());
        assert!(cache.get("has space").is_none());
    }
}
