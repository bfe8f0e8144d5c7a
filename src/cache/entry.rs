//! One journal-tracked cache entry: its clean/dirty file state and
//! outstanding reader/editor bookkeeping (spec.md SS3 "Cache entry",
//! SS4.6 "Concurrency").

use std::path::PathBuf;

/// A cache entry's in-memory bookkeeping. The journal is the source of
/// truth for what's committed; this struct mirrors it for one key.
pub struct Entry {
    pub key: String,
    /// Byte length of each committed value file, `-1` until first commit.
    pub clean_lengths: Vec<i64>,
    /// True once this key has ever reached a CLEAN state.
    pub has_clean: bool,
    /// True while an `Editor` is outstanding for this key (spec.md SS4.6:
    /// "at most one editor per key at a time").
    pub editing: bool,
    /// True once `remove()` unlinked this entry from the LRU while
    /// readers or an editor were still active (spec.md SS-GLOSSARY
    /// "Zombie entry").
    pub zombie: bool,
    /// Outstanding reader count; files are only physically deleted once
    /// this reaches zero after `zombie` is set.
    pub readers: u32,
    pub sequence_number: u64,
}

impl Entry {
    pub fn new(key: String, value_count: usize) -> Entry {
        Entry {
            key,
            clean_lengths: vec![-1; value_count],
            has_clean: false,
            editing: false,
            zombie: false,
            readers: 0,
            sequence_number: 0,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.clean_lengths.iter().map(|&l| l.max(0) as u64).sum()
    }
}

/// Builds the on-disk file names for entry `key`, index `i`, for either
/// the clean (committed) or dirty (in-progress) variant.
pub fn clean_file(dir: &std::path::Path, key: &str, i: usize) -> PathBuf {
    dir.join(format!("{}.{}", key, i))
}

pub fn dirty_file(dir: &std::path::Path, key: &str, i: usize) -> PathBuf {
    dir.join(format!("{}.{}.tmp", key, i))
}

/// Validates a cache key against spec.md SS8: `[a-z0-9_-]{1,120}`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 120
        && key.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("has/slash"));
        assert!(!is_valid_key("Upper"));
        assert!(!is_valid_key(&"a".repeat(121)));
        assert!(is_valid_key(&"a".repeat(120)));
        assert!(is_valid_key("abc-123_ok"));
    }
}
