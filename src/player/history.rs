use std::path::{Path, PathBuf};

use crate::error::SelectionError;

/// Ordered list of recently played tracks with a navigation cursor.
///
/// The newest entry is last. The cursor tracks the playing entry so the
/// player can step backward through history and forward again; it sits at -1
/// when nothing in the list is current.
#[derive(Debug, Default)]
pub struct TrackHistory {
    entries: Vec<PathBuf>,
    index: isize,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    /// Path of the newest entry.
    pub fn last(&self) -> Option<&PathBuf> {
        self.entries.last()
    }

    /// Record `path` as the newest entry and move the cursor to it, then
    /// prune to `max_len`. A zero or absent limit disables history entirely.
    pub fn remember(&mut self, path: &Path, max_len: Option<usize>) {
        let max_len = match max_len {
            Some(len) if len > 0 => len,
            _ => return,
        };
        // Only a back-to-back repeat is suppressed; replaying an older
        // track appends a fresh entry so retreating returns to whatever
        // played right before it.
        if self.entries.last().map(PathBuf::as_path) != Some(path) {
            self.entries.push(path.to_path_buf());
        }
        self.index = self.entries.len() as isize - 1;
        self.prune(Some(max_len));
    }

    /// Drop the oldest entries until at most `max_len` remain, shifting the
    /// cursor to keep it on the same entry. A cursor that pointed at a
    /// removed entry lands on -1.
    pub fn prune(&mut self, max_len: Option<usize>) {
        let max_len = max_len.unwrap_or(0);
        if self.entries.len() <= max_len {
            return;
        }
        let removed = self.entries.len() - max_len;
        self.entries.drain(..removed);
        self.index = (self.index - removed as isize).max(-1);
    }

    /// Move the cursor back to the newest entry, for when playback jumps out
    /// of history navigation.
    pub fn reset_index_to_newest(&mut self) {
        self.index = self.entries.len() as isize - 1;
    }

    /// Whether the cursor has an older entry behind it.
    pub fn has_previous(&self) -> bool {
        self.index > 0
    }

    /// Step the cursor back one entry. History is left untouched on failure.
    pub fn retreat(&mut self) -> Result<&PathBuf, SelectionError> {
        if self.index <= 0 {
            return Err(SelectionError::NoPreviousTrack);
        }
        self.index -= 1;
        Ok(&self.entries[self.index as usize])
    }

    /// Step the cursor forward one entry, or `None` when already at the
    /// newest entry.
    pub fn advance(&mut self) -> Option<&PathBuf> {
        if self.index < 0 || self.index as usize + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(&self.entries[self.index as usize])
    }

    /// Cursor position, newest entry = len - 1.
    pub fn index(&self) -> isize {
        self.index
    }
}
