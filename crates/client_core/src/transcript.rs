use shared::domain::{Role, TranscriptEntry};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("no transcript entry at index {0}")]
    MissingEntry(usize),
    #[error("transcript entry {0} is already closed")]
    EntryClosed(usize),
}

/// Append-only conversation log.
///
/// Entries are never reordered or removed. The only mutation allowed after
/// insertion is replacing the text of an open entry, or closing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    pub(crate) fn append_open(&mut self, role: Role, text: impl Into<String>) -> usize {
        self.entries.push(TranscriptEntry::open(role, text));
        self.entries.len() - 1
    }

    pub(crate) fn append_closed(&mut self, role: Role, text: impl Into<String>) -> usize {
        self.entries.push(TranscriptEntry::closed(role, text));
        self.entries.len() - 1
    }

    pub(crate) fn replace_open_text(
        &mut self,
        index: usize,
        text: &str,
    ) -> Result<(), TranscriptError> {
        let entry = self.open_entry_mut(index)?;
        entry.text.clear();
        entry.text.push_str(text);
        Ok(())
    }

    pub(crate) fn close(&mut self, index: usize) -> Result<(), TranscriptError> {
        self.open_entry_mut(index)?.open = false;
        Ok(())
    }

    fn open_entry_mut(&mut self, index: usize) -> Result<&mut TranscriptEntry, TranscriptError> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(TranscriptError::MissingEntry(index))?;
        if !entry.open {
            return Err(TranscriptError::EntryClosed(index));
        }
        Ok(entry)
    }
}

/// Per-role bookkeeping for the turn currently receiving deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnCursor {
    pub open_index: Option<usize>,
    pub accumulated: String,
    pub item_id: Option<String>,
}

impl TurnCursor {
    pub fn is_open(&self) -> bool {
        self.open_index.is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.open_index = None;
        self.accumulated.clear();
        self.item_id = None;
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
