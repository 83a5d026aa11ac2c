/// Browser history adapter — back/forward frames for story progress.
use thiserror::Error;

use crate::schema::save::HistoryPayload;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history entry could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("history entry rejected: {0}")]
    Rejected(String),
}

/// The engine only pushes or replaces entries. Back/forward are driven by
/// the host, which hands the popped payload to `StoryEngine::handle_pop`.
///
/// A failed push or replace aborts the navigation that caused it.
pub trait BrowserHistory {
    fn push_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError>;
    fn replace_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError>;
}

/// In-memory session history. Starts with one payload-less entry standing
/// in for the page the story was opened from.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    entries: Vec<Option<HistoryPayload>>,
    index: usize,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            index: 0,
        }
    }

    /// Total entries, including the initial one.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&HistoryPayload> {
        self.entries.get(self.index).and_then(|e| e.as_ref())
    }

    pub fn entries(&self) -> &[Option<HistoryPayload>] {
        &self.entries
    }

    /// Step back. Returns the payload of the entry stepped to, or `None`
    /// if already at the first entry.
    pub fn back(&mut self) -> Option<Option<HistoryPayload>> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(self.entries[self.index].clone())
    }

    /// Step forward, if a forward entry exists.
    pub fn forward(&mut self) -> Option<Option<HistoryPayload>> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(self.entries[self.index].clone())
    }
}

impl BrowserHistory for MemoryHistory {
    fn push_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError> {
        self.entries.truncate(self.index + 1);
        self.entries.push(Some(payload));
        self.index += 1;
        Ok(())
    }

    fn replace_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError> {
        self.entries[self.index] = Some(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::passage::PassageId;

    fn payload(ids: &[u32]) -> HistoryPayload {
        HistoryPayload {
            history: ids.iter().map(|i| PassageId(*i)).collect(),
            ..HistoryPayload::default()
        }
    }

    #[test]
    fn starts_with_blank_entry() {
        let h = MemoryHistory::new();
        assert_eq!(h.len(), 1);
        assert!(h.current().is_none());
    }

    #[test]
    fn push_and_replace() {
        let mut h = MemoryHistory::new();
        h.push_entry(payload(&[1])).unwrap();
        h.replace_entry(payload(&[1, 2])).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h.current().unwrap().history.len(), 2);
    }

    #[test]
    fn back_and_forward() {
        let mut h = MemoryHistory::new();
        h.push_entry(payload(&[1])).unwrap();
        h.push_entry(payload(&[1, 2])).unwrap();
        assert_eq!(h.back(), Some(Some(payload(&[1]))));
        assert_eq!(h.back(), Some(None));
        assert_eq!(h.back(), None);
        assert_eq!(h.forward(), Some(Some(payload(&[1]))));
        assert_eq!(h.forward(), Some(Some(payload(&[1, 2]))));
        assert_eq!(h.forward(), None);
    }

    #[test]
    fn push_truncates_forward_entries() {
        let mut h = MemoryHistory::new();
        h.push_entry(payload(&[1])).unwrap();
        h.push_entry(payload(&[1, 2])).unwrap();
        h.back();
        h.push_entry(payload(&[1, 3])).unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.forward(), None);
    }
}
