// EN: src/core/history.rs

use crate::core::delegate::DelegateHooks;
use crate::models::HistoryEntry;

/// Append-only log of (script, result) pairs, oldest first.
///
/// Writes and reads are mediated by the delegate hooks: a vetoed append is dropped
/// silently, a vetoed read returns `None`. Out-of-range reads also return `None`.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` unless vetoed. Returns whether something was stored.
    pub fn append(&mut self, entry: HistoryEntry, hooks: &DelegateHooks) -> bool {
        match hooks.admit_history_item(entry) {
            Some(entry) => {
                log::debug!(
                    "History item #{} added for script '{}'",
                    self.entries.len(),
                    entry.script
                );
                self.entries.push(entry);
                true
            }
            None => {
                log::debug!("History item vetoed by delegate.");
                false
            }
        }
    }

    pub fn get(&self, index: usize, hooks: &DelegateHooks) -> Option<HistoryEntry> {
        let entry = self.entries.get(index)?.clone();
        hooks.release_history_item(entry)
    }

    pub fn last(&self, hooks: &DelegateHooks) -> Option<HistoryEntry> {
        let entry = self.entries.last()?.clone();
        hooks.release_history_item(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw entries, bypassing the return hooks.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}
