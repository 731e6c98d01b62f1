//! In-memory conversation history
//!
//! The transcript lives only as long as the process. Both the session loop and
//! the reply task append to it, so the store is cheaply cloneable and guarded
//! by a short-lived lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sender name shown for entries the client itself produces
pub const SYSTEM_SENDER: &str = "System";

/// Who produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrigin {
    /// Written by this participant, by hand or by the auto-responder
    Local,
    /// Received from the room
    Remote,
    /// Client notices such as connection failures and LLM errors
    System,
}

/// One line of the transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEntry {
    pub sender: String,
    pub content: String,
    pub origin: EntryOrigin,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn local(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, EntryOrigin::Local)
    }

    pub fn remote(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, EntryOrigin::Remote)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, content, EntryOrigin::System)
    }

    fn new(sender: impl Into<String>, content: impl Into<String>, origin: EntryOrigin) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.origin == EntryOrigin::System
    }
}

/// Shared, append-only (until cleared) list of chat entries
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Arc<Mutex<Vec<ChatEntry>>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatEntry>> {
        // A panic while holding the lock cannot leave a half-written Vec behind
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, entry: ChatEntry) {
        self.lock().push(entry);
    }

    /// Copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.lock().clone()
    }

    /// Copy of the last `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ChatEntry> {
        let entries = self.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_constructors() {
        let local = ChatEntry::local("Alice", "hi");
        assert_eq!(local.origin, EntryOrigin::Local);
        assert_eq!(local.sender, "Alice");

        let remote = ChatEntry::remote("Bob", "hello");
        assert_eq!(remote.origin, EntryOrigin::Remote);

        let system = ChatEntry::system("Could not connect");
        assert_eq!(system.sender, SYSTEM_SENDER);
        assert!(system.is_system());
        assert!(!remote.is_system());
    }

    #[test]
    fn test_push_snapshot_and_clear() {
        let history = ConversationHistory::new();
        assert!(history.is_empty());

        history.push(ChatEntry::remote("Bob", "one"));
        history.push(ChatEntry::local("Alice", "two"));
        assert_eq!(history.len(), 2);

        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].content, "one");
        assert_eq!(snapshot[1].content, "two");

        history.clear();
        assert!(history.is_empty());
        // Snapshots are copies
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_recent_keeps_the_tail() {
        let history = ConversationHistory::new();
        for i in 0..20 {
            history.push(ChatEntry::remote("Bob", format!("m{i}")));
        }

        let recent = history.recent(16);
        assert_eq!(recent.len(), 16);
        assert_eq!(recent[0].content, "m4");
        assert_eq!(recent[15].content, "m19");

        assert_eq!(history.recent(100).len(), 20);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let history = ConversationHistory::new();
        let other = history.clone();
        other.push(ChatEntry::system("shared"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_entry_serializes_origin_lowercase() {
        let value = serde_json::to_value(ChatEntry::remote("Bob", "hola")).unwrap();
        assert_eq!(value["origin"], "remote");
        assert_eq!(value["sender"], "Bob");
    }
}
