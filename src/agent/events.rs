//! Session events broadcast to whoever renders the chat
//!
//! The CLI is the only subscriber today, but any number of receivers may
//! follow a session. Receivers that fall behind lose the oldest events.

use super::history::{ChatEntry, ConversationHistory};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Something the UI should reflect
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A line was added to the transcript
    MessageAppended(ChatEntry),
    /// A remote participant started or stopped typing
    TypingChanged { sender: String, is_typing: bool },
    /// Human-readable connection or activity status
    StatusChanged(String),
    /// The transcript was emptied
    HistoryCleared,
}

/// History plus the event channel that mirrors every change to it
#[derive(Debug, Clone)]
pub struct Transcript {
    history: ConversationHistory,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            history: ConversationHistory::new(),
            events,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn append(&self, entry: ChatEntry) {
        self.history.push(entry.clone());
        self.emit(SessionEvent::MessageAppended(entry));
    }

    pub fn set_typing(&self, sender: impl Into<String>, is_typing: bool) {
        self.emit(SessionEvent::TypingChanged {
            sender: sender.into(),
            is_typing,
        });
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.emit(SessionEvent::StatusChanged(status.into()));
    }

    pub fn clear(&self) {
        self.history.clear();
        self.emit(SessionEvent::HistoryCleared);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_records_and_broadcasts() {
        let transcript = Transcript::new();
        let mut events = transcript.subscribe();

        transcript.append(ChatEntry::remote("Bob", "hola"));

        assert_eq!(transcript.history().len(), 1);
        match events.recv().await.unwrap() {
            SessionEvent::MessageAppended(entry) => assert_eq!(entry.content, "hola"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_status_and_clear_events() {
        let transcript = Transcript::new();
        let mut events = transcript.subscribe();

        transcript.set_typing("Bob", true);
        transcript.set_status("Connected as Alice");
        transcript.append(ChatEntry::local("Alice", "hi"));
        transcript.clear();

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::TypingChanged {
                sender: "Bob".to_string(),
                is_typing: true
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StatusChanged("Connected as Alice".to_string())
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::MessageAppended(_)
        ));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::HistoryCleared);
        assert!(transcript.history().is_empty());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let transcript = Transcript::new();
        transcript.append(ChatEntry::system("nobody listening"));
        assert_eq!(transcript.history().len(), 1);
    }
}
