//! Response orchestrator
//!
//! Decides whether an incoming message gets an automatic reply and runs the
//! reply cycle. At most one cycle runs at a time: the slot is an owned lock
//! guard taken before the LLM call and dropped on every exit path, so messages
//! that arrive meanwhile are recorded but never start a second call.

use super::events::Transcript;
use super::history::ChatEntry;
use super::responder::{LlmResponder, ReplyOutcome};
use crate::error::sanitize_error_message;
use crate::observability::metrics::metrics;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// What happened to one reply opportunity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reply published and recorded locally
    Published(String),
    /// The model had nothing to answer
    Skipped,
    /// LLM or publish failure, recorded as a system entry
    Failed(String),
    /// Another reply was already in flight
    Busy,
    /// Auto-reply is switched off
    Disabled,
}

/// Runs auto-reply cycles against a shared transport
pub struct ResponseOrchestrator<T: Transport + 'static> {
    transport: Arc<T>,
    responder: LlmResponder,
    transcript: Transcript,
    identity: String,
    typing_delay: Duration,
    auto_enabled: Arc<AtomicBool>,
    in_flight: Arc<Mutex<()>>,
}

impl<T: Transport + 'static> Clone for ResponseOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            responder: self.responder.clone(),
            transcript: self.transcript.clone(),
            identity: self.identity.clone(),
            typing_delay: self.typing_delay,
            auto_enabled: self.auto_enabled.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T: Transport + 'static> ResponseOrchestrator<T> {
    pub fn new(
        transport: Arc<T>,
        responder: LlmResponder,
        transcript: Transcript,
        identity: impl Into<String>,
        typing_delay: Duration,
        auto_enabled: bool,
    ) -> Self {
        Self {
            transport,
            responder,
            transcript,
            identity: identity.into(),
            typing_delay,
            auto_enabled: Arc::new(AtomicBool::new(auto_enabled)),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn set_auto(&self, enabled: bool) {
        self.auto_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Auto-reply toggled");
    }

    pub fn is_auto(&self) -> bool {
        self.auto_enabled.load(Ordering::SeqCst)
    }

    /// True while a reply cycle holds the slot
    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub fn responder(&self) -> &LlmResponder {
        &self.responder
    }

    /// Claim the reply slot if auto-reply is on and no cycle is running
    fn try_begin(&self) -> Result<OwnedMutexGuard<()>, CycleOutcome> {
        if !self.is_auto() {
            return Err(CycleOutcome::Disabled);
        }

        self.in_flight.clone().try_lock_owned().map_err(|_| {
            debug!("Reply already in flight, not starting another");
            metrics().reply_skipped_busy();
            CycleOutcome::Busy
        })
    }

    /// Run a reply cycle to completion on the current task
    pub async fn respond(&self) -> CycleOutcome {
        match self.try_begin() {
            Ok(guard) => self.run_cycle(guard).await,
            Err(outcome) => outcome,
        }
    }

    /// Start a reply cycle in the background
    ///
    /// The slot is claimed before spawning, so two messages arriving back to
    /// back cannot both start a cycle. Returns `None` when no cycle started.
    pub fn spawn_respond(&self) -> Option<JoinHandle<CycleOutcome>> {
        let guard = self.try_begin().ok()?;
        let orchestrator = self.clone();
        Some(tokio::spawn(async move { orchestrator.run_cycle(guard).await }))
    }

    async fn run_cycle(&self, _guard: OwnedMutexGuard<()>) -> CycleOutcome {
        let span = crate::reply_span!(identity = %self.identity, model = %self.responder.model());
        async move {
            let started = Instant::now();

            self.send_typing(true).await;
            tokio::time::sleep(self.typing_delay).await;

            let history = self.transcript.history().recent(self.responder.history_limit());
            let outcome = self.responder.generate(&history).await;

            self.send_typing(false).await;

            match outcome {
                ReplyOutcome::Reply(text) => self.publish_reply(text, started).await,
                ReplyOutcome::Skipped => CycleOutcome::Skipped,
                ReplyOutcome::Failed(error_text) => {
                    metrics().llm_failed();
                    let error_text = sanitize_error_message(&error_text);
                    self.transcript.append(ChatEntry::system(error_text.clone()));
                    CycleOutcome::Failed(error_text)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn publish_reply(&self, text: String, started: Instant) -> CycleOutcome {
        match self.transport.publish_message(&self.identity, &text).await {
            Ok(()) => {
                metrics().reply_generated(started.elapsed());
                info!(
                    chars = text.chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Auto-reply published"
                );
                self.transcript
                    .append(ChatEntry::local(self.identity.clone(), text.clone()));
                CycleOutcome::Published(text)
            }
            Err(e) => {
                warn!(error = %e, "Failed to publish auto-reply");
                let message = sanitize_error_message(&format!("Could not send reply: {e}"));
                self.transcript.append(ChatEntry::system(message.clone()));
                CycleOutcome::Failed(message)
            }
        }
    }

    async fn send_typing(&self, is_typing: bool) {
        if let Err(e) = self.transport.publish_typing(&self.identity, is_typing).await {
            debug!(error = %e, is_typing, "Typing signal not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::SessionEvent;
    use crate::config::{AutoReplySection, LlmSection};
    use crate::llm::provider::LlmProvider;
    use crate::testing::mocks::{MockLlmProvider, MockTransport, PublishedItem};

    fn orchestrator(
        transport: Arc<MockTransport>,
        provider: Arc<dyn LlmProvider>,
    ) -> ResponseOrchestrator<MockTransport> {
        let responder = LlmResponder::new(
            provider,
            &LlmSection::default(),
            &AutoReplySection::default(),
        );
        ResponseOrchestrator::new(
            transport,
            responder,
            Transcript::new(),
            "Alice",
            Duration::from_millis(10),
            true,
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_typing_then_reply() {
        let transport = Arc::new(MockTransport::connected());
        let orchestrator = orchestrator(
            transport.clone(),
            Arc::new(MockLlmProvider::single_response("hi Bob")),
        );
        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "hello"));

        let outcome = orchestrator.respond().await;
        assert_eq!(outcome, CycleOutcome::Published("hi Bob".to_string()));

        assert_eq!(
            transport.published().await,
            vec![
                PublishedItem::Typing {
                    sender: "Alice".to_string(),
                    is_typing: true
                },
                PublishedItem::Typing {
                    sender: "Alice".to_string(),
                    is_typing: false
                },
                PublishedItem::Message {
                    sender: "Alice".to_string(),
                    text: "hi Bob".to_string()
                },
            ]
        );

        let history = orchestrator.transcript.history().snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].sender, "Alice");
        assert_eq!(history[1].content, "hi Bob");
        assert_eq!(history[1].origin, crate::agent::history::EntryOrigin::Local);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_llm_failure_records_system_entry_and_publishes_nothing() {
        let transport = Arc::new(MockTransport::connected());
        let orchestrator =
            orchestrator(transport.clone(), Arc::new(MockLlmProvider::with_failure()));
        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "hello"));
        let mut events = orchestrator.transcript.subscribe();

        let outcome = orchestrator.respond().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed(ref text) if text.starts_with("[LLM Error]: ")
        ));

        let published = transport.published().await;
        assert!(published
            .iter()
            .all(|item| !matches!(item, PublishedItem::Message { .. })));
        // Typing is always switched back off
        assert_eq!(
            published.last(),
            Some(&PublishedItem::Typing {
                sender: "Alice".to_string(),
                is_typing: false
            })
        );

        match events.recv().await.unwrap() {
            SessionEvent::MessageAppended(entry) => assert!(entry.is_system()),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_skipped_when_last_turn_is_local() {
        let transport = Arc::new(MockTransport::connected());
        let orchestrator = orchestrator(
            transport.clone(),
            Arc::new(MockLlmProvider::single_response("unused")),
        );
        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "hello"));
        orchestrator
            .transcript
            .append(ChatEntry::local("Alice", "already answered"));

        assert_eq!(orchestrator.respond().await, CycleOutcome::Skipped);
        assert_eq!(orchestrator.transcript.history().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_does_nothing() {
        let transport = Arc::new(MockTransport::connected());
        let orchestrator = orchestrator(
            transport.clone(),
            Arc::new(MockLlmProvider::single_response("unused")),
        );
        orchestrator.set_auto(false);
        assert!(!orchestrator.is_auto());

        assert_eq!(orchestrator.respond().await, CycleOutcome::Disabled);
        assert!(orchestrator.spawn_respond().is_none());
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_reply_is_rejected_while_in_flight() {
        let transport = Arc::new(MockTransport::connected());
        let provider = Arc::new(
            MockLlmProvider::single_response("slow answer").with_delay(Duration::from_millis(200)),
        );
        let orchestrator = orchestrator(transport.clone(), provider.clone());
        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "first"));

        let handle = orchestrator.spawn_respond().expect("first cycle starts");
        assert!(orchestrator.is_busy());

        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "second"));
        assert!(orchestrator.spawn_respond().is_none());
        assert_eq!(orchestrator.respond().await, CycleOutcome::Busy);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, CycleOutcome::Published("slow answer".to_string()));
        assert_eq!(provider.requests().await.len(), 1);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_publish_failure_is_recorded() {
        let transport = Arc::new(MockTransport::with_failure());
        let orchestrator = orchestrator(
            transport.clone(),
            Arc::new(MockLlmProvider::single_response("hi")),
        );
        orchestrator
            .transcript
            .append(ChatEntry::remote("Bob", "hello"));

        let outcome = orchestrator.respond().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed(ref text) if text.starts_with("Could not send reply")
        ));
        let history = orchestrator.transcript.history().snapshot();
        assert!(history.last().unwrap().is_system());
        assert!(!orchestrator.is_busy());
    }
}
