//! Chat session
//!
//! Owns the transport, the transcript and the response orchestrator for one
//! identity. Decoded room events arrive on two channels and are turned into
//! transcript entries and [`SessionEvent`]s; incoming messages may trigger an
//! automatic reply.

use super::events::{SessionEvent, Transcript};
use super::history::{ChatEntry, ConversationHistory};
use super::orchestrator::ResponseOrchestrator;
use super::responder::LlmResponder;
use crate::config::ChatConfig;
use crate::error::{sanitize_error_message, ChatError, ChatResult};
use crate::llm::provider::LlmProvider;
use crate::protocol::{IncomingMessage, TypingSignal};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// One participant in one room
pub struct ChatSession<T>
where
    T: Transport + 'static,
    ChatError: From<T::Error>,
{
    identity: String,
    transport: Arc<T>,
    transcript: Transcript,
    orchestrator: ResponseOrchestrator<T>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> ChatSession<T>
where
    T: Transport + 'static,
    ChatError: From<T::Error>,
{
    /// Create a session with injected transport and LLM provider
    pub fn new(config: &ChatConfig, transport: T, llm_provider: Arc<dyn LlmProvider>) -> Self {
        let identity = config.session.name.trim().to_string();
        let transport = Arc::new(transport);
        let transcript = Transcript::new();
        let responder = LlmResponder::new(llm_provider, &config.llm, &config.auto_reply);
        let orchestrator = ResponseOrchestrator::new(
            transport.clone(),
            responder,
            transcript.clone(),
            identity.clone(),
            Duration::from_millis(config.auto_reply.typing_delay_ms),
            config.auto_reply.enabled,
        );

        Self {
            identity,
            transport,
            transcript,
            orchestrator,
            tasks: Vec::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn history(&self) -> &ConversationHistory {
        self.transcript.history()
    }

    pub fn orchestrator(&self) -> &ResponseOrchestrator<T> {
        &self.orchestrator
    }

    /// Follow transcript, typing and status changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.transcript.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Join the room and start relaying its events
    ///
    /// A failure is recorded as a system entry and returned; the session stays
    /// usable for another attempt.
    pub async fn connect(&mut self) -> ChatResult<()> {
        let span = crate::session_span!(identity = %self.identity);
        async {
            if self.transport.is_connected() {
                return Ok(());
            }

            self.transcript.set_status("Connecting...");

            let (message_tx, message_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let (typing_tx, typing_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            self.transport.set_event_senders(message_tx, typing_tx);

            if let Err(e) = self.transport.connect(&self.identity).await {
                let e = ChatError::from(e);
                error!(error = %e, "Could not join the room");
                self.transcript.set_status("Connection error");
                self.transcript.append(ChatEntry::system(format!(
                    "Could not connect: {}",
                    e.user_message()
                )));
                return Err(e);
            }

            self.stop_tasks();
            self.tasks.push(Self::spawn_message_loop(
                message_rx,
                self.transcript.clone(),
                self.orchestrator.clone(),
            ));
            self.tasks
                .push(Self::spawn_typing_loop(typing_rx, self.transcript.clone()));

            info!("Joined the room");
            self.transcript
                .set_status(format!("Connected as {}", self.identity));
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Leave the room; safe to call at any time
    pub async fn disconnect(&mut self) -> ChatResult<()> {
        let result = self.transport.disconnect().await.map_err(ChatError::from);
        self.stop_tasks();

        match &result {
            Ok(()) => self.transcript.set_status("Disconnected"),
            Err(e) => self
                .transcript
                .set_status(format!("Error: {}", e.user_message())),
        }
        result
    }

    /// Publish a line typed by the user
    ///
    /// Blank input is ignored and returns `Ok(false)`. Sending while
    /// disconnected is an error.
    pub async fn send(&self, text: &str) -> ChatResult<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        if !self.transport.is_connected() {
            self.transcript.set_status("Connect first");
            return Err(ChatError::NotConnected);
        }

        if let Err(e) = self.transport.publish_message(&self.identity, text).await {
            let e = ChatError::from(e);
            self.transcript
                .set_status(format!("Send failed: {}", e.user_message()));
            return Err(e);
        }

        self.transcript
            .append(ChatEntry::local(self.identity.clone(), text));
        Ok(true)
    }

    pub fn set_auto(&self, enabled: bool) {
        self.orchestrator.set_auto(enabled);
        self.transcript.set_status(if enabled {
            "Auto-reply on"
        } else {
            "Auto-reply off"
        });
    }

    pub fn is_auto(&self) -> bool {
        self.orchestrator.is_auto()
    }

    pub fn clear_history(&self) {
        self.transcript.clear();
    }

    /// Record a client-side notice in the transcript
    pub fn notify(&self, message: &str) {
        self.transcript
            .append(ChatEntry::system(sanitize_error_message(message)));
    }

    fn spawn_message_loop(
        mut messages: mpsc::Receiver<IncomingMessage>,
        transcript: Transcript,
        orchestrator: ResponseOrchestrator<T>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                debug!(sender = %message.sender, "Message received");
                transcript.set_typing(message.sender.clone(), false);
                transcript.append(ChatEntry::remote(message.sender, message.content));

                // Busy or disabled: the message stays in the transcript only
                orchestrator.spawn_respond();
            }
            debug!("Message channel closed");
        })
    }

    fn spawn_typing_loop(
        mut signals: mpsc::Receiver<TypingSignal>,
        transcript: Transcript,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                transcript.set_typing(signal.sender, signal.is_typing);
            }
            debug!("Typing channel closed");
        })
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl<T> Drop for ChatSession<T>
where
    T: Transport + 'static,
    ChatError: From<T::Error>,
{
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
