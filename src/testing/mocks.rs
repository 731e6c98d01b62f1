//! Mock implementations for testing
//!
//! Provides mock Transport and LlmProvider implementations so sessions and
//! reply cycles can be exercised without a broker or an LLM server.

use crate::error::ChatError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::protocol::{IncomingMessage, TypingSignal};
use crate::transport::{mqtt::ConnectionState, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Something a mock transport was asked to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedItem {
    Message { sender: String, text: String },
    Typing { sender: String, is_typing: bool },
}

type EventSenders = (mpsc::Sender<IncomingMessage>, mpsc::Sender<TypingSignal>);

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published: Arc<Mutex<Vec<PublishedItem>>>,
    pub should_fail: bool,
    connected: AtomicBool,
    identity: std::sync::Mutex<Option<String>>,
    senders: std::sync::Mutex<Option<EventSenders>>,
}

impl MockTransport {
    /// Disconnected until `connect` is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Already joined, for tests that skip `connect`
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// Every operation fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<PublishedItem> {
        self.published.lock().await.clone()
    }

    pub async fn published_messages(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .await
            .iter()
            .filter_map(|item| match item {
                PublishedItem::Message { sender, text } => Some((sender.clone(), text.clone())),
                PublishedItem::Typing { .. } => None,
            })
            .collect()
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
    }

    /// Identity passed to the last successful `connect`
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().ok().and_then(|identity| identity.clone())
    }

    fn event_senders(&self) -> Option<EventSenders> {
        self.senders.lock().ok().and_then(|senders| senders.clone())
    }

    /// Deliver a chat message as if it came from the room
    pub async fn inject_message(&self, sender: &str, content: &str) {
        if let Some((messages, _)) = self.event_senders() {
            let _ = messages
                .send(IncomingMessage {
                    sender: sender.to_string(),
                    content: content.to_string(),
                })
                .await;
        }
    }

    /// Deliver a typing signal as if it came from the room
    pub async fn inject_typing(&self, sender: &str, is_typing: bool) {
        if let Some((_, typing)) = self.event_senders() {
            let _ = typing
                .send(TypingSignal {
                    sender: sender.to_string(),
                    is_typing,
                })
                .await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = ChatError;

    async fn connect(&self, identity: &str) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(ChatError::internal("Mock connection failure"));
        }
        if let Ok(mut current) = self.identity.lock() {
            *current = Some(identity.to_string());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_message(&self, sender: &str, text: &str) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(ChatError::internal("Mock publish failure"));
        }
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }

        self.published.lock().await.push(PublishedItem::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn publish_typing(&self, sender: &str, is_typing: bool) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(ChatError::internal("Mock publish failure"));
        }
        if !self.is_connected() {
            return Ok(());
        }

        self.published.lock().await.push(PublishedItem::Typing {
            sender: sender.to_string(),
            is_typing,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.should_fail && self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.should_fail {
            Some(ConnectionState::Disconnected(
                "Mock disconnection".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }

    fn set_event_senders(
        &self,
        messages: mpsc::Sender<IncomingMessage>,
        typing: mpsc::Sender<TypingSignal>,
    ) {
        if let Ok(mut senders) = self.senders.lock() {
            *senders = Some((messages, typing));
        }
    }
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
    pub delay: Option<Duration>,
    pub models: Vec<String>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            should_fail: false,
            delay: None,
            models: vec!["mock-model".to_string()],
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Hold every completion for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Completion requests received so far
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if self.should_fail {
            Err(LlmError::NetworkError("Mock server unreachable".to_string()))
        } else {
            Ok(self.models.clone())
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}
