//! LLM responder
//!
//! Turns the recent transcript into a chat-completion request and the
//! completion back into a line fit for the room. Failures never escape as
//! errors: they come back as [`ReplyOutcome::Failed`] carrying the in-band
//! error text shown in the transcript.

use super::history::{ChatEntry, EntryOrigin};
use crate::config::{AutoReplySection, LlmSection};
use crate::llm::provider::{CompletionRequest, LlmProvider, Message, MessageRole};
use crate::processing::clean;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shown when the server answers with no content
pub const EMPTY_REPLY: &str = "(no response)";
/// Prefix of the in-band error text
pub const LLM_ERROR_PREFIX: &str = "[LLM Error]: ";

/// Result of asking the model for a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Text to publish
    Reply(String),
    /// Nothing to answer: the conversation does not end on someone else's turn
    Skipped,
    /// In-band error text, already prefixed
    Failed(String),
}

impl ReplyOutcome {
    /// Collapse to the plain string form: reply text, empty, or the error text
    pub fn into_text(self) -> String {
        match self {
            Self::Reply(text) | Self::Failed(text) => text,
            Self::Skipped => String::new(),
        }
    }
}

/// Builds requests for one model with one persona
#[derive(Clone)]
pub struct LlmResponder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    history_limit: usize,
}

impl LlmResponder {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        llm: &LlmSection,
        auto_reply: &AutoReplySection,
    ) -> Self {
        Self {
            provider,
            model: llm.model.clone(),
            system_prompt: llm.system_prompt.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            history_limit: auto_reply.history_limit,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Build the message list for a transcript (pure function)
    ///
    /// Takes the last `history_limit` entries, drops system entries and maps
    /// local lines to `assistant` and remote lines to `user`. The first turn
    /// is forced to `user`. Returns `None` when the last turn is not `user`.
    pub fn build_messages(&self, entries: &[ChatEntry]) -> Option<Vec<Message>> {
        let start = entries.len().saturating_sub(self.history_limit);

        let mut turns: Vec<Message> = entries[start..]
            .iter()
            .filter_map(|entry| match entry.origin {
                EntryOrigin::Local => Some(Message::assistant(entry.content.clone())),
                EntryOrigin::Remote => Some(Message::user(entry.content.clone())),
                EntryOrigin::System => None,
            })
            .collect();

        if let Some(first) = turns.first_mut() {
            first.role = MessageRole::User;
        }

        if turns.last().map(|turn| turn.role) != Some(MessageRole::User) {
            return None;
        }

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(turns);
        Some(messages)
    }

    /// Ask the model for the next line of the conversation
    pub async fn generate(&self, entries: &[ChatEntry]) -> ReplyOutcome {
        let Some(messages) = self.build_messages(entries) else {
            debug!("Last turn is not from a remote participant, skipping LLM call");
            return ReplyOutcome::Skipped;
        };

        let request = CompletionRequest {
            messages,
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                let text = response
                    .content
                    .map(|content| clean(content.trim()))
                    .unwrap_or_default();
                if text.is_empty() {
                    ReplyOutcome::Reply(EMPTY_REPLY.to_string())
                } else {
                    ReplyOutcome::Reply(text)
                }
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "LLM request failed");
                ReplyOutcome::Failed(format!("{LLM_ERROR_PREFIX}{e}"))
            }
        }
    }

    /// String form of [`generate`](Self::generate): empty when skipped
    pub async fn get_response(&self, entries: &[ChatEntry]) -> String {
        self.generate(entries).await.into_text()
    }

    /// Model ids the server offers; empty when the server cannot be reached
    pub async fn list_models(&self) -> Vec<String> {
        match self.provider.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "Could not list models");
                Vec::new()
            }
        }
    }
}
