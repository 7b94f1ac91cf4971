//! Chat Skill
//!
//! Open-ended conversation backed by an [`LlmBackend`]. The exchange history
//! lives in the user's [`State`] data under [`HISTORY_KEY`], so it survives
//! across turns for as long as the topic does and disappears when the topic
//! ends or goes stale.
//!
//! The reply is streamed: `process` returns as soon as the backend accepts
//! the request, and the generated text is recorded in the history once the
//! stream has been played.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{ChatMessage, LlmBackend, LlmRequest};
use crate::config::ChatConfig;
use crate::context::TurnContext;
use crate::models::{Request, Response, State, User};
use crate::skill::Skill;
use crate::streaming::GenerationStream;

/// State data key holding the chat history
pub const HISTORY_KEY: &str = "chat.history";

/// LLM-backed conversation skill
pub struct ChatSkill {
    topic: String,
    backend: Arc<dyn LlmBackend>,
    model: String,
    system_prompt: Option<String>,
    max_history_messages: usize,
    end_phrases: Vec<String>,
}

impl ChatSkill {
    /// Create a chat skill with the default settings
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self::from_config(&ChatConfig::default(), backend)
    }

    /// Create a chat skill from the chat settings
    pub fn from_config(config: &ChatConfig, backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            topic: config.topic.clone(),
            backend,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_history_messages: config.max_history_messages,
            end_phrases: Vec::new(),
        }
    }

    /// Phrases that end the conversation instead of being sent to the model
    #[must_use]
    pub fn with_end_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.end_phrases = phrases
            .into_iter()
            .map(|p| p.into().trim().to_lowercase())
            .collect();
        self
    }

    fn is_end_phrase(&self, text: &str) -> bool {
        let text = text
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        self.end_phrases.iter().any(|p| *p == text)
    }

    /// Append to the history, dropping the oldest messages over the limit
    ///
    /// A limit of zero keeps everything.
    fn push_history(&self, state: &mut State, message: ChatMessage) {
        let mut history = history(state);
        history.push(message);
        if self.max_history_messages > 0 && history.len() > self.max_history_messages {
            let excess = history.len() - self.max_history_messages;
            history.drain(..excess);
            tracing::debug!(
                removed = excess,
                remaining = history.len(),
                "Pruned chat history"
            );
        }
        state.set_data(HISTORY_KEY, &history);
    }
}

/// Chat history stored in `state`, oldest first
#[must_use]
pub fn history(state: &State) -> Vec<ChatMessage> {
    state.get_data(HISTORY_KEY).unwrap_or_default()
}

#[async_trait]
impl Skill for ChatSkill {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn configure(&mut self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("chat model is not set");
        }
        Ok(())
    }

    async fn process(
        &self,
        request: &Request,
        state: &mut State,
        _user: &User,
        ctx: &TurnContext,
    ) -> anyhow::Result<Response> {
        let response = Response::for_request(request);
        if request.text.trim().is_empty() {
            return Ok(response.continue_topic(request.request_type));
        }
        if self.is_end_phrase(&request.text) {
            tracing::debug!(user_id = %state.user_id, "Chat ended by user");
            let mut response = response;
            response.end_conversation = true;
            return Ok(response);
        }

        self.push_history(state, ChatMessage::user(request.text.clone()));
        let mut llm_request = LlmRequest::chat(history(state), self.model.clone());
        if let Some(system) = &self.system_prompt {
            llm_request = llm_request.with_system(system.clone());
        }

        tracing::debug!(
            backend = %self.backend.name(),
            model = %self.model,
            messages = llm_request.messages.len(),
            "Starting chat generation"
        );
        let tokens = self.backend.send_streaming(&llm_request).await?;

        Ok(response
            .with_stream(GenerationStream::from_tokens(tokens, ctx))
            .continue_topic(request.request_type))
    }

    fn on_stream_complete(&self, text: &str, _request: &Request, state: &mut State) {
        let text = text.trim();
        if !text.is_empty() {
            self.push_history(state, ChatMessage::assistant(text));
        }
    }
}

impl std::fmt::Debug for ChatSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSkill")
            .field("topic", &self.topic)
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("max_history_messages", &self.max_history_messages)
            .finish_non_exhaustive()
    }
}
