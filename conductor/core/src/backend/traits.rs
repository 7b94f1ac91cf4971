//! LLM Backend Traits
//!
//! Trait definitions for text-generation backends. The chat skill talks to
//! this abstraction only, so any provider that can stream tokens plugs in
//! without touching turn logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A token from the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// Author of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// The user
    User,
    /// The agent
    Assistant,
}

/// One message of a chat exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// A system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Configuration for LLM requests
#[derive(Clone, Debug)]
pub struct LlmRequest {
    /// Conversation so far, oldest first, ending with the user's message
    pub messages: Vec<ChatMessage>,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// System prompt (optional, prepended to conversation)
    pub system: Option<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            model: String::new(),
            max_tokens: 0,
            temperature: 0.7,
            system: None,
        }
    }
}

impl LlmRequest {
    /// Create a single-message request
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            model: model.into(),
            ..Default::default()
        }
    }

    /// Create a request from a message history
    pub fn chat(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Messages with the system prompt (if any) in front
    #[must_use]
    pub fn full_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

/// Response from non-streaming LLM request
#[derive(Clone, Debug)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The channel will be closed when the response is complete or an error occurs.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// Send a request and wait for complete response (non-streaming)
    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}
