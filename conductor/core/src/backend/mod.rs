//! LLM Backend Integration
//!
//! Abstracted access to text-generation backends through a common trait. The
//! chat skill streams from an [`LlmBackend`] into a generation stream.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use parley_core::backend::{LlmBackend, LlmRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::default();
//! let request = LlmRequest::new("Hello!", "llama3.2");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{ChatMessage, ChatRole, LlmBackend, LlmRequest, LlmResponse, StreamingToken};
