//! Built-in Skills
//!
//! Ready-made skills a host can register next to its own:
//!
//! - [`ChatSkill`]: open-ended conversation streamed from an LLM backend

mod chat;

pub use chat::{history as chat_history, ChatSkill, HISTORY_KEY};
