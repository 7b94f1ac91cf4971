//! Streaming Content Pipeline
//!
//! Turns incrementally generated text into performable units while earlier
//! units are already being performed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   push    ┌──────────────────┐
//! │ Skill / LLM  │ ────────► │ GenerationStream │  shared buffer + done flag
//! └──────────────┘           └────────┬─────────┘
//!                                     │ every parse_interval
//!                                     ▼
//!                        ┌─────────────────────────┐
//!                        │ parse: SentenceSplitter │
//!                        │        DirectiveParser  │──► Performer::prefetch
//!                        └────────────┬────────────┘
//!                                     │ FIFO of PerformableUnit
//!                                     ▼
//!                        ┌─────────────────────────┐
//!                        │ perform (in order)      │──► Performer::perform
//!                        └─────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use parley_core::streaming::{ContentPipeline, GenerationStream};
//!
//! let (writer, stream) = GenerationStream::channel();
//! writer.push("[face:Joy]Hello there. ");
//! writer.finish();
//!
//! let report = ContentPipeline::default()
//!     .play(&stream, &performer, &ctx, async {})
//!     .await?;
//! ```

mod directives;
mod pipeline;
mod splitter;
mod stream;

pub use directives::{Directive, DirectiveParser};
pub use pipeline::{ContentPipeline, PipelineFlags, PlaybackReport};
pub use splitter::SentenceSplitter;
pub use stream::{GenerationStream, StreamWriter};

// Re-export StreamingToken from backend for convenience
pub use crate::backend::StreamingToken;
