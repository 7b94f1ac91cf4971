//! Parley Core - Turn Orchestration for Conversational Agents
//!
//! This crate decides *who* answers a user and *when*, independent of any
//! audio, rendering or transport layer. Hosts plug in request providers,
//! a performer (speech, face, animation), stores and skills; the core runs
//! the turns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Host                                 │
//! │   RequestProvider(s)      Performer        UserStore/StateStore  │
//! └────────┬──────────────────────▲──────────────────────▲───────────┘
//!          │ Request              │ PerformableUnit      │ User/State
//! ┌────────┼──────────────────────┼──────────────────────┼───────────┐
//! │        ▼               PARLEY CORE                   │           │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┴────────┐  │
//! │  │  Conductor  │──►│TurnProcessor │──►│ TopicRouter ─► Skill  │  │
//! │  │ (sessions)  │   │  (one turn)  │   └───────────────────────┘  │
//! │  └─────────────┘   └──────┬───────┘                              │
//! │                           ▼                                      │
//! │                   ContentPipeline (parse ∥ perform)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: Multi-turn dialogs, status, cancellation and stop semantics
//! - [`TurnProcessor`]: One request through routing, the skill lifecycle and persistence
//! - [`TopicRouter`]: Priority and adhoc rules for topic ownership
//! - [`Skill`]: The handler contract, and [`SkillRegistry`] holding them
//! - [`ContentPipeline`]: Concurrent parsing and performing of streamed replies
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_core::{
//!     Conductor, ConductorConfig, DialogInput, SkillRegistry, TopicRouter,
//!     store::{MemoryStateStore, MemoryUserStore},
//! };
//!
//! let registry = SkillRegistry::new().with(MySkill)?;
//! let conductor = Conductor::from_parts(
//!     ConductorConfig::from_env(),
//!     Arc::new(TopicRouter::new(registry)),
//!     Arc::new(MemoryUserStore::new()),
//!     Arc::new(MemoryStateStore::new(300)),
//!     Arc::new(MyPerformer),
//! );
//! let outcome = conductor.start_dialog("user-1", DialogInput::Text("hello".into())).await;
//! ```
//!
//! # Module Overview
//!
//! - [`models`]: Requests, responses, topics, state and users
//! - [`performance`]: Performable units and the performer capability
//! - [`routing`]: Topic router and intent extraction strategies
//! - [`skill`]: Skill lifecycle and registry
//! - [`turn`]: Turn processor
//! - [`conductor`]: Session controller
//! - [`streaming`]: Generation streams and the parse/perform pipeline
//! - [`store`]: User and state persistence
//! - [`providers`]: Request acquisition by modality
//! - [`intake`]: Priority-ordered dialog queue
//! - [`backend`]: LLM backend abstraction (Ollama)
//! - [`skills`]: Built-in skills
//! - [`wire`] / [`remote`]: JSON envelopes and HTTP skills
//! - [`config`]: Layered configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod intake;
pub mod models;
pub mod performance;
pub mod providers;
pub mod queue;
pub mod remote;
pub mod routing;
pub mod skill;
pub mod skills;
pub mod store;
pub mod streaming;
pub mod turn;
pub mod wire;

// Re-exports for convenience
pub use backend::{ChatMessage, ChatRole, LlmBackend, LlmRequest, LlmResponse, OllamaBackend, StreamingToken};
pub use conductor::{
    Conductor, DialogHooks, DialogInput, DialogOutcome, DialogStatus, LoggingHooks, NoopHooks,
};
pub use context::TurnContext;
pub use error::{DialogError, DialogResult};
pub use intake::RequestIntake;
pub use models::{
    DataMap, Intent, IntentExtractionResult, Priority, Request, RequestType, Response, State,
    Topic, User,
};
pub use performance::{perform_all, Animation, Face, PerformableUnit, Performer, Voice};
pub use providers::{ChannelRequestProvider, ListenOptions, RequestProvider, RequestProviders};
pub use queue::PriorityQueue;
pub use routing::{IntentExtractor, KeywordIntentExtractor, NoIntentExtractor, SkillRouter, TopicRouter};
pub use skill::{Skill, SkillRegistry};
pub use turn::{NoopObserver, TurnObserver, TurnPhase, TurnProcessor};

// Streaming exports
pub use streaming::{
    ContentPipeline, Directive, DirectiveParser, GenerationStream, PlaybackReport,
    SentenceSplitter, StreamWriter,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatConfig, ConductorConfig,
    ConductorToml, ConfigError, ConfigOverrides, ConfigSource, PipelineConfig,
};
