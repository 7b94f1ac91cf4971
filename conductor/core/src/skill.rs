//! Skill Contract
//!
//! A skill is a pluggable handler bound to a topic name. Every turn drives the
//! chosen skill through the same lifecycle:
//!
//! ```text
//!   pre_process ──► show_waiting_animation ─┐   (concurrent)
//!                   process ────────────────┤
//!                                           ▼
//!                            [stream drain] ──► on_stream_complete ──► show_response
//! ```
//!
//! Skills mutate only the `State` they are handed; persistence is the turn
//! processor's job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TurnContext;
use crate::error::DialogError;
use crate::models::{Request, Response, State, User};
use crate::performance::{perform_all, Performer};

/// A pluggable turn handler
#[async_trait]
pub trait Skill: Send + Sync {
    /// Topic name this skill is registered under
    fn topic(&self) -> &str;

    /// One-time setup, run by [`SkillRegistry::register`]
    fn configure(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fast path producing a filler response while `process` runs
    async fn pre_process(
        &self,
        _request: &Request,
        _state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Option<Response>> {
        Ok(None)
    }

    /// Play the filler response, if any
    async fn show_waiting_animation(
        &self,
        pre_response: Option<&Response>,
        _request: &Request,
        _state: &State,
        performer: &dyn Performer,
        ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        match pre_response {
            Some(response) => perform_all(performer, &response.units, ctx).await,
            None => Ok(()),
        }
    }

    /// Produce the authoritative response
    ///
    /// May start a generation stream and return at once with the handle in
    /// [`Response::stream`].
    async fn process(
        &self,
        request: &Request,
        state: &mut State,
        user: &User,
        ctx: &TurnContext,
    ) -> anyhow::Result<Response>;

    /// Called with the full generated text once a response stream has been
    /// drained, before `show_response` and before the state is persisted
    fn on_stream_complete(&self, _text: &str, _request: &Request, _state: &mut State) {}

    /// Perform the final response; a no-op once the turn is cancelled
    async fn show_response(
        &self,
        response: &Response,
        _request: &Request,
        _state: &State,
        performer: &dyn Performer,
        ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        perform_all(performer, &response.units, ctx).await
    }
}

/// Skills keyed by topic name
///
/// Filled once at startup and read-only afterwards; routing lookups need no
/// synchronization.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
    order: Vec<String>,
}

impl SkillRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure and add a skill
    ///
    /// # Errors
    ///
    /// Fails when the topic name is empty, already taken, or `configure` fails.
    pub fn register<S: Skill + 'static>(&mut self, mut skill: S) -> Result<(), DialogError> {
        let topic = skill.topic().to_string();
        if topic.is_empty() {
            return Err(DialogError::Registry("skill topic name is empty".to_string()));
        }
        if self.skills.contains_key(&topic) {
            return Err(DialogError::Registry(format!(
                "skill '{topic}' is already registered"
            )));
        }
        skill
            .configure()
            .map_err(|e| DialogError::Registry(format!("skill '{topic}' failed to configure: {e}")))?;

        tracing::info!(skill = %topic, "Registered skill");
        self.order.push(topic.clone());
        self.skills.insert(topic, Arc::new(skill));
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn with<S: Skill + 'static>(mut self, skill: S) -> Result<Self, DialogError> {
        self.register(skill)?;
        Ok(self)
    }

    /// Skill registered under `topic`
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(topic).cloned()
    }

    /// Whether a skill is registered under `topic`
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.skills.contains_key(topic)
    }

    /// All skills in registration order
    #[must_use]
    pub fn skills(&self) -> Vec<Arc<dyn Skill>> {
        self.order
            .iter()
            .filter_map(|name| self.skills.get(name).cloned())
            .collect()
    }

    /// Registered topic names in registration order
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.order
    }

    /// Number of registered skills
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether no skill is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("topics", &self.order)
            .finish()
    }
}
