//! Turn Processor
//!
//! Drives one request through a full turn:
//!
//! ```text
//!   load user/state ─► extract intent ─► route ─► pre_process
//!        ─► (waiting animation ∥ process) ─► drain stream ─► show_response
//!        ─► persist
//! ```
//!
//! The turn context is checked between steps. A cancelled turn returns
//! `Ok(None)` and keeps whatever was persisted before cancellation. Any error
//! deletes the user's state before it propagates, so a broken topic cannot
//! trap the user on the next turn.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TurnContext;
use crate::error::{DialogError, DialogResult};
use crate::models::{Request, Response};
use crate::performance::Performer;
use crate::routing::SkillRouter;
use crate::store::{StateStore, UserStore};
use crate::streaming::ContentPipeline;

/// Turn phases reported to the observer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    /// Intent extraction and skill resolution
    Routing,
    /// Skill pre-processing and processing
    Processing,
    /// Stream playback and response performance
    Responding,
}

/// Receives progress of a turn
#[async_trait]
pub trait TurnObserver: Send + Sync {
    /// The turn entered `phase`
    fn on_phase(&self, _phase: TurnPhase) {}

    /// The skill accepted the request and the response is about to play
    ///
    /// For streaming responses this runs concurrently with playback.
    async fn on_request_received(&self, _request: &Request, _ctx: &TurnContext) {}
}

/// Observer that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// Single-turn pipeline over a router, the stores and a performer
pub struct TurnProcessor {
    router: Arc<dyn SkillRouter>,
    users: Arc<dyn UserStore>,
    states: Arc<dyn StateStore>,
    performer: Arc<dyn Performer>,
    pipeline: ContentPipeline,
}

impl TurnProcessor {
    /// Create a processor with the default streaming pipeline
    pub fn new(
        router: Arc<dyn SkillRouter>,
        users: Arc<dyn UserStore>,
        states: Arc<dyn StateStore>,
        performer: Arc<dyn Performer>,
    ) -> Self {
        Self {
            router,
            users,
            states,
            performer,
            pipeline: ContentPipeline::default(),
        }
    }

    /// Use a specific streaming pipeline
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: ContentPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The performer responses are played on
    #[must_use]
    pub fn performer(&self) -> &Arc<dyn Performer> {
        &self.performer
    }

    /// Run one turn for `user_id`
    ///
    /// Returns the response that was performed, or `None` when there was
    /// nothing to answer or the turn was cancelled. The returned response no
    /// longer carries its stream.
    ///
    /// # Errors
    ///
    /// Any failure while loading, routing, running the skill or persisting.
    /// The user's state has been deleted by the time the error is returned.
    pub async fn process(
        &self,
        user_id: &str,
        request: Option<Request>,
        ctx: &TurnContext,
        observer: &dyn TurnObserver,
    ) -> DialogResult<Option<Response>> {
        let result = self.run(user_id, request, ctx, observer).await;
        if let Err(e) = &result {
            tracing::warn!(user_id = %user_id, error = %e, "Turn failed; discarding state");
            if let Err(delete_err) = self.states.delete(user_id).await {
                tracing::error!(
                    user_id = %user_id,
                    error = %delete_err,
                    "Failed to discard state after turn failure"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        user_id: &str,
        request: Option<Request>,
        ctx: &TurnContext,
        observer: &dyn TurnObserver,
    ) -> DialogResult<Option<Response>> {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        let user = self
            .users
            .get(user_id)
            .await
            .map_err(|source| DialogError::UserLoad {
                user_id: user_id.to_string(),
                source,
            })?;

        if ctx.is_cancelled() {
            return Ok(None);
        }
        let mut state = self
            .states
            .get(user_id)
            .await
            .map_err(|e| DialogError::store("state.get", e))?;

        let Some(mut request) = request.filter(|r| !r.is_canceled) else {
            tracing::debug!(user_id = %user_id, "No request; clearing state");
            state.clear();
            self.states
                .save(&state)
                .await
                .map_err(|e| DialogError::store("state.save", e))?;
            return Ok(None);
        };

        // Routing
        observer.on_phase(TurnPhase::Routing);
        if request.intent.is_none() {
            let Some(extracted) = ctx
                .run(self.router.extract_intent(&request, &state, ctx))
                .await
            else {
                return Ok(None);
            };
            let extracted = extracted.map_err(DialogError::IntentExtraction)?;
            request.intent = extracted.intent;
            request.entities.extend(extracted.entities);
        }
        if request.intent.is_none() && !state.topic.is_active() {
            tracing::debug!(request_id = %request.id, "No intent and no active topic");
            return Ok(None);
        }

        let skill = self.router.route(&request, &mut state).await?;
        let skill_name = skill.topic().to_string();
        tracing::debug!(
            request_id = %request.id,
            skill = %skill_name,
            topic = %state.topic.name,
            first_turn = state.topic.is_first_turn,
            "Routed request"
        );
        if ctx.is_cancelled() {
            return Ok(None);
        }

        // Processing
        observer.on_phase(TurnPhase::Processing);
        let performer = self.performer.as_ref();
        let Some(pre_response) = ctx.run(skill.pre_process(&request, &state, ctx)).await else {
            return Ok(None);
        };
        let pre_response =
            pre_response.map_err(|e| DialogError::skill(&skill_name, "pre_process", e))?;

        let snapshot = state.clone();
        let (waited, processed) = tokio::join!(
            skill.show_waiting_animation(pre_response.as_ref(), &request, &snapshot, performer, ctx),
            skill.process(&request, &mut state, &user, ctx),
        );
        if let Err(e) = waited {
            tracing::warn!(skill = %skill_name, error = %e, "Waiting animation failed");
        }
        if ctx.is_cancelled() {
            return Ok(None);
        }
        let mut response = processed.map_err(|e| DialogError::skill(&skill_name, "process", e))?;
        if response.skill_name.is_empty() {
            response.skill_name.clone_from(&skill_name);
        }
        if request.is_adhoc() && state.topic.is_active() {
            response.end_topic = false;
        }

        // Responding
        observer.on_phase(TurnPhase::Responding);
        if let Some(stream) = response.stream.take() {
            let report = self
                .pipeline
                .play(&stream, performer, ctx, observer.on_request_received(&request, ctx))
                .await?;
            tracing::debug!(skill = %skill_name, ?report, "Stream drained");
            if ctx.is_cancelled() {
                return Ok(None);
            }
            skill.on_stream_complete(&stream.text(), &request, &mut state);
        } else {
            observer.on_request_received(&request, ctx).await;
        }

        if ctx.is_cancelled() {
            return Ok(None);
        }
        skill
            .show_response(&response, &request, &state, performer, ctx)
            .await
            .map_err(|e| DialogError::skill(&skill_name, "show_response", e))?;
        if ctx.is_cancelled() {
            return Ok(None);
        }

        // Persistence
        self.users
            .save(&user)
            .await
            .map_err(|e| DialogError::store("user.save", e))?;
        if response.end_topic || response.end_conversation {
            tracing::debug!(topic = %state.topic.name, "Topic ended");
            state.clear();
        } else {
            state.topic.is_first_turn = false;
        }
        self.states
            .save(&state)
            .await
            .map_err(|e| DialogError::store("state.save", e))?;

        Ok(Some(response))
    }
}

impl std::fmt::Debug for TurnProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnProcessor")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
