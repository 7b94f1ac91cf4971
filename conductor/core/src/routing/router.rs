//! Topic Router
//!
//! Decides which skill handles a request and whether the request takes over
//! the active topic.
//!
//! # Takeover Rule
//!
//! An intent starts a new topic when a skill is registered under its name and
//! either no topic is active or the intent outranks the topic strictly. A new
//! topic keeps the intent's priority, except that `HIGHEST` is stored one rank
//! lower so a later `HIGHEST` intent can still take over.
//!
//! Adhoc intents are answered by their own skill but leave the topic alone.

use std::sync::Arc;

use async_trait::async_trait;

use super::intent::{IntentExtractor, NoIntentExtractor};
use crate::context::TurnContext;
use crate::error::{DialogError, DialogResult};
use crate::models::{IntentExtractionResult, Request, State, Topic};
use crate::skill::{Skill, SkillRegistry};

/// Skill resolution seam used by the turn processor
#[async_trait]
pub trait SkillRouter: Send + Sync {
    /// Skills this router can hand out
    fn register_skills(&self) -> Vec<Arc<dyn Skill>>;

    /// Extract the intent of a request that arrived without one
    async fn extract_intent(
        &self,
        request: &Request,
        state: &State,
        ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult>;

    /// Pick the skill for `request`, updating `state.topic` as needed
    async fn route(&self, request: &Request, state: &mut State) -> DialogResult<Arc<dyn Skill>>;
}

/// Priority-based router over a skill registry
pub struct TopicRouter {
    registry: Arc<SkillRegistry>,
    extractor: Arc<dyn IntentExtractor>,
}

impl TopicRouter {
    /// Route over `registry` without intent extraction
    #[must_use]
    pub fn new(registry: SkillRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            extractor: Arc::new(NoIntentExtractor),
        }
    }

    /// Use `extractor` for requests that arrive without an intent
    #[must_use]
    pub fn with_extractor(mut self, extractor: impl IntentExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// The skills this router resolves to
    #[must_use]
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Whether `request` starts a new topic (or answers adhoc) instead of
    /// continuing the active one
    #[must_use]
    pub fn should_start_topic(&self, request: &Request, state: &State) -> bool {
        let Some(intent) = &request.intent else {
            return false;
        };
        if !self.registry.contains(&intent.name) {
            return false;
        }
        !state.topic.is_active() || intent.priority > state.topic.priority
    }

    /// Resolve the skill and apply the topic transition
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::NoSkillResolved`] when neither the intent nor
    /// the active topic maps to a registered skill.
    pub fn resolve(&self, request: &Request, state: &mut State) -> DialogResult<Arc<dyn Skill>> {
        if self.should_start_topic(request, state) {
            if let Some(intent) = &request.intent {
                if intent.is_adhoc {
                    tracing::debug!(
                        intent = %intent.name,
                        topic = %state.topic.name,
                        "Adhoc intent answered without taking the topic"
                    );
                } else {
                    tracing::info!(
                        intent = %intent.name,
                        priority = %intent.priority,
                        previous = %state.topic.name,
                        "Starting topic"
                    );
                    state.topic = Topic {
                        name: intent.name.clone(),
                        status: String::new(),
                        priority: intent.priority.demoted(),
                        is_first_turn: true,
                    };
                }
                if let Some(skill) = self.registry.get(&intent.name) {
                    return Ok(skill);
                }
            }
        }

        if state.topic.is_active() {
            if let Some(skill) = self.registry.get(&state.topic.name) {
                tracing::debug!(topic = %state.topic.name, "Continuing topic");
                return Ok(skill);
            }
        }

        Err(DialogError::NoSkillResolved {
            intent: request.intent.as_ref().map(|i| i.name.clone()),
            topic: state.topic.is_active().then(|| state.topic.name.clone()),
        })
    }
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SkillRouter for TopicRouter {
    fn register_skills(&self) -> Vec<Arc<dyn Skill>> {
        self.registry.skills()
    }

    async fn extract_intent(
        &self,
        request: &Request,
        state: &State,
        ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult> {
        self.extractor.extract(request, state, ctx).await
    }

    async fn route(&self, request: &Request, state: &mut State) -> DialogResult<Arc<dyn Skill>> {
        self.resolve(request, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, Priority, RequestType, Response, User};

    struct Stub(&'static str);

    #[async_trait]
    impl Skill for Stub {
        fn topic(&self) -> &str {
            self.0
        }

        async fn process(
            &self,
            request: &Request,
            _state: &mut State,
            _user: &User,
            _ctx: &TurnContext,
        ) -> anyhow::Result<Response> {
            Ok(Response::for_request(request))
        }
    }

    fn router() -> TopicRouter {
        let registry = SkillRegistry::new()
            .with(Stub("weather"))
            .unwrap()
            .with(Stub("timer"))
            .unwrap();
        TopicRouter::new(registry)
    }

    fn request(intent: Option<Intent>) -> Request {
        let mut request = Request::with_text(RequestType::Text, "u1", "hi");
        request.intent = intent;
        request
    }

    #[test]
    fn test_no_intent_never_starts_topic() {
        assert!(!router().should_start_topic(&request(None), &State::new("u1")));
    }

    #[test]
    fn test_unknown_intent_never_starts_topic() {
        let req = request(Some(Intent::new("alarm")));
        assert!(!router().should_start_topic(&req, &State::new("u1")));
    }

    #[test]
    fn test_equal_priority_does_not_take_over() {
        let router = router();
        let mut state = State::new("u1");
        state.topic.name = "weather".to_string();
        state.topic.priority = Priority::NORMAL;

        let req = request(Some(Intent::new("timer")));
        assert!(!router.should_start_topic(&req, &state));
        let skill = router.resolve(&req, &mut state).unwrap();
        assert_eq!(skill.topic(), "weather");
    }

    #[test]
    fn test_new_topic_resets_status() {
        let router = router();
        let mut state = State::new("u1");
        state.topic.name = "weather".to_string();
        state.topic.status = "asked_city".to_string();
        state.topic.priority = Priority::LOW;

        let req = request(Some(Intent::new("timer").with_priority(Priority::HIGH)));
        router.resolve(&req, &mut state).unwrap();

        assert_eq!(state.topic.name, "timer");
        assert_eq!(state.topic.status, "");
        assert_eq!(state.topic.priority, Priority::HIGH);
        assert!(state.topic.is_first_turn);
    }

    #[test]
    fn test_unknown_intent_with_no_topic_fails() {
        let Err(err) = router().resolve(&request(Some(Intent::new("alarm"))), &mut State::new("u1"))
        else {
            panic!("an unknown intent must not resolve");
        };
        assert!(matches!(
            err,
            DialogError::NoSkillResolved { intent: Some(ref i), topic: None } if i == "alarm"
        ));
    }

    #[tokio::test]
    async fn test_register_skills_lists_registry() {
        let topics: Vec<String> = router()
            .register_skills()
            .iter()
            .map(|s| s.topic().to_string())
            .collect();
        assert_eq!(topics, vec!["weather", "timer"]);
    }
}
