//! Shared fixtures for the integration suites: a scripted skill, a recording
//! performer, and a harness wiring them to in-memory stores.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tokio::sync::mpsc;

use parley_core::store::{MemoryStateStore, MemoryUserStore};
use parley_core::{
    Conductor, ConductorConfig, DialogError, DialogHooks, GenerationStream, PerformableUnit,
    Performer, Request, RequestType, Response, Skill, SkillRegistry, State, TopicRouter,
    TurnContext, TurnProcessor, User,
};

// =============================================================================
// Scripted skill
// =============================================================================

/// What a scripted skill answers with on one turn
#[derive(Clone, Debug)]
pub struct Reply {
    pub text: String,
    pub end_topic: bool,
    pub end_conversation: bool,
    pub next: RequestType,
    pub streamed: bool,
    pub fail: bool,
}

impl Reply {
    /// Speak `text` and end the topic
    pub fn end(text: &str) -> Self {
        Self {
            text: text.to_string(),
            end_topic: true,
            end_conversation: false,
            next: RequestType::Voice,
            streamed: false,
            fail: false,
        }
    }

    /// Speak `text` and keep the topic, listening for `next`
    pub fn ask(text: &str, next: RequestType) -> Self {
        Self {
            end_topic: false,
            next,
            ..Self::end(text)
        }
    }

    /// Stream `text` through the pipeline and keep the topic
    pub fn streamed(text: &str) -> Self {
        Self {
            streamed: true,
            ..Self::ask(text, RequestType::Voice)
        }
    }

    /// Fail the process phase
    pub fn fail() -> Self {
        Self {
            fail: true,
            ..Self::end("")
        }
    }
}

/// Handles shared between a test and a registered skill
#[derive(Clone, Default)]
pub struct Probe {
    pub calls: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<String>>>,
    pub completed_streams: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

/// Skill answering from a script of replies
pub struct ScriptedSkill {
    topic: &'static str,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    gate: Option<Arc<Notify>>,
    filler: Option<&'static str>,
    probe: Probe,
}

impl ScriptedSkill {
    pub fn new(topic: &'static str) -> Self {
        Self {
            topic,
            script: Mutex::new(VecDeque::new()),
            fallback: Reply::end(topic),
            gate: None,
            filler: None,
            probe: Probe::default(),
        }
    }

    /// Reply with `reply` on every turn
    pub fn always(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    /// Reply with `replies` in order, then with the fallback
    pub fn script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script.lock().extend(replies);
        self
    }

    /// Block `process` until `gate` is notified or the turn is cancelled
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Produce a filler line from `pre_process`
    pub fn with_filler(mut self, filler: &'static str) -> Self {
        self.filler = Some(filler);
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

#[async_trait]
impl Skill for ScriptedSkill {
    fn topic(&self) -> &str {
        self.topic
    }

    async fn pre_process(
        &self,
        request: &Request,
        _state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Option<Response>> {
        Ok(self
            .filler
            .map(|filler| Response::for_request(request).say(filler)))
    }

    async fn process(
        &self,
        request: &Request,
        state: &mut State,
        _user: &User,
        ctx: &TurnContext,
    ) -> anyhow::Result<Response> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.seen.lock().push(request.text.clone());

        if let Some(gate) = &self.gate {
            tokio::select! {
                () = gate.notified() => {}
                () = ctx.cancelled() => {}
            }
        }

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if reply.fail {
            anyhow::bail!("{} failed on purpose", self.topic);
        }

        state.topic.status = format!("turn-{}", self.probe.calls());
        let mut response = Response::for_request(request);
        if reply.streamed {
            response = response.with_stream(GenerationStream::from_text(&reply.text));
        } else {
            response = response.say(reply.text.clone());
        }
        response.end_topic = reply.end_topic;
        response.end_conversation = reply.end_conversation;
        response.next_turn_request_type = reply.next;
        Ok(response)
    }

    fn on_stream_complete(&self, text: &str, _request: &Request, _state: &mut State) {
        self.probe.completed_streams.lock().push(text.to_string());
    }
}

// =============================================================================
// Recording performer
// =============================================================================

/// Performer that records spoken lines instead of playing them
#[derive(Default)]
pub struct RecordingPerformer {
    units: Mutex<Vec<PerformableUnit>>,
    interrupts: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingPerformer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.units
            .lock()
            .iter()
            .filter_map(|u| u.voice.as_ref().map(|v| v.text.clone()))
            .collect()
    }

    pub fn units(&self) -> Vec<PerformableUnit> {
        self.units.lock().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Performer for RecordingPerformer {
    async fn perform(&self, unit: &PerformableUnit, _ctx: &TurnContext) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.units.lock().push(unit.clone());
        Ok(())
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording hooks
// =============================================================================

/// Hooks that log every call as a short event string
#[derive(Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<String>>>,
    error_scope_live: Arc<Mutex<Option<bool>>>,
    ended: Option<mpsc::UnboundedSender<String>>,
}

impl RecordingHooks {
    /// Hooks that also report every `on_end` user id through a channel
    pub fn with_end_channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                ended: Some(tx),
                ..Self::default()
            },
            rx,
        )
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Whether the scope handed to `on_error` was live, if it ran
    pub fn error_scope_live(&self) -> Option<bool> {
        *self.error_scope_live.lock()
    }
}

#[async_trait]
impl DialogHooks for RecordingHooks {
    async fn on_prompt(
        &self,
        _user_id: &str,
        request_type: RequestType,
        _ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        self.events.lock().push(format!("prompt:{request_type:?}"));
        Ok(())
    }

    async fn on_request_received(&self, request: &Request, _ctx: &TurnContext) -> anyhow::Result<()> {
        self.events.lock().push(format!("received:{}", request.text));
        Ok(())
    }

    async fn on_error(&self, _error: &DialogError, ctx: &TurnContext) -> anyhow::Result<()> {
        *self.error_scope_live.lock() = Some(!ctx.is_cancelled());
        self.events.lock().push("error".to_string());
        Ok(())
    }

    async fn on_end(&self, user_id: &str, _ctx: &TurnContext) -> anyhow::Result<()> {
        self.events.lock().push(format!("end:{user_id}"));
        if let Some(ended) = &self.ended {
            let _ = ended.send(user_id.to_string());
        }
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        self.events.lock().push("stop".to_string());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// In-memory stores plus a recording performer
pub struct Harness {
    pub users: Arc<MemoryUserStore>,
    pub states: Arc<MemoryStateStore>,
    pub performer: Arc<RecordingPerformer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_performer(RecordingPerformer::default())
    }

    pub fn with_performer(performer: RecordingPerformer) -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            states: Arc::new(MemoryStateStore::new(300)),
            performer: Arc::new(performer),
        }
    }

    pub fn processor(&self, registry: SkillRegistry) -> TurnProcessor {
        self.processor_with(TopicRouter::new(registry))
    }

    pub fn processor_with(&self, router: TopicRouter) -> TurnProcessor {
        TurnProcessor::new(
            Arc::new(router),
            self.users.clone(),
            self.states.clone(),
            self.performer.clone(),
        )
    }

    pub fn conductor(&self, config: ConductorConfig, registry: SkillRegistry) -> Conductor {
        Conductor::from_parts(
            config,
            Arc::new(TopicRouter::new(registry)),
            self.users.clone(),
            self.states.clone(),
            self.performer.clone(),
        )
    }

    /// Stored state for `user_id`, bypassing staleness
    pub fn state(&self, user_id: &str) -> Option<State> {
        self.states.peek(user_id)
    }
}

/// Settings with rapid-repeat merging off and a short stop wait
pub fn quiet_config() -> ConductorConfig {
    ConductorConfig {
        merge_request_threshold_secs: 0.0,
        stop_wait_timeout_ms: 500,
        ..ConductorConfig::default()
    }
}
