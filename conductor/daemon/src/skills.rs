//! Built-in console skills
//!
//! Small skills that exercise the conductor without any external service:
//! `echo` streams the input back word by word and keeps the topic open,
//! `help` answers in passing without disturbing the active topic, and `stop`
//! ends the conversation from anywhere.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{
    GenerationStream, Intent, KeywordIntentExtractor, Priority, Request, RequestType, Response,
    Skill, State, TurnContext, User,
};

/// Topic of the echo skill
pub const ECHO: &str = "echo";
/// Topic of the help skill
pub const HELP: &str = "help";
/// Topic of the stop skill
pub const STOP: &str = "stop";

/// Keyword rules for the built-in skills
pub fn keyword_rules(extractor: KeywordIntentExtractor) -> KeywordIntentExtractor {
    extractor
        .rule(
            Intent::new(STOP).with_priority(Priority::HIGHEST),
            ["stop", "quit", "exit", "goodbye"],
        )
        .rule(Intent::new(HELP).adhoc(), ["help", "what can you do"])
        .rule(Intent::new(ECHO), ["echo", "repeat after me"])
}

/// Repeats every line until the topic is taken over
#[derive(Debug)]
pub struct EchoSkill {
    word_interval: Duration,
}

impl EchoSkill {
    /// Stream one word per `word_interval`
    pub fn new(word_interval: Duration) -> Self {
        Self { word_interval }
    }
}

const ECHO_TURNS_KEY: &str = "echo.turns";

#[async_trait]
impl Skill for EchoSkill {
    fn topic(&self) -> &str {
        ECHO
    }

    fn configure(&mut self) -> anyhow::Result<()> {
        if self.word_interval.is_zero() {
            anyhow::bail!("echo word interval must be positive");
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
        let turns = state.get_data::<u32>(ECHO_TURNS_KEY).unwrap_or(0) + 1;
        state.set_data(ECHO_TURNS_KEY, &turns);
        state.topic.status = format!("echoed-{turns}");

        let text = format!("{}.", request.text.trim().trim_end_matches(['.', '!', '?']));
        let (writer, stream) = GenerationStream::channel();
        let mut ticker = tokio::time::interval(self.word_interval);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            for word in text.split_inclusive(' ') {
                tokio::select! {
                    () = ctx.cancelled() => return,
                    _ = ticker.tick() => writer.push(word),
                }
            }
            writer.finish();
        });

        Ok(Response::for_request(request)
            .with_stream(stream)
            .continue_topic(request.request_type))
    }
}

/// Lists what the console understands
#[derive(Debug, Default)]
pub struct HelpSkill {
    topics: Vec<String>,
}

impl HelpSkill {
    /// Describe `topics` in the answer
    pub fn new(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Skill for HelpSkill {
    fn topic(&self) -> &str {
        HELP
    }

    async fn process(
        &self,
        request: &Request,
        state: &mut State,
        _user: &User,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Response> {
        let mut response = Response::for_request(request)
            .say(format!("I can talk about: {}.", self.topics.join(", ")));
        if state.topic.is_active() {
            response = response.say(format!("We were talking about {}.", state.topic.name));
        }
        Ok(response)
    }
}

/// Ends the conversation
#[derive(Debug, Default)]
pub struct StopSkill;

#[async_trait]
impl Skill for StopSkill {
    fn topic(&self) -> &str {
        STOP
    }

    async fn process(
        &self,
        request: &Request,
        _state: &mut State,
        _user: &User,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Response> {
        let mut response = Response::for_request(request).say("Okay, talk to you later.");
        response.end_conversation = true;
        response.next_turn_request_type = RequestType::None;
        Ok(response)
    }
}
