//! Remote Skills and Intent Extraction
//!
//! Skills and NLU that run behind an HTTP endpoint. Both speak the JSON
//! envelopes in [`crate::wire`]. A remote skill is authoritative for the
//! state it returns: the turn adopts it wholesale, keeping only the user id.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::TurnContext;
use crate::models::{IntentExtractionResult, Request, Response, State, User};
use crate::routing::IntentExtractor;
use crate::skill::Skill;
use crate::wire::{IntentRequestEnvelope, SkillRequestEnvelope, SkillResponseEnvelope};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

async fn post_json<B, R>(client: &reqwest::Client, url: &str, body: &B) -> anyhow::Result<R>
where
    B: Serialize + Sync,
    R: DeserializeOwned,
{
    let response = client.post(url).json(body).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{url} returned {status}: {body}");
    }
    Ok(response.json().await?)
}

/// A skill served over HTTP
///
/// `pre_process` posts to `{base_url}/preprocess` and `process` posts to
/// `{base_url}/process`.
#[derive(Clone, Debug)]
pub struct HttpSkill {
    topic: String,
    base_url: String,
    client: reqwest::Client,
    pre_process: bool,
}

impl HttpSkill {
    /// Create a remote skill for `topic`
    pub fn new(topic: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(DEFAULT_TIMEOUT),
            pre_process: false,
        }
    }

    /// Also call the remote pre-process endpoint
    #[must_use]
    pub fn with_pre_process(mut self) -> Self {
        self.pre_process = true;
        self
    }

    /// Use a specific request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn call(
        &self,
        path: &str,
        request: &Request,
        state: &State,
        pre_process: bool,
    ) -> anyhow::Result<(State, Option<Response>)> {
        let envelope = SkillRequestEnvelope {
            request: request.clone(),
            state: state.clone(),
            pre_process: pre_process.then_some(true),
        };
        let url = self.endpoint(path);
        tracing::debug!(skill = %self.topic, url = %url, "Calling remote skill");
        let reply: SkillResponseEnvelope = post_json(&self.client, &url, &envelope).await?;
        Ok(reply.into_parts()?)
    }
}

#[async_trait]
impl Skill for HttpSkill {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn configure(&mut self) -> anyhow::Result<()> {
        reqwest::Url::parse(&self.base_url)?;
        Ok(())
    }

    async fn pre_process(
        &self,
        request: &Request,
        state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Option<Response>> {
        if !self.pre_process {
            return Ok(None);
        }
        let (_, response) = self.call("preprocess", request, state, true).await?;
        Ok(response)
    }

    async fn process(
        &self,
        request: &Request,
        state: &mut State,
        _user: &User,
        _ctx: &TurnContext,
    ) -> anyhow::Result<Response> {
        let (remote_state, response) = self.call("process", request, state, false).await?;
        let user_id = std::mem::take(&mut state.user_id);
        *state = remote_state;
        state.user_id = user_id;
        response.ok_or_else(|| anyhow::anyhow!("remote skill '{}' returned no response", self.topic))
    }
}

/// Intent extraction delegated to an HTTP endpoint
#[derive(Clone, Debug)]
pub struct HttpIntentExtractor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpIntentExtractor {
    /// Create an extractor posting to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: http_client(DEFAULT_TIMEOUT),
        }
    }
}

#[async_trait]
impl IntentExtractor for HttpIntentExtractor {
    async fn extract(
        &self,
        request: &Request,
        state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult> {
        let envelope = IntentRequestEnvelope {
            request: request.clone(),
            state: state.clone(),
        };
        post_json(&self.client, &self.endpoint, &envelope).await
    }
}
