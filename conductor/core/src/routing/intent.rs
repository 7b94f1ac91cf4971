//! Intent Extraction Strategies
//!
//! Natural-language understanding is delegated. The router calls an
//! [`IntentExtractor`] for requests that arrive without an intent; the
//! strategies here cover "no NLU at all" and simple keyword matching. A remote
//! extractor lives in [`crate::remote`].

use async_trait::async_trait;

use crate::context::TurnContext;
use crate::models::{Intent, IntentExtractionResult, Request, State};

/// Delegated intent extraction
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// Extract the intent and entities of `request`
    async fn extract(
        &self,
        request: &Request,
        state: &State,
        ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult>;
}

/// Extractor that never finds an intent
///
/// Every request then continues the active topic, or ends the turn when none
/// is active.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIntentExtractor;

#[async_trait]
impl IntentExtractor for NoIntentExtractor {
    async fn extract(
        &self,
        _request: &Request,
        _state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult> {
        Ok(IntentExtractionResult::default())
    }
}

#[derive(Clone, Debug)]
struct KeywordRule {
    keywords: Vec<String>,
    intent: Intent,
}

/// Case-insensitive whole-word keyword matching
///
/// Rules are checked in insertion order; the first rule with a matching
/// keyword wins. Multi-word keywords match as phrases.
#[derive(Clone, Debug, Default)]
pub struct KeywordIntentExtractor {
    rules: Vec<KeywordRule>,
    fallback: Option<Intent>,
}

fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

impl KeywordIntentExtractor {
    /// Create an extractor with no rules
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map any of `keywords` to `intent`
    #[must_use]
    pub fn rule<I, S>(mut self, intent: Intent, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.trim().is_empty())
            .collect();
        self.rules.push(KeywordRule { keywords, intent });
        self
    }

    /// Intent used when no rule matches non-empty text
    #[must_use]
    pub fn fallback(mut self, intent: Intent) -> Self {
        self.fallback = Some(intent);
        self
    }

    /// Match `text` against the rules
    #[must_use]
    pub fn match_text(&self, text: &str) -> Option<Intent> {
        if text.trim().is_empty() {
            return None;
        }
        let haystack = normalize(text);
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|rule| rule.intent.clone())
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl IntentExtractor for KeywordIntentExtractor {
    async fn extract(
        &self,
        request: &Request,
        _state: &State,
        _ctx: &TurnContext,
    ) -> anyhow::Result<IntentExtractionResult> {
        let intent = self.match_text(&request.text);
        if let Some(intent) = &intent {
            tracing::debug!(intent = %intent.name, "Keyword intent matched");
        }
        Ok(IntentExtractionResult {
            intent,
            ..Default::default()
        })
    }
}
