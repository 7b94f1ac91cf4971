//! Request Providers
//!
//! A provider acquires the next user input for one modality: a microphone
//! plus speech recognizer for `Voice`, a camera for `Camera`, a console for
//! `Text`. The conductor looks providers up by the request type a response
//! asks for next.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::context::TurnContext;
use crate::models::{Request, RequestType};

/// What the conductor asks of a provider
#[derive(Clone, Debug, PartialEq)]
pub struct ListenOptions {
    /// User the request is for
    pub user_id: String,
    /// Upper bound for one capture
    pub max_duration: Duration,
}

/// Source of user input for one modality
#[async_trait]
pub trait RequestProvider: Send + Sync {
    /// Modality this provider captures
    fn request_type(&self) -> RequestType;

    /// Capture the next request
    ///
    /// Returns `None` when nothing was captured (silence, closed input) or the
    /// turn was cancelled while waiting.
    async fn get_request(
        &self,
        options: &ListenOptions,
        ctx: &TurnContext,
    ) -> anyhow::Result<Option<Request>>;
}

/// Providers keyed by modality
#[derive(Clone, Default)]
pub struct RequestProviders {
    providers: HashMap<RequestType, Arc<dyn RequestProvider>>,
}

impl RequestProviders {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any for the same modality
    #[must_use]
    pub fn with(mut self, provider: impl RequestProvider + 'static) -> Self {
        self.insert(Arc::new(provider));
        self
    }

    /// Add a shared provider
    pub fn insert(&mut self, provider: Arc<dyn RequestProvider>) {
        self.providers.insert(provider.request_type(), provider);
    }

    /// Provider for `request_type`
    #[must_use]
    pub fn get(&self, request_type: RequestType) -> Option<Arc<dyn RequestProvider>> {
        self.providers.get(&request_type).cloned()
    }
}

impl std::fmt::Debug for RequestProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

/// Provider fed through a channel
///
/// Each sent string becomes one request of the provider's modality. Useful
/// for hosts that capture input elsewhere (a console reader, a test script).
#[derive(Debug)]
pub struct ChannelRequestProvider {
    request_type: RequestType,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl ChannelRequestProvider {
    /// Create a provider and the sender that feeds it
    #[must_use]
    pub fn new(request_type: RequestType, capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                request_type,
                rx: Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl RequestProvider for ChannelRequestProvider {
    fn request_type(&self) -> RequestType {
        self.request_type
    }

    async fn get_request(
        &self,
        options: &ListenOptions,
        ctx: &TurnContext,
    ) -> anyhow::Result<Option<Request>> {
        let mut rx = self.rx.lock().await;
        let received = tokio::select! {
            biased;
            () = ctx.cancelled() => return Ok(None),
            text = tokio::time::timeout(options.max_duration, rx.recv()) => text.ok().flatten(),
        };
        Ok(received.map(|text| Request::with_text(self.request_type, options.user_id.clone(), text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ListenOptions {
        ListenOptions {
            user_id: "u1".to_string(),
            max_duration: Duration::from_secs(20),
        }
    }

    #[tokio::test]
    async fn test_channel_provider_yields_requests() {
        let (tx, provider) = ChannelRequestProvider::new(RequestType::Text, 4);
        tx.send("hello".to_string()).await.unwrap();

        let request = provider
            .get_request(&options(), &TurnContext::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.text, "hello");
        assert_eq!(request.request_type, RequestType::Text);
        assert_eq!(request.user_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_provider_times_out() {
        let (_tx, provider) = ChannelRequestProvider::new(RequestType::Voice, 4);
        let request = provider
            .get_request(&options(), &TurnContext::new())
            .await
            .unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_modality() {
        let (_tx, provider) = ChannelRequestProvider::new(RequestType::Voice, 1);
        let providers = RequestProviders::new().with(provider);
        assert!(providers.get(RequestType::Voice).is_some());
        assert!(providers.get(RequestType::Camera).is_none());
    }
}
