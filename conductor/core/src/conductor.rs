//! The Conductor - session controller
//!
//! Owns the dialog loop around the [`TurnProcessor`]: acquiring requests,
//! merging rapid repeats, looping over follow-up turns, publishing the
//! [`DialogStatus`], and running the [`DialogHooks`].
//!
//! # Status Machine
//!
//! ```text
//!  Idling ─► Initializing ─► Routing ─► Processing ─► Responding ─┐
//!    ▲            ▲                                               │
//!    │            └──────────── next turn ◄───────────────────────┤
//!    │                                                            ▼
//!    └──────────────────────── Finalizing ◄───── (Error) ◄── done / failed
//! ```
//!
//! # Scopes
//!
//! Every `start_dialog` cancels the previous dialog's [`TurnContext`] and runs
//! under a fresh one. Each dialog also gets a correlation id; only the dialog
//! whose id is still current may publish status or run finalization, so a
//! superseded dialog winds down silently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::ConductorConfig;
use crate::context::TurnContext;
use crate::error::{DialogError, DialogResult};
use crate::models::{Request, RequestType};
use crate::performance::Performer;
use crate::providers::{ListenOptions, RequestProviders};
use crate::routing::SkillRouter;
use crate::store::{StateStore, UserStore};
use crate::streaming::ContentPipeline;
use crate::turn::{TurnObserver, TurnPhase, TurnProcessor};

// ============================================================================
// Status, input and outcome
// ============================================================================

/// Observable state of the session controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DialogStatus {
    /// No dialog running
    #[default]
    Idling,
    /// Acquiring the next request
    Initializing,
    /// Extracting intent and resolving a skill
    Routing,
    /// Skill is producing a response
    Processing,
    /// Response is being performed
    Responding,
    /// Running end-of-dialog hooks
    Finalizing,
    /// The dialog failed
    Error,
}

impl DialogStatus {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idling => "Idle",
            Self::Initializing => "Listening...",
            Self::Routing => "Understanding...",
            Self::Processing => "Thinking...",
            Self::Responding => "Responding...",
            Self::Finalizing => "Wrapping up...",
            Self::Error => "Error",
        }
    }
}

impl From<TurnPhase> for DialogStatus {
    fn from(phase: TurnPhase) -> Self {
        match phase {
            TurnPhase::Routing => Self::Routing,
            TurnPhase::Processing => Self::Processing,
            TurnPhase::Responding => Self::Responding,
        }
    }
}

/// How a dialog starts
#[derive(Clone, Debug)]
pub enum DialogInput {
    /// Typed text for the first turn
    Text(String),
    /// A ready-made request (its intent, if set, skips extraction)
    Request(Request),
    /// Capture the first request from the provider for this modality
    Listen(RequestType),
}

/// How a dialog ended
#[derive(Debug)]
pub enum DialogOutcome {
    /// The dialog ran to its natural end
    Completed {
        /// Turns processed, including a final empty one
        turns: usize,
    },
    /// The dialog was stopped or superseded
    Cancelled,
    /// A turn failed
    Failed(DialogError),
}

impl DialogOutcome {
    /// Whether the dialog completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Host callbacks around a dialog
///
/// Every method defaults to a no-op. Only `on_prompt` can fail a dialog;
/// errors from the others are logged.
#[async_trait]
pub trait DialogHooks: Send + Sync {
    /// About to listen for a request of `request_type`
    async fn on_prompt(
        &self,
        _user_id: &str,
        _request_type: RequestType,
        _ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A skill accepted `request`; runs while its response starts playing
    async fn on_request_received(&self, _request: &Request, _ctx: &TurnContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// A turn failed; `ctx` is a fresh, live scope
    async fn on_error(&self, _error: &DialogError, _ctx: &TurnContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The current dialog finished (completed, failed or stopped)
    async fn on_end(&self, _user_id: &str, _ctx: &TurnContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// `stop_dialog` was called with `invoke_hook`
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl DialogHooks for NoopHooks {}

/// Hooks that log every call
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHooks;

#[async_trait]
impl DialogHooks for LoggingHooks {
    async fn on_prompt(
        &self,
        user_id: &str,
        request_type: RequestType,
        _ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, ?request_type, "Prompting for input");
        Ok(())
    }

    async fn on_request_received(&self, request: &Request, _ctx: &TurnContext) -> anyhow::Result<()> {
        tracing::info!(
            request_id = %request.id,
            intent = ?request.intent.as_ref().map(|i| i.name.as_str()),
            "Request received"
        );
        Ok(())
    }

    async fn on_error(&self, error: &DialogError, _ctx: &TurnContext) -> anyhow::Result<()> {
        tracing::error!(error = %error, "Dialog error");
        Ok(())
    }

    async fn on_end(&self, user_id: &str, _ctx: &TurnContext) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, "Dialog ended");
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        tracing::info!("Dialog stopped");
        Ok(())
    }
}

// ============================================================================
// Conductor
// ============================================================================

struct LastRequest {
    at: Instant,
    text: String,
}

/// Session controller
pub struct Conductor {
    config: ConductorConfig,
    processor: TurnProcessor,
    providers: RequestProviders,
    hooks: Arc<dyn DialogHooks>,
    /// Scope of the current dialog
    scope: Mutex<TurnContext>,
    /// Correlation id of the current dialog
    current_dialog: AtomicU64,
    status: watch::Sender<DialogStatus>,
    /// Most recent request text per user, for rapid-repeat merging
    last_request: DashMap<String, LastRequest>,
}

impl Conductor {
    /// Create a conductor around a turn processor
    #[must_use]
    pub fn new(config: ConductorConfig, processor: TurnProcessor) -> Self {
        let (status, _) = watch::channel(DialogStatus::Idling);
        Self {
            config,
            processor,
            providers: RequestProviders::new(),
            hooks: Arc::new(NoopHooks),
            scope: Mutex::new(TurnContext::new()),
            current_dialog: AtomicU64::new(0),
            status,
            last_request: DashMap::new(),
        }
    }

    /// Assemble a conductor, using the configured pipeline settings
    pub fn from_parts(
        config: ConductorConfig,
        router: Arc<dyn SkillRouter>,
        users: Arc<dyn UserStore>,
        states: Arc<dyn StateStore>,
        performer: Arc<dyn Performer>,
    ) -> Self {
        let processor = TurnProcessor::new(router, users, states, performer)
            .with_pipeline(ContentPipeline::new(&config.pipeline));
        Self::new(config, processor)
    }

    /// Use `providers` to acquire requests
    #[must_use]
    pub fn with_providers(mut self, providers: RequestProviders) -> Self {
        self.providers = providers;
        self
    }

    /// Use `hooks` for dialog callbacks
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl DialogHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> DialogStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DialogStatus> {
        self.status.subscribe()
    }

    /// Settings in effect
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Correlation id of the most recent dialog (0 before the first)
    #[must_use]
    pub fn current_dialog(&self) -> u64 {
        self.current_dialog.load(Ordering::SeqCst)
    }

    /// Run a dialog for `user_id` to completion
    ///
    /// Supersedes any dialog still running. Errors never escape: they are
    /// reported through the `Error` status, the `on_error` hook and the
    /// returned outcome.
    pub async fn start_dialog(&self, user_id: &str, input: DialogInput) -> DialogOutcome {
        let (dialog_id, ctx) = self.begin_scope();
        tracing::info!(dialog_id, user_id = %user_id, "Starting dialog");

        let observer = DialogObserver {
            conductor: self,
            dialog_id,
        };
        let outcome = match self.run_dialog(dialog_id, user_id, input, &ctx, &observer).await {
            Ok(_) if ctx.is_cancelled() => DialogOutcome::Cancelled,
            Ok(turns) => DialogOutcome::Completed { turns },
            Err(e) => {
                tracing::warn!(dialog_id, error = %e, "Dialog failed");
                self.set_status(dialog_id, DialogStatus::Error);
                match self.reissue_scope(dialog_id) {
                    Some(fresh) => {
                        if let Err(hook_err) = self.hooks.on_error(&e, &fresh).await {
                            tracing::warn!(error = %hook_err, "on_error hook failed");
                        }
                    }
                    None => tracing::debug!(dialog_id, "Superseded; skipping on_error"),
                }
                DialogOutcome::Failed(e)
            }
        };

        if self.is_current(dialog_id) {
            self.set_status(dialog_id, DialogStatus::Finalizing);
            let scope = self.scope.lock().clone();
            if let Err(e) = self.hooks.on_end(user_id, &scope).await {
                tracing::warn!(error = %e, "on_end hook failed");
            }
            self.set_status(dialog_id, DialogStatus::Idling);
        }

        tracing::info!(dialog_id, ?outcome, "Dialog finished");
        outcome
    }

    /// Cancel the running dialog
    ///
    /// With `wait`, returns once the dialog is idle or `stop_wait_timeout`
    /// elapsed. With `invoke_hook`, runs `on_stop` afterwards.
    pub async fn stop_dialog(&self, wait: bool, invoke_hook: bool) {
        tracing::info!(wait, invoke_hook, "Stopping dialog");
        self.scope.lock().cancel();
        self.processor.performer().interrupt();

        if wait {
            let mut rx = self.status.subscribe();
            let idle = async move { rx.wait_for(|s| *s == DialogStatus::Idling).await.is_ok() };
            if tokio::time::timeout(self.config.stop_wait_timeout(), idle)
                .await
                .is_err()
            {
                tracing::warn!(
                    timeout_ms = self.config.stop_wait_timeout_ms,
                    "Dialog did not go idle in time"
                );
            }
        }

        if invoke_hook {
            if let Err(e) = self.hooks.on_stop().await {
                tracing::warn!(error = %e, "on_stop hook failed");
            }
        }
    }

    async fn run_dialog(
        &self,
        dialog_id: u64,
        user_id: &str,
        input: DialogInput,
        ctx: &TurnContext,
        observer: &DialogObserver<'_>,
    ) -> DialogResult<usize> {
        self.set_status(dialog_id, DialogStatus::Initializing);
        let mut next = match input {
            DialogInput::Text(text) => Some(Request::with_text(RequestType::Text, user_id, text)),
            DialogInput::Request(request) => Some(request),
            DialogInput::Listen(request_type) => self.acquire(user_id, request_type, ctx).await?,
        };

        let mut turns = 0;
        loop {
            if ctx.is_cancelled() {
                return Ok(turns);
            }
            let request = next.take().map(|r| self.merge_rapid_repeat(r));
            let response = self.processor.process(user_id, request, ctx, observer).await?;
            turns += 1;

            let Some(response) = response else {
                break;
            };
            if ctx.is_cancelled() || response.end_conversation || response.end_topic {
                break;
            }

            tracing::debug!(
                dialog_id,
                next = ?response.next_turn_request_type,
                "Continuing dialog"
            );
            self.set_status(dialog_id, DialogStatus::Initializing);
            next = self
                .acquire(user_id, response.next_turn_request_type, ctx)
                .await?;
        }
        Ok(turns)
    }

    async fn acquire(
        &self,
        user_id: &str,
        request_type: RequestType,
        ctx: &TurnContext,
    ) -> DialogResult<Option<Request>> {
        if request_type == RequestType::None {
            return Ok(None);
        }
        let provider = self.providers.get(request_type).ok_or_else(|| {
            DialogError::RequestProvider(format!("No provider registered for {request_type:?}"))
        })?;

        self.hooks
            .on_prompt(user_id, request_type, ctx)
            .await
            .map_err(|source| DialogError::Hook {
                hook: "on_prompt",
                source,
            })?;

        let options = ListenOptions {
            user_id: user_id.to_string(),
            max_duration: self.config.max_recording_duration(),
        };
        match ctx.run(provider.get_request(&options, ctx)).await {
            Some(result) => result.map_err(|e| DialogError::RequestProvider(e.to_string())),
            None => Ok(None),
        }
    }

    /// Fold a request into the previous one when they arrive close together
    fn merge_rapid_repeat(&self, mut request: Request) -> Request {
        if request.text.trim().is_empty() {
            return request;
        }
        let now = Instant::now();
        let mut last = self
            .last_request
            .entry(request.user_id.clone())
            .or_insert_with(|| LastRequest {
                at: now,
                text: String::new(),
            });

        let merged = match self.config.merge_threshold() {
            Some(threshold)
                if !last.text.is_empty() && now.duration_since(last.at) <= threshold =>
            {
                Some(format!("{}\n{}", last.text, request.text))
            }
            _ => None,
        };
        let body = match merged {
            Some(body) => {
                tracing::info!(request_id = %request.id, "Merging rapid repeat with previous request");
                request.text = format!("{}\n\n{body}", self.config.merge_request_prefix);
                body
            }
            None => request.text.clone(),
        };
        *last = LastRequest { at: now, text: body };
        request
    }

    fn begin_scope(&self) -> (u64, TurnContext) {
        let mut scope = self.scope.lock();
        scope.cancel();
        if self.status() != DialogStatus::Idling {
            tracing::debug!("Superseding running dialog");
            self.processor.performer().interrupt();
        }
        let fresh = TurnContext::new();
        *scope = fresh.clone();
        let dialog_id = self.current_dialog.fetch_add(1, Ordering::SeqCst) + 1;
        (dialog_id, fresh)
    }

    fn reissue_scope(&self, dialog_id: u64) -> Option<TurnContext> {
        let mut scope = self.scope.lock();
        if !self.is_current(dialog_id) {
            return None;
        }
        scope.cancel();
        let fresh = TurnContext::new();
        *scope = fresh.clone();
        Some(fresh)
    }

    fn is_current(&self, dialog_id: u64) -> bool {
        self.current_dialog.load(Ordering::SeqCst) == dialog_id
    }

    fn set_status(&self, dialog_id: u64, status: DialogStatus) {
        self.status.send_if_modified(|current| {
            if !self.is_current(dialog_id) || *current == status {
                return false;
            }
            tracing::debug!(dialog_id, from = ?*current, to = ?status, "Dialog status");
            *current = status;
            true
        });
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("status", &self.status())
            .field("current_dialog", &self.current_dialog())
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

/// Maps turn progress onto the conductor's status and hooks
struct DialogObserver<'a> {
    conductor: &'a Conductor,
    dialog_id: u64,
}

#[async_trait]
impl TurnObserver for DialogObserver<'_> {
    fn on_phase(&self, phase: TurnPhase) {
        self.conductor.set_status(self.dialog_id, phase.into());
    }

    async fn on_request_received(&self, request: &Request, ctx: &TurnContext) {
        if let Err(e) = self.conductor.hooks.on_request_received(request, ctx).await {
            tracing::warn!(error = %e, "on_request_received hook failed");
        }
    }
}
